//! Storage configuration
//!
//! Owns the resolved input and output URLs, activates the matching
//! backends in a [`Registry`] and derives the storage parameters sent with
//! every task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serde_json::Value;
use storage_core::{BackendSettings, Error, Result, StorageOptions, StorageUrl, TaskParameters};
use tracing::{debug, info, warn};

use crate::chirp::ChirpStorage;
use crate::local::LocalStorage;
use crate::registry::{Registry, RegistryHandle};
use crate::site::SiteResolver;
use crate::srm::SrmStorage;
use crate::StorageBackend;

/// Container for storage element configuration
pub struct StorageConfiguration {
    input: Mutex<Vec<String>>,
    output: Mutex<Vec<String>>,

    transfer_inputs: bool,
    transfer_outputs: bool,
    shuffle_inputs: bool,
    shuffle_outputs: bool,
    disable_streaming: bool,

    settings: BackendSettings,
    registry: RegistryHandle,
}

impl StorageConfiguration {
    /// Resolve all configured URLs
    ///
    /// Fails on the first URL that is malformed or names a site without a
    /// matching rule.
    pub fn new(options: StorageOptions) -> Result<Self> {
        let resolver = SiteResolver::new(&options.backends.siteconf);
        let expand = |urls: &[String]| -> Result<Vec<String>> {
            urls.iter().map(|url| resolver.expand(url)).collect()
        };

        let input = expand(&options.input)?;
        let output = expand(&options.output)?;

        debug!(?input, "using input location");
        debug!(?output, "using output location");

        Ok(Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
            transfer_inputs: options.transfer_inputs,
            transfer_outputs: options.transfer_outputs,
            shuffle_inputs: options.shuffle_inputs,
            shuffle_outputs: options.shuffle_outputs,
            disable_streaming: options.disable_streaming,
            settings: options.backends,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Resolved input URLs, in their current order
    pub fn inputs(&self) -> Vec<String> {
        self.input.lock().clone()
    }

    /// Resolved output URLs, in their current order
    pub fn outputs(&self) -> Vec<String> {
        self.output.lock().clone()
    }

    /// Registry populated by [`StorageConfiguration::activate`]
    pub fn registry(&self) -> RegistryHandle {
        Arc::clone(&self.registry)
    }

    /// Whether input files are transferred by the task layer
    pub fn transfer_inputs(&self) -> bool {
        self.transfer_inputs
    }

    /// Whether output files are transferred by the task layer
    pub fn transfer_outputs(&self) -> bool {
        self.transfer_outputs
    }

    /// Local path of `filename` under one of the `file://` URLs
    pub fn local(&self, filename: &str) -> Result<PathBuf> {
        let urls: Vec<String> = self.inputs().into_iter().chain(self.outputs()).collect();

        for url in &urls {
            let parsed = StorageUrl::parse(url)?;
            if parsed.protocol != "file" {
                continue;
            }

            let candidate = Path::new(&parsed.path).join(filename.trim_start_matches('/'));
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        Err(Error::NoLocalAccess {
            filename: filename.to_string(),
        })
    }

    /// Set up file system access
    ///
    /// Registers the input backends and stores them as the registry's
    /// default set, then replaces them with the output backends. Afterwards
    /// the registry serves output paths; input paths are reachable through
    /// [`Registry::use_defaults`]. On failure both sets are left empty.
    pub async fn activate(&self) -> Result<()> {
        if let Err(e) = self.populate().await {
            self.registry.reset();
            self.registry.store();
            return Err(e);
        }

        info!(
            backends = ?self.registry.backends(),
            "Activated output storage"
        );
        Ok(())
    }

    async fn populate(&self) -> Result<()> {
        self.registry.reset();
        self.initialize("input", &self.inputs()).await?;

        self.registry.store();
        self.registry.reset();
        self.initialize("output", &self.outputs()).await
    }

    async fn initialize(&self, direction: &str, urls: &[String]) -> Result<()> {
        let mut registered = 0;

        for url in urls {
            match self.create_backend(url).await? {
                Some(backend) => {
                    self.registry.register(backend);
                    registered += 1;
                }
                None => warn!(%url, direction, "implementation of master access missing"),
            }
        }

        if registered == 0 && !urls.is_empty() {
            return Err(Error::InvalidConfig {
                message: format!("no usable {} storage among {:?}", direction, urls),
            });
        }
        Ok(())
    }

    async fn create_backend(&self, url: &str) -> Result<Option<Arc<dyn StorageBackend>>> {
        let parsed = StorageUrl::parse(url)?;

        let backend: Arc<dyn StorageBackend> = match parsed.protocol.as_str() {
            "file" => Arc::new(LocalStorage::new(&parsed.path)),
            "chirp" => Arc::new(ChirpStorage::connect(&parsed.server, &parsed.path, &self.settings).await?),
            "hdfs" => self.hdfs_backend(&parsed)?,
            "srm" => Arc::new(SrmStorage::new(url, self.settings.srm_tool_prefix.clone())?),
            _ => return Ok(None),
        };
        Ok(Some(backend))
    }

    #[cfg(feature = "hdfs")]
    fn hdfs_backend(&self, url: &StorageUrl) -> Result<Arc<dyn StorageBackend>> {
        Ok(Arc::new(crate::hdfs::HdfsStorage::new(
            &url.server,
            &url.path,
            self.settings.hdfs_command.clone(),
        )))
    }

    #[cfg(not(feature = "hdfs"))]
    fn hdfs_backend(&self, url: &StorageUrl) -> Result<Arc<dyn StorageBackend>> {
        Err(Error::BackendUnsupported {
            protocol: url.protocol.clone(),
        })
    }

    /// Adjust the storage transfer parameters sent with a task
    ///
    /// Sets `input`, `output` and `disable streaming`. Merge tasks read
    /// from the output locations. Shuffled orders persist across calls.
    pub fn preprocess(&self, parameters: &mut TaskParameters, merge: bool) {
        let mut input = self.input.lock();
        let mut output = self.output.lock();
        let mut rng = rand::thread_rng();

        if self.shuffle_inputs {
            input.shuffle(&mut rng);
        }
        if self.shuffle_outputs || (self.shuffle_inputs && merge) {
            output.shuffle(&mut rng);
        }

        let sources = if merge { &*output } else { &*input };
        parameters.insert("input".to_string(), Value::from(sources.clone()));
        parameters.insert("output".to_string(), Value::from(output.clone()));
        parameters.insert(
            "disable streaming".to_string(),
            Value::Bool(self.disable_streaming),
        );
    }
}
