//! Storage configuration types

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Storage options as found in a job manager configuration
///
/// Keys mirror the options of the job configuration file, so a
/// configuration section can be deserialized directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageOptions {
    /// Input storage URLs, in order of preference
    #[serde(default)]
    pub input: Vec<String>,

    /// Output storage URLs, in order of preference
    #[serde(default)]
    pub output: Vec<String>,

    /// Delegate input transfers to the task layer
    #[serde(rename = "use work queue for inputs", default)]
    pub transfer_inputs: bool,

    /// Delegate output transfers to the task layer
    #[serde(rename = "use work queue for outputs", default)]
    pub transfer_outputs: bool,

    /// Shuffle input URLs for every task
    #[serde(rename = "shuffle inputs", default)]
    pub shuffle_inputs: bool,

    /// Shuffle output URLs for every task
    #[serde(rename = "shuffle outputs", default)]
    pub shuffle_outputs: bool,

    /// Tell tasks not to stream their inputs
    #[serde(rename = "disable input streaming", default)]
    pub disable_streaming: bool,

    /// Backend tunables
    #[serde(default)]
    pub backends: BackendSettings,
}

impl StorageOptions {
    /// Parse options from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Parse options from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let options = Self::from_json_str(&content)?;
        debug!(
            path = %path.display(),
            inputs = options.input.len(),
            outputs = options.output.len(),
            "Loaded storage options"
        );
        Ok(options)
    }
}

/// Backend tunables
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendSettings {
    /// Root of the per-site configuration tree
    pub siteconf: String,

    /// Connect and per-command timeout for Chirp servers
    #[serde(rename = "chirp_timeout_ms", with = "millis_serde")]
    pub chirp_timeout: Duration,

    /// Chirp authentication methods, tried in order
    pub chirp_auth: Vec<String>,

    /// Prefix of the SRM command line tools
    pub srm_tool_prefix: String,

    /// HDFS command line client
    pub hdfs_command: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            siteconf: "/cvmfs/cms.cern.ch/SITECONF".to_string(),
            chirp_timeout: Duration::from_secs(10),
            chirp_auth: vec!["hostname".to_string(), "address".to_string()],
            srm_tool_prefix: "lcg-".to_string(),
            hdfs_command: "hdfs".to_string(),
        }
    }
}

/// Duration serialization as integer milliseconds
mod millis_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = StorageOptions::default();
        assert!(options.input.is_empty());
        assert!(!options.transfer_inputs);
        assert!(!options.shuffle_outputs);
        assert_eq!(options.backends.srm_tool_prefix, "lcg-");
        assert_eq!(options.backends.chirp_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_options_from_job_keys() {
        let options = StorageOptions::from_json_str(
            r#"{
                "input": ["file:///data/in"],
                "output": ["chirp://earth.crc.nd.edu:9666/store"],
                "use work queue for inputs": true,
                "shuffle outputs": true,
                "disable input streaming": true,
                "backends": {"chirp_timeout_ms": 2500}
            }"#,
        )
        .unwrap();

        assert_eq!(options.input, vec!["file:///data/in".to_string()]);
        assert_eq!(options.output.len(), 1);
        assert!(options.transfer_inputs);
        assert!(!options.transfer_outputs);
        assert!(!options.shuffle_inputs);
        assert!(options.shuffle_outputs);
        assert!(options.disable_streaming);
        assert_eq!(options.backends.chirp_timeout, Duration::from_millis(2500));
        assert_eq!(options.backends.hdfs_command, "hdfs");
    }

    #[test]
    fn test_options_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = StorageOptions::from_json_file(dir.path().join("absent.json"));
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_config_serialization() {
        let options = StorageOptions {
            input: vec!["file:///a".to_string()],
            shuffle_inputs: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert!(json.contains("\"shuffle inputs\":true"));
        let parsed = StorageOptions::from_json_str(&json).unwrap();
        assert_eq!(parsed, options);
    }
}
