use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::Result;
use serde_json::json;
use storage_core::{Error, StorageOptions, TaskParameters};
use storage_element::{SiteResolver, StorageConfiguration};
use tempfile::TempDir;

// Input and output directories served through file:// URLs
struct Dirs {
    _root: TempDir,
    input: String,
    output: String,
}

fn dirs() -> Result<Dirs> {
    let root = TempDir::new()?;
    let input = root.path().join("data/in");
    let output = root.path().join("data/out");
    std::fs::create_dir_all(&input)?;
    std::fs::create_dir_all(&output)?;
    std::fs::write(input.join("a.txt"), "alpha")?;
    std::fs::write(input.join("b.txt"), "beta")?;

    Ok(Dirs {
        input: format!("file://{}", input.display()),
        output: format!("file://{}", output.display()),
        _root: root,
    })
}

async fn activated(dirs: &Dirs) -> Result<StorageConfiguration> {
    let config = StorageConfiguration::new(StorageOptions {
        input: vec![dirs.input.clone()],
        output: vec![dirs.output.clone()],
        ..Default::default()
    })?;
    config.activate().await?;
    Ok(config)
}

#[tokio::test]
async fn test_input_scope_serves_input_files() -> Result<()> {
    let dirs = dirs()?;
    let config = activated(&dirs).await?;
    let registry = config.registry();

    let _guard = registry.use_defaults();
    assert!(registry.exists("/a.txt").await?);
    assert!(registry.isfile("/a.txt").await?);
    assert_eq!(registry.getsize("/b.txt").await?.bytes(), Some(4));

    let mut entries = registry.list_all("/").await?;
    entries.sort();
    assert_eq!(entries, vec!["/a.txt", "/b.txt"]);
    assert!(entries.iter().all(|e| !e.contains("/data/in")));

    Ok(())
}

#[tokio::test]
async fn test_output_scope_after_activation() -> Result<()> {
    let dirs = dirs()?;
    let config = activated(&dirs).await?;
    let registry = config.registry();

    assert!(!registry.exists("/a.txt").await?);
    registry.makedirs("/merged/run1").await?;
    assert!(registry.isdir("/merged/run1").await?);
    assert_eq!(registry.list_all("/").await?, vec!["/merged"]);

    registry.remove("/merged").await?;
    assert!(!registry.exists("/merged").await?);

    Ok(())
}

#[tokio::test]
async fn test_default_scope_restores_after_error() -> Result<()> {
    let dirs = dirs()?;
    let config = activated(&dirs).await?;
    let registry = config.registry();
    let before = registry.backends();

    let result = registry
        .with_defaults(async { registry.getsize("/missing.txt").await })
        .await;
    assert!(matches!(result, Err(Error::NoWorkingBackend { .. })));
    assert_eq!(registry.backends(), before);

    let found = registry.with_defaults(registry.isfile("/a.txt")).await?;
    assert!(found);
    assert_eq!(registry.backends(), before);

    Ok(())
}

#[tokio::test]
async fn test_missing_path_reports_operation() -> Result<()> {
    let dirs = dirs()?;
    let config = activated(&dirs).await?;

    match config.registry().getsize("/nowhere.root").await {
        Err(Error::NoWorkingBackend { operation, path }) => {
            assert_eq!(operation, "getsize");
            assert_eq!(path, "/nowhere.root");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    Ok(())
}

#[tokio::test]
async fn test_preprocess_sets_task_parameters() -> Result<()> {
    let dirs = dirs()?;
    let config = activated(&dirs).await?;
    let input = format!("{}/", dirs.input);
    let output = format!("{}/", dirs.output);

    let mut params = TaskParameters::new();
    params.insert("executable".to_string(), json!("cmsRun"));
    config.preprocess(&mut params, false);

    assert_eq!(params["input"], json!([input]));
    assert_eq!(params["output"], json!([output]));
    assert_eq!(params["disable streaming"], json!(false));
    assert_eq!(params["executable"], json!("cmsRun"));

    config.preprocess(&mut params, true);
    assert_eq!(params["input"], json!([output]));

    Ok(())
}

#[tokio::test]
async fn test_local_lookup() -> Result<()> {
    let dirs = dirs()?;
    let config = activated(&dirs).await?;

    let path = config.local("b.txt")?;
    assert_eq!(std::fs::read_to_string(path)?, "beta");
    assert!(matches!(
        config.local("c.txt"),
        Err(Error::NoLocalAccess { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_site_labels_resolve_once() -> Result<()> {
    let siteconf = TempDir::new()?;
    let phedex = siteconf.path().join("T3_US_NotreDame/PhEDEx");
    std::fs::create_dir_all(&phedex)?;
    std::fs::write(
        phedex.join("storage.xml"),
        r#"<storage-mapping>
  <lfn-to-pfn protocol="xrootd" destination-match=".*" path-match="/+store/(.*)" result="root://xrootd.unl.edu//store/$1"/>
</storage-mapping>"#,
    )?;

    let options = StorageOptions::from_json_str(
        &json!({
            "input": ["root://T3_US_NotreDame/store/user/spam"],
            "output": ["chirp://earth.crc.nd.edu:9666/store/user"],
            "shuffle inputs": true,
            "backends": { "siteconf": siteconf.path() },
        })
        .to_string(),
    )?;
    let config = StorageConfiguration::new(options)?;

    let resolved = config.inputs();
    assert_eq!(resolved, vec!["root://xrootd.unl.edu//store/user/spam/"]);

    let resolver = SiteResolver::new(siteconf.path());
    for url in resolved.iter().chain(config.outputs().iter()) {
        assert_eq!(&resolver.expand(url)?, url);
    }

    Ok(())
}

#[tokio::test]
async fn test_srm_removal_is_safe() -> Result<()> {
    let tools = TempDir::new()?;
    install(tools.path(), "lcg-ls", "#!/bin/sh\necho 'no such file' >&2\nexit 1\n")?;
    install(tools.path(), "lcg-del", "#!/bin/sh\necho 'no such file' >&2\nexit 1\n")?;

    let options = StorageOptions::from_json_str(
        &json!({
            "output": ["srm://se.example.edu:8443/srm/v2/server?SFN=/hadoop/store"],
            "backends": { "srm_tool_prefix": format!("{}/lcg-", tools.path().display()) },
        })
        .to_string(),
    )?;
    let config = StorageConfiguration::new(options)?;
    config.activate().await?;

    let registry = config.registry();
    assert!(!registry.exists("/gone.root").await?);
    registry.remove("/gone.root").await?;

    Ok(())
}

fn install(dir: &Path, name: &str, script: &str) -> Result<()> {
    let path = dir.join(name);
    std::fs::write(&path, script)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}
