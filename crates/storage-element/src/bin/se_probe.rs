//! Storage probe entry point
//!
//! Activates the storage described by a JSON configuration and runs one
//! operation on a logical path:
//!
//! ```text
//! se-probe <config.json> <exists|getsize|isdir|isfile|ls|mkdir|rm> <path> [--input]
//! ```
//!
//! With `--input` the operation runs against the input locations instead
//! of the output ones.

use storage_core::StorageOptions;
use storage_element::{FileSize, Registry, StorageConfiguration};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str =
    "usage: se-probe <config.json> <exists|getsize|isdir|isfile|ls|mkdir|rm> <path> [--input]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storage_element=info,storage_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let input = args.iter().any(|a| a == "--input");
    let positional: Vec<&str> = args
        .iter()
        .filter(|a| !a.starts_with("--"))
        .map(String::as_str)
        .collect();

    let &[config, operation, path] = positional.as_slice() else {
        return Err(USAGE.into());
    };

    let options = StorageOptions::from_json_file(config)?;
    let storage = StorageConfiguration::new(options)?;
    storage.activate().await?;

    let registry = storage.registry();
    let _guard = input.then(|| registry.use_defaults());

    tracing::info!(operation, path, input, "Probing storage");
    run(&registry, operation, path).await
}

async fn run(
    registry: &Registry,
    operation: &str,
    path: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    match operation {
        "exists" => println!("{}", registry.exists(path).await?),
        "isdir" => println!("{}", registry.isdir(path).await?),
        "isfile" => println!("{}", registry.isfile(path).await?),
        "getsize" => match registry.getsize(path).await? {
            FileSize::Bytes(size) => println!("{}", size),
            FileSize::Unknown => println!("unknown"),
        },
        "ls" => {
            for entry in registry.list_all(path).await? {
                println!("{}", entry);
            }
        }
        "mkdir" => registry.makedirs(path).await?,
        "rm" => registry.remove(path).await?,
        other => return Err(format!("unknown operation '{}'\n{}", other, USAGE).into()),
    }
    Ok(())
}
