//! Storage element - Backend-agnostic file access for task data
//!
//! Provides async operations on logical paths, dispatched over an ordered
//! set of storage backends:
//! - Local filesystem (`file://`)
//! - Chirp servers (`chirp://`)
//! - SRM grid storage through the `lcg-*` tools (`srm://`)
//! - HDFS through the `hdfs` client (`hdfs://`, with `hdfs` feature)
//!
//! # Example
//!
//! ```no_run
//! use storage_core::StorageOptions;
//! use storage_element::StorageConfiguration;
//!
//! # async fn example() -> storage_core::Result<()> {
//! let options = StorageOptions::from_json_file("storage.json")?;
//! let config = StorageConfiguration::new(options)?;
//! config.activate().await?;
//!
//! let registry = config.registry();
//! registry.makedirs("/merged").await?;
//! let input = registry.with_defaults(registry.isfile("/a.txt")).await?;
//! # Ok(())
//! # }
//! ```

mod backend;
mod chirp;
mod command;
mod configuration;
mod local;
mod registry;
mod site;
mod srm;

#[cfg(feature = "hdfs")]
mod hdfs;

pub use backend::{FileSize, PathStream, StorageBackend};
pub use chirp::{ChirpClient, ChirpStat, ChirpStorage};
pub use command::{execute, execute_checked, CommandOutput};
pub use configuration::StorageConfiguration;
pub use local::LocalStorage;
pub use registry::{DefaultsGuard, Registry, RegistryHandle};
pub use site::{expand_protocol, is_site, parse_rules, SiteResolver, SiteRule};
pub use srm::SrmStorage;

#[cfg(feature = "hdfs")]
pub use hdfs::HdfsStorage;
