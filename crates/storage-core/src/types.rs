//! Storage URLs and logical/physical path translation

use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Breaks a URL down into protocol, optional server and path
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-z]+)://([^/]*)(.*)/?$").expect("valid URL pattern"));

/// Per-task parameters handed to the task layer
pub type TaskParameters = serde_json::Map<String, serde_json::Value>;

/// A storage URL of the form `protocol://server/path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUrl {
    pub protocol: String,
    pub server: String,
    pub path: String,
}

impl StorageUrl {
    /// Parse a URL, failing on anything outside the URL grammar
    pub fn parse(url: &str) -> Result<Self> {
        let caps = URL_RE.captures(url).ok_or_else(|| Error::InvalidUrl {
            url: url.to_string(),
        })?;
        Ok(Self {
            protocol: caps[1].to_string(),
            server: caps[2].to_string(),
            path: caps[3].to_string(),
        })
    }

    /// Render with exactly one trailing separator
    pub fn normalized(&self) -> String {
        format!(
            "{}://{}{}/",
            self.protocol,
            self.server,
            self.path.trim_end_matches('/')
        )
    }
}

impl fmt::Display for StorageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}{}", self.protocol, self.server, self.path)
    }
}

/// Strip the trailing separator from a PFN prefix
///
/// The root prefix `/` becomes the empty string, so that logical paths
/// map onto themselves.
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}

/// Translate a logical file name into a physical one under `prefix`
pub fn lfn_to_pfn(prefix: &str, lfn: &str) -> String {
    let relative = lfn.strip_prefix('/').unwrap_or(lfn);
    if prefix.is_empty() {
        format!("/{}", relative)
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, relative)
    } else {
        format!("{}/{}", prefix, relative)
    }
}

/// Translate a physical file name under `prefix` back into a logical one
pub fn pfn_to_lfn(prefix: &str, pfn: &str) -> String {
    if prefix.is_empty() {
        return pfn.to_string();
    }
    pfn.replacen(prefix, "", 1)
}
