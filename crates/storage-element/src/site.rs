//! Site label resolution
//!
//! Storage URLs may name a tiered computing site instead of a server, as in
//! `root://T3_US_NotreDame/store/user`. Such URLs are rewritten with the
//! `lfn-to-pfn` rules of the site's `PhEDEx/storage.xml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::{Captures, Regex};
use storage_core::{Error, Result, StorageUrl};
use tracing::debug;

/// Tiered computing site, e.g. `T2_CH_CERN` or `T3_US_NotreDame`
static SITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^T[0123]_(?:[A-Z]{2}_)?[A-Za-z0-9_\-]+$").expect("valid site pattern")
});

/// `$1`-style backreference in a rule result
static BACKREF_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\d+)").expect("valid backreference pattern"));

/// Map protocol shorthands to the protocol names used in site rules
pub fn expand_protocol(shorthand: &str) -> Option<&'static str> {
    match shorthand {
        "srm" => Some("srmv2"),
        "root" => Some("xrootd"),
        _ => None,
    }
}

/// Whether `server` is a site label rather than a host
pub fn is_site(server: &str) -> bool {
    SITE_RE.is_match(server)
}

/// One `lfn-to-pfn` record of a site rule file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRule {
    pub protocol: String,
    pub destination_match: Option<String>,
    pub path_match: Option<String>,
    pub result: String,
}

impl SiteRule {
    /// Path pattern used for rewriting; rules without one take the whole path
    pub fn pattern(&self) -> &str {
        self.path_match.as_deref().unwrap_or("(.*)")
    }

    /// Result template in the regex crate's replacement syntax
    pub fn template(&self) -> String {
        BACKREF_RE
            .replace_all(&self.result, |caps: &Captures| format!("${{{}}}", &caps[1]))
            .into_owned()
    }

    fn applies(&self, protocol: &str, site: &str, path: &str) -> Result<bool> {
        if self.protocol != protocol {
            return Ok(false);
        }
        if let Some(pattern) = &self.destination_match {
            if !anchored(pattern)?.is_match(site) {
                return Ok(false);
            }
        }
        if !path.is_empty() {
            if let Some(pattern) = &self.path_match {
                if !anchored(pattern)?.is_match(path) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Compile a pattern that must match at the start of the input
fn anchored(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("^(?:{})", pattern))?)
}

/// Parse the `lfn-to-pfn` records of a site rule file
pub fn parse_rules(xml: &str) -> Result<Vec<SiteRule>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut rules = Vec::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == b"lfn-to-pfn" {
                    rules.push(parse_rule(e)?);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(rules)
}

fn parse_rule(element: &BytesStart<'_>) -> Result<SiteRule> {
    let mut protocol = None;
    let mut destination_match = None;
    let mut path_match = None;
    let mut result = None;

    for attr in element.attributes() {
        let attr = attr.map_err(|e| Error::Xml(e.to_string()))?;
        let value = attr
            .unescape_value()
            .map_err(|e| Error::Xml(e.to_string()))?
            .into_owned();
        match attr.key.as_ref() {
            b"protocol" => protocol = Some(value),
            b"destination-match" => destination_match = Some(value),
            b"path-match" => path_match = Some(value),
            b"result" => result = Some(value),
            _ => {}
        }
    }

    match (protocol, result) {
        (Some(protocol), Some(result)) => Ok(SiteRule {
            protocol,
            destination_match,
            path_match,
            result,
        }),
        _ => Err(Error::Xml(
            "lfn-to-pfn rule without protocol or result".to_string(),
        )),
    }
}

/// Resolves site labels in storage URLs
#[derive(Debug)]
pub struct SiteResolver {
    /// Root of the per-site configuration tree
    siteconf: PathBuf,

    /// Parsed rule files by site
    rules: DashMap<String, Arc<Vec<SiteRule>>>,
}

impl SiteResolver {
    pub fn new(siteconf: impl Into<PathBuf>) -> Self {
        Self {
            siteconf: siteconf.into(),
            rules: DashMap::new(),
        }
    }

    /// Location of the rule file of `site`
    pub fn rule_file(&self, site: &str) -> PathBuf {
        self.siteconf.join(site).join("PhEDEx").join("storage.xml")
    }

    fn rules(&self, site: &str) -> Result<Arc<Vec<SiteRule>>> {
        if let Some(rules) = self.rules.get(site) {
            return Ok(Arc::clone(&rules));
        }

        let file = self.rule_file(site);
        let rules = Arc::new(load_rules(&file)?);
        debug!(site, file = %file.display(), count = rules.len(), "Loaded site rules");

        self.rules.insert(site.to_string(), Arc::clone(&rules));
        Ok(rules)
    }

    /// Find the path pattern and result template translating `path` at `site`
    pub fn find_match(&self, protocol: &str, site: &str, path: &str) -> Result<(String, String)> {
        for rule in self.rules(site)?.iter() {
            if rule.applies(protocol, site, path)? {
                return Ok((rule.pattern().to_string(), rule.template()));
            }
        }

        Err(Error::SiteRuleNotFound {
            protocol: protocol.to_string(),
            site: site.to_string(),
            path: path.to_string(),
        })
    }

    /// Expand a site label in `url` into a concrete server URL
    ///
    /// Results are normalized to a single trailing separator, so expanding
    /// an expanded URL returns it unchanged.
    pub fn expand(&self, url: &str) -> Result<String> {
        let parsed = StorageUrl::parse(url)?;

        if is_site(&parsed.server) {
            if let Some(protocol) = expand_protocol(&parsed.protocol) {
                let (pattern, template) = self.find_match(protocol, &parsed.server, &parsed.path)?;
                let expanded = Regex::new(&pattern)?
                    .replace_all(&parsed.path, template.as_str())
                    .into_owned();
                let expanded = StorageUrl::parse(&expanded)
                    .map(|u| u.normalized())
                    .unwrap_or(expanded);
                debug!(%url, %expanded, "Expanded site label");
                return Ok(expanded);
            }
        }

        Ok(parsed.normalized())
    }
}

fn load_rules(file: &Path) -> Result<Vec<SiteRule>> {
    let xml = std::fs::read_to_string(file).map_err(|e| Error::InvalidConfig {
        message: format!("cannot read site rules {}: {}", file.display(), e),
    })?;
    parse_rules(&xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STORAGE_XML: &str = r#"<storage-mapping>
  <lfn-to-pfn protocol="direct" destination-match=".*" path-match="/+store/(.*)" result="/hadoop/store/$1"/>
  <lfn-to-pfn protocol="srmv2" destination-match=".*" path-match="/+store/(.*)"
              result="srm://se.example.edu:8443/srm/v2/server?SFN=/hadoop/store/$1"/>
  <lfn-to-pfn protocol="xrootd" destination-match="T2_XX_Other" path-match="/+store/(.*)" result="root://other.example.org//store/$1"/>
  <lfn-to-pfn protocol="xrootd" destination-match=".*" path-match="/+store/(.*)" result="root://xrootd.unl.edu//store/$1"/>
  <pfn-to-lfn protocol="xrootd" path-match="root://xrootd.unl.edu//store/(.*)" result="/store/$1"/>
</storage-mapping>
"#;

    fn setup() -> (TempDir, SiteResolver) {
        let siteconf = TempDir::new().unwrap();
        let dir = siteconf.path().join("T3_US_NotreDame/PhEDEx");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("storage.xml"), STORAGE_XML).unwrap();
        let resolver = SiteResolver::new(siteconf.path());
        (siteconf, resolver)
    }

    #[test]
    fn test_site_pattern() {
        assert!(is_site("T3_US_NotreDame"));
        assert!(is_site("T2_CH_CERN"));
        assert!(is_site("T1_Something"));
        assert!(!is_site("T4_US_Nowhere"));
        assert!(!is_site("earth.crc.nd.edu"));
        assert!(!is_site(""));
    }

    #[test]
    fn test_parse_rules() {
        let rules = parse_rules(STORAGE_XML).unwrap();
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0].protocol, "direct");
        assert_eq!(rules[3].result, "root://xrootd.unl.edu//store/$1");
        assert_eq!(rules[3].template(), "root://xrootd.unl.edu//store/${1}");
    }

    #[test]
    fn test_parse_rules_rejects_incomplete_record() {
        let result = parse_rules(r#"<storage-mapping><lfn-to-pfn protocol="direct"/></storage-mapping>"#);
        assert!(matches!(result, Err(Error::Xml(_))));
    }

    #[test]
    fn test_find_match() {
        let (_siteconf, resolver) = setup();
        let (pattern, template) = resolver
            .find_match("xrootd", "T3_US_NotreDame", "/store/user/spam/ham/eggs")
            .unwrap();
        assert_eq!(pattern, "/+store/(.*)");
        assert_eq!(template, "root://xrootd.unl.edu//store/${1}");
    }

    #[test]
    fn test_expand_site() {
        let (_siteconf, resolver) = setup();

        assert_eq!(
            resolver
                .expand("root://T3_US_NotreDame/store/user/spam/ham/eggs")
                .unwrap(),
            "root://xrootd.unl.edu//store/user/spam/ham/eggs/"
        );
        assert_eq!(
            resolver.expand("srm://T3_US_NotreDame/store/user/spam").unwrap(),
            "srm://se.example.edu:8443/srm/v2/server?SFN=/hadoop/store/user/spam/"
        );
    }

    #[test]
    fn test_expand_concrete_url_is_idempotent() {
        let (_siteconf, resolver) = setup();

        for url in [
            "file:///data/in",
            "file:///data/in/",
            "chirp://earth.crc.nd.edu:9666/store/user",
            "hdfs:///hadoop/store",
        ] {
            let once = resolver.expand(url).unwrap();
            assert!(once.ends_with('/'));
            assert_eq!(resolver.expand(&once).unwrap(), once);
        }
    }

    #[test]
    fn test_expand_without_protocol_shorthand() {
        let (_siteconf, resolver) = setup();

        // no shorthand, so the site label is left alone
        assert_eq!(
            resolver.expand("file://T3_US_NotreDame/store").unwrap(),
            "file://T3_US_NotreDame/store/"
        );
    }

    #[test]
    fn test_missing_rule_fails() {
        let (_siteconf, resolver) = setup();

        let result = resolver.expand("root://T3_US_NotreDame/user/elsewhere");
        assert!(matches!(result, Err(Error::SiteRuleNotFound { .. })));
    }

    #[test]
    fn test_missing_site_file_fails() {
        let (_siteconf, resolver) = setup();

        let result = resolver.expand("root://T2_XX_Unknown/store/user");
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_rules_are_cached() {
        let (siteconf, resolver) = setup();
        resolver.expand("root://T3_US_NotreDame/store/a").unwrap();

        std::fs::remove_dir_all(siteconf.path().join("T3_US_NotreDame")).unwrap();
        assert_eq!(
            resolver.expand("root://T3_US_NotreDame/store/b").unwrap(),
            "root://xrootd.unl.edu//store/b/"
        );
    }
}
