//! Connection descriptor parsing.
//!
//! A descriptor looks like `scheme://host:port?username=u&password=p&key=app`.
//! The scheme is kept exactly as written so registry lookups stay
//! case-sensitive; everything after it is parsed with `url`.

use std::fmt;
use url::Url;

use crate::source::types::{SourceError, SourceResult};

const REDACTED: &str = "***";

/// A parsed `scheme://host:port?query` descriptor.
#[derive(Clone, PartialEq, Eq)]
pub struct Descriptor {
    raw: String,
    scheme: String,
    url: Url,
}

impl Descriptor {
    /// Parse a descriptor string.
    pub fn parse(raw: &str) -> SourceResult<Self> {
        let raw = raw.trim();
        let invalid = |reason: &str| SourceError::InvalidDescriptor {
            descriptor: redact(raw),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(invalid("descriptor is empty"));
        }

        let (scheme, _) = raw
            .split_once("://")
            .ok_or_else(|| invalid("missing '://' after scheme"))?;
        if scheme.is_empty() {
            return Err(invalid("scheme is empty"));
        }

        let url = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            raw: raw.to_string(),
            scheme: scheme.to_string(),
            url,
        })
    }

    /// Scheme as written in the descriptor (case preserved).
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str().filter(|h| !h.is_empty())
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// `host:port` when a port is present, otherwise the bare host.
    pub fn endpoint(&self) -> Option<String> {
        let host = self.host()?;
        Some(match self.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// First value of a query parameter, if present and non-empty.
    pub fn param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty())
    }

    /// Underlying parsed URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Descriptor text with the `password` parameter masked, for logs.
    pub fn redacted(&self) -> String {
        redact(&self.raw)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Descriptor").field(&self.redacted()).finish()
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// Mask `password=...` in a raw descriptor string.
pub fn redact(raw: &str) -> String {
    let Some((base, query)) = raw.split_once('?') else {
        return raw.to_string();
    };
    let masked: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some(("password", _)) => format!("password={}", REDACTED),
            _ => pair.to_string(),
        })
        .collect();
    format!("{}?{}", base, masked.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_descriptor() {
        let d = Descriptor::parse("etcd://127.0.0.1:2379?username=root&password=s3cret&key=app/config")
            .unwrap();
        assert_eq!(d.scheme(), "etcd");
        assert_eq!(d.host(), Some("127.0.0.1"));
        assert_eq!(d.port(), Some(2379));
        assert_eq!(d.endpoint().as_deref(), Some("127.0.0.1:2379"));
        assert_eq!(d.param("username").as_deref(), Some("root"));
        assert_eq!(d.param("key").as_deref(), Some("app/config"));
        assert_eq!(d.param("missing"), None);
    }

    #[test]
    fn test_scheme_case_preserved() {
        let d = Descriptor::parse("ETCD://localhost:2379?key=a").unwrap();
        assert_eq!(d.scheme(), "ETCD");
    }

    #[test]
    fn test_malformed_descriptors() {
        assert!(Descriptor::parse("").is_err());
        assert!(Descriptor::parse("   ").is_err());
        assert!(Descriptor::parse("localhost:2379").is_err());
        assert!(Descriptor::parse("://host").is_err());
        assert!(Descriptor::parse("etcd://[::1").is_err());
    }

    #[test]
    fn test_password_redacted() {
        let d = Descriptor::parse("etcd://h:1?username=u&password=hunter2&key=k").unwrap();
        let shown = d.to_string();
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("password=***"));
        assert!(!format!("{:?}", d).contains("hunter2"));
    }

    #[test]
    fn test_file_descriptor_path() {
        let d = Descriptor::parse("file:///etc/app/config.toml").unwrap();
        assert_eq!(d.scheme(), "file");
        assert_eq!(d.path(), "/etc/app/config.toml");
        assert_eq!(d.host(), None);
    }
}
