//! Connection URL parsing
//!
//! An atom's connection URL has the shape `scheme://host[/path]`. The scheme
//! selects the worker; host and path are the worker's business (an endpoint
//! for webhooks, base64 source text for script atoms).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectUrlError {
    #[error("connection URL '{0}' has no scheme")]
    MissingScheme(String),

    #[error("invalid scheme '{0}'")]
    InvalidScheme(String),

    #[error("connection URL '{0}' has no host")]
    MissingHost(String),

    #[error("malformed connection URL '{url}': {reason}")]
    Malformed { url: String, reason: String },
}

/// A parsed connection URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectUrl {
    /// Lowercased scheme
    pub scheme: String,
    /// Raw host text, case preserved
    pub host: String,
    /// Everything after the host, including the leading `/` (may be empty)
    pub path: String,
}

impl ConnectUrl {
    pub fn parse(raw: &str) -> Result<Self, ConnectUrlError> {
        let raw = raw.trim();
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| ConnectUrlError::MissingScheme(raw.to_string()))?;

        if !is_valid_scheme(scheme) {
            return Err(ConnectUrlError::InvalidScheme(scheme.to_string()));
        }

        let (host, path) = match rest.find(['/', '?', '#']) {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        if host.is_empty() {
            return Err(ConnectUrlError::MissingHost(raw.to_string()));
        }

        url::Url::parse(raw).map_err(|e| ConnectUrlError::Malformed {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_string(),
            path: path.to_string(),
        })
    }

    /// Scheme of `raw` without validating the rest
    pub fn scheme_of(raw: &str) -> Result<String, ConnectUrlError> {
        Self::parse(raw).map(|url| url.scheme)
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_http() {
        let url = ConnectUrl::parse("HTTP://example.com:8080/hooks/run?x=1").unwrap();
        assert_eq!(url.scheme, "http");
        assert_eq!(url.host, "example.com:8080");
        assert_eq!(url.path, "/hooks/run?x=1");
    }

    #[test]
    fn test_parse_script_host_keeps_case() {
        let url = ConnectUrl::parse("lua-code://cmV0dXJuIGZ1bmN0aW9u").unwrap();
        assert_eq!(url.scheme, "lua-code");
        assert_eq!(url.host, "cmV0dXJuIGZ1bmN0aW9u");
        assert_eq!(url.path, "");
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            ConnectUrl::parse("example.com/run"),
            Err(ConnectUrlError::MissingScheme(_))
        ));
        assert!(matches!(
            ConnectUrl::parse("1http://example.com"),
            Err(ConnectUrlError::InvalidScheme(_))
        ));
        assert!(matches!(
            ConnectUrl::parse("http:///run"),
            Err(ConnectUrlError::MissingHost(_))
        ));
        assert!(matches!(
            ConnectUrl::parse("http://exa mple.com"),
            Err(ConnectUrlError::Malformed { .. })
        ));
    }
}
