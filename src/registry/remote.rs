//! Remote address parsing

use crate::config::DEFAULT_REGISTRY_PORT;
use crate::error::{RamaError, Result};
use std::fmt;

/// Where a push or pull goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAddress {
    /// A registry server, e.g. `http://host:5000`
    Http { base_url: String },
    /// A directory reachable over scp/ssh, e.g. `user@host:/srv/images`
    Scp { host: String, path: String },
}

impl RemoteAddress {
    /// Parse a remote address:
    ///
    /// - `http://host:port` or `https://...` and bare `host:port` name a
    ///   registry server; a bare `host` uses the default registry port
    /// - `host:/path`, `user@host:/path` and `host:relative/path` name a
    ///   remote directory copied with scp
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid(input, "empty address"));
        }

        if input.starts_with("http://") || input.starts_with("https://") {
            let base_url = input.trim_end_matches('/').to_string();
            let host = base_url.split_once("://").map(|(_, rest)| rest).unwrap_or("");
            if host.is_empty() {
                return Err(invalid(input, "missing host"));
            }
            return Ok(RemoteAddress::Http { base_url });
        }
        if input.contains("://") {
            return Err(invalid(input, "unsupported scheme"));
        }

        match input.split_once(':') {
            None => Ok(RemoteAddress::Http {
                base_url: format!("http://{}:{}", input, DEFAULT_REGISTRY_PORT),
            }),
            Some((host, _)) if host.is_empty() => Err(invalid(input, "missing host")),
            Some((_, rest)) if rest.is_empty() => Err(invalid(input, "missing port or path")),
            Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => {
                port.parse::<u16>()
                    .map_err(|_| invalid(input, "port out of range"))?;
                Ok(RemoteAddress::Http {
                    base_url: format!("http://{}:{}", host, port),
                })
            }
            Some((host, path)) => Ok(RemoteAddress::Scp {
                host: host.to_string(),
                path: path.trim_end_matches('/').to_string(),
            }),
        }
    }
}

impl fmt::Display for RemoteAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAddress::Http { base_url } => write!(f, "{}", base_url),
            RemoteAddress::Scp { host, path } => write!(f, "{}:{}", host, path),
        }
    }
}

fn invalid(input: &str, reason: &str) -> RamaError {
    RamaError::Transfer(format!("Invalid remote address {:?}: {}", input, reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(url: &str) -> RemoteAddress {
        RemoteAddress::Http {
            base_url: url.to_string(),
        }
    }

    #[test]
    fn test_parse_http_forms() {
        assert_eq!(
            RemoteAddress::parse("http://reg.local:5000/").unwrap(),
            http("http://reg.local:5000")
        );
        assert_eq!(
            RemoteAddress::parse("https://reg.example.com").unwrap(),
            http("https://reg.example.com")
        );
        assert_eq!(
            RemoteAddress::parse("10.0.0.2:5050").unwrap(),
            http("http://10.0.0.2:5050")
        );
        assert_eq!(
            RemoteAddress::parse("reg.local").unwrap(),
            http("http://reg.local:5000")
        );
    }

    #[test]
    fn test_parse_scp_forms() {
        assert_eq!(
            RemoteAddress::parse("deploy@web1:/srv/images/").unwrap(),
            RemoteAddress::Scp {
                host: "deploy@web1".to_string(),
                path: "/srv/images".to_string(),
            }
        );
        assert_eq!(
            RemoteAddress::parse("web1:images").unwrap(),
            RemoteAddress::Scp {
                host: "web1".to_string(),
                path: "images".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["", ":5000", "host:", "ftp://host/x", "http://", "host:99999"] {
            assert!(
                matches!(RemoteAddress::parse(input), Err(RamaError::Transfer(_))),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display() {
        let remote = RemoteAddress::parse("deploy@web1:/srv/images").unwrap();
        assert_eq!(remote.to_string(), "deploy@web1:/srv/images");
    }
}
