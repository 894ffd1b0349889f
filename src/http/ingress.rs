//! Publish/subscribe request validation.
//!
//! Rejects everything but http/https, rejects fragments, rejects non-default
//! ports outside dev mode, and blocks requests aimed at loopback, private, or
//! link-local addresses unless the hub is running in dev mode -- without the
//! dev-mode escape hatch, nothing could ever point a topic or callback at a
//! local test server.

use crate::error::Error;
use std::net::IpAddr;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Sync,
    Async,
}

/// `hub.verify` may carry a comma-separated preference list (e.g.
/// `sync,async`); the first token we recognize wins.
pub fn parse_verify_mode(raw: &str) -> Result<VerifyMode, Error> {
    for token in raw.split(',') {
        match token.trim() {
            "sync" => return Ok(VerifyMode::Sync),
            "async" => return Ok(VerifyMode::Async),
            _ => {}
        }
    }
    Err(Error::Validation(format!(
        "unrecognized hub.verify value: {raw}"
    )))
}

pub fn validate_url(raw: &str, dev_mode: bool) -> Result<Url, Error> {
    let url = Url::parse(raw).map_err(|e| Error::Validation(format!("invalid URL {raw}: {e}")))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::Validation(format!("unsupported scheme in {raw}")));
    }
    if url.fragment().is_some() {
        return Err(Error::Validation(format!(
            "URL must not contain a fragment: {raw}"
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::Validation(format!("URL has no host: {raw}")));
    }

    if !dev_mode {
        reject_private_target(&url)?;
        reject_nonstandard_port(&url)?;
    }

    Ok(url)
}

/// `Url` normalizes away an explicit port that matches the scheme's default
/// (`:80` on http, `:443` on https), so any port still present here is by
/// definition non-default. Outside dev mode a publisher or subscriber has no
/// business asking the hub to dial a nonstandard port.
fn reject_nonstandard_port(url: &Url) -> Result<(), Error> {
    if let Some(port) = url.port() {
        return Err(Error::Validation(format!(
            "URL uses a non-default port outside dev mode: {port}"
        )));
    }
    Ok(())
}

fn reject_private_target(url: &Url) -> Result<(), Error> {
    let host = url.host_str().unwrap_or_default();
    if host.eq_ignore_ascii_case("localhost") {
        return Err(Error::Validation("URL targets localhost".into()));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        let blocked = match ip {
            IpAddr::V4(v4) => {
                v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
            }
            IpAddr::V6(v6) => {
                v6.is_loopback()
                    || v6.is_unspecified()
                    || (v6.segments()[0] & 0xfe00) == 0xfc00 // unique local
            }
        };
        if blocked {
            return Err(Error::Validation(format!(
                "URL targets a disallowed address: {ip}"
            )));
        }
    }

    Ok(())
}

pub fn validate_verify_token(raw: &str) -> Result<&str, Error> {
    if raw.is_empty() {
        return Err(Error::Validation("hub.verify_token is required".into()));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_https_url() {
        assert!(validate_url("https://example.com/feed", false).is_ok());
    }

    #[test]
    fn rejects_non_http_scheme() {
        assert!(validate_url("ftp://example.com/feed", false).is_err());
    }

    #[test]
    fn rejects_fragment() {
        assert!(validate_url("https://example.com/feed#frag", false).is_err());
    }

    #[test]
    fn rejects_loopback_outside_dev_mode() {
        assert!(validate_url("http://127.0.0.1/cb", false).is_err());
        assert!(validate_url("http://127.0.0.1/cb", true).is_ok());
    }

    #[test]
    fn rejects_nonstandard_port_outside_dev_mode() {
        assert!(validate_url("https://example.com:8443/cb", false).is_err());
        assert!(validate_url("https://example.com:8443/cb", true).is_ok());
    }

    #[test]
    fn accepts_explicit_default_ports() {
        assert!(validate_url("https://example.com:443/cb", false).is_ok());
        assert!(validate_url("http://example.com:80/cb", false).is_ok());
    }

    #[test]
    fn rejects_private_network_address() {
        assert!(validate_url("http://10.0.0.5/cb", false).is_err());
        assert!(validate_url("http://192.168.1.5/cb", false).is_err());
    }

    #[test]
    fn parses_verify_mode_preference_list() {
        assert_eq!(parse_verify_mode("sync,async").unwrap(), VerifyMode::Sync);
        assert_eq!(parse_verify_mode("async,sync").unwrap(), VerifyMode::Async);
        assert!(parse_verify_mode("bogus").is_err());
    }

    #[test]
    fn rejects_empty_verify_token() {
        assert!(validate_verify_token("").is_err());
        assert!(validate_verify_token("tok1").is_ok());
    }
}
