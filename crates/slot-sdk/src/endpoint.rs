//! Relay endpoint URLs.
//!
//! The dedicated endpoint is the registration endpoint with its port replaced
//! by the one the relay assigned. Scheme, host, path and query are kept.

use url::Url;

use crate::types::SlotSdkError;

/// Check that `url` is a `ws://` or `wss://` URL with a host and a valid port.
pub fn validate(url: &str) -> Result<(), SlotSdkError> {
    parse(url).map(|_| ())
}

/// Substitute `port` into the authority of `url`.
pub fn with_port(url: &str, port: u16) -> Result<String, SlotSdkError> {
    let mut parsed = parse(url)?;
    parsed
        .set_port(Some(port))
        .map_err(|()| SlotSdkError::Config(format!("cannot set port {port} on {url}")))?;
    Ok(parsed.into())
}

fn parse(url: &str) -> Result<Url, SlotSdkError> {
    let parsed = Url::parse(url)
        .map_err(|e| SlotSdkError::Config(format!("invalid relay url {url}: {e}")))?;

    if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
        return Err(SlotSdkError::Config(format!(
            "relay url must use ws:// or wss://, got {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(SlotSdkError::Config(format!("missing host in relay url {url}")));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_explicit_port() {
        assert_eq!(
            with_port("ws://localhost:8081/ws", 9001).unwrap(),
            "ws://localhost:9001/ws"
        );
    }

    #[test]
    fn adds_port_when_absent() {
        assert_eq!(
            with_port("wss://relay.example.com/ws", 9001).unwrap(),
            "wss://relay.example.com:9001/ws"
        );
    }

    #[test]
    fn keeps_query_and_userinfo() {
        assert_eq!(
            with_port("ws://u:p@10.0.0.1:8081/ws?x=1#f", 7000).unwrap(),
            "ws://u:p@10.0.0.1:7000/ws?x=1#f"
        );
    }

    #[test]
    fn bare_authority_gets_root_path() {
        assert_eq!(
            with_port("ws://10.0.0.1:8081", 7000).unwrap(),
            "ws://10.0.0.1:7000/"
        );
        assert_eq!(
            with_port("ws://relay?token=a", 7000).unwrap(),
            "ws://relay:7000/?token=a"
        );
    }

    #[test]
    fn handles_ipv6_literal() {
        assert_eq!(
            with_port("ws://[::1]:8081/ws", 9001).unwrap(),
            "ws://[::1]:9001/ws"
        );
        assert_eq!(with_port("ws://[::1]/ws", 9001).unwrap(), "ws://[::1]:9001/ws");
    }

    #[test]
    fn validate_rejects_bad_urls() {
        assert!(validate("ws://localhost:8081/ws").is_ok());
        assert!(validate("wss://relay.example.com/ws").is_ok());
        assert!(validate("http://localhost:8081/ws").is_err());
        assert!(validate("localhost:8081").is_err());
        assert!(validate("ws://").is_err());
    }

    #[test]
    fn validate_rejects_bad_ports() {
        let err = validate("ws://relay:abc/ws").unwrap_err();
        assert!(matches!(err, SlotSdkError::Config(_)));
        assert!(validate("ws://relay:99999/ws").is_err());
        assert!(with_port("ws://relay:abc/ws", 9001).is_err());
    }
}
