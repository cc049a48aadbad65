//! Server configuration.
//!
//! Everything has a default; [`Config::from_env`] overrides from the
//! environment:
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `RESTCORE_ADDR` | `127.0.0.1:5000` | listen address |
//! | `RESTCORE_FIELD_ERROR_STATUS` | `400` | status of the aggregated field-error response |
//! | `RESTCORE_TRUST_FORWARDED_PROTO` | `false` | treat `X-Forwarded-Proto: https` as an encrypted connection |
//!
//! Unparseable values are logged and ignored.

use std::net::SocketAddr;

use http::StatusCode;
use tracing::warn;

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub field_error_status: StatusCode,
    /// The listener itself never terminates TLS; behind a proxy that does,
    /// this lets generated links use `https`.
    pub trust_forwarded_proto: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            field_error_status: StatusCode::BAD_REQUEST,
            trust_forwarded_proto: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = parsed(&lookup, "RESTCORE_ADDR", |v| v.parse::<SocketAddr>().ok()) {
            config.addr = addr;
        }
        if let Some(status) = parsed(&lookup, "RESTCORE_FIELD_ERROR_STATUS", |v| {
            v.parse::<u16>().ok().and_then(|n| StatusCode::from_u16(n).ok())
        }) {
            config.field_error_status = status;
        }
        if let Some(trust) =
            parsed(&lookup, "RESTCORE_TRUST_FORWARDED_PROTO", |v| v.parse::<bool>().ok())
        {
            config.trust_forwarded_proto = trust;
        }
        config
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let raw = lookup(key)?;
    let value = parse(raw.trim());
    if value.is_none() {
        warn!(key, value = %raw, "ignoring unparseable configuration value");
    }
    value
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config.addr.port(), 5000);
        assert_eq!(config.field_error_status, StatusCode::BAD_REQUEST);
        assert!(!config.trust_forwarded_proto);
    }

    #[test]
    fn overrides_and_bad_values() {
        let config = Config::from_lookup(lookup(&[
            ("RESTCORE_ADDR", "0.0.0.0:8080"),
            ("RESTCORE_FIELD_ERROR_STATUS", "422"),
            ("RESTCORE_TRUST_FORWARDED_PROTO", "yes"),
        ]));
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.field_error_status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!config.trust_forwarded_proto);
    }
}
