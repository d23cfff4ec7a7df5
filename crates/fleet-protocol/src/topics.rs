//! Bus topic derivation for car sessions.
//!
//! Every session talks on exactly two topics derived from its identity:
//!
//! - `<company>/<car>/module_gateway`: inbound, frames from the gateway
//! - `<company>/<car>/external_server`: outbound, frames from the server
//!
//! Both identity segments are restricted to lowercase `[a-z0-9_]+` so that
//! derivation is deterministic and the derived strings are always valid
//! topic filters.

/// Topic suffix the module gateway publishes on (server subscribes).
pub const MODULE_GATEWAY_SUFFIX: &str = "module_gateway";

/// Topic suffix the external server publishes on.
pub const EXTERNAL_SERVER_SUFFIX: &str = "external_server";

/// Returns `true` if `name` is a valid identity segment: non-empty,
/// lowercase letters, digits and underscores only.
#[must_use]
pub fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'_'))
}

/// Topic the server subscribes to for frames from the car's gateway.
#[must_use]
pub fn subscribe_topic(company: &str, car: &str) -> String {
    format!("{company}/{car}/{MODULE_GATEWAY_SUFFIX}")
}

/// Topic the server publishes its own frames on.
#[must_use]
pub fn publish_topic(company: &str, car: &str) -> String {
    format!("{company}/{car}/{EXTERNAL_SERVER_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_derive_from_identity() {
        assert_eq!(subscribe_topic("acme", "v1"), "acme/v1/module_gateway");
        assert_eq!(publish_topic("acme", "v1"), "acme/v1/external_server");
    }

    #[test]
    fn identifier_charset() {
        assert!(is_valid_identifier("acme_01"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("Acme"));
        assert!(!is_valid_identifier("ac me"));
        assert!(!is_valid_identifier("acme/1"));
    }
}
