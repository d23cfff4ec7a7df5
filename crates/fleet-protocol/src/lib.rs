//! # fleet-protocol
//!
//! Wire schema of the Fleet Protocol as seen from the external (cloud) side.
//!
//! The protobuf message types are committed prost-generated code so that the
//! build needs no `protoc`; the generated file is included verbatim below.
//! Two envelopes cover every frame on the bus:
//!
//! - [`ExternalClient`]: frames published by a car's module gateway
//!   (`Connect`, `Status`, `CommandResponse`)
//! - [`ExternalServer`]: frames published by the external server
//!   (`ConnectResponse`, `StatusResponse`, `Command`, `Disconnect`)
//!
//! [`topics`] derives the two bus topics of a session from its
//! `(company, car)` identity, and [`frames`] provides constructors for the
//! outbound envelopes.

#![warn(missing_docs)]
#![warn(clippy::all)]

#[allow(
    clippy::derive_partial_eq_without_eq,
    clippy::doc_markdown,
    clippy::must_use_candidate,
    missing_docs
)]
mod generated {
    include!("fleet.protocol.v2.rs");
}

pub mod frames;
pub mod topics;

pub use generated::*;

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;

    #[test]
    fn client_envelope_roundtrip_preserves_oneof() {
        let msg = ExternalClient {
            message_type: Some(external_client::MessageType::Connect(Connect {
                session_id: "abc".to_string(),
                company: "acme".to_string(),
                vehicle_name: "v1".to_string(),
                devices: vec![Device {
                    module: 2,
                    device_type: 7,
                    device_role: "button".to_string(),
                    device_name: "A".to_string(),
                    priority: 1,
                }],
            })),
        };
        let decoded = ExternalClient::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_envelope_decodes_to_no_message() {
        let decoded = ExternalClient::decode(&b""[..]).unwrap();
        assert!(decoded.message_type.is_none());
    }

    #[test]
    fn device_state_names_are_stable() {
        use status::DeviceState;
        assert_eq!(DeviceState::Connecting.as_str_name(), "CONNECTING");
        assert_eq!(
            DeviceState::from_str_name("DISCONNECT"),
            Some(DeviceState::Disconnect)
        );
        assert_eq!(DeviceState::from_str_name("bogus"), None);
    }
}
