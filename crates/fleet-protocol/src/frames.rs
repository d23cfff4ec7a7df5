//! Constructors for outbound server frames.
//!
//! Building an [`ExternalServer`] envelope by hand means three levels of
//! nesting per frame; these helpers keep the call sites in the session
//! engine readable.

use crate::{
    connect_response, external_client, external_server, status_response, Command, ConnectResponse,
    Device, DeviceCommand, Disconnect, ExternalClient, ExternalServer, StatusResponse,
};

/// Builds a `ConnectResponse` frame.
#[must_use]
pub fn connect_response(
    session_id: impl Into<String>,
    response_type: connect_response::Type,
) -> ExternalServer {
    ExternalServer {
        message_type: Some(external_server::MessageType::ConnectResponse(
            ConnectResponse {
                session_id: session_id.into(),
                r#type: response_type as i32,
            },
        )),
    }
}

/// Builds a `StatusResponse` frame echoing `message_counter`.
#[must_use]
pub fn status_response(
    session_id: impl Into<String>,
    message_counter: u32,
    response_type: status_response::Type,
) -> ExternalServer {
    ExternalServer {
        message_type: Some(external_server::MessageType::StatusResponse(StatusResponse {
            session_id: session_id.into(),
            r#type: response_type as i32,
            message_counter,
        })),
    }
}

/// Builds a `Command` frame carrying `data` for `device`.
#[must_use]
pub fn external_command(
    session_id: impl Into<String>,
    message_counter: u32,
    device: Device,
    data: Vec<u8>,
) -> ExternalServer {
    ExternalServer {
        message_type: Some(external_server::MessageType::Command(Command {
            session_id: session_id.into(),
            message_counter,
            device_command: Some(DeviceCommand {
                device: Some(device),
                command_data: data,
            }),
        })),
    }
}

/// Builds the best-effort `Disconnect` notice.
#[must_use]
pub fn disconnect(session_id: impl Into<String>) -> ExternalServer {
    ExternalServer {
        message_type: Some(external_server::MessageType::Disconnect(Disconnect {
            session_id: session_id.into(),
        })),
    }
}

/// Human-readable kind of an inbound frame, for log lines.
#[must_use]
pub fn client_message_kind(message: &ExternalClient) -> &'static str {
    match &message.message_type {
        Some(external_client::MessageType::Connect(_)) => "connect",
        Some(external_client::MessageType::Status(_)) => "status",
        Some(external_client::MessageType::CommandResponse(_)) => "command response",
        None => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use prost::Message;

    use super::*;
    use crate::command_response::Type as CommandResponseType;

    fn device() -> Device {
        Device {
            module: 2,
            device_type: 7,
            device_role: "button".to_string(),
            device_name: "A".to_string(),
            priority: 0,
        }
    }

    #[test]
    fn command_frame_roundtrip() {
        let frame = external_command("s", 42, device(), vec![0x0a, 0x02]);
        let decoded = ExternalServer::decode(frame.encode_to_vec().as_slice()).unwrap();
        let Some(external_server::MessageType::Command(cmd)) = decoded.message_type else {
            panic!("expected a command frame");
        };
        assert_eq!(cmd.session_id, "s");
        assert_eq!(cmd.message_counter, 42);
        let device_command = cmd.device_command.unwrap();
        assert_eq!(device_command.command_data, vec![0x0a, 0x02]);
        assert_eq!(device_command.device.unwrap(), device());
    }

    #[test]
    fn client_envelope_kind_names() {
        let msg = ExternalClient {
            message_type: Some(external_client::MessageType::CommandResponse(
                crate::CommandResponse {
                    session_id: "s".to_string(),
                    r#type: CommandResponseType::Ok as i32,
                    message_counter: 0,
                },
            )),
        };
        assert_eq!(client_message_kind(&msg), "command response");
        assert_eq!(
            client_message_kind(&ExternalClient { message_type: None }),
            "unknown"
        );
    }

    #[test]
    fn enum_accessor_falls_back_to_default_on_unknown_value() {
        let response = StatusResponse {
            session_id: "s".to_string(),
            r#type: 99,
            message_counter: 1,
        };
        assert_eq!(response.r#type(), crate::status_response::Type::Ok);
    }
}
