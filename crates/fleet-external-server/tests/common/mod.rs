//! Shared fixtures for the session scenario tests.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use fleet_external_server::bus::Bus;
use fleet_external_server::config::CarConfig;
use fleet_external_server::error::BusError;
use fleet_external_server::events::{EventQueue, SessionEvent};
use fleet_protocol::status::DeviceState;
use fleet_protocol::{
    external_client, external_server, CommandResponse, Connect, Device, DeviceStatus,
    ExternalServer, Status,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// In-memory [`Bus`]: hands the session's event queue to the test and
/// records every published frame.
pub struct MockBus {
    fail_connects: usize,
    queue_tx: mpsc::UnboundedSender<EventQueue>,
    frame_tx: mpsc::UnboundedSender<ExternalServer>,
}

/// Test-side view of a [`MockBus`].
pub struct BusProbe {
    /// Receives the session's event queue on every successful connect.
    pub queues: mpsc::UnboundedReceiver<EventQueue>,
    /// Receives every frame the session publishes.
    pub frames: mpsc::UnboundedReceiver<ExternalServer>,
}

/// Builds a mock bus whose first `fail_connects` connection attempts are
/// refused.
pub fn mock_bus(fail_connects: usize) -> (MockBus, BusProbe) {
    let (queue_tx, queues) = mpsc::unbounded_channel();
    let (frame_tx, frames) = mpsc::unbounded_channel();
    (
        MockBus {
            fail_connects,
            queue_tx,
            frame_tx,
        },
        BusProbe { queues, frames },
    )
}

#[async_trait]
impl Bus for MockBus {
    async fn connect(
        &mut self,
        queue: EventQueue,
        _cancel: CancellationToken,
    ) -> Result<(), BusError> {
        if self.fail_connects > 0 {
            self.fail_connects -= 1;
            return Err(BusError::Connect("connection refused".to_string()));
        }
        let _ = self.queue_tx.send(queue);
        Ok(())
    }

    async fn publish(&mut self, frame: ExternalServer) -> Result<(), BusError> {
        self.frame_tx
            .send(frame)
            .map_err(|_| BusError::Publish("probe dropped".to_string()))
    }

    async fn disconnect(&mut self) {}
}

/// The scenario configuration: `acme`/`v1`, `timeout = 5`.
pub fn car_config() -> CarConfig {
    CarConfig {
        company_name: "acme".to_string(),
        car_name: "v1".to_string(),
        mqtt_address: "localhost".to_string(),
        mqtt_port: 1883,
        mqtt_timeout: Duration::from_secs(2),
        timeout: Duration::from_secs(5),
        send_invalid_command: false,
        sleep_after_connection_refused: Duration::from_millis(20),
        per_device_status_timeout: false,
        modules: BTreeMap::new(),
    }
}

/// The scenario device `{module 2, type 7, role "button", name "A"}`.
pub fn button_device() -> Device {
    Device {
        module: 2,
        device_type: 7,
        device_role: "button".to_string(),
        device_name: "A".to_string(),
        priority: 0,
    }
}

/// A `Connect` event carrying the given devices.
pub fn connect_event(session_id: &str, devices: Vec<Device>) -> SessionEvent {
    SessionEvent::CarMessage(external_client::MessageType::Connect(Connect {
        session_id: session_id.to_string(),
        company: "acme".to_string(),
        vehicle_name: "v1".to_string(),
        devices,
    }))
}

/// A `Status` event for one device.
pub fn status_event(
    session_id: &str,
    device: Device,
    state: DeviceState,
    counter: u32,
    data: &[u8],
) -> SessionEvent {
    SessionEvent::CarMessage(external_client::MessageType::Status(Status {
        session_id: session_id.to_string(),
        device_state: state as i32,
        message_counter: counter,
        device_status: Some(DeviceStatus {
            device: Some(device),
            status_data: data.to_vec(),
        }),
        error_message: Vec::new(),
    }))
}

/// A `CommandResponse` event acknowledging `counter`.
pub fn command_response_event(session_id: &str, counter: u32) -> SessionEvent {
    SessionEvent::CarMessage(external_client::MessageType::CommandResponse(
        CommandResponse {
            session_id: session_id.to_string(),
            r#type: fleet_protocol::command_response::Type::Ok as i32,
            message_counter: counter,
        },
    ))
}

/// Unwraps the oneof of a published frame.
pub fn kind_of(frame: ExternalServer) -> external_server::MessageType {
    frame.message_type.expect("published frame without payload")
}

/// Drains every frame still buffered in the probe.
pub fn drain_frames(probe: &mut BusProbe) -> Vec<external_server::MessageType> {
    let mut drained = Vec::new();
    while let Ok(frame) = probe.frames.try_recv() {
        drained.push(kind_of(frame));
    }
    drained
}
