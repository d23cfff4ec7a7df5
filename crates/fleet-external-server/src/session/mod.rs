//! Per-car session controller.
//!
//! One [`CarServer`] owns everything a car session touches: the bus, the
//! module registry, the device table, both pipelines and the event queue.
//! It is the queue's only consumer, so all session state is mutated from a
//! single task and needs no locks.
//!
//! Lifecycle: `Uninitialized → Connecting → Initialized → Running` and then
//! `Stopped` or `Error`. Connecting covers the broker connection and the
//! peer's `Connect` handshake; Initialized covers the burst of first
//! statuses, one per announced device; Running is the event loop. Both
//! terminal states publish a best-effort `Disconnect` notice and release
//! the modules.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_protocol::status::DeviceState;
use fleet_protocol::{
    command_response, connect_response, external_client, frames, status_response, CommandResponse,
    Connect, Device, ExternalServer, Status,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bus::Bus;
use crate::config::CarConfig;
use crate::devices::{device_repr, DeviceKey, DeviceTable};
use crate::error::CarError;
use crate::events::{EventQueue, ModuleCommand, SessionEvent, EVENT_QUEUE_CAPACITY};
use crate::module_api::{codes, DisconnectReason, ModuleApi};
use crate::modules::ModuleRegistry;
use crate::pipeline::{
    AckOutcome, CommandPipeline, PendingCommand, SessionCounter, StatusPipeline, StatusStall,
};

/// Granularity of the tick events driving the timeout checks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Connection state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Resources allocated, modules registered.
    Uninitialized,
    /// Broker connection and handshake in progress.
    Connecting,
    /// Handshake accepted, reading the initial status burst.
    Initialized,
    /// Normal bidirectional exchange.
    Running,
    /// Terminal: stopped on request.
    Stopped,
    /// Terminal: stopped on a failure.
    Error,
}

impl SessionState {
    fn can_transition_to(self, next: Self) -> bool {
        use SessionState::{Connecting, Error, Initialized, Running, Stopped, Uninitialized};
        self == next
            || matches!(
                (self, next),
                (Uninitialized, Connecting | Stopped | Error)
                    | (Connecting, Initialized | Stopped | Error)
                    | (Initialized, Running | Stopped | Error)
                    | (Running, Stopped | Error)
            )
    }
}

/// How a session run ended, short of normal completion.
enum Halt {
    /// Graceful stop; not an error.
    Stopped,
    /// Terminal failure.
    Failed(CarError),
}

impl From<CarError> for Halt {
    fn from(error: CarError) -> Self {
        Self::Failed(error)
    }
}

/// Cloneable handle for stopping a session from any thread.
#[derive(Clone)]
pub struct CarHandle {
    car: String,
    queue: EventQueue,
    stop: CancellationToken,
    stop_requested: Arc<AtomicBool>,
}

impl CarHandle {
    /// Requests a graceful stop. Level-triggered and idempotent: repeated
    /// calls change nothing once the first one landed.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            debug!(car = %self.car, "stop already requested");
            return;
        }
        info!(car = %self.car, "stop requested");
        self.queue.push(SessionEvent::Stop);
        self.stop.cancel();
    }
}

/// The session engine of one car.
pub struct CarServer<B: Bus> {
    config: CarConfig,
    bus: B,
    modules: ModuleRegistry,
    state: SessionState,
    session_id: String,
    counter: SessionCounter,
    devices: DeviceTable,
    status: StatusPipeline,
    commands: CommandPipeline,
    queue: EventQueue,
    events: mpsc::Receiver<SessionEvent>,
    /// Cancelled at teardown (and on queue overflow); stops every producer.
    cancel: CancellationToken,
    /// Cancelled by [`CarHandle::stop`]; interrupts waits and sleeps.
    stop: CancellationToken,
    stop_requested: Arc<AtomicBool>,
    tick: Option<JoinHandle<()>>,
}

impl<B: Bus> CarServer<B> {
    /// Assembles a session. Nothing runs until [`run`](Self::run).
    #[must_use]
    pub fn new(config: CarConfig, bus: B, modules: ModuleRegistry) -> Self {
        let cancel = CancellationToken::new();
        let (queue, events) = EventQueue::new(EVENT_QUEUE_CAPACITY, cancel.clone());
        let status = StatusPipeline::new(config.timeout, config.per_device_status_timeout);
        let commands = CommandPipeline::new(config.timeout);
        Self {
            config,
            bus,
            modules,
            state: SessionState::Uninitialized,
            session_id: String::new(),
            counter: SessionCounter::new(),
            devices: DeviceTable::new(),
            status,
            commands,
            queue,
            events,
            cancel,
            stop: CancellationToken::new(),
            stop_requested: Arc::new(AtomicBool::new(false)),
            tick: None,
        }
    }

    /// Preseeds the session counter. Diagnostic hook for exercising the
    /// wrap-around boundary.
    #[must_use]
    pub fn with_session_counter(mut self, value: u32) -> Self {
        self.counter = SessionCounter::starting_at(value);
        self
    }

    /// Stop handle of this session, safe to call from any thread.
    #[must_use]
    pub fn handle(&self) -> CarHandle {
        CarHandle {
            car: self.config.car_name.clone(),
            queue: self.queue.clone(),
            stop: self.stop.clone(),
            stop_requested: Arc::clone(&self.stop_requested),
        }
    }

    /// Drives the session to completion. Returns `Ok` on a requested stop
    /// and the terminal error otherwise. The bus, the module libraries and
    /// every helper task are released before this returns.
    pub async fn run(mut self) -> Result<(), CarError> {
        info!(
            company = %self.config.company_name,
            car = %self.config.car_name,
            modules = self.modules.len(),
            "starting car session"
        );
        let halted = self.drive().await;
        let error = match halted {
            Ok(()) | Err(Halt::Stopped) => None,
            Err(Halt::Failed(error)) => Some(error),
        };
        if error.is_some() {
            self.set_state(SessionState::Error);
        } else {
            self.set_state(SessionState::Stopped);
        }
        if let Some(error) = &error {
            error!(
                company = %self.config.company_name,
                car = %self.config.car_name,
                counter = self.counter.current(),
                %error,
                "session failed"
            );
        }
        self.teardown().await;
        info!(car = %self.config.car_name, state = ?self.state, "car session finished");
        match error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    async fn drive(&mut self) -> Result<(), Halt> {
        self.set_state(SessionState::Connecting);
        self.connect_to_broker().await?;
        self.handshake().await?;
        self.set_state(SessionState::Initialized);
        self.initial_status_burst().await?;
        self.set_state(SessionState::Running);
        self.start_runtime();
        self.event_loop().await
    }

    /// Connects to the broker, retrying refused connections after the
    /// configured back-off.
    async fn connect_to_broker(&mut self) -> Result<(), Halt> {
        loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                return Err(Halt::Stopped);
            }
            match self
                .bus
                .connect(self.queue.clone(), self.cancel.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(error) if error.is_retryable() => {
                    warn!(
                        car = %self.config.car_name,
                        %error,
                        "broker connection failed, retrying"
                    );
                    tokio::select! {
                        () = self.stop.cancelled() => return Err(Halt::Stopped),
                        () = tokio::time::sleep(self.config.sleep_after_connection_refused) => {}
                    }
                }
                Err(error) => return Err(Halt::Failed(error.into())),
            }
        }
    }

    /// Waits for the peer's `Connect`, seeds the device table and answers
    /// with `ConnectResponse(OK)`.
    async fn handshake(&mut self) -> Result<(), Halt> {
        info!(car = %self.config.car_name, "waiting for a connect message");
        let deadline = Instant::now() + self.config.timeout;
        loop {
            let Some(event) = self.next_event_before(deadline).await? else {
                return Err(Halt::Failed(CarError::ConnectSequence(
                    "no connect message received in time".to_string(),
                )));
            };
            match event {
                SessionEvent::CarMessage(external_client::MessageType::Connect(connect)) => {
                    return self.accept_connect(connect).await;
                }
                SessionEvent::CarMessage(other) => {
                    debug!(
                        car = %self.config.car_name,
                        kind = message_kind(&other),
                        "expected a connect message, skipping"
                    );
                }
                SessionEvent::UnknownFrame => {
                    debug!(car = %self.config.car_name, "skipping unknown frame during handshake");
                }
                SessionEvent::TransportDown => {
                    return Err(Halt::Failed(CarError::TransportDown))
                }
                SessionEvent::Stop => return Err(Halt::Stopped),
                SessionEvent::Tick | SessionEvent::ModuleCommand { .. } => {}
            }
        }
    }

    async fn accept_connect(&mut self, connect: Connect) -> Result<(), Halt> {
        if connect.devices.is_empty() {
            return Err(Halt::Failed(CarError::ConnectSequence(
                "connect message carries no devices".to_string(),
            )));
        }
        if connect.company != self.config.company_name
            || connect.vehicle_name != self.config.car_name
        {
            warn!(
                car = %self.config.car_name,
                company = %connect.company,
                vehicle = %connect.vehicle_name,
                "connect message identity differs from the configured session"
            );
        }
        self.session_id = connect.session_id.clone();
        for device in &connect.devices {
            self.connect_device_if_supported(device);
        }
        if self.devices.is_empty() {
            return Err(Halt::Failed(CarError::ConnectSequence(
                "no supported device could be connected".to_string(),
            )));
        }
        info!(
            car = %self.config.car_name,
            session_id = %self.session_id,
            devices = self.devices.len(),
            "accepting connect message"
        );
        self.publish(frames::connect_response(
            self.session_id.as_str(),
            connect_response::Type::Ok,
        ))
        .await
    }

    /// Reads one first status per connected device, responding to and
    /// forwarding each.
    async fn initial_status_burst(&mut self) -> Result<(), Halt> {
        let expected = self.devices.len();
        let mut reported: HashSet<DeviceKey> = HashSet::new();
        while reported.len() < expected {
            info!(
                car = %self.config.car_name,
                received = reported.len(),
                expected,
                "waiting for a first status"
            );
            let deadline = Instant::now() + self.config.timeout;
            let Some(event) = self.next_event_before(deadline).await? else {
                return Err(Halt::Failed(CarError::ConnectSequence(
                    "first statuses not received in time".to_string(),
                )));
            };
            match event {
                SessionEvent::CarMessage(external_client::MessageType::Status(status)) => {
                    self.handle_first_status(status, &mut reported).await?;
                }
                SessionEvent::CarMessage(other) => {
                    debug!(
                        car = %self.config.car_name,
                        kind = message_kind(&other),
                        "expected a status, skipping"
                    );
                }
                SessionEvent::UnknownFrame => {
                    debug!(car = %self.config.car_name, "skipping unknown frame during the initial burst");
                }
                SessionEvent::TransportDown => {
                    return Err(Halt::Failed(CarError::TransportDown))
                }
                SessionEvent::Stop => return Err(Halt::Stopped),
                SessionEvent::Tick | SessionEvent::ModuleCommand { .. } => {}
            }
        }
        Ok(())
    }

    async fn handle_first_status(
        &mut self,
        status: Status,
        reported: &mut HashSet<DeviceKey>,
    ) -> Result<(), Halt> {
        if status.session_id != self.session_id {
            warn!(
                car = %self.config.car_name,
                session_id = %status.session_id,
                "ignoring first status with a different session id"
            );
            return Ok(());
        }
        let Some(device) = status_device(&status) else {
            warn!(car = %self.config.car_name, "ignoring first status without a device");
            return Ok(());
        };
        let Some(key) = DeviceKey::from_device(&device) else {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(&device),
                "ignoring first status from an unknown module"
            );
            return Ok(());
        };
        if !self.devices.contains(&key) {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(&device),
                "ignoring first status from a device missing from the connect message"
            );
            return Ok(());
        }
        if !matches!(
            DeviceState::try_from(status.device_state),
            Ok(DeviceState::Connecting)
        ) {
            return Err(Halt::Failed(CarError::ConnectSequence(format!(
                "first status from device '{}' must carry the CONNECTING state, received {}",
                device_repr(&device),
                status.device_state
            ))));
        }
        if !self.status.accept_counter(&key, status.message_counter) {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(&device),
                counter = status.message_counter,
                "dropping duplicated first status"
            );
            return Ok(());
        }
        self.status.note_status(&key, Instant::now());
        self.forward_status_to_module(&key, &device, &status);
        self.publish(frames::status_response(
            self.session_id.as_str(),
            status.message_counter,
            status_response::Type::Ok,
        ))
        .await?;
        reported.insert(key);
        Ok(())
    }

    /// Arms the liveness clock and starts the tick task and the module
    /// command-waiting threads. Running entry.
    fn start_runtime(&mut self) {
        self.status.arm(Instant::now());
        self.tick = Some(tokio::spawn(tick_loop(
            self.queue.clone(),
            self.cancel.clone(),
        )));
        for runtime in self.modules.iter_mut() {
            runtime.start_worker(self.queue.clone(), self.cancel.clone());
        }
        info!(car = %self.config.car_name, "session running");
    }

    /// The Running loop: single consumer of the event queue.
    async fn event_loop(&mut self) -> Result<(), Halt> {
        loop {
            // Events enqueued before a stop request are still handled: the
            // queue is drained ahead of the token check, so a stop never
            // outruns work that was already accepted.
            if let Ok(event) = self.events.try_recv() {
                self.handle_event(event).await?;
                continue;
            }
            tokio::select! {
                () = self.stop.cancelled() => return Err(Halt::Stopped),
                () = self.cancel.cancelled() => return Err(self.cancellation_halt()),
                event = self.events.recv() => {
                    let Some(event) = event else { return Err(Halt::Stopped) };
                    self.handle_event(event).await?;
                }
            }
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) -> Result<(), Halt> {
        match event {
            SessionEvent::CarMessage(kind) => self.handle_car_message(kind).await,
            SessionEvent::ModuleCommand { module_id, command } => {
                self.handle_module_command(module_id, command).await
            }
            SessionEvent::Tick => self.check_timeouts(),
            SessionEvent::UnknownFrame => Err(Halt::Failed(CarError::Protocol(
                "received a frame of unknown kind".to_string(),
            ))),
            SessionEvent::TransportDown => Err(Halt::Failed(CarError::TransportDown)),
            SessionEvent::Stop => Err(Halt::Stopped),
        }
    }

    async fn handle_car_message(
        &mut self,
        kind: external_client::MessageType,
    ) -> Result<(), Halt> {
        match kind {
            external_client::MessageType::Connect(connect) => {
                if connect.session_id == self.session_id {
                    // Tell the peer its session is known before failing.
                    let _ = self
                        .bus
                        .publish(frames::connect_response(
                            self.session_id.as_str(),
                            connect_response::Type::AlreadyLogged,
                        ))
                        .await;
                }
                Err(Halt::Failed(CarError::Protocol(
                    "connect message received during an established session".to_string(),
                )))
            }
            external_client::MessageType::Status(status) => {
                if status.session_id != self.session_id {
                    return Err(Halt::Failed(CarError::Protocol(format!(
                        "status with session id '{}' does not belong to this session",
                        status.session_id
                    ))));
                }
                self.handle_running_status(status).await
            }
            external_client::MessageType::CommandResponse(response) => {
                if response.session_id != self.session_id {
                    return Err(Halt::Failed(CarError::Protocol(format!(
                        "command response with session id '{}' does not belong to this session",
                        response.session_id
                    ))));
                }
                self.handle_command_response(&response)
            }
        }
    }

    async fn handle_running_status(&mut self, status: Status) -> Result<(), Halt> {
        let Some(device) = status_device(&status) else {
            warn!(car = %self.config.car_name, "ignoring status without a device");
            return Ok(());
        };
        let Ok(state) = DeviceState::try_from(status.device_state) else {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(&device),
                raw_state = status.device_state,
                "ignoring status with an unknown device state"
            );
            return Ok(());
        };
        let key = DeviceKey::from_device(&device);
        let api = key
            .as_ref()
            .and_then(|key| self.modules.api(key.module_id));
        let (Some(key), Some(api)) = (key, api) else {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(&device),
                counter = status.message_counter,
                "status from unknown module"
            );
            return self
                .publish(frames::status_response(
                    self.session_id.as_str(),
                    status.message_counter,
                    status_response::Type::UnknownModule,
                ))
                .await;
        };
        if !api.is_device_type_supported(device.device_type) {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(&device),
                "ignoring status from a device type the module does not support"
            );
            return Ok(());
        }
        if !self.status.accept_counter(&key, status.message_counter) {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(&device),
                counter = status.message_counter,
                "dropping status with a stale counter"
            );
            return Ok(());
        }
        self.status.note_status(&key, Instant::now());

        if self.devices.contains(&key) {
            self.devices.set_priority(&key, device.priority);
        } else {
            if state == DeviceState::Disconnect {
                warn!(
                    car = %self.config.car_name,
                    device = %device_repr(&device),
                    "ignoring disconnect status from a device that is not connected"
                );
                return Ok(());
            }
            if !self.connect_device(&api, &device, &key) {
                warn!(
                    car = %self.config.car_name,
                    device = %device_repr(&device),
                    "device could not be connected, dropping its status"
                );
                return Ok(());
            }
        }

        self.forward_status_to_module(&key, &device, &status);
        self.publish(frames::status_response(
            self.session_id.as_str(),
            status.message_counter,
            status_response::Type::Ok,
        ))
        .await?;
        if state == DeviceState::Disconnect {
            self.disconnect_device(&api, DisconnectReason::Announced, &key, &device);
        }
        Ok(())
    }

    async fn handle_module_command(
        &mut self,
        module_id: u16,
        command: ModuleCommand,
    ) -> Result<(), Halt> {
        let Some(key) = DeviceKey::from_device(&command.device) else {
            warn!(
                car = %self.config.car_name,
                module_id,
                device = %device_repr(&command.device),
                "discarding command for a device with an unknown module id"
            );
            return Ok(());
        };
        if !self.devices.contains(&key) {
            info!(
                car = %self.config.car_name,
                module_id,
                device = %device_repr(&command.device),
                "discarding command for a device that is not connected"
            );
            return Ok(());
        }
        if key.module_id != module_id {
            warn!(
                car = %self.config.car_name,
                producer = module_id,
                target = key.module_id,
                device = %device_repr(&command.device),
                "module produced a command for another module's device"
            );
            if !self.config.send_invalid_command {
                warn!(car = %self.config.car_name, "command will not be sent");
                return Ok(());
            }
        }
        if command.data.is_empty() {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(&command.device),
                "command payload is empty"
            );
        }

        let counter = self.counter.advance();
        self.commands.push(
            module_id,
            PendingCommand {
                counter,
                device: command.device.clone(),
                data: command.data.clone(),
                issued_at: Instant::now(),
            },
        );
        info!(
            car = %self.config.car_name,
            counter,
            device = %device_repr(&command.device),
            "sending command"
        );
        self.publish(frames::external_command(
            self.session_id.as_str(),
            counter,
            command.device,
            command.data,
        ))
        .await
    }

    fn handle_command_response(&mut self, response: &CommandResponse) -> Result<(), Halt> {
        match self.commands.acknowledge(response.message_counter) {
            AckOutcome::Acknowledged { module_id, command } => {
                info!(
                    car = %self.config.car_name,
                    counter = response.message_counter,
                    "command delivery acknowledged"
                );
                if let Some(api) = self.modules.api(module_id) {
                    let code = api.command_ack(&command.data, &command.device);
                    if code != codes::OK {
                        error!(
                            car = %self.config.car_name,
                            module_id,
                            code,
                            "command_ack failed"
                        );
                    }
                    if response.r#type() == command_response::Type::DeviceNotConnected {
                        if let Some(key) = DeviceKey::from_device(&command.device) {
                            self.disconnect_device(
                                &api,
                                DisconnectReason::Announced,
                                &key,
                                &command.device,
                            );
                        }
                    }
                }
                Ok(())
            }
            AckOutcome::OutOfOrder {
                module_id,
                expected,
                received,
            } => Err(Halt::Failed(CarError::Protocol(format!(
                "out-of-order command acknowledgement for module {module_id}: \
                 received counter {received}, expected {expected}"
            )))),
            AckOutcome::Unknown { received } => {
                info!(
                    car = %self.config.car_name,
                    counter = received,
                    "ignoring response for a command that is not pending"
                );
                Ok(())
            }
        }
    }

    fn check_timeouts(&self) -> Result<(), Halt> {
        let now = Instant::now();
        if let Some(stall) = self.status.check_stall(now) {
            match stall {
                StatusStall::Session => warn!(
                    car = %self.config.car_name,
                    "no status received within the timeout"
                ),
                StatusStall::Device(key) => warn!(
                    car = %self.config.car_name,
                    device = %device_repr(&key.to_device(0)),
                    "device sent no status within the timeout"
                ),
            }
            return Err(Halt::Failed(CarError::StatusTimeout(self.status.timeout())));
        }
        if let Some(counter) = self.commands.check_expired(now) {
            warn!(
                car = %self.config.car_name,
                counter,
                "command response not received within the timeout"
            );
            return Err(Halt::Failed(CarError::CommandResponseTimeout(counter)));
        }
        Ok(())
    }

    fn connect_device_if_supported(&mut self, device: &Device) {
        let Some(key) = DeviceKey::from_device(device) else {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(device),
                "ignoring device from an unknown module"
            );
            return;
        };
        let Some(api) = self.modules.api(key.module_id) else {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(device),
                module_id = key.module_id,
                "ignoring device from a module this server does not host"
            );
            return;
        };
        if !api.is_device_type_supported(device.device_type) {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(device),
                "device type not supported by its module, device will not be connected"
            );
            return;
        }
        self.connect_device(&api, device, &key);
    }

    fn connect_device(
        &mut self,
        api: &Arc<dyn ModuleApi>,
        device: &Device,
        key: &DeviceKey,
    ) -> bool {
        if self.devices.contains(key) {
            self.devices.set_priority(key, device.priority);
            return true;
        }
        let code = api.device_connected(device);
        if code == codes::OK {
            self.devices.insert(key.clone(), device.priority);
            info!(
                car = %self.config.car_name,
                device = %device_repr(device),
                "device connected"
            );
            true
        } else {
            error!(
                car = %self.config.car_name,
                device = %device_repr(device),
                code,
                "device_connected failed"
            );
            false
        }
    }

    fn disconnect_device(
        &mut self,
        api: &Arc<dyn ModuleApi>,
        reason: DisconnectReason,
        key: &DeviceKey,
        device: &Device,
    ) {
        if self.devices.remove(key).is_none() {
            warn!(
                car = %self.config.car_name,
                device = %device_repr(device),
                "device is already disconnected"
            );
            return;
        }
        self.status.forget_device(key);
        let code = api.device_disconnected(reason, device);
        if code != codes::OK {
            error!(
                car = %self.config.car_name,
                device = %device_repr(device),
                code,
                "device_disconnected failed"
            );
        }
        info!(
            car = %self.config.car_name,
            device = %device_repr(device),
            ?reason,
            "device disconnected"
        );
    }

    /// Hands the status payload to the owning module and consumes one
    /// session counter value. Handler failures are logged, never fatal.
    fn forward_status_to_module(&mut self, key: &DeviceKey, device: &Device, status: &Status) {
        let Some(api) = self.modules.api(key.module_id) else {
            return;
        };
        let payload: &[u8] = status
            .device_status
            .as_ref()
            .map_or(&[], |device_status| device_status.status_data.as_slice());
        let code = if status.device_state() == DeviceState::Error {
            let error_payload = if status.error_message.is_empty() {
                payload
            } else {
                status.error_message.as_slice()
            };
            api.forward_error_message(device, error_payload)
        } else {
            let code = api.forward_status(device, payload);
            if !status.error_message.is_empty() {
                let error_code = api.forward_error_message(device, &status.error_message);
                if error_code != codes::OK {
                    error!(
                        car = %self.config.car_name,
                        device = %device_repr(device),
                        code = error_code,
                        "forward_error_message failed"
                    );
                }
            }
            code
        };
        if code == codes::OK {
            debug!(
                car = %self.config.car_name,
                device = %device_repr(device),
                counter = status.message_counter,
                "status forwarded"
            );
        } else {
            error!(
                car = %self.config.car_name,
                device = %device_repr(device),
                code,
                "module did not accept the status"
            );
        }
        self.counter.advance();
    }

    /// Waits for the next event, bounded by `deadline`. `Ok(None)` means the
    /// deadline passed.
    async fn next_event_before(
        &mut self,
        deadline: Instant,
    ) -> Result<Option<SessionEvent>, Halt> {
        tokio::select! {
            () = self.stop.cancelled() => Err(Halt::Stopped),
            () = self.cancel.cancelled() => Err(self.cancellation_halt()),
            received = tokio::time::timeout_at(deadline, self.events.recv()) => match received {
                Err(_elapsed) => Ok(None),
                Ok(Some(event)) => Ok(Some(event)),
                Ok(None) => Err(Halt::Stopped),
            }
        }
    }

    fn cancellation_halt(&self) -> Halt {
        if self.queue.overflowed() {
            Halt::Failed(CarError::QueueOverflow)
        } else {
            Halt::Stopped
        }
    }

    async fn publish(&mut self, frame: ExternalServer) -> Result<(), Halt> {
        self.bus
            .publish(frame)
            .await
            .map_err(|error| Halt::Failed(CarError::Bus(error)))
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if self.state.can_transition_to(next) {
            debug!(
                car = %self.config.car_name,
                from = ?self.state,
                to = ?next,
                "session state changed"
            );
            self.state = next;
        } else {
            debug!(
                car = %self.config.car_name,
                from = ?self.state,
                to = ?next,
                "ignoring disallowed state transition"
            );
        }
    }

    /// Releases everything the session holds. The disconnect notice goes
    /// out first, while the bus reader still drives the transport; only
    /// then are the producers cancelled and the modules released.
    async fn teardown(&mut self) {
        debug!(car = %self.config.car_name, "clearing the session context");
        if !self.session_id.is_empty() {
            if let Err(error) = self
                .bus
                .publish(frames::disconnect(self.session_id.as_str()))
                .await
            {
                debug!(
                    car = %self.config.car_name,
                    %error,
                    "could not publish the disconnect notice"
                );
            }
        }
        self.bus.disconnect().await;
        self.cancel.cancel();
        if let Some(tick) = self.tick.take() {
            let _ = tick.await;
        }
        for runtime in self.modules.iter_mut() {
            runtime.join_worker().await;
        }
        for (key, priority) in self.devices.drain() {
            if let Some(api) = self.modules.api(key.module_id) {
                let device = key.to_device(priority);
                let code = api.device_disconnected(DisconnectReason::Timeout, &device);
                if code != codes::OK {
                    error!(
                        car = %self.config.car_name,
                        device = %device_repr(&device),
                        code,
                        "device_disconnected failed"
                    );
                }
            }
        }
        let module_ids: Vec<u16> = self.modules.ids().collect();
        for module_id in module_ids {
            if let Some(api) = self.modules.api(module_id) {
                let code = api.destroy();
                if code != codes::OK {
                    error!(
                        car = %self.config.car_name,
                        module_id,
                        code,
                        "module destroy failed"
                    );
                }
            }
        }
    }
}

/// Emits a tick every [`TICK_INTERVAL`] until cancelled.
async fn tick_loop(queue: EventQueue, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => queue.push(SessionEvent::Tick),
        }
    }
}

fn status_device(status: &Status) -> Option<Device> {
    status
        .device_status
        .as_ref()
        .and_then(|device_status| device_status.device.clone())
}

fn message_kind(kind: &external_client::MessageType) -> &'static str {
    match kind {
        external_client::MessageType::Connect(_) => "connect",
        external_client::MessageType::Status(_) => "status",
        external_client::MessageType::CommandResponse(_) => "command response",
    }
}
