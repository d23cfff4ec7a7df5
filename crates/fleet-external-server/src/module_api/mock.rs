//! In-memory provider of [`ModuleApi`] for tests.
//!
//! Records every call the engine makes and serves commands injected with
//! [`MockModule::push_command`], with the same blocking `wait_for_command`
//! contract as a real handler library.

use std::collections::{HashSet, VecDeque};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use fleet_protocol::Device;

use super::{codes, DisconnectReason, DrainedCommand, ModuleApi, ModuleCommand};

/// One recorded call into the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    /// `device_connected`
    DeviceConnected(Device),
    /// `device_disconnected`
    DeviceDisconnected(DisconnectReason, Device),
    /// `forward_status`
    ForwardStatus(Device, Vec<u8>),
    /// `forward_error_message`
    ForwardError(Device, Vec<u8>),
    /// `command_ack`
    CommandAck(Device, Vec<u8>),
    /// `destroy`
    Destroy,
}

#[derive(Debug, Default)]
struct MockState {
    pending: VecDeque<ModuleCommand>,
    calls: Vec<MockCall>,
    fail_next_wait: bool,
}

/// In-memory module handler.
pub struct MockModule {
    module_number: i32,
    supported_types: Option<HashSet<u32>>,
    state: Mutex<MockState>,
    available: Condvar,
}

impl MockModule {
    /// A mock reporting the given module number and supporting every device
    /// type.
    #[must_use]
    pub fn new(module_number: i32) -> Self {
        Self {
            module_number,
            supported_types: None,
            state: Mutex::new(MockState::default()),
            available: Condvar::new(),
        }
    }

    /// Restricts the supported device types.
    #[must_use]
    pub fn with_supported_types(mut self, types: impl IntoIterator<Item = u32>) -> Self {
        self.supported_types = Some(types.into_iter().collect());
        self
    }

    /// Queues a command for the engine to drain, waking any thread blocked
    /// in `wait_for_command`.
    pub fn push_command(&self, device: Device, data: Vec<u8>) {
        let mut state = self.state.lock().expect("mock state poisoned");
        state.pending.push_back(ModuleCommand { device, data });
        self.available.notify_all();
    }

    /// Makes the next `wait_for_command` fail with [`codes::NOT_OK`].
    pub fn fail_next_wait(&self) {
        self.state.lock().expect("mock state poisoned").fail_next_wait = true;
        self.available.notify_all();
    }

    /// Snapshot of every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().expect("mock state poisoned").calls.clone()
    }

    fn record(&self, call: MockCall) {
        self.state.lock().expect("mock state poisoned").calls.push(call);
    }
}

impl ModuleApi for MockModule {
    fn module_number(&self) -> i32 {
        self.module_number
    }

    fn is_device_type_supported(&self, device_type: u32) -> bool {
        self.supported_types
            .as_ref()
            .map_or(true, |types| types.contains(&device_type))
    }

    fn device_connected(&self, device: &Device) -> i32 {
        self.record(MockCall::DeviceConnected(device.clone()));
        codes::OK
    }

    fn device_disconnected(&self, reason: DisconnectReason, device: &Device) -> i32 {
        self.record(MockCall::DeviceDisconnected(reason, device.clone()));
        codes::OK
    }

    fn forward_status(&self, device: &Device, payload: &[u8]) -> i32 {
        self.record(MockCall::ForwardStatus(device.clone(), payload.to_vec()));
        codes::OK
    }

    fn forward_error_message(&self, device: &Device, payload: &[u8]) -> i32 {
        self.record(MockCall::ForwardError(device.clone(), payload.to_vec()));
        codes::OK
    }

    fn wait_for_command(&self, timeout_ms: u32) -> i32 {
        let mut state = self.state.lock().expect("mock state poisoned");
        if state.fail_next_wait {
            state.fail_next_wait = false;
            return codes::NOT_OK;
        }
        if !state.pending.is_empty() {
            return codes::OK;
        }
        let (state, _timed_out) = self
            .available
            .wait_timeout(state, Duration::from_millis(u64::from(timeout_ms)))
            .expect("mock state poisoned");
        if state.fail_next_wait {
            // Flag raced with the wait; report the failure on this call.
            return codes::NOT_OK;
        }
        if state.pending.is_empty() {
            codes::TIMEOUT_OCCURRED
        } else {
            codes::OK
        }
    }

    fn get_command(&self) -> DrainedCommand {
        let mut state = self.state.lock().expect("mock state poisoned");
        let command = state.pending.pop_front();
        let remaining = i32::try_from(state.pending.len()).unwrap_or(i32::MAX);
        DrainedCommand { command, remaining }
    }

    fn command_ack(&self, data: &[u8], device: &Device) -> i32 {
        self.record(MockCall::CommandAck(device.clone(), data.to_vec()));
        codes::OK
    }

    fn destroy(&self) -> i32 {
        self.record(MockCall::Destroy);
        codes::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn wait_times_out_without_commands() {
        let module = MockModule::new(2);
        assert_eq!(module.wait_for_command(10), codes::TIMEOUT_OCCURRED);
    }

    #[test]
    fn pushed_commands_drain_in_order() {
        let module = MockModule::new(2);
        module.push_command(device(), vec![1]);
        module.push_command(device(), vec![2]);
        assert_eq!(module.wait_for_command(10), codes::OK);

        let first = module.get_command();
        assert_eq!(first.remaining, 1);
        assert_eq!(first.command.unwrap().data, vec![1]);
        let second = module.get_command();
        assert_eq!(second.remaining, 0);
        assert_eq!(second.command.unwrap().data, vec![2]);
    }

    #[test]
    fn supported_types_filter() {
        let module = MockModule::new(2).with_supported_types([7]);
        assert!(module.is_device_type_supported(7));
        assert!(!module.is_device_type_supported(8));
    }

    #[test]
    fn forced_wait_failure_fires_once() {
        let module = MockModule::new(2);
        module.fail_next_wait();
        assert_eq!(module.wait_for_command(10), codes::NOT_OK);
        assert_eq!(module.wait_for_command(10), codes::TIMEOUT_OCCURRED);
    }
}
