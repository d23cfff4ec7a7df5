//! Engine-side contract of the module handler libraries.
//!
//! Each module id maps to one handler library that receives device statuses
//! and produces commands. The engine talks to it exclusively through
//! [`ModuleApi`]; two providers exist:
//!
//! - [`DynamicModule`]: loads the real handler shared library and forwards
//!   every operation through its C ABI
//! - [`MockModule`]: in-memory implementation for tests
//!
//! Implementations must be reentrant-safe across the listed operations: the
//! session controller calls the forward/ack/connect family while the
//! module's command-waiting thread sits in `wait_for_command`.

pub mod abi;
pub mod dynamic;
pub mod mock;

pub use dynamic::DynamicModule;
pub use mock::{MockCall, MockModule};

use fleet_protocol::Device;

pub use crate::events::ModuleCommand;

/// Return codes shared with the handler libraries.
pub mod codes {
    /// Routine execution succeeded.
    pub const OK: i32 = 0;
    /// Routine execution failed.
    pub const NOT_OK: i32 = -1;
    /// The context handed to the library was not the one it issued.
    pub const CONTEXT_INCORRECT: i32 = -11;
    /// `wait_for_command` ran out of time with no command available.
    pub const TIMEOUT_OCCURRED: i32 = -12;
}

/// Why a device is being disconnected. The discriminants are part of the
/// C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DisconnectReason {
    /// The device said goodbye (disconnect status or command response).
    Announced = 0,
    /// The session ended while the device was still connected.
    Timeout = 1,
    /// The device is gone because of an error.
    Error = 2,
}

/// Result of one `get_command` drain step.
#[derive(Debug)]
pub struct DrainedCommand {
    /// The drained command, when one was available.
    pub command: Option<ModuleCommand>,
    /// Commands still queued inside the library; negative on error.
    pub remaining: i32,
}

/// Operations of one module handler library.
///
/// All integer returns follow [`codes`]: zero for success, negative for
/// failure. Non-zero returns from the forward/ack/connect family are logged
/// by the caller and are not fatal to the session.
pub trait ModuleApi: Send + Sync {
    /// Module number compiled into the library.
    fn module_number(&self) -> i32;

    /// Whether the library can handle the given device type.
    fn is_device_type_supported(&self, device_type: u32) -> bool;

    /// Informs the library that a device appeared.
    fn device_connected(&self, device: &Device) -> i32;

    /// Informs the library that a device is gone.
    fn device_disconnected(&self, reason: DisconnectReason, device: &Device) -> i32;

    /// Hands a device status payload to the library.
    fn forward_status(&self, device: &Device, payload: &[u8]) -> i32;

    /// Hands a device error payload to the library.
    fn forward_error_message(&self, device: &Device, payload: &[u8]) -> i32;

    /// Blocks until the library has a command available or `timeout_ms`
    /// elapses ([`codes::TIMEOUT_OCCURRED`]).
    fn wait_for_command(&self, timeout_ms: u32) -> i32;

    /// Non-blocking drain of one queued command.
    fn get_command(&self) -> DrainedCommand;

    /// Informs the library that the peer acknowledged one of its commands.
    fn command_ack(&self, data: &[u8], device: &Device) -> i32;

    /// Releases the library context. Called exactly once at session end.
    fn destroy(&self) -> i32;
}
