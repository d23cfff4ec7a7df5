//! # fleet-external-server
//!
//! Cloud-side endpoint of the Fleet Protocol: bridges a control plane with
//! vehicle-resident gateways over an MQTT bus, multiplexing many cars over
//! a single process.
//!
//! Each configured car gets one independent session engine:
//!
//! - [`session::CarServer`]: connection state machine and the single
//!   consumer of the session's event queue
//! - [`events`]: bounded fan-in of bus frames, module-produced commands
//!   and timer ticks
//! - [`bus`]: MQTT adapter behind the [`bus::Bus`] seam
//! - [`modules`] / [`module_api`]: handler-library registry, the C ABI of
//!   the handlers, and the per-module command-waiting threads
//! - [`pipeline`]: status ordering and liveness, pending-command FIFOs and
//!   the response deadlines
//! - [`devices`]: the table of currently connected devices
//!
//! The [`supervisor`] assembles the sessions from [`config`] and reduces
//! their outcomes to a process exit code.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod config;
pub mod devices;
pub mod error;
pub mod events;
pub mod module_api;
pub mod modules;
pub mod pipeline;
pub mod session;
pub mod supervisor;

pub use config::{CarConfig, ServerConfig};
pub use error::{BusError, CarError, ConfigError, ModuleError, StartupError};
pub use session::{CarHandle, CarServer, SessionState};
pub use supervisor::ExternalServer;
