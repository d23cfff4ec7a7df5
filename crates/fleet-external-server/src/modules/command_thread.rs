//! Command-waiting thread of one module.
//!
//! The handler ABI delivers commands through a blocking `wait_for_command`,
//! so each module gets a dedicated OS thread: wait with a bounded timeout,
//! drain with `get_command` until the library reports none remaining,
//! enqueue each drained command, repeat. Draining on one thread per module
//! is what preserves per-module command order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::events::{EventQueue, SessionEvent};
use crate::module_api::{codes, ModuleApi};

/// How long one `wait_for_command` call may block. Bounds the shutdown
/// latency of the thread.
const WAIT_FOR_COMMAND_TIMEOUT_MS: u32 = 1000;

/// Handle of a running command-waiting thread.
pub(crate) struct CommandWorker {
    thread: std::thread::JoinHandle<()>,
}

impl CommandWorker {
    /// Spawns the thread. It exits when `cancel` is cancelled or when
    /// `wait_for_command` reports a hard failure.
    pub(crate) fn spawn(
        module_id: u16,
        api: Arc<dyn ModuleApi>,
        queue: EventQueue,
        cancel: CancellationToken,
    ) -> Self {
        let thread = std::thread::Builder::new()
            .name(format!("module-{module_id}-commands"))
            .spawn(move || poll_loop(module_id, &api, &queue, &cancel))
            .expect("spawning a command-waiting thread failed");
        Self { thread }
    }

    /// Joins the thread without blocking the async runtime.
    pub(crate) async fn join(self) {
        let _ = tokio::task::spawn_blocking(move || self.thread.join()).await;
    }
}

fn poll_loop(
    module_id: u16,
    api: &Arc<dyn ModuleApi>,
    queue: &EventQueue,
    cancel: &CancellationToken,
) {
    while !cancel.is_cancelled() {
        match api.wait_for_command(WAIT_FOR_COMMAND_TIMEOUT_MS) {
            codes::OK => {
                if !drain(module_id, api.as_ref(), queue) {
                    return;
                }
            }
            codes::TIMEOUT_OCCURRED => {}
            code if code < 0 => {
                // Only this module's command flow stops; the session keeps
                // forwarding statuses to it.
                error!(module_id, code, "wait_for_command failed, stopping command polling");
                return;
            }
            code => {
                warn!(module_id, code, "unexpected wait_for_command return value");
            }
        }
    }
    debug!(module_id, "command-waiting thread stopped");
}

/// Drains every queued command into the event queue. Returns `false` when
/// the library reported a drain error.
fn drain(module_id: u16, api: &dyn ModuleApi, queue: &EventQueue) -> bool {
    loop {
        let drained = api.get_command();
        if drained.remaining < 0 {
            error!(module_id, code = drained.remaining, "get_command failed");
            return false;
        }
        if let Some(command) = drained.command {
            queue.push(SessionEvent::ModuleCommand { module_id, command });
        }
        if drained.remaining == 0 {
            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use fleet_protocol::Device;

    use super::*;
    use crate::module_api::MockModule;

    fn device(name: &str) -> Device {
        Device {
            module: 2,
            device_type: 7,
            device_role: "button".to_string(),
            device_name: name.to_string(),
            priority: 0,
        }
    }

    #[tokio::test]
    async fn drains_commands_in_order() {
        let cancel = CancellationToken::new();
        let (queue, mut rx) = EventQueue::new(8, cancel.clone());
        let module = Arc::new(MockModule::new(2));
        module.push_command(device("A"), vec![1]);
        module.push_command(device("B"), vec![2]);

        let worker = CommandWorker::spawn(2, module, queue, cancel.clone());

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        cancel.cancel();
        worker.join().await;

        let SessionEvent::ModuleCommand { module_id, command } = first else {
            panic!("expected a module command event");
        };
        assert_eq!(module_id, 2);
        assert_eq!(command.data, vec![1]);
        let SessionEvent::ModuleCommand { command, .. } = second else {
            panic!("expected a module command event");
        };
        assert_eq!(command.data, vec![2]);
    }

    #[tokio::test]
    async fn hard_wait_failure_stops_the_thread() {
        let cancel = CancellationToken::new();
        let (queue, _rx) = EventQueue::new(8, cancel.clone());
        let module = Arc::new(MockModule::new(2));
        module.fail_next_wait();

        let worker = CommandWorker::spawn(2, module, queue, cancel);
        // Joins promptly because the thread exits on the failure, without
        // the cancellation token ever being cancelled.
        worker.join().await;
    }
}
