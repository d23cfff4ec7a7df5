//! Pending-command tracking and acknowledgement ordering.
//!
//! Every emitted command joins the tail of its module's FIFO and must be
//! acknowledged head-first: the peer echoing any queued counter other than
//! a FIFO head is a protocol violation. A head left unacknowledged past the
//! timeout stalls the session. Responses for counters the pipeline does not
//! know are ignored; the bus is at-least-once, so duplicates happen.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use fleet_protocol::Device;
use tokio::time::Instant;

/// One command awaiting its response.
#[derive(Debug, Clone)]
pub struct PendingCommand {
    /// Session counter value the command was tagged with.
    pub counter: u32,
    /// Target device.
    pub device: Device,
    /// Command payload, kept for the `command_ack` call.
    pub data: Vec<u8>,
    /// Emission time; the response deadline is `issued_at + timeout`.
    pub issued_at: Instant,
}

/// Verdict on one inbound command response.
#[derive(Debug)]
pub enum AckOutcome {
    /// The response matched a FIFO head; the command is done.
    Acknowledged {
        /// Module whose FIFO was popped.
        module_id: u16,
        /// The acknowledged command.
        command: PendingCommand,
    },
    /// The response matched a queued command that is not its FIFO head.
    OutOfOrder {
        /// Module whose FIFO holds the command.
        module_id: u16,
        /// Counter the peer should have acknowledged first.
        expected: u32,
        /// Counter the peer actually sent.
        received: u32,
    },
    /// The response matched nothing outstanding.
    Unknown {
        /// Counter the peer sent.
        received: u32,
    },
}

/// Per-module FIFOs of commands awaiting responses.
#[derive(Debug)]
pub struct CommandPipeline {
    timeout: Duration,
    pending: BTreeMap<u16, VecDeque<PendingCommand>>,
}

impl CommandPipeline {
    /// Creates the pipeline with the command-response timeout.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: BTreeMap::new(),
        }
    }

    /// Appends an emitted command to its module's FIFO.
    pub fn push(&mut self, module_id: u16, command: PendingCommand) {
        self.pending.entry(module_id).or_default().push_back(command);
    }

    /// Matches a response counter against the FIFOs.
    pub fn acknowledge(&mut self, counter: u32) -> AckOutcome {
        for (&module_id, queue) in &mut self.pending {
            if queue.front().is_some_and(|cmd| cmd.counter == counter) {
                if let Some(command) = queue.pop_front() {
                    return AckOutcome::Acknowledged { module_id, command };
                }
            }
        }
        for (&module_id, queue) in &self.pending {
            if let Some(head) = queue.front() {
                if queue.iter().any(|cmd| cmd.counter == counter) {
                    return AckOutcome::OutOfOrder {
                        module_id,
                        expected: head.counter,
                        received: counter,
                    };
                }
            }
        }
        AckOutcome::Unknown { received: counter }
    }

    /// Tick-driven deadline check. A head acknowledged at exactly the
    /// timeout is still fine; only strictly later silence expires. Returns
    /// the counter of the first expired head.
    #[must_use]
    pub fn check_expired(&self, now: Instant) -> Option<u32> {
        self.pending
            .values()
            .filter_map(VecDeque::front)
            .find(|cmd| now > cmd.issued_at + self.timeout)
            .map(|cmd| cmd.counter)
    }

    /// Number of commands awaiting a response.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

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

    fn pending(counter: u32, issued_at: Instant) -> PendingCommand {
        PendingCommand {
            counter,
            device: device(),
            data: vec![0x0a],
            issued_at,
        }
    }

    #[test]
    fn in_order_acknowledgement_pops_heads() {
        let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
        let now = Instant::now();
        pipeline.push(2, pending(1, now));
        pipeline.push(2, pending(2, now));

        assert!(matches!(
            pipeline.acknowledge(1),
            AckOutcome::Acknowledged { module_id: 2, command } if command.counter == 1
        ));
        assert!(matches!(
            pipeline.acknowledge(2),
            AckOutcome::Acknowledged { module_id: 2, .. }
        ));
        assert_eq!(pipeline.outstanding(), 0);
    }

    #[test]
    fn acknowledging_a_non_head_is_out_of_order() {
        let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
        let now = Instant::now();
        pipeline.push(2, pending(1, now));
        pipeline.push(2, pending(2, now));

        assert!(matches!(
            pipeline.acknowledge(2),
            AckOutcome::OutOfOrder { module_id: 2, expected: 1, received: 2 }
        ));
    }

    #[test]
    fn unknown_counters_are_ignored() {
        let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
        pipeline.push(2, pending(1, Instant::now()));
        assert!(matches!(
            pipeline.acknowledge(9),
            AckOutcome::Unknown { received: 9 }
        ));
        assert_eq!(pipeline.outstanding(), 1);
    }

    #[test]
    fn heads_of_independent_modules_are_both_acknowledgeable() {
        let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
        let now = Instant::now();
        pipeline.push(2, pending(1, now));
        pipeline.push(7, pending(2, now));

        assert!(matches!(
            pipeline.acknowledge(2),
            AckOutcome::Acknowledged { module_id: 7, .. }
        ));
        assert!(matches!(
            pipeline.acknowledge(1),
            AckOutcome::Acknowledged { module_id: 2, .. }
        ));
    }

    #[test]
    fn counter_wrap_acknowledges_in_order() {
        let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
        let now = Instant::now();
        pipeline.push(2, pending(u32::MAX, now));
        pipeline.push(2, pending(0, now));

        assert!(matches!(
            pipeline.acknowledge(u32::MAX),
            AckOutcome::Acknowledged { command, .. } if command.counter == u32::MAX
        ));
        assert!(matches!(
            pipeline.acknowledge(0),
            AckOutcome::Acknowledged { command, .. } if command.counter == 0
        ));
    }

    #[test]
    fn deadline_uses_strict_inequality() {
        let timeout = Duration::from_secs(5);
        let mut pipeline = CommandPipeline::new(timeout);
        let issued = Instant::now();
        pipeline.push(2, pending(1, issued));

        assert_eq!(pipeline.check_expired(issued + timeout), None);
        assert_eq!(
            pipeline.check_expired(issued + timeout + Duration::from_millis(1)),
            Some(1)
        );
    }

    #[test]
    fn acknowledged_heads_stop_expiring() {
        let timeout = Duration::from_secs(5);
        let mut pipeline = CommandPipeline::new(timeout);
        let issued = Instant::now();
        pipeline.push(2, pending(1, issued));
        pipeline.push(2, pending(2, issued + Duration::from_secs(4)));

        let _ = pipeline.acknowledge(1);
        // Head is now the second command, whose deadline is later.
        assert_eq!(pipeline.check_expired(issued + timeout + Duration::from_secs(1)), None);
        assert_eq!(
            pipeline.check_expired(issued + Duration::from_secs(10)),
            Some(2)
        );
    }

    proptest! {
        /// In-order acknowledgement of any emission sequence never reports
        /// out-of-order; acknowledging any non-head first always does.
        #[test]
        fn fifo_property(count in 2usize..24, skip in 1usize..23) {
            let mut pipeline = CommandPipeline::new(Duration::from_secs(5));
            let now = Instant::now();
            for i in 0..count {
                pipeline.push(2, pending(i as u32, now));
            }

            let skip = skip % count;
            if skip == 0 {
                for i in 0..count {
                    prop_assert!(
                        matches!(
                            pipeline.acknowledge(i as u32),
                            AckOutcome::Acknowledged { .. }
                        ),
                        "expected in-order acknowledgement to succeed"
                    );
                }
            } else {
                prop_assert!(
                    matches!(
                        pipeline.acknowledge(skip as u32),
                        AckOutcome::OutOfOrder { expected: 0, .. }
                    ),
                    "expected out-of-order acknowledgement"
                );
            }
        }
    }
}
