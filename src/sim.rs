//! Recording/simulated transport.
//!
//! Used by the engine's unit tests and the daemon's paper mode: records
//! every outbound command so tests can assert on traffic, and lets the
//! caller flip the backpressure predicate.

use crate::transport::{OrderSpec, PosId, Transport};

/// One recorded outbound command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCommand {
    Submit { pos: PosId, spec: OrderSpec },
    Cancel { order_id: String, pos: Option<PosId> },
    GetOrder { order_id: String, pos: Option<PosId> },
    GetOpenOrders,
    GetTicker,
}

/// In-process transport that records commands instead of sending them.
#[derive(Debug, Default)]
pub struct SimTransport {
    commands: Vec<SimCommand>,
    yield_flag: bool,
    queued: usize,
}

impl SimTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command recorded so far, oldest first.
    pub fn commands(&self) -> &[SimCommand] {
        &self.commands
    }

    /// Drain the recorded commands.
    pub fn take_commands(&mut self) -> Vec<SimCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Count recorded submits.
    pub fn submit_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, SimCommand::Submit { .. }))
            .count()
    }

    /// Cancel commands recorded for a given order id.
    pub fn cancels_for(&self, order_id: &str) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, SimCommand::Cancel { order_id: oid, .. } if oid == order_id))
            .count()
    }

    /// Force the backpressure predicate.
    pub fn set_should_yield(&mut self, yield_flag: bool) {
        self.yield_flag = yield_flag;
    }

    /// Pretend `n` commands are queued in the adapter.
    pub fn set_queued_commands(&mut self, n: usize) {
        self.queued = n;
    }
}

impl Transport for SimTransport {
    fn submit(&mut self, pos: PosId, spec: &OrderSpec) {
        self.commands.push(SimCommand::Submit {
            pos,
            spec: spec.clone(),
        });
    }

    fn cancel(&mut self, order_id: &str, pos: Option<PosId>) {
        self.commands.push(SimCommand::Cancel {
            order_id: order_id.to_string(),
            pos,
        });
    }

    fn get_order(&mut self, order_id: &str, pos: Option<PosId>) {
        self.commands.push(SimCommand::GetOrder {
            order_id: order_id.to_string(),
            pos,
        });
    }

    fn get_open_orders(&mut self) {
        self.commands.push(SimCommand::GetOpenOrders);
    }

    fn get_ticker(&mut self) {
        self.commands.push(SimCommand::GetTicker);
    }

    fn should_yield(&self) -> bool {
        self.yield_flag
    }

    fn queued_commands(&self) -> usize {
        self.queued
    }

    fn detach(&mut self, _pos: PosId) {
        // nothing in flight to unbind; recorded history stays
    }
}
