//! Tokio shell around the synchronous engine.
//!
//! The reactor owns the event channel and the interval timers; every select
//! branch calls exactly one engine method and the engine never awaits.
//! Adapters push parsed [`TransportEvent`]s into the channel from their own
//! tasks.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{info, warn};

use crate::engine::Engine;
use crate::transport::{Transport, TransportEvent};

/// Timer cadence for the reactor loop, all in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactorTimers {
    /// Fast sweep: timeouts, re-cancels, slippage, max-age.
    pub check_timeouts_ms: u64,
    /// Slow sweep: maintenance, grace GC, diverge/converge.
    pub diverge_converge_ms: u64,
    /// Ticker poll request cadence; 0 disables polling.
    pub ticker_poll_ms: u64,
    /// Open-orders poll request cadence; 0 disables polling.
    pub orders_poll_ms: u64,
    /// Stats summary log cadence; 0 disables.
    pub stats_ms: u64,
}

impl Default for ReactorTimers {
    fn default() -> Self {
        Self {
            check_timeouts_ms: 5_000,
            diverge_converge_ms: 60_000,
            ticker_poll_ms: 10_000,
            orders_poll_ms: 15_000,
            stats_ms: 5 * 60_000,
        }
    }
}

/// The event loop: one engine, one inbound channel, fixed timers.
pub struct Reactor<T: Transport> {
    engine: Engine<T>,
    events: UnboundedReceiver<TransportEvent>,
    timers: ReactorTimers,
}

impl<T: Transport> Reactor<T> {
    /// Build a reactor plus the sender half adapters push events into.
    pub fn new(engine: Engine<T>, timers: ReactorTimers) -> (Self, UnboundedSender<TransportEvent>) {
        let (tx, rx) = unbounded_channel();
        (
            Reactor {
                engine,
                events: rx,
                timers,
            },
            tx,
        )
    }

    pub fn engine(&self) -> &Engine<T> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<T> {
        &mut self.engine
    }

    fn make_interval(ms: u64) -> tokio::time::Interval {
        // a disabled timer still needs a future; park it on a year
        const DISABLED_PERIOD_MS: u64 = 365 * 24 * 60 * 60 * 1000;
        let period = if ms == 0 { DISABLED_PERIOD_MS } else { ms };
        let mut i = interval(Duration::from_millis(period));
        i.set_missed_tick_behavior(MissedTickBehavior::Delay);
        i
    }

    /// Run until the event channel closes. Returns the engine so the caller
    /// can save state on shutdown.
    pub async fn run(mut self) -> Engine<T> {
        let mut timeouts = Self::make_interval(self.timers.check_timeouts_ms);
        let mut dc = Self::make_interval(self.timers.diverge_converge_ms);
        let mut ticker_poll = Self::make_interval(self.timers.ticker_poll_ms);
        let mut orders_poll = Self::make_interval(self.timers.orders_poll_ms);
        let mut stats = Self::make_interval(self.timers.stats_ms);

        info!("reactor started");
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.engine.handle_event(event),
                        None => {
                            warn!("event channel closed, stopping reactor");
                            break;
                        }
                    }
                }
                _ = timeouts.tick() => self.engine.on_check_timeouts(),
                _ = dc.tick() => self.engine.on_check_diverge_converge(),
                _ = ticker_poll.tick(), if self.timers.ticker_poll_ms > 0 => {
                    self.engine.request_ticker();
                }
                _ = orders_poll.tick(), if self.timers.orders_poll_ms > 0 => {
                    self.engine.request_open_orders();
                }
                _ = stats.tick(), if self.timers.stats_ms > 0 => {
                    self.engine.stats().log_summary();
                }
            }
        }
        self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineSettings;
    use crate::sim::SimTransport;

    #[tokio::test]
    async fn reactor_drains_events_then_stops_on_close() {
        let engine = Engine::new(EngineSettings::default(), SimTransport::new());
        let (reactor, tx) = Reactor::new(engine, ReactorTimers::default());

        tx.send(TransportEvent::Ticker {
            tickers: Default::default(),
            request_time_ms: 0,
        })
        .unwrap();
        drop(tx);

        let engine = reactor.run().await;
        assert_eq!(engine.store().active_count(), 0);
    }
}
