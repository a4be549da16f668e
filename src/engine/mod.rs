//! Order lifecycle engine.
//!
//! A single-threaded, timer-driven reactor that owns the authoritative set
//! of positions, reconciles them against exchange-reported state, and drives
//! the diverge/converge consolidation machinery and the slippage/cancel
//! state machine. Events and timer ticks enter one at a time; every method
//! runs to completion without suspension.

pub mod dc;
pub mod lifecycle;
pub mod position;
pub mod save;
pub mod settings;
pub mod slippage;
pub mod stats;
pub mod store;
pub mod sweeps;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::market::{Market, MarketInfo, MarketTable, SlotIndex};
use crate::transport::{Transport, TransportEvent};

pub use dc::DcGroup;
pub use position::{CancelReason, FillType, Position, Side};
pub use settings::{EngineSettings, IdScope, SlippageStrategy};
pub use stats::EngineStats;
pub use store::PositionStore;

/// Millisecond clock, swappable for deterministic tests.
#[derive(Debug, Clone)]
pub enum Clock {
    System,
    Manual(Arc<AtomicI64>),
}

impl Clock {
    pub fn manual(start_ms: i64) -> Clock {
        Clock::Manual(Arc::new(AtomicI64::new(start_ms)))
    }

    pub fn now_ms(&self) -> i64 {
        match self {
            Clock::System => chrono::Utc::now().timestamp_millis(),
            Clock::Manual(t) => t.load(Ordering::Relaxed),
        }
    }

    /// Move a manual clock forward; no-op on the system clock.
    pub fn advance(&self, delta_ms: i64) {
        if let Clock::Manual(t) = self {
            t.fetch_add(delta_ms, Ordering::Relaxed);
        }
    }

    /// Pin a manual clock to an absolute time; no-op on the system clock.
    pub fn set(&self, ms: i64) {
        if let Clock::Manual(t) = self {
            t.store(ms, Ordering::Relaxed);
        }
    }
}

/// The reactor core.
///
/// Generic over the transport so tests and paper runs plug in
/// [`crate::sim::SimTransport`] while production wires a real adapter.
pub struct Engine<T: Transport> {
    pub(crate) settings: EngineSettings,
    pub(crate) markets: MarketTable,
    pub(crate) store: PositionStore,
    pub(crate) transport: T,
    pub(crate) stats: EngineStats,
    pub(crate) clock: Clock,

    /// Pending cancel-groups awaiting completion.
    pub(crate) dc_groups: Vec<DcGroup>,
    /// Slot indices that must not be auto-set while a DC group is in flight.
    /// Multiset semantics: one entry per reserving group member.
    pub(crate) dc_reserved: HashMap<Market, Vec<SlotIndex>>,

    /// First-seen times for exchange order ids we do not own.
    pub(crate) grace_times: HashMap<String, i64>,

    /// Market filter of a user-initiated cancel-all in progress.
    pub(crate) cancel_all_filter: Option<String>,

    pub(crate) maintenance_triggered: bool,

    /// Test mode: acks are synthesized locally, no transport traffic.
    pub(crate) is_testing: bool,
}

impl<T: Transport> Engine<T> {
    pub fn new(settings: EngineSettings, transport: T) -> Engine<T> {
        debug!("engine created");
        Engine {
            settings,
            markets: MarketTable::new(),
            store: PositionStore::new(),
            transport,
            stats: EngineStats::new(),
            clock: Clock::System,
            dc_groups: Vec::new(),
            dc_reserved: HashMap::new(),
            grace_times: HashMap::new(),
            cancel_all_filter: None,
            maintenance_triggered: false,
            is_testing: false,
        }
    }

    /// Engine with a manual clock, for tests.
    pub fn with_clock(settings: EngineSettings, transport: T, clock: Clock) -> Engine<T> {
        let mut engine = Engine::new(settings, transport);
        engine.clock = clock;
        engine
    }

    pub fn set_testing(&mut self, testing: bool) {
        self.is_testing = testing;
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &PositionStore {
        &self.store
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn market_info(&self, market: &Market) -> Option<&MarketInfo> {
        self.markets.get(market)
    }

    pub(crate) fn market_info_mut(&mut self, market: &Market) -> &mut MarketInfo {
        self.markets.entry(market.clone()).or_default()
    }

    pub fn markets(&self) -> &MarketTable {
        &self.markets
    }

    /// Latest observed top-of-book ask for a market.
    pub fn lo_sell(&self, market: &Market) -> crate::coin::Coin {
        self.markets
            .get(market)
            .map(|i| i.lowest_sell)
            .unwrap_or_default()
    }

    /// Latest observed top-of-book bid for a market.
    pub fn hi_buy(&self, market: &Market) -> crate::coin::Coin {
        self.markets
            .get(market)
            .map(|i| i.highest_buy)
            .unwrap_or_default()
    }

    /// Inject per-market automation settings from config.
    #[allow(clippy::too_many_arguments)]
    pub fn set_market_settings(
        &mut self,
        market: Market,
        order_min: i64,
        order_max: i64,
        order_dc: i64,
        order_dc_nice: i64,
        landmark_start: i64,
        landmark_thresh: i64,
        market_sentiment: bool,
        market_offset: f64,
    ) {
        let info = self.market_info_mut(&market);
        info.order_min = order_min;
        info.order_max = order_max;
        info.order_dc = order_dc;
        info.order_dc_nice = order_dc_nice;
        info.order_landmark_start = landmark_start;
        info.order_landmark_thresh = landmark_thresh;
        info.market_sentiment = market_sentiment;
        info.market_offset = market_offset;
    }

    /// Dispatch one parsed transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Ticker {
                tickers,
                request_time_ms,
            } => self.process_ticker(&tickers, request_time_ms),
            TransportEvent::OpenOrders {
                order_ids,
                orders,
                request_time_ms,
            } => self.process_open_orders(&order_ids, &orders, request_time_ms),
            TransportEvent::OrderStatus {
                order_id,
                status,
                filled_quantity,
                filled_fee,
            } => self.handle_order_status(&order_id, status, filled_quantity, filled_fee),
            TransportEvent::NewOrderAck {
                pos,
                order_number,
                error,
            } => self.handle_new_order_ack(pos, order_number, error),
            TransportEvent::CancelAck { order_id, status } => {
                self.handle_cancel_ack(&order_id, status)
            }
            TransportEvent::FillNotification { order_id } => {
                self.fill(&order_id, FillType::Wss, 0)
            }
            TransportEvent::HistoryFills { order_ids } => {
                for order_id in &order_ids {
                    self.fill(order_id, FillType::History, 0);
                }
            }
        }
    }

    /// Ask the adapter for a fresh ticker snapshot.
    pub fn request_ticker(&mut self) {
        self.transport.get_ticker();
    }

    /// Ask the adapter for a fresh open-orders snapshot.
    pub fn request_open_orders(&mut self) {
        self.transport.get_open_orders();
    }

    /// Dump internal DC and maintenance state to the log.
    pub fn print_internal(&self) {
        info!(
            maintenance_time = self.settings.maintenance_time,
            maintenance_triggered = self.maintenance_triggered,
            dc_groups = self.dc_groups.len(),
            "engine internal state"
        );
        for group in &self.dc_groups {
            info!(
                members = group.members.len(),
                will_be_landmark = group.will_be_landmark,
                new_indices = ?group.new_indices,
                "dc group"
            );
        }
        for (market, reserved) in &self.dc_reserved {
            if !reserved.is_empty() {
                info!(%market, reserved = ?reserved, "dc reserved indices");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::coin::Coin;
    use crate::sim::SimTransport;
    use crate::transport::{CancelStatus, OpenOrder, PosId, SubmitError, TickerInfo};

    const T0: i64 = 1_000_000;

    fn engine_for_test() -> Engine<SimTransport> {
        let mut settings = EngineSettings::default();
        settings.verbosity = 0;
        Engine::with_clock(settings, SimTransport::new(), Clock::manual(T0))
    }

    fn market() -> Market {
        Market::from("X-Y")
    }

    /// Register `n` grid slots as ghosts: slot i is buy 100+i / sell 150+i.
    fn seed_slots(engine: &mut Engine<SimTransport>, n: i64) {
        for i in 0..n {
            engine
                .add_position(
                    "X-Y",
                    Side::Buy,
                    &format!("{}", 100 + i),
                    &format!("{}", 150 + i),
                    "1",
                    "ghost",
                    "",
                    Vec::new(),
                    false,
                    true,
                )
                .unwrap();
        }
    }

    /// Place and acknowledge an order at an existing slot.
    fn add_active(
        engine: &mut Engine<SimTransport>,
        side: Side,
        idx: SlotIndex,
    ) -> PosId {
        let id = engine
            .add_position(
                "X-Y",
                side,
                &format!("{}", 100 + idx),
                &format!("{}", 150 + idx),
                "1",
                "active",
                "",
                vec![idx],
                false,
                true,
            )
            .unwrap()
            .unwrap();
        engine.handle_event(TransportEvent::NewOrderAck {
            pos: id,
            order_number: Some(format!("oid{idx}")),
            error: None,
        });
        id
    }

    fn ticker(bid: &str, ask: &str) -> HashMap<Market, TickerInfo> {
        let mut map = HashMap::new();
        map.insert(
            market(),
            TickerInfo {
                bid: Coin::parse(bid),
                ask: Coin::parse(ask),
            },
        );
        map
    }

    /// Every live position's posted price appears exactly once in its
    /// market's price multiset.
    fn assert_order_prices_invariant(engine: &Engine<SimTransport>) {
        for (market, info) in engine.markets() {
            let posted: Vec<Coin> = engine
                .store()
                .iter()
                .filter(|p| p.market == *market)
                .map(|p| p.price)
                .collect();
            assert_eq!(
                info.order_prices.len(),
                posted.len(),
                "price multiset size mismatch for {market}"
            );
            for price in &posted {
                let in_index = info.order_prices.iter().filter(|p| *p == price).count();
                let live = posted.iter().filter(|p| *p == price).count();
                assert_eq!(in_index, live, "price {price} count mismatch for {market}");
            }
        }
    }

    #[test]
    fn s1_converge_forms_landmark_after_group_acks() {
        let mut engine = engine_for_test();
        engine.set_market_settings(market(), 0, 0, 3, 0, 0, 0, false, 0.0);
        seed_slots(&mut engine, 10);
        for idx in 2..=6 {
            add_active(&mut engine, Side::Buy, idx);
        }

        engine.on_check_diverge_converge();

        // the first full run {2,3,4} is cancelled and reserved
        for idx in [2, 3, 4] {
            let id = engine.store().position_by_index(&market(), idx).unwrap();
            let pos = engine.store().get(id).unwrap();
            assert!(pos.is_cancelling, "index {idx} should be cancelling");
            assert_eq!(pos.cancel_reason, Some(CancelReason::Dc));
            assert!(engine.is_index_diverging_converging(&market(), idx));
        }
        for idx in [5, 6] {
            let id = engine.store().position_by_index(&market(), idx).unwrap();
            assert!(!engine.store().get(id).unwrap().is_cancelling);
        }
        assert_eq!(engine.dc_groups.len(), 1);

        // acknowledge the three cancels; the last one fulfills the group
        for idx in [2, 3, 4] {
            engine.handle_event(TransportEvent::CancelAck {
                order_id: format!("oid{idx}"),
                status: CancelStatus::OrderCanceled,
            });
        }

        let id = engine.store().position_by_index(&market(), 3).unwrap();
        let landmark = engine.store().get(id).unwrap();
        assert!(landmark.is_landmark);
        assert_eq!(landmark.market_indices, vec![2, 3, 4]);
        // prices from the lowest slot, size summed over the run
        assert_eq!(landmark.buy_price, Coin::parse("102"));
        assert_eq!(landmark.sell_price, Coin::parse("152"));
        assert_eq!(landmark.btc_amount, Coin::parse("3"));
        for idx in [2, 3, 4] {
            assert!(!engine.is_index_diverging_converging(&market(), idx));
        }
        assert!(engine.dc_groups.is_empty());
        assert_order_prices_invariant(&engine);
    }

    #[test]
    fn s2_ticker_fill_flips_slot_with_alternate_size() {
        let mut engine = engine_for_test();
        engine.settings.ticker_safety_delay_time = 5_000;
        seed_slots(&mut engine, 5);

        // slot 5 carries an alternate size
        let id = engine
            .add_position(
                "X-Y",
                Side::Buy,
                "105",
                "155",
                "1/2",
                "active",
                "",
                Vec::new(),
                false,
                true,
            )
            .unwrap()
            .unwrap();
        let t_request = T0 + 100_000;
        engine.clock().set(t_request - 10_000);
        engine.handle_event(TransportEvent::NewOrderAck {
            pos: id,
            order_number: Some("oid5".to_string()),
            error: None,
        });
        engine.clock().set(t_request + 10_000);

        // ask moved below our buy: crossed, classified as a fill
        engine.process_ticker(&ticker("95", "100"), t_request);

        assert!(!engine.store().contains(id), "filled buy should be removed");
        let slot = engine.market_info(&market()).unwrap().slot(5).unwrap();
        assert_eq!(slot.fill_count, 1);

        let new_id = engine.store().position_by_index(&market(), 5).unwrap();
        let flipped = engine.store().get(new_id).unwrap();
        assert_eq!(flipped.side, Side::Sell);
        assert_eq!(flipped.market_indices, vec![5]);
        assert_eq!(flipped.sell_price, Coin::parse("155"));
        assert_eq!(flipped.buy_price, Coin::parse("105"));
        // size came from the toggled alternate
        assert_eq!(flipped.btc_amount, Coin::parse("2"));
        assert_eq!(engine.stats().total_fills(), 1);
        assert_order_prices_invariant(&engine);
    }

    #[test]
    fn s3_queued_cancel_race_issues_cancel_on_ack() {
        let mut engine = engine_for_test();
        seed_slots(&mut engine, 1);
        let id = engine
            .add_position(
                "X-Y", Side::Buy, "100", "150", "1", "active", "", vec![0], false, true,
            )
            .unwrap()
            .unwrap();

        engine.cancel_order(id, false, CancelReason::User);
        {
            let pos = engine.store().get(id).unwrap();
            assert!(pos.is_cancelling);
            assert_eq!(pos.order_cancel_time, 1);
        }
        // no exchange cancel yet: there is no id to cancel
        assert_eq!(engine.transport().cancels_for("abc"), 0);

        engine.handle_event(TransportEvent::NewOrderAck {
            pos: id,
            order_number: Some("abc".to_string()),
            error: None,
        });

        let pos = engine.store().get(id).unwrap();
        assert!(engine.store().is_active(id));
        assert!(pos.is_cancelling);
        assert_eq!(pos.cancel_reason, Some(CancelReason::User));
        assert_eq!(engine.transport().cancels_for("abc"), 1);
    }

    #[test]
    fn s4_stray_open_order_adopts_queued_position() {
        let mut engine = engine_for_test();
        engine.settings.should_clear_stray_orders = true;
        seed_slots(&mut engine, 1);
        let id = engine
            .add_position(
                "X-Y", Side::Buy, "100", "150", "0.5", "active", "", vec![0], false, true,
            )
            .unwrap()
            .unwrap();

        // the submission is old enough that its ack is clearly lost
        engine.clock().advance(15_000);
        let now = engine.now_ms();
        let orders = vec![OpenOrder {
            market: market(),
            order_number: "stray1".to_string(),
            side: Side::Buy,
            price: Coin::parse("100"),
            btc_amount: Coin::parse("0.5004"),
        }];
        engine.process_open_orders(&["stray1".to_string()], &orders, now);

        assert_eq!(engine.store().by_order_id("stray1"), Some(id));
        assert!(engine.store().is_active(id));
        assert_eq!(engine.transport().cancels_for("stray1"), 0);
        assert!(engine.grace_times.is_empty());
    }

    #[test]
    fn s6_blank_orderbook_flash_is_mitigated() {
        let mut engine = engine_for_test();
        engine.settings.should_mitigate_blank_orderbook_flash = true;
        for _ in 0..60 {
            let id = engine
                .add_position(
                    "X-Y", Side::Buy, "100", "150", "1", "active", "", Vec::new(), false, true,
                )
                .unwrap()
                .unwrap();
            let n = engine.store().get(id).unwrap().lowest_market_index();
            engine.handle_event(TransportEvent::NewOrderAck {
                pos: id,
                order_number: Some(format!("o{n}")),
                error: None,
            });
        }
        assert_eq!(engine.store().active_count(), 60);

        // everything is old enough that absence would normally mean filled
        engine.clock().advance(60_000);
        let now = engine.now_ms();
        engine.process_open_orders(&[], &[], now);

        assert_eq!(engine.store().active_count(), 60, "no fills may be inferred");
    }

    #[test]
    fn blank_orderbook_without_mitigation_infers_fills() {
        let mut engine = engine_for_test();
        seed_slots(&mut engine, 1);
        let id = add_active(&mut engine, Side::Buy, 0);

        engine.clock().advance(60_000);
        let now = engine.now_ms();
        engine.process_open_orders(&[], &[], now);

        // absent from the snapshot: inferred filled and flipped to a sell
        assert!(!engine.store().contains(id));
        let flipped = engine.store().position_by_index(&market(), 0).unwrap();
        assert_eq!(engine.store().get(flipped).unwrap().side, Side::Sell);
    }

    #[test]
    fn diverge_splits_landmark_into_singletons() {
        let mut engine = engine_for_test();
        engine.set_market_settings(market(), 0, 0, 3, 0, 2, 0, false, 0.0);
        seed_slots(&mut engine, 10);

        let id = engine
            .add_position(
                "X-Y", Side::Buy, "104", "154", "1", "active", "", vec![4, 5, 6], true, true,
            )
            .unwrap()
            .unwrap();
        engine.handle_event(TransportEvent::NewOrderAck {
            pos: id,
            order_number: Some("lm".to_string()),
            error: None,
        });

        engine.on_check_diverge_converge();

        let pos = engine.store().get(id).unwrap();
        assert!(pos.is_cancelling);
        assert_eq!(pos.cancel_reason, Some(CancelReason::Dc));
        for idx in [4, 5, 6] {
            assert!(engine.is_index_diverging_converging(&market(), idx));
        }

        engine.handle_event(TransportEvent::CancelAck {
            order_id: "lm".to_string(),
            status: CancelStatus::OrderCanceled,
        });

        assert!(!engine.store().contains(id));
        for idx in [4, 5, 6] {
            let sid = engine.store().position_by_index(&market(), idx).unwrap();
            let single = engine.store().get(sid).unwrap();
            assert!(!single.is_landmark);
            assert_eq!(single.market_indices, vec![idx]);
            assert_eq!(single.buy_price, Coin::parse(&format!("{}", 100 + idx)));
            assert!(!engine.is_index_diverging_converging(&market(), idx));
        }
        assert_order_prices_invariant(&engine);
    }

    #[test]
    fn ticker_is_idempotent_within_safety_window() {
        let mut engine = engine_for_test();
        engine.settings.ticker_safety_delay_time = 5_000;
        seed_slots(&mut engine, 3);
        add_active(&mut engine, Side::Buy, 1);

        engine.clock().advance(60_000);
        let request = engine.now_ms() - 6_000;
        let payload = ticker("95", "100");

        engine.process_ticker(&payload, request);
        let slot_fills = engine.market_info(&market()).unwrap().slot(1).unwrap().fill_count;
        assert_eq!(slot_fills, 1);

        // the flipped replacement is fresh; the same payload must not fill it
        engine.process_ticker(&payload, request);
        let slot_fills = engine.market_info(&market()).unwrap().slot(1).unwrap().fill_count;
        assert_eq!(slot_fills, 1, "second identical ticker must not re-fill");
    }

    #[test]
    fn stray_cancel_waits_for_grace_period() {
        let mut engine = engine_for_test();
        engine.settings.should_clear_stray_orders = true;
        engine.settings.should_clear_stray_orders_all = true;

        let orders = vec![OpenOrder {
            market: market(),
            order_number: "ghost9".to_string(),
            side: Side::Sell,
            price: Coin::parse("999"),
            btc_amount: Coin::parse("1"),
        }];

        let now = engine.now_ms();
        engine.process_open_orders(&["ghost9".to_string()], &orders, now);
        assert_eq!(engine.transport().cancels_for("ghost9"), 0, "first sighting only records");

        engine.clock().advance(engine.settings.stray_grace_time_limit + 1_000);
        let now = engine.now_ms();
        engine.process_open_orders(&["ghost9".to_string()], &orders, now);
        assert_eq!(engine.transport().cancels_for("ghost9"), 1);

        // the grace stamp was pushed forward; no repeat cancel yet
        let now = engine.now_ms();
        engine.process_open_orders(&["ghost9".to_string()], &orders, now);
        assert_eq!(engine.transport().cancels_for("ghost9"), 1);
    }

    #[test]
    fn insufficient_balance_drops_queued_position() {
        let mut engine = engine_for_test();
        seed_slots(&mut engine, 1);
        let id = engine
            .add_position(
                "X-Y", Side::Buy, "100", "150", "1", "active", "", vec![0], false, true,
            )
            .unwrap()
            .unwrap();

        engine.handle_event(TransportEvent::NewOrderAck {
            pos: id,
            order_number: None,
            error: Some(SubmitError::InsufficientBalance),
        });

        assert!(!engine.store().contains(id));
        assert!(engine.market_info(&market()).unwrap().order_prices.is_empty());
    }

    #[test]
    fn post_only_reject_walks_price_and_resubmits() {
        let mut engine = engine_for_test();
        seed_slots(&mut engine, 1);
        // a known book so the walk can be calculated
        engine.process_ticker(&ticker("95", "105"), 0);
        let id = engine
            .add_position(
                "X-Y", Side::Buy, "100", "150", "1", "active", "", vec![0], false, true,
            )
            .unwrap()
            .unwrap();

        engine.handle_event(TransportEvent::NewOrderAck {
            pos: id,
            order_number: None,
            error: Some(SubmitError::PostOnlyRejected),
        });

        let pos = engine.store().get(id).unwrap();
        assert!(pos.is_slippage);
        assert_eq!(pos.price_reset_count, 1);
        // two submits: the original and the walked resubmission
        assert_eq!(engine.transport().submit_count(), 2);
        assert_order_prices_invariant(&engine);
    }

    #[test]
    fn unknown_fill_id_is_dropped() {
        let mut engine = engine_for_test();
        seed_slots(&mut engine, 1);
        add_active(&mut engine, Side::Buy, 0);

        engine.fill("not-ours", FillType::Wss, 0);
        assert_eq!(engine.store().active_count(), 1);
        assert_eq!(engine.stats().total_fills(), 0);
    }

    #[test]
    fn wss_fill_notification_routes_like_any_fill() {
        let mut engine = engine_for_test();
        seed_slots(&mut engine, 2);
        add_active(&mut engine, Side::Sell, 1);

        engine.handle_event(TransportEvent::FillNotification {
            order_id: "oid1".to_string(),
        });

        let flipped = engine.store().position_by_index(&market(), 1).unwrap();
        assert_eq!(engine.store().get(flipped).unwrap().side, Side::Buy);
        assert_eq!(engine.stats().total_fills(), 1);
    }

    #[test]
    fn onetime_fill_deletes_without_flip() {
        let mut engine = engine_for_test();
        let id = engine
            .add_position(
                "X-Y", Side::Buy, "100", "0", "1", "onetime", "", Vec::new(), false, true,
            )
            .unwrap()
            .unwrap();
        engine.handle_event(TransportEvent::NewOrderAck {
            pos: id,
            order_number: Some("ot1".to_string()),
            error: None,
        });

        engine.fill("ot1", FillType::GetOrder, 0);

        assert!(!engine.store().contains(id));
        assert_eq!(engine.store().active_count(), 0);
        assert_eq!(engine.stats().total_fills(), 1);
    }

    #[test]
    fn queued_cancel_on_dc_member_filled_releases_group() {
        // a member fills while its converge group is still in flight: the
        // group aborts and the reservations are released together
        let mut engine = engine_for_test();
        engine.set_market_settings(market(), 0, 0, 3, 0, 0, 0, false, 0.0);
        seed_slots(&mut engine, 10);
        for idx in 2..=6 {
            add_active(&mut engine, Side::Buy, idx);
        }
        engine.on_check_diverge_converge();
        assert_eq!(engine.dc_groups.len(), 1);

        // a late fill lands on a cancelling member
        engine.clock().advance(60_000);
        engine.handle_event(TransportEvent::FillNotification {
            order_id: "oid3".to_string(),
        });

        assert!(engine.dc_groups.is_empty(), "group must abort on member fill");
        for idx in [2, 3, 4] {
            assert!(
                !engine.is_index_diverging_converging(&market(), idx),
                "reservation for {idx} must be released"
            );
        }
    }
}
