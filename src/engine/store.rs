//! Owning store for every position, plus the side indices.
//!
//! Key invariants:
//! 1. A position is in exactly one of {queued, active}; a non-empty
//!    `order_number` means active and present in the by-order-id map.
//! 2. Secondary indices hold `PosId` only; the flat map is the sole owner.
//! 3. Enumeration for mutation loops goes through snapshot id lists, so a
//!    position removed mid-sweep is never visited again in that sweep.

use std::collections::{HashMap, HashSet};

use tracing::error;

use crate::coin::{Coin, A_LOT};
use crate::engine::position::{Position, Side};
use crate::market::{Market, SlotIndex};
use crate::transport::PosId;

#[derive(Debug, Default)]
pub struct PositionStore {
    next_id: u64,
    all: HashMap<PosId, Position>,
    queued: HashSet<PosId>,
    active: HashSet<PosId>,
    by_order_id: HashMap<String, PosId>,
}

impl PositionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next stable internal id.
    pub fn next_id(&mut self) -> PosId {
        self.next_id += 1;
        PosId(self.next_id)
    }

    /// Insert a freshly constructed position into the queued set.
    ///
    /// The caller appends `pos.price` to the market's `order_prices`.
    pub fn add(&mut self, pos: Position) -> PosId {
        let id = pos.id;
        if self.all.contains_key(&id) {
            error!(%id, "local error: position already present, refusing to re-add");
            return id;
        }
        self.queued.insert(id);
        self.all.insert(id, pos);
        id
    }

    /// Move a queued position to active under the canonical order id.
    ///
    /// Records `order_set_time`, clears the new-hilo flag, and registers the
    /// by-order-id mapping. Returns false when the id is unknown.
    pub fn activate(&mut self, id: PosId, order_number: String, now: i64) -> bool {
        let Some(pos) = self.all.get_mut(&id) else {
            error!(%id, "local error: activate on unknown position");
            return false;
        };
        pos.order_set_time = now;
        pos.is_new_hilo_order = false;
        pos.order_number = order_number.clone();
        self.queued.remove(&id);
        self.active.insert(id);
        self.by_order_id.insert(order_number, id);
        true
    }

    /// Remove a position from every index, returning it.
    ///
    /// Withdrawing its price from `order_prices`, detaching transport
    /// requests, and clearing DC reservations are the engine's job.
    pub fn remove(&mut self, id: PosId) -> Option<Position> {
        let pos = self.all.remove(&id)?;
        self.queued.remove(&id);
        self.active.remove(&id);
        // only drop the mapping if it still points at this position; a
        // replacement may have re-registered the same exchange id
        if self.by_order_id.get(&pos.order_number) == Some(&id) {
            self.by_order_id.remove(&pos.order_number);
        }
        Some(pos)
    }

    pub fn get(&self, id: PosId) -> Option<&Position> {
        self.all.get(&id)
    }

    pub fn get_mut(&mut self, id: PosId) -> Option<&mut Position> {
        self.all.get_mut(&id)
    }

    pub fn contains(&self, id: PosId) -> bool {
        self.all.contains_key(&id)
    }

    pub fn is_queued(&self, id: PosId) -> bool {
        self.queued.contains(&id)
    }

    pub fn is_active(&self, id: PosId) -> bool {
        self.active.contains(&id)
    }

    pub fn has_active(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn has_queued(&self) -> bool {
        !self.queued.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn by_order_id(&self, order_number: &str) -> Option<PosId> {
        self.by_order_id.get(order_number).copied()
    }

    pub fn is_order_id(&self, order_number: &str) -> bool {
        self.by_order_id.contains_key(order_number)
    }

    /// Snapshot of every position id. Safe to mutate the store while
    /// walking the returned list.
    pub fn all_ids(&self) -> Vec<PosId> {
        self.all.keys().copied().collect()
    }

    pub fn queued_ids(&self) -> Vec<PosId> {
        self.queued.iter().copied().collect()
    }

    pub fn active_ids(&self) -> Vec<PosId> {
        self.active.iter().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.all.values()
    }

    /// The position (any state) covering `idx` for `market`, if one exists.
    pub fn position_by_index(&self, market: &Market, idx: SlotIndex) -> Option<PosId> {
        self.all
            .values()
            .find(|p| p.market == *market && p.market_indices.contains(&idx))
            .map(|p| p.id)
    }

    /// Highest-priced active, non-cancelling, acknowledged buy.
    pub fn highest_active_buy_by_price(&self, market: &Market) -> Option<PosId> {
        let mut best: Option<(Coin, PosId)> = None;
        for id in &self.active {
            let Some(pos) = self.all.get(id) else { continue };
            if pos.side != Side::Buy
                || pos.is_cancelling
                || pos.order_number.is_empty()
                || pos.market != *market
            {
                continue;
            }
            if best.map_or(true, |(p, _)| pos.buy_price > p) {
                best = Some((pos.buy_price, *id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Lowest-priced active, non-cancelling, acknowledged sell.
    pub fn lowest_active_sell_by_price(&self, market: &Market) -> Option<PosId> {
        let mut best: Option<(Coin, PosId)> = None;
        for id in &self.active {
            let Some(pos) = self.all.get(id) else { continue };
            if pos.side != Side::Sell
                || pos.is_cancelling
                || pos.order_number.is_empty()
                || pos.market != *market
            {
                continue;
            }
            if best.map_or(true, |(p, _)| pos.sell_price < p) {
                best = Some((pos.sell_price, *id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Highest-index active, non-cancelling, acknowledged buy.
    pub fn highest_active_buy_by_index(&self, market: &Market) -> Option<PosId> {
        let mut best: Option<(SlotIndex, PosId)> = None;
        for id in &self.active {
            let Some(pos) = self.all.get(id) else { continue };
            if pos.side != Side::Buy
                || pos.is_cancelling
                || pos.order_number.is_empty()
                || pos.market != *market
            {
                continue;
            }
            let idx = pos.highest_market_index();
            if best.map_or(true, |(i, _)| idx > i) {
                best = Some((idx, *id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Lowest-index active, non-cancelling, acknowledged sell.
    pub fn lowest_active_sell_by_index(&self, market: &Market) -> Option<PosId> {
        let mut best: Option<(SlotIndex, PosId)> = None;
        for id in &self.active {
            let Some(pos) = self.all.get(id) else { continue };
            if pos.side != Side::Sell
                || pos.is_cancelling
                || pos.order_number.is_empty()
                || pos.market != *market
            {
                continue;
            }
            let idx = pos.lowest_market_index();
            if best.map_or(true, |(i, _)| idx < i) {
                best = Some((idx, *id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Lowest-index non-cancelling ping-pong position (any state, any side,
    /// one-time orders excluded so band maintenance cannot touch them).
    pub fn lowest_pingpong(&self, market: &Market) -> Option<PosId> {
        let mut best: Option<(SlotIndex, PosId)> = None;
        for pos in self.all.values() {
            if pos.is_onetime || pos.is_cancelling || pos.market != *market {
                continue;
            }
            let idx = pos.lowest_market_index();
            if best.map_or(true, |(i, _)| idx < i) {
                best = Some((idx, pos.id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Highest-index non-cancelling ping-pong position.
    pub fn highest_pingpong(&self, market: &Market) -> Option<PosId> {
        let mut best: Option<(SlotIndex, PosId)> = None;
        for pos in self.all.values() {
            if pos.is_onetime || pos.is_cancelling || pos.market != *market {
                continue;
            }
            let idx = pos.highest_market_index();
            if best.map_or(true, |(i, _)| idx > i) {
                best = Some((idx, pos.id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Highest non-cancelling buy price across all states.
    pub fn highest_buy_price(&self, market: &Market) -> Coin {
        let mut highest = Coin::ZERO;
        for pos in self.all.values() {
            if pos.side == Side::Buy
                && !pos.is_cancelling
                && pos.market == *market
                && pos.buy_price > highest
            {
                highest = pos.buy_price;
            }
        }
        highest
    }

    /// Lowest non-cancelling sell price across all states.
    pub fn lowest_sell_price(&self, market: &Market) -> Coin {
        let mut lowest = A_LOT;
        for pos in self.all.values() {
            if pos.side == Side::Sell
                && !pos.is_cancelling
                && pos.market == *market
                && pos.sell_price < lowest
            {
                lowest = pos.sell_price;
            }
        }
        lowest
    }

    pub fn buy_total(&self, market: &Market) -> usize {
        self.all
            .values()
            .filter(|p| p.side == Side::Buy && p.market == *market)
            .count()
    }

    pub fn sell_total(&self, market: &Market) -> usize {
        self.all
            .values()
            .filter(|p| p.side == Side::Sell && p.market == *market)
            .count()
    }

    pub fn market_order_total(&self, market: &Market, onetime_only: bool) -> usize {
        self.all
            .values()
            .filter(|p| p.market == *market && (!onetime_only || p.is_onetime))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketInfo;

    fn add_pos(
        store: &mut PositionStore,
        market: &str,
        side: Side,
        buy: &str,
        sell: &str,
        indices: Vec<SlotIndex>,
    ) -> PosId {
        let id = store.next_id();
        let info = MarketInfo::default();
        let pos = Position::new(
            id,
            Market::from(market),
            side,
            Coin::parse(buy),
            Coin::parse(sell),
            Coin::parse("0.1"),
            "",
            indices,
            false,
            &info,
            1_000,
        );
        store.add(pos)
    }

    #[test]
    fn add_activate_remove_round_trip() {
        let mut store = PositionStore::new();
        let id = add_pos(&mut store, "A-B", Side::Buy, "100", "110", vec![0]);

        assert!(store.is_queued(id));
        assert!(!store.is_active(id));

        assert!(store.activate(id, "oid-1".to_string(), 2_000));
        assert!(store.is_active(id));
        assert!(!store.is_queued(id));
        assert_eq!(store.by_order_id("oid-1"), Some(id));
        assert_eq!(store.get(id).unwrap().order_set_time, 2_000);

        let pos = store.remove(id).unwrap();
        assert_eq!(pos.id, id);
        assert!(store.by_order_id("oid-1").is_none());
        assert!(!store.contains(id));
    }

    #[test]
    fn position_by_index_matches_landmark_span() {
        let mut store = PositionStore::new();
        let id = add_pos(&mut store, "A-B", Side::Buy, "100", "110", vec![2, 3, 4]);
        let market = Market::from("A-B");
        assert_eq!(store.position_by_index(&market, 3), Some(id));
        assert_eq!(store.position_by_index(&market, 5), None);
    }

    #[test]
    fn price_extremes_skip_cancelling() {
        let mut store = PositionStore::new();
        let market = Market::from("A-B");
        let a = add_pos(&mut store, "A-B", Side::Buy, "100", "110", vec![0]);
        let b = add_pos(&mut store, "A-B", Side::Buy, "105", "115", vec![1]);
        store.activate(a, "a".into(), 1);
        store.activate(b, "b".into(), 1);

        assert_eq!(store.highest_active_buy_by_price(&market), Some(b));
        store.get_mut(b).unwrap().is_cancelling = true;
        assert_eq!(store.highest_active_buy_by_price(&market), Some(a));
    }

    #[test]
    fn pingpong_extremes_skip_onetime() {
        let mut store = PositionStore::new();
        let market = Market::from("A-B");
        let a = add_pos(&mut store, "A-B", Side::Buy, "100", "110", vec![1]);
        let b = add_pos(&mut store, "A-B", Side::Sell, "120", "130", vec![5]);
        store.get_mut(b).unwrap().is_onetime = true;

        assert_eq!(store.lowest_pingpong(&market), Some(a));
        assert_eq!(store.highest_pingpong(&market), Some(a));
    }

    #[test]
    fn totals_count_both_states() {
        let mut store = PositionStore::new();
        let market = Market::from("A-B");
        add_pos(&mut store, "A-B", Side::Buy, "100", "110", vec![0]);
        let b = add_pos(&mut store, "A-B", Side::Sell, "120", "130", vec![1]);
        store.activate(b, "b".into(), 1);
        add_pos(&mut store, "C-D", Side::Buy, "1", "2", vec![0]);

        assert_eq!(store.buy_total(&market), 1);
        assert_eq!(store.sell_total(&market), 1);
        assert_eq!(store.market_order_total(&market, false), 2);
    }
}
