//! Timed reconciliation sweeps.
//!
//! The fast timer retries stale submissions and cancels, re-checks slippage
//! positions, and ages out one-time orders. Band maintenance keeps each
//! market's live order count inside `[order_min, order_max]` by trimming
//! edges and auto-setting the next slot outward. Every sweep yields to
//! transport flow control and performs at most one corrective action per
//! pass where the original did.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::engine::position::{CancelReason, Side};
use crate::engine::Engine;
use crate::market::{Market, SlotIndex};
use crate::transport::Transport;

impl<T: Transport> Engine<T> {
    /// Fast sweep: queued-order resends, re-cancels, slippage re-checks,
    /// and one-time max-age enforcement.
    pub fn on_check_timeouts(&mut self) {
        self.check_buy_sell_count();

        if self.transport.should_yield() {
            return;
        }
        if self.transport.queued_commands() > self.settings.limit_timeout_yield {
            return;
        }

        let now = self.now_ms();

        // queued submissions the exchange never acknowledged
        for id in self.store.queued_ids() {
            let Some(pos) = self.store.get(id) else {
                continue;
            };
            if pos.order_set_time == 0
                && pos.order_request_time > 0
                && pos.order_request_time < now - self.settings.request_timeout
            {
                info!("order timeout detected, resending {}", pos.stringify_order());
                let spec = pos.order_spec();
                if let Some(pos) = self.store.get_mut(id) {
                    pos.order_request_time = now;
                }
                self.transport.submit(id, &spec);
                return;
            }
        }

        for id in self.store.active_ids() {
            let Some(pos) = self.store.get(id) else {
                continue;
            };

            // cancel that was never acknowledged
            if pos.is_cancelling
                && pos.order_set_time > 0
                && pos.order_cancel_time > 0
                && pos.order_cancel_time < now - self.settings.cancel_timeout
            {
                let reason = pos.cancel_reason.unwrap_or(CancelReason::User);
                self.cancel_order(id, false, reason);
                return;
            }

            // slippage position due for a re-check
            let slippage_timeout = self
                .markets
                .get(&pos.market)
                .map(|i| i.slippage_timeout)
                .unwrap_or(i64::MAX);
            if pos.is_slippage
                && !pos.is_cancelling
                && pos.order_set_time > 0
                && pos.order_set_time < now - slippage_timeout
            {
                if self.try_move_order(id) {
                    // a better price exists; reset through a cancel
                    self.cancel_order(id, false, CancelReason::SlippageReset);
                    return;
                }
                // nothing better yet; defer the next check
                if let Some(pos) = self.store.get_mut(id) {
                    pos.order_set_time = now - self.settings.safety_delay_time;
                }
            }

            // one-time order past its age limit
            let Some(pos) = self.store.get(id) else {
                continue;
            };
            if pos.is_onetime
                && pos.order_set_time > 0
                && pos.max_age_minutes > 0
                && now > pos.order_set_time + 60_000 * pos.max_age_minutes
            {
                self.cancel_order(id, false, CancelReason::MaxAge);
                return;
            }
        }
    }

    /// Keep each market's non-cancelling order counts inside
    /// `[order_min, order_max]`, trimming edges and auto-setting outward.
    /// Loops until a full pass changes nothing or flow control yields.
    pub(crate) fn check_buy_sell_count(&mut self) {
        let mut buys: HashMap<Market, i64> = HashMap::new();
        let mut sells: HashMap<Market, i64> = HashMap::new();

        for pos in self.store.iter() {
            if pos.market.is_empty() || pos.is_cancelling {
                continue;
            }
            match pos.side {
                Side::Buy => *buys.entry(pos.market.clone()).or_insert(0) += 1,
                Side::Sell => *sells.entry(pos.market.clone()).or_insert(0) += 1,
            }
        }

        let markets: Vec<Market> = self.markets.keys().cloned().collect();

        loop {
            let mut new_orders = 0u32;

            for market in &markets {
                let (order_min, order_max, order_dc, landmark_thresh, index_empty) = {
                    let Some(info) = self.markets.get(market) else {
                        continue;
                    };
                    (
                        info.order_min,
                        info.order_max,
                        info.order_dc,
                        info.order_landmark_thresh,
                        info.position_index.is_empty(),
                    )
                };

                if index_empty {
                    continue;
                }
                // a zero min/max opts the market out of automation
                if order_min <= 0 || order_max <= 0 {
                    continue;
                }

                let mut buy_count = buys.get(market).copied().unwrap_or(0);
                while buy_count > order_max {
                    self.cancel_lowest(market);
                    buy_count -= 1;
                    buys.insert(market.clone(), buy_count);
                    if self.transport.should_yield() {
                        return;
                    }
                }

                if buy_count < order_min {
                    self.set_next_lowest(market, Side::Buy, false);
                    buys.insert(market.clone(), buy_count + 1);
                    new_orders += 1;
                } else if order_dc > 1
                    && buy_count >= order_min
                    && buy_count < order_max - landmark_thresh
                {
                    self.set_next_lowest(market, Side::Buy, true);
                    buys.insert(market.clone(), buy_count + 1);
                    new_orders += 1;
                }

                if self.transport.should_yield() {
                    return;
                }

                let mut sell_count = sells.get(market).copied().unwrap_or(0);
                while sell_count > order_max {
                    self.cancel_highest(market);
                    sell_count -= 1;
                    sells.insert(market.clone(), sell_count);
                    if self.transport.should_yield() {
                        return;
                    }
                }

                if sell_count < order_min {
                    self.set_next_highest(market, Side::Sell, false);
                    sells.insert(market.clone(), sell_count + 1);
                    new_orders += 1;
                } else if order_dc > 1
                    && sell_count >= order_min
                    && sell_count < order_max - landmark_thresh
                {
                    self.set_next_highest(market, Side::Sell, true);
                    sells.insert(market.clone(), sell_count + 1);
                    new_orders += 1;
                }

                if self.transport.should_yield() {
                    return;
                }
            }

            if new_orders == 0 {
                break;
            }
        }
    }

    /// Place the next order below the lowest in-use slot. For a landmark,
    /// extend downward until `order_dc` consecutive free slots are found;
    /// a partial run is accepted only when it reaches index 0.
    pub(crate) fn set_next_lowest(&mut self, market: &Market, side: Side, landmark: bool) {
        let mut new_index = SlotIndex::MAX;
        for pos in self.store.iter() {
            if pos.is_onetime || pos.market != *market {
                continue;
            }
            let idx = pos.lowest_market_index();
            if idx < new_index {
                new_index = idx;
            }
        }
        if new_index == SlotIndex::MAX {
            return;
        }
        new_index -= 1;
        if new_index < 0 {
            return;
        }

        let dc_val = self
            .markets
            .get(market)
            .map(|i| i.order_dc)
            .unwrap_or(0);

        // skip past occupied or reserved slots
        while new_index >= 0
            && (self.store.position_by_index(market, new_index).is_some()
                || self.is_index_diverging_converging(market, new_index))
        {
            new_index -= 1;
        }
        if new_index < 0 {
            return;
        }

        let mut indices = vec![new_index];
        while landmark && (indices.len() as i64) < dc_val {
            let next = indices[indices.len() - 1] - 1;
            // grid boundary: keep what we have
            if next < 0 {
                break;
            }
            // the run is blocked; fall back to a single slot
            if self.store.position_by_index(market, next).is_some()
                || self.is_index_diverging_converging(market, next)
            {
                indices.truncate(1);
                break;
            }
            indices.push(next);
        }

        // a short landmark run is only allowed on the grid boundary
        if landmark && indices.len() as i64 != dc_val && !indices.contains(&0) {
            return;
        }
        if !landmark && indices.len() > 1 {
            return;
        }

        indices.sort_unstable();
        let index_len = self
            .markets
            .get(market)
            .map(|i| i.index_len())
            .unwrap_or(0);
        if indices.is_empty() || indices[0] >= index_len {
            return;
        }

        let Some(slot) = self
            .markets
            .get(market)
            .and_then(|i| i.slot(indices[0]))
            .cloned()
        else {
            return;
        };

        let added = self.add_position(
            market.as_str(),
            side,
            &slot.buy_price.to_string(),
            &slot.sell_price.to_string(),
            &slot.size_field(),
            "active",
            "",
            indices,
            landmark,
            true,
        );

        if let Ok(Some(id)) = added {
            // far from the spread; flagged so strategy layers know the api
            // call wasn't profitable
            if let Some(pos) = self.store.get_mut(id) {
                pos.is_new_hilo_order = true;
            }
            if let Some(pos) = self.store.get(id) {
                info!("setting next lo {}", pos.stringify_order());
            }
        } else {
            debug!(%market, "set_next_lowest produced no order");
        }
    }

    /// Place the next order above the highest in-use slot; mirror of
    /// `set_next_lowest` bounded by the top of the grid.
    pub(crate) fn set_next_highest(&mut self, market: &Market, side: Side, landmark: bool) {
        let mut new_index: SlotIndex = -1;
        for pos in self.store.iter() {
            if pos.is_onetime || pos.market != *market {
                continue;
            }
            let idx = pos.highest_market_index();
            if idx > new_index {
                new_index = idx;
            }
        }
        if new_index < 0 {
            return;
        }
        new_index += 1;

        let (dc_val, index_len) = {
            let Some(info) = self.markets.get(market) else {
                return;
            };
            (info.order_dc, info.index_len())
        };

        while self.store.position_by_index(market, new_index).is_some()
            || self.is_index_diverging_converging(market, new_index)
        {
            new_index += 1;
        }

        if new_index >= index_len {
            return;
        }

        let mut indices = vec![new_index];
        while landmark && (indices.len() as i64) < dc_val {
            let next = indices[indices.len() - 1] + 1;
            if next >= index_len {
                break;
            }
            if self.store.position_by_index(market, next).is_some()
                || self.is_index_diverging_converging(market, next)
            {
                indices.truncate(1);
                break;
            }
            indices.push(next);
        }

        // a short landmark run is only allowed on the grid boundary
        if landmark && indices.len() as i64 != dc_val && !indices.contains(&(index_len - 1)) {
            return;
        }
        if !landmark && indices.len() > 1 {
            return;
        }

        indices.sort_unstable();
        if indices.is_empty() || indices[0] >= index_len {
            return;
        }

        let Some(slot) = self
            .markets
            .get(market)
            .and_then(|i| i.slot(indices[0]))
            .cloned()
        else {
            return;
        };

        let added = self.add_position(
            market.as_str(),
            side,
            &slot.buy_price.to_string(),
            &slot.sell_price.to_string(),
            &slot.size_field(),
            "active",
            "",
            indices,
            landmark,
            true,
        );

        if let Ok(Some(id)) = added {
            if let Some(pos) = self.store.get_mut(id) {
                pos.is_new_hilo_order = true;
            }
            if let Some(pos) = self.store.get(id) {
                info!("setting next hi {}", pos.stringify_order());
            }
        } else {
            debug!(%market, "set_next_highest produced no order");
        }
    }

    /// At the scheduled maintenance epoch, save every market index and
    /// cancel all local positions, exactly once.
    pub(crate) fn check_maintenance(&mut self) {
        let epoch = self.settings.maintenance_time;
        if self.maintenance_triggered || epoch <= 0 || epoch > self.now_ms() {
            return;
        }

        info!(epoch, "doing maintenance routine");
        if let Err(e) = self.save_market("all", 15) {
            tracing::error!(%e, "maintenance save failed");
        }
        self.cancel_local("all");
        self.maintenance_triggered = true;
        info!("maintenance routine finished");
    }

    /// Drop grace stamps old enough that the stray is either gone or will
    /// be re-observed fresh.
    pub(crate) fn clean_grace_times(&mut self) {
        if self.grace_times.is_empty() {
            return;
        }
        let cutoff = self.now_ms() - 2 * self.settings.stray_grace_time_limit;
        self.grace_times.retain(|_, seen| *seen >= cutoff);
    }
}
