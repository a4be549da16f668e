//! Position lifecycle: submission, acknowledgment, fills, and cancels.
//!
//! Owns the validation path for new orders, the cancel state machine, the
//! open-orders and ticker reconciliation entry points, and deterministic
//! batch fill dispatch.

use std::collections::{HashMap, HashSet};

use tracing::{debug, error, info, warn};

use crate::coin::{Coin, SATOSHI};
use crate::engine::position::{CancelReason, FillType, Position, Side};
use crate::engine::slippage::try_move_order;
use crate::engine::Engine;
use crate::errors::{Error, Result};
use crate::market::{Market, SlotIndex};
use crate::transport::{
    CancelStatus, OpenOrder, OrderStatus, PosId, SubmitError, TickerInfo, Transport,
};

impl<T: Transport> Engine<T> {
    /// Exchange id under which a position is tracked locally.
    ///
    /// On exchanges whose ids can collide across markets the market symbol
    /// is prefixed; test mode always uses the raw id.
    pub(crate) fn canonical_order_id(&self, market: &Market, raw: &str) -> String {
        if self.is_testing {
            return raw.to_string();
        }
        match self.settings.id_scope {
            crate::engine::IdScope::Plain => raw.to_string(),
            crate::engine::IdScope::PrefixMarket => format!("{}{}", market, raw),
        }
    }

    /// Register and submit a new order.
    ///
    /// `order_type` is `active`, `ghost`, or `onetime` with optional
    /// `-taker`, `-override`, and `-timeout<N>` suffixes. A ghost registers
    /// a slot in the index without creating a position (returns `Ok(None)`).
    /// `order_size` may carry an alternate size as `primary/alternate`.
    #[allow(clippy::too_many_arguments)]
    pub fn add_position(
        &mut self,
        market_raw: &str,
        side: Side,
        buy_price_str: &str,
        sell_price_str: &str,
        order_size_str: &str,
        order_type: &str,
        strategy_tag: &str,
        mut indices: Vec<SlotIndex>,
        landmark: bool,
        quiet: bool,
    ) -> Result<Option<PosId>> {
        let market = Market::normalized(market_raw, self.settings.market_naming);

        // parse alternate size, format: 0.001/0.002
        let (order_size_str, alternate_size) = match order_size_str.split_once('/') {
            Some((primary, alternate)) => {
                (primary.to_string(), Some(Coin::parse(alternate)))
            }
            None => (order_size_str.to_string(), None),
        };

        let is_onetime = order_type.starts_with("onetime");
        let is_taker = order_type.contains("-taker");
        let is_override = order_type.contains("-override");
        let is_ghost = order_type == "ghost";
        let is_active = order_type == "active";

        if !is_active && !is_ghost && !is_onetime {
            return Err(Error::validation(format!(
                "order type must be 'active', 'ghost', or 'onetime', got {order_type:?}"
            )));
        }

        if market.is_empty()
            || buy_price_str.is_empty()
            || sell_price_str.is_empty()
            || order_size_str.is_empty()
        {
            return Err(Error::validation(format!(
                "an argument was empty. mkt:{market} lo:{buy_price_str} hi:{sell_price_str} sz:{order_size_str}"
            )));
        }

        if landmark && is_onetime {
            return Err(Error::validation(
                "can't use landmark order type with one-time order",
            ));
        }

        let buy_price = Coin::parse(buy_price_str);
        let sell_price = Coin::parse(sell_price_str);
        let order_size = Coin::parse(&order_size_str);

        // bad ping-pong or one-time prices
        if (!is_onetime
            && (sell_price <= buy_price
                || buy_price.is_zero_or_less()
                || sell_price.is_zero_or_less()))
            || (is_onetime && side == Side::Buy && buy_price.is_zero_or_less())
            || (is_onetime && side == Side::Sell && sell_price.is_zero_or_less())
            || (is_onetime && alternate_size.is_some_and(|a| a.is_zero_or_less()))
        {
            return Err(Error::validation(format!(
                "tried to set bad {} order. hi {sell_price_str} lo {buy_price_str} size {order_size_str}",
                if is_onetime { "one-time" } else { "ping-pong" }
            )));
        }

        // anti-typo check: decimals that didn't survive canonical formatting
        if buy_price_str.len() > buy_price.to_string().len()
            || sell_price_str.len() > sell_price.to_string().len()
            || order_size_str.len() > order_size.to_string().len()
        {
            return Err(Error::validation(format!(
                "too many decimals in one of: sell {sell_price_str} buy {buy_price_str} size {order_size_str}"
            )));
        }

        // taker price must sit within 10% of the top-of-book for its side
        if is_taker && !is_override {
            let hi_buy = self.hi_buy(&market);
            let lo_sell = self.lo_sell(&market);
            let out_of_band = match side {
                Side::Sell => hi_buy.ratio(0.9) > sell_price || hi_buy.ratio(1.1) < sell_price,
                Side::Buy => lo_sell.ratio(0.9) > buy_price || lo_sell.ratio(1.1) < buy_price,
            };
            if out_of_band {
                return Err(Error::validation(format!(
                    "taker price {buy_price_str}/{sell_price_str} is >10% from spread; add '-override' if intentional"
                )));
            }
        }

        // exchange percent-price band, compressed 20% since the rolling
        // average the exchange uses is not visible here
        if self.settings.enforce_percent_price {
            let info = self.market_info_mut(&market);
            let buy_limit =
                (info.highest_buy * info.price_min_mul.ratio(1.2)).truncated_by_ticksize(SATOSHI);
            let sell_limit =
                (info.lowest_sell * info.price_max_mul.ratio(0.8)).truncated_by_ticksize(SATOSHI);
            if (side == Side::Buy
                && buy_price.is_greater_than_zero()
                && buy_limit.is_greater_than_zero()
                && buy_price < buy_limit)
                || (side == Side::Sell
                    && sell_price.is_greater_than_zero()
                    && sell_limit.is_greater_than_zero()
                    && sell_price > sell_limit)
            {
                return Err(Error::validation(format!(
                    "price outside percent-price band {buy_limit}/{sell_limit} for {market}"
                )));
            }
        }

        // assign the next slot when the caller didn't name one
        if !is_onetime && indices.is_empty() {
            let info = self.market_info_mut(&market);
            let idx = info.index_len();
            info.position_index.push(crate::market::PositionSlot::new(
                buy_price,
                sell_price,
                order_size,
                alternate_size,
            ));
            indices.push(idx);
        }

        // a ghost only registers the slot
        if !is_onetime && !is_active {
            return Ok(None);
        }

        indices.sort_unstable();

        // a landmark's prices come from its lowest-indexed slot; its
        // notional is the sum of the covered slots' current sizes
        let (buy_price, sell_price, order_size) = if landmark && !indices.is_empty() {
            let info = self.market_info_mut(&market);
            let mut total = Coin::ZERO;
            for idx in &indices {
                if let Some(slot) = info.slot(*idx) {
                    total += slot.order_size;
                }
            }
            match info.slot(indices[0]) {
                Some(slot) => (slot.buy_price, slot.sell_price, total),
                None => (buy_price, sell_price, total),
            }
        } else {
            (buy_price, sell_price, order_size)
        };

        let now = self.now_ms();
        let id = self.store.next_id();
        let mut pos = {
            let info = self.market_info_mut(&market);
            Position::new(
                id,
                market.clone(),
                side,
                buy_price,
                sell_price,
                order_size,
                strategy_tag,
                indices,
                landmark,
                info,
                now,
            )
        };
        pos.is_onetime = is_onetime;
        pos.is_taker = is_taker;

        // one-time orders may carry an age limit: onetime-timeout30
        if is_onetime {
            if let Some(tail) = order_type.split("-timeout").nth(1) {
                let digits: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
                if let Ok(minutes) = digits.parse::<i64>() {
                    if minutes > 0 {
                        pos.max_age_minutes = minutes;
                    }
                }
            }
        }

        if pos.price.is_zero_or_less()
            || pos.btc_amount.is_zero_or_less()
            || pos.quantity.is_zero_or_less()
        {
            warn!(
                %market, %side, buy = %buy_price, sell = %sell_price,
                "local warning: new position failed to initialize"
            );
            return Err(Error::validation("position failed to initialize"));
        }

        // local post-only: try for a better price before submission
        if !is_taker {
            let moved = {
                let info = self.market_info_mut(&market);
                try_move_order(&mut pos, info, false)
            };
            if moved {
                let info = self.market_info_mut(&market);
                pos.apply_offset(info);
            }
        }

        let spec = pos.order_spec();
        let price = pos.price;
        let lowest_index = pos.lowest_market_index();
        self.store.add(pos);
        self.market_info_mut(&market).order_prices.push(price);

        if !quiet && self.settings.verbosity > 0 {
            if let Some(p) = self.store.get(id) {
                info!("{:<15} {}", "queued", p.stringify_order());
            }
        }

        // test mode synthesizes the exchange ack inline
        if self.is_testing {
            let order_number = format!("{}{}", market, lowest_index);
            self.set_order(id, &order_number);
            return Ok(Some(id));
        }

        self.transport.submit(id, &spec);
        Ok(Some(id))
    }

    /// Rebuild a landmark from slot data; real prices and size are derived
    /// from the covered slots, so placeholders suffice here.
    pub(crate) fn add_landmark_position_for(
        &mut self,
        market: &Market,
        side: Side,
        indices: &[SlotIndex],
    ) {
        if let Err(e) = self.add_position(
            market.as_str(),
            side,
            "0.00000001",
            "0.00000002",
            "0.00000000",
            "active",
            "",
            indices.to_vec(),
            true,
            true,
        ) {
            warn!(%market, ?indices, %e, "landmark rebuild rejected");
        }
    }

    /// Exchange acknowledgment: the queued position is now live.
    pub(crate) fn set_order(&mut self, id: PosId, order_number: &str) {
        if order_number.is_empty() {
            error!(%id, "local error: tried to set order with blank orderid");
            return;
        }

        let Some(pos) = self.store.get(id) else {
            error!(%id, "local error: set_order on unknown position");
            return;
        };
        let canonical = self.canonical_order_id(&pos.market.clone(), order_number);

        let now = self.now_ms();
        if !self.store.activate(id, canonical, now) {
            return;
        }

        if self.settings.verbosity > 0 {
            if let Some(pos) = self.store.get(id) {
                info!("{:<15} {}", "set", pos.stringify_order());
            }
        }

        // a cancel issued while the order was queued fires now, with the
        // originally requested reason
        let deferred = self
            .store
            .get(id)
            .filter(|p| p.is_cancelling)
            .and_then(|p| p.cancel_reason);
        if let Some(reason) = deferred {
            self.cancel_order(id, true, reason);
        }
    }

    /// Route a submission reply.
    pub(crate) fn handle_new_order_ack(
        &mut self,
        id: PosId,
        order_number: Option<String>,
        submit_error: Option<SubmitError>,
    ) {
        if let Some(num) = order_number {
            self.set_order(id, &num);
            return;
        }
        match submit_error {
            Some(SubmitError::PostOnlyRejected) => {
                // walk the price away from mid and try again
                self.find_better_price(id);
                if let Some(pos) = self.store.get(id) {
                    let spec = pos.order_spec();
                    self.transport.submit(id, &spec);
                }
            }
            Some(SubmitError::InsufficientBalance) => {
                if let Some(pos) = self.store.get(id) {
                    warn!("not enough balance, dropping {}", pos.stringify_order());
                }
                self.delete_position(id);
            }
            Some(SubmitError::Other(msg)) => {
                warn!(%id, %msg, "order submission failed; timeout sweep will resend");
            }
            None => {
                warn!(%id, "submission ack carried neither id nor error");
            }
        }
    }

    /// Route a cancel reply.
    pub(crate) fn handle_cancel_ack(&mut self, order_id: &str, status: CancelStatus) {
        match status {
            CancelStatus::OrderCanceled => match self.store.by_order_id(order_id) {
                Some(id) => self.process_cancelled_order(id),
                None => debug!(order_id, "cancel ack for unowned order"),
            },
            CancelStatus::OrderCancelRejected => {
                // the order is already gone; a getorder or the stale-active
                // sweep reaps it
                warn!(order_id, "cancel rejected, order presumed gone");
            }
        }
    }

    /// Route an explicit order-status reply.
    pub(crate) fn handle_order_status(
        &mut self,
        order_id: &str,
        status: OrderStatus,
        _filled_quantity: Coin,
        _filled_fee: Coin,
    ) {
        match status {
            OrderStatus::Filled => {
                let fill_type = self
                    .store
                    .by_order_id(order_id)
                    .and_then(|id| self.store.get(id))
                    .map(|p| {
                        if p.is_cancelling {
                            FillType::Cancel
                        } else {
                            FillType::GetOrder
                        }
                    })
                    .unwrap_or(FillType::GetOrder);
                self.fill(order_id, fill_type, 0);
            }
            OrderStatus::Cancelled => {
                if let Some(id) = self.store.by_order_id(order_id) {
                    self.process_cancelled_order(id);
                }
            }
            OrderStatus::Partial => {
                // still live; nothing to reconcile yet
                debug!(order_id, "order partially filled, leaving in place");
            }
        }
    }

    /// Handle a detected fill: advance slot state, emit stats, then flip
    /// the slot to the opposite side (or delete a one-time order).
    pub fn fill(&mut self, order_id: &str, fill_type: FillType, extra: u8) {
        if order_id.is_empty() || !self.store.is_order_id(order_id) {
            warn!(
                order_id,
                fill_type = fill_type.label(),
                "local warning: uuid not found in positions (getorder timeout too low?)"
            );
            return;
        }
        let Some(id) = self.store.by_order_id(order_id) else {
            return;
        };
        let Some(snapshot) = self.store.get(id).cloned() else {
            return;
        };

        self.stats.record_fill(&snapshot);

        // toggle alternate sizes and advance fill counts on every covered slot
        {
            let info = self.market_info_mut(&snapshot.market);
            for idx in &snapshot.market_indices {
                if let Some(slot) = info.slot_mut(*idx) {
                    slot.resize_by_alternate_size();
                }
            }
        }

        if self.settings.verbosity > 0 {
            let mut label = fill_type.label().to_string();
            if extra > 0 {
                label = format!("{label}-{extra}");
            }
            info!("{:<15} {}", label, snapshot.stringify_position_change());
        }

        self.flip_position(id);
        self.delete_position(id);
    }

    /// Reconstruct the opposite-side order from *current* slot data,
    /// inheriting the filled position's indices.
    pub(crate) fn flip_position(&mut self, id: PosId) {
        let Some(pos) = self.store.get(id).cloned() else {
            return;
        };
        if pos.is_onetime {
            return;
        }

        if pos.cancel_reason == Some(CancelReason::ShortLong) {
            self.stats.record_strategy(&pos);
        }

        let flipped = pos.side.opposite();
        if pos.is_landmark {
            self.add_landmark_position_for(&pos.market, flipped, &pos.market_indices);
            return;
        }

        // reread the slot instead of reusing prices, in case of slippage
        let slot = self
            .markets
            .get(&pos.market)
            .and_then(|info| info.slot(pos.lowest_market_index()))
            .cloned();
        let Some(slot) = slot else {
            warn!(
                market = %pos.market,
                idx = pos.lowest_market_index(),
                "flip dropped: slot no longer exists"
            );
            return;
        };
        if let Err(e) = self.add_position(
            pos.market.as_str(),
            flipped,
            &slot.buy_price.to_string(),
            &slot.sell_price.to_string(),
            &slot.size_field(),
            "active",
            "",
            pos.market_indices.clone(),
            false,
            true,
        ) {
            warn!(market = %pos.market, %e, "flip rejected");
        }
    }

    /// Dispatch a batch of detected fills in deterministic order: ascending
    /// `buy/sell` ratio, one-time orders pinned last, arrival order breaking
    /// ties. Spreads the post-fill gap over the furthest-from-mid slots
    /// first.
    pub(crate) fn process_filled_orders(&mut self, batch: Vec<PosId>, fill_type: FillType) {
        let mut sorted: Vec<(Coin, usize, String)> = batch
            .iter()
            .enumerate()
            .filter_map(|(seq, id)| {
                self.store
                    .get(*id)
                    .map(|p| (p.fill_ratio(), seq, p.order_number.clone()))
            })
            .collect();
        sorted.sort();

        for (_, _, order_number) in sorted {
            self.fill(&order_number, fill_type, 0);
        }
    }

    /// Reconcile a freshly pulled open-orders snapshot: run any pending
    /// cancel-all, resolve strays, and infer fills from absence.
    pub fn process_open_orders(
        &mut self,
        order_ids: &[String],
        orders: &[OpenOrder],
        request_time_ms: i64,
    ) {
        let now = self.now_ms();
        let mut ct_cancelled = 0usize;
        let mut ct_all = 0usize;
        let mut stray_orders: Vec<(String, String)> = Vec::new(); // (raw, canonical)

        let running_cancel_all = self.cancel_all_filter.clone();

        for order in orders {
            let canonical = self.canonical_order_id(&order.market, &order.order_number);
            let owned = self.store.is_order_id(&canonical);

            if let Some(filter) = &running_cancel_all {
                ct_all += 1;
                if filter != "all" && filter != order.market.as_str() {
                    continue;
                }
                ct_cancelled += 1;

                if !owned {
                    info!(
                        market = %order.market, side = %order.side, amount = %order.btc_amount,
                        price = %order.price, id = %order.order_number,
                        "cancelling unowned order"
                    );
                    self.transport.cancel(&order.order_number, None);
                    continue;
                }
                if let Some(id) = self.store.by_order_id(&canonical) {
                    self.cancel_order(id, false, CancelReason::User);
                }
                continue;
            }

            // stray reconciliation: an id the exchange knows but we don't
            if self.settings.should_clear_stray_orders && !owned {
                // unless strict mode is on, ignore prices we never posted
                let price_known = self
                    .markets
                    .get(&order.market)
                    .is_some_and(|info| info.order_prices.contains(&order.price));
                if !self.settings.should_clear_stray_orders_all && !price_known {
                    continue;
                }

                match self.grace_times.get(&canonical).copied() {
                    None => {
                        // first sighting: try to adopt it as one of our
                        // queued submissions that lost its ack
                        let matched = self.match_stray_to_queued(order, now);
                        match matched {
                            Some(id) => {
                                debug!(
                                    id = %order.order_number, market = %order.market,
                                    "stray matched a queued position, adopting id"
                                );
                                self.set_order(id, &order.order_number);
                            }
                            None => {
                                self.grace_times.insert(canonical, now);
                            }
                        }
                    }
                    Some(seen) => {
                        if now - seen > self.settings.stray_grace_time_limit {
                            info!(
                                market = %order.market, side = %order.side,
                                amount = %order.btc_amount, price = %order.price,
                                id = %order.order_number,
                                "queued cancel for stray order"
                            );
                            stray_orders.push((order.order_number.clone(), canonical));
                        }
                    }
                }
            }
        }

        // a cancel-all pass only cancels; no fill inference on its snapshot
        if running_cancel_all.is_some() {
            info!(ct_cancelled, ct_all, "cancel-all finished");
            self.cancel_all_filter = None;
            return;
        }

        if stray_orders.len() > self.settings.stray_cancel_burst_cap {
            warn!(
                count = stray_orders.len(),
                "local warning: mitigating burst cancel of stray orders"
            );
        } else {
            for (raw, canonical) in stray_orders {
                self.transport.cancel(&raw, None);
                // push the grace stamp forward so the next snapshot doesn't
                // re-queue the same cancel
                self.grace_times
                    .insert(canonical, now + self.settings.stray_grace_time_limit);
            }
        }

        // a transiently blank snapshot with many live orders is implausible
        if self.settings.should_mitigate_blank_orderbook_flash
            && order_ids.is_empty()
            && orders.is_empty()
            && self.store.active_count() > self.settings.blank_book_mitigation_threshold
        {
            warn!("local warning: blank orderbook flash has been mitigated");
            return;
        }

        // fill inference: our acknowledged orders missing from the snapshot
        let mut reported: HashSet<&str> = order_ids.iter().map(|s| s.as_str()).collect();
        let canonical_ids: Vec<String> = orders
            .iter()
            .map(|o| self.canonical_order_id(&o.market, &o.order_number))
            .collect();
        reported.extend(canonical_ids.iter().map(|s| s.as_str()));

        let mut probes = 0usize;
        let mut batch: Vec<PosId> = Vec::new();
        for id in self.store.active_ids() {
            let Some(pos) = self.store.get(id) else {
                continue;
            };
            if pos.order_set_time == 0
                || pos.is_cancelling
                || pos.order_cancel_time > 0
                || pos.order_set_time > now - self.settings.safety_delay_time
                || pos.order_set_time >= request_time_ms
                || reported.contains(pos.order_number.as_str())
            {
                continue;
            }

            if self.settings.probe_order_status {
                // ask the exchange instead of inferring; rate limited
                if pos.order_getorder_time > now - self.settings.getorder_min_interval {
                    continue;
                }
                let order_number = pos.order_number.clone();
                self.transport.get_order(&order_number, Some(id));
                if let Some(pos) = self.store.get_mut(id) {
                    pos.order_getorder_time = now;
                }
                probes += 1;
                if probes >= self.settings.getorder_rate_limit {
                    break;
                }
            } else {
                batch.push(id);
            }
        }

        if !batch.is_empty() {
            self.process_filled_orders(batch, FillType::GetOrder);
        }
    }

    /// Match a reported open order to one of our queued submissions: same
    /// market, side, and posted price, notional within ±0.1 %, and the
    /// request old enough that the ack is clearly lost.
    fn match_stray_to_queued(&self, order: &OpenOrder, now: i64) -> Option<PosId> {
        for id in self.store.queued_ids() {
            let Some(pos) = self.store.get(id) else {
                continue;
            };
            if pos.market == order.market
                && pos.side == order.side
                && pos.price == order.price
                && order.btc_amount >= pos.btc_amount.ratio(0.999)
                && order.btc_amount <= pos.btc_amount.ratio(1.001)
                && pos.order_request_time < now - 10_000
            {
                return Some(id);
            }
        }
        None
    }

    /// Update top-of-book state and infer fills from price crossings.
    ///
    /// A snapshot with `request_time_ms <= 0` is a push feed with no request
    /// linkage: top-of-book is updated, but no fills are inferred, because a
    /// freshly placed order could be misread as filled.
    pub fn process_ticker(
        &mut self,
        tickers: &HashMap<Market, TickerInfo>,
        request_time_ms: i64,
    ) {
        let now = self.now_ms();
        let mut found_crossed = false;

        for (market, ticker) in tickers {
            if ticker.bid.is_zero_or_less() || ticker.ask.is_zero_or_less() {
                continue;
            }
            if ticker.ask <= ticker.bid {
                found_crossed = true;
                continue;
            }
            let info = self.market_info_mut(market);
            info.highest_buy = ticker.bid;
            info.lowest_sell = ticker.ask;
        }

        if found_crossed {
            error!("local error: found ask <= bid for at least one market");
        }

        if request_time_ms <= 0 {
            return;
        }

        let safety = self.settings.ticker_safety_delay_time;
        let mut probes = 0usize;
        let mut batch: Vec<PosId> = Vec::new();

        for id in self.store.active_ids() {
            let Some(pos) = self.store.get(id) else {
                continue;
            };
            let Some(ticker) = tickers.get(&pos.market) else {
                continue;
            };
            let (bid, ask) = (ticker.bid, ticker.ask);
            if bid.is_zero_or_less() || ask.is_zero_or_less() || ask <= bid {
                continue;
            }

            let fill_details: u8 = if pos.side == Side::Sell && pos.sell_price <= bid {
                1 // crossed: sell at or below the bid
            } else if pos.side == Side::Buy && pos.buy_price >= ask {
                2 // crossed: buy at or above the ask
            } else if pos.side == Side::Sell && pos.sell_price < ask {
                3 // passed: book moved through our sell
            } else if pos.side == Side::Buy && pos.buy_price > bid {
                4 // passed: book moved through our buy
            } else {
                0
            };

            if fill_details == 0 {
                continue;
            }

            // inside the safety window: probe instead of inferring
            if pos.order_set_time > request_time_ms - safety || pos.order_set_time > now - safety {
                if self.settings.probe_order_status
                    && pos.order_getorder_time <= now - self.settings.getorder_min_interval
                    && probes < self.settings.getorder_rate_limit
                {
                    let order_number = pos.order_number.clone();
                    self.transport.get_order(&order_number, Some(id));
                    if let Some(pos) = self.store.get_mut(id) {
                        pos.order_getorder_time = now;
                    }
                    probes += 1;
                }
                continue;
            }

            if pos.is_cancelling || pos.order_cancel_time > 0 {
                continue;
            }

            debug!(
                order = %pos.order_number, fill_details,
                "ticker crossed a resting order"
            );
            batch.push(id);
        }

        self.process_filled_orders(batch, FillType::Ticker);
    }

    /// Cancel a position. Queued positions are flagged and the exchange-side
    /// cancel deferred until activation; a repeat cancel reissues the
    /// transport request with the new reason.
    pub fn cancel_order(&mut self, id: PosId, quiet: bool, reason: CancelReason) {
        if !self.store.contains(id) {
            error!(%id, "local error: aborting dangerous cancel not found in position store");
            return;
        }

        // test mode short-cuts straight to removal
        if self.is_testing {
            self.delete_position(id);
            return;
        }

        let now = self.now_ms();
        let queued = self.store.is_queued(id);
        let Some(pos) = self.store.get_mut(id) else {
            return;
        };

        let recancelling = pos.order_cancel_time > 0 || pos.is_cancelling;
        pos.cancel_reason = Some(reason);

        if queued {
            // no exchange id yet; the activation path issues the cancel
            pos.is_cancelling = true;
            pos.order_cancel_time = 1;
            return;
        }

        pos.is_cancelling = true;
        pos.order_cancel_time = now;
        let order_number = pos.order_number.clone();

        if !quiet {
            let verb = if pos.is_onetime {
                "cancelling"
            } else if pos.is_slippage {
                "resetting"
            } else if recancelling {
                "recancelling"
            } else {
                "cancelling"
            };
            info!(
                "{:<15} {}",
                format!("{verb} {}", reason.label()),
                pos.stringify_order()
            );
        }

        self.transport.cancel(&order_number, Some(id));
    }

    /// A cancel completed; take the per-reason action.
    pub(crate) fn process_cancelled_order(&mut self, id: PosId) {
        let Some(pos) = self.store.get(id).cloned() else {
            return;
        };

        // a reset slippage position goes back to the same side at its
        // original slot prices
        if pos.is_slippage && pos.cancel_reason == Some(CancelReason::SlippageReset) {
            if pos.is_landmark {
                self.add_landmark_position_for(&pos.market, pos.side, &pos.market_indices);
            } else {
                let slot = self
                    .markets
                    .get(&pos.market)
                    .and_then(|info| info.slot(pos.lowest_market_index()))
                    .cloned();
                if let Some(slot) = slot {
                    if let Err(e) = self.add_position(
                        pos.market.as_str(),
                        pos.side,
                        &slot.buy_price.to_string(),
                        &slot.sell_price.to_string(),
                        &slot.size_field(),
                        "active",
                        "",
                        pos.market_indices.clone(),
                        false,
                        true,
                    ) {
                        warn!(market = %pos.market, %e, "slippage reset rejected");
                    }
                }
            }
            self.delete_position(id);
            return;
        }

        info!("{:<15} {}", "cancelled", pos.stringify_order());

        match pos.cancel_reason {
            Some(CancelReason::Dc) => self.cancel_order_meat_dc(id),
            Some(CancelReason::ShortLong) => self.flip_position(id),
            _ => {}
        }

        self.delete_position(id);
    }

    /// Cancel the lowest ping-pong position of a market.
    pub fn cancel_lowest(&mut self, market: &Market) {
        if let Some(id) = self.store.lowest_pingpong(market) {
            self.cancel_order(id, false, CancelReason::Lowest);
        }
    }

    /// Cancel the highest ping-pong position of a market.
    pub fn cancel_highest(&mut self, market: &Market) {
        if let Some(id) = self.store.highest_pingpong(market) {
            self.cancel_order(id, false, CancelReason::Highest);
        }
    }

    /// User-initiated cancel of every exchange-side order matching the
    /// filter, via the next open-orders snapshot. Clears the market index.
    pub fn cancel_all(&mut self, market: &str) {
        let filter = if market.is_empty() { "all" } else { market };

        // with local positions live, cancelling "all" would s-fill them
        if filter == "all" && (self.store.has_active() || self.store.has_queued()) {
            error!("local error: you have open positions, did you mean cancel_local?");
            return;
        }

        self.clear_market_index(filter);
        self.cancel_all_filter = Some(filter.to_string());
        self.transport.get_open_orders();
    }

    /// Cancel every local position matching the filter: queued positions
    /// are deleted outright, then normal, then landmark positions are
    /// cancelled. Clears the market index.
    pub fn cancel_local(&mut self, market: &str) {
        let filter = if market.is_empty() { "all" } else { market };

        let mut deleted: Vec<PosId> = Vec::new();
        let mut normals: Vec<PosId> = Vec::new();
        let mut landmarks: Vec<PosId> = Vec::new();

        for id in self.store.all_ids() {
            let Some(pos) = self.store.get(id) else {
                continue;
            };
            if filter != "all" && pos.market.as_str() != filter {
                continue;
            }
            if self.store.is_queued(id) {
                deleted.push(id);
            } else if pos.is_landmark {
                landmarks.push(id);
            } else {
                normals.push(id);
            }
        }

        for id in deleted {
            self.delete_position(id);
        }
        for id in normals {
            self.cancel_order(id, false, CancelReason::User);
        }
        for id in landmarks {
            self.cancel_order(id, false, CancelReason::User);
        }

        self.clear_market_index(filter);
        if !self.is_testing {
            info!(filter, "cleared market indices");
        }
    }

    fn clear_market_index(&mut self, filter: &str) {
        for (market, info) in self.markets.iter_mut() {
            if filter != "all" && market.as_str() != filter {
                continue;
            }
            info.order_prices.clear();
            info.position_index.clear();
        }
    }

    /// Tag the highest active buy (by price) and queue it for a side flip.
    pub fn flip_hi_buy_price(&mut self, market: &Market, tag: &str) {
        if let Some(id) = self.store.highest_active_buy_by_price(market) {
            self.queue_shortlong(id, tag, "queued short");
        }
    }

    /// Tag the highest active buy (by index) and queue it for a side flip.
    pub fn flip_hi_buy_index(&mut self, market: &Market, tag: &str) {
        if let Some(id) = self.store.highest_active_buy_by_index(market) {
            self.queue_shortlong(id, tag, "queued short");
        }
    }

    /// Tag the lowest active sell (by price) and queue it for a side flip.
    pub fn flip_lo_sell_price(&mut self, market: &Market, tag: &str) {
        if let Some(id) = self.store.lowest_active_sell_by_price(market) {
            self.queue_shortlong(id, tag, "queued long");
        }
    }

    /// Tag the lowest active sell (by index) and queue it for a side flip.
    pub fn flip_lo_sell_index(&mut self, market: &Market, tag: &str) {
        if let Some(id) = self.store.lowest_active_sell_by_index(market) {
            self.queue_shortlong(id, tag, "queued long");
        }
    }

    fn queue_shortlong(&mut self, id: PosId, tag: &str, verb: &str) {
        if let Some(pos) = self.store.get_mut(id) {
            pos.strategy_tag = tag.to_string();
            info!("{:<15} {}", verb, pos.stringify_position_change());
        }
        self.cancel_order(id, false, CancelReason::ShortLong);
    }

    /// The price the highest active buy would flip to sell at.
    pub fn hi_buy_flip_price(&self, market: &Market) -> Coin {
        self.store
            .highest_active_buy_by_price(market)
            .and_then(|id| self.store.get(id))
            .map(|p| p.sell_price)
            .unwrap_or(Coin::ZERO)
    }

    /// The price the lowest active sell would flip to buy at.
    pub fn lo_sell_flip_price(&self, market: &Market) -> Coin {
        self.store
            .lowest_active_sell_by_price(market)
            .and_then(|id| self.store.get(id))
            .map(|p| p.buy_price)
            .unwrap_or(Coin::ZERO)
    }

    /// Remove a position from every index: DC reservations, in-flight
    /// transport requests, store maps, and the posted-price multiset.
    pub(crate) fn delete_position(&mut self, id: PosId) {
        if !self.store.contains(id) {
            error!(%id, "local error: delete_position on unknown position");
            return;
        }

        self.remove_from_dc(id);
        self.transport.detach(id);

        if let Some(pos) = self.store.remove(id) {
            self.market_info_mut(&pos.market).remove_order_price(pos.price);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Clock, EngineSettings};
    use crate::sim::SimTransport;

    fn engine() -> Engine<SimTransport> {
        let mut settings = EngineSettings::default();
        settings.verbosity = 0;
        Engine::with_clock(settings, SimTransport::new(), Clock::manual(1_000_000))
    }

    fn add(
        engine: &mut Engine<SimTransport>,
        order_type: &str,
        side: Side,
        buy: &str,
        sell: &str,
        size: &str,
    ) -> Result<Option<PosId>> {
        engine.add_position("X-Y", side, buy, sell, size, order_type, "", Vec::new(), false, true)
    }

    #[test]
    fn rejects_unknown_order_type() {
        let mut e = engine();
        assert!(add(&mut e, "limit", Side::Buy, "1", "2", "1").is_err());
    }

    #[test]
    fn rejects_inverted_pingpong_prices() {
        let mut e = engine();
        assert!(add(&mut e, "active", Side::Buy, "2", "1", "1").is_err());
        assert!(add(&mut e, "active", Side::Buy, "0", "1", "1").is_err());
    }

    #[test]
    fn rejects_excess_precision() {
        let mut e = engine();
        // 9 decimal places cannot survive canonical 8-place formatting
        assert!(add(&mut e, "active", Side::Buy, "0.000000015", "2", "1").is_err());
    }

    #[test]
    fn rejects_landmark_onetime_combination() {
        let mut e = engine();
        let r = e.add_position(
            "X-Y", Side::Buy, "1", "2", "1", "onetime", "", Vec::new(), true, true,
        );
        assert!(r.is_err());
    }

    #[test]
    fn taker_outside_band_rejected_without_override() {
        let mut e = engine();
        // no ticker is known, so nothing is "within 10% of the book"
        assert!(add(&mut e, "onetime-taker", Side::Buy, "100", "0", "1").is_err());
        // -override skips the band check entirely
        assert!(add(&mut e, "onetime-taker-override", Side::Buy, "100", "0", "1").is_ok());
    }

    #[test]
    fn ghost_registers_slot_without_position() {
        let mut e = engine();
        let r = add(&mut e, "ghost", Side::Buy, "1", "2", "1").unwrap();
        assert!(r.is_none());
        let market = crate::market::Market::from("X-Y");
        assert_eq!(e.market_info(&market).unwrap().position_index.len(), 1);
        assert_eq!(e.store().active_count(), 0);
        assert!(!e.store().has_queued());
    }

    #[test]
    fn onetime_timeout_suffix_sets_max_age() {
        let mut e = engine();
        let id = add(&mut e, "onetime-timeout30", Side::Buy, "100", "0", "1")
            .unwrap()
            .unwrap();
        assert_eq!(e.store().get(id).unwrap().max_age_minutes, 30);
    }

    #[test]
    fn alternate_size_is_stored_on_the_slot() {
        let mut e = engine();
        add(&mut e, "active", Side::Buy, "1", "2", "0.001/0.002").unwrap();
        let market = crate::market::Market::from("X-Y");
        let slot = e.market_info(&market).unwrap().slot(0).unwrap();
        assert_eq!(slot.order_size, Coin::parse("0.001"));
        assert_eq!(slot.alternate_size, Some(Coin::parse("0.002")));
    }

    #[test]
    fn market_naming_normalizes_separator() {
        let mut e = engine();
        let id = e
            .add_position(
                "X_Y", Side::Buy, "1", "2", "1", "active", "", Vec::new(), false, true,
            )
            .unwrap()
            .unwrap();
        assert_eq!(e.store().get(id).unwrap().market.as_str(), "X-Y");
    }

    #[test]
    fn fill_batch_dispatch_orders_by_spread_ratio() {
        let mut e = engine();
        e.set_testing(true);
        // wide spread (ratio 0.5) and tight spread (ratio ~0.9)
        let wide = e
            .add_position("X-Y", Side::Buy, "100", "200", "1", "active", "", Vec::new(), false, true)
            .unwrap()
            .unwrap();
        let tight = e
            .add_position("X-Y", Side::Buy, "180", "200", "1", "active", "", Vec::new(), false, true)
            .unwrap()
            .unwrap();

        e.process_filled_orders(vec![tight, wide], FillType::History);

        // both filled; the wide order's slot advanced like the tight one
        assert_eq!(e.stats().total_fills(), 2);
        let market = crate::market::Market::from("X-Y");
        assert_eq!(e.market_info(&market).unwrap().slot(0).unwrap().fill_count, 1);
        assert_eq!(e.market_info(&market).unwrap().slot(1).unwrap().fill_count, 1);
    }

    #[test]
    fn cancel_all_refuses_with_local_positions() {
        let mut e = engine();
        add(&mut e, "active", Side::Buy, "1", "2", "1").unwrap();
        e.cancel_all("all");
        assert!(e.cancel_all_filter.is_none(), "cancel-all must refuse");
        // the grid was not cleared
        let market = crate::market::Market::from("X-Y");
        assert_eq!(e.market_info(&market).unwrap().position_index.len(), 1);
    }

    #[test]
    fn cancel_local_deletes_queued_and_clears_index() {
        let mut e = engine();
        let id = add(&mut e, "active", Side::Buy, "1", "2", "1").unwrap().unwrap();
        e.cancel_local("all");
        assert!(!e.store().contains(id));
        let market = crate::market::Market::from("X-Y");
        assert!(e.market_info(&market).unwrap().position_index.is_empty());
        assert!(e.market_info(&market).unwrap().order_prices.is_empty());
    }
}
