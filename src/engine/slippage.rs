//! Post-only price improvement and slippage repair.
//!
//! `try_move_order` ratchets a resting price toward the spread without
//! crossing it or exceeding the original slot price. `find_better_price`
//! runs after a post-only placement was rejected and walks the price away
//! from mid until the exchange accepts it.

use tracing::{debug, info, warn};

use crate::coin::{Coin, SATOSHI};
use crate::engine::position::{Position, Side};
use crate::engine::settings::SlippageStrategy;
use crate::engine::Engine;
use crate::market::MarketInfo;
use crate::transport::{PosId, Transport};

/// Ratchet `pos` toward the spread using the latest top-of-book.
///
/// Buys: if crossed (`buy >= lo_sell`), snap to `lo_sell - ticksize` and
/// mark slippage. Otherwise step upward in ticksize increments while staying
/// strictly below `lo_sell - ticksize` and at or below the original price.
/// Sells mirror. Returns whether a change was applied.
pub(crate) fn try_move_order(pos: &mut Position, info: &MarketInfo, chatty: bool) -> bool {
    let hi_buy = info.highest_buy;
    let lo_sell = info.lowest_sell;

    // no ticker yet, nothing to improve against
    if hi_buy.is_zero_or_less() || lo_sell.is_zero_or_less() {
        return false;
    }

    let ticksize = info.price_ticksize;

    if pos.side == Side::Buy {
        // don't interfere with the spread
        if pos.buy_price >= lo_sell && lo_sell > ticksize {
            pos.buy_price = lo_sell - ticksize;
            pos.is_slippage = true;
            return true;
        }

        let mut new_buy_price = pos.buy_price;
        while new_buy_price >= ticksize
            && new_buy_price < lo_sell - ticksize
            && new_buy_price < pos.buy_price_original
        {
            new_buy_price += ticksize;
        }

        if new_buy_price != pos.price
            && new_buy_price.is_greater_than_zero()
            && new_buy_price <= pos.buy_price_original
            && new_buy_price != pos.buy_price
            && new_buy_price < lo_sell
        {
            pos.buy_price = new_buy_price;
            pos.is_slippage = true;
            return true;
        }

        if pos.is_slippage && chatty {
            debug!(
                order = %pos.stringify_order(), %new_buy_price,
                original = %pos.buy_price_original, %hi_buy, %lo_sell,
                "couldn't find better buy price"
            );
        }
    } else {
        if pos.sell_price <= hi_buy {
            pos.sell_price = hi_buy + ticksize;
            pos.is_slippage = true;
            return true;
        }

        let mut new_sell_price = pos.sell_price;
        while new_sell_price > ticksize + ticksize
            && new_sell_price > hi_buy + ticksize
            && new_sell_price > pos.sell_price_original
        {
            new_sell_price -= ticksize;
        }

        if new_sell_price != pos.price
            && new_sell_price > ticksize
            && new_sell_price >= pos.sell_price_original
            && new_sell_price != pos.sell_price
            && new_sell_price > hi_buy
        {
            pos.sell_price = new_sell_price;
            pos.is_slippage = true;
            return true;
        }

        if pos.is_slippage && chatty {
            debug!(
                order = %pos.stringify_order(), %new_sell_price,
                original = %pos.sell_price_original, %hi_buy, %lo_sell,
                "couldn't find better sell price"
            );
        }
    }

    false
}

impl<T: Transport> Engine<T> {
    /// Ratchet an existing position toward the spread. Used by the timeout
    /// sweep before deciding whether a slippage reset is worth a cancel.
    pub(crate) fn try_move_order(&mut self, id: PosId) -> bool {
        let chatty = self.settings.is_chatty;
        let Some(pos) = self.store.get(id) else {
            return false;
        };
        let market = pos.market.clone();
        let info = self.market_info_mut(&market).clone();
        match self.store.get_mut(id) {
            Some(pos) => try_move_order(pos, &info, chatty),
            None => false,
        }
    }

    /// A post-only placement was rejected: move the price away from mid so
    /// the next attempt rests.
    ///
    /// The first attempt prices directly off the opposing top-of-book
    /// (calculated); subsequent attempts step further away (additive). The
    /// step grows with the reset count, or uses the multiplier strategy,
    /// per the exchange profile.
    pub(crate) fn find_better_price(&mut self, id: PosId) {
        let Some(pos) = self.store.get(id).cloned() else {
            return;
        };
        let market = pos.market.clone();
        let is_buy = pos.side == Side::Buy;

        let (mut hi_buy, mut lo_sell, price_ticksize) = {
            let info = self.market_info_mut(&market);
            (info.highest_buy, info.lowest_sell, info.price_ticksize)
        };

        let ticksize = match self.settings.slippage_strategy {
            SlippageStrategy::GrowingTicksize => {
                let mut tick = price_ticksize;
                if pos.price_reset_count > 0 {
                    let growth = (pos.price_reset_count as f64).powf(1.110).floor();
                    tick += tick.ratio(growth);
                }
                tick
            }
            SlippageStrategy::Multiplier => {
                let base = if is_buy { pos.buy_price } else { pos.sell_price };
                base.ratio(self.settings.slippage_multiplier) + SATOSHI
            }
        };

        // the exchange said we'd cross, so the stored book is stale; pull
        // the boundary inward to the crossing value
        if self.settings.should_adjust_hibuy_losell {
            let chatty = self.settings.is_chatty;
            if is_buy && lo_sell.is_greater_than_zero() && lo_sell > pos.buy_price {
                if chatty {
                    debug!(%market, buy = %pos.buy_price, %lo_sell, "lo-sell adjusted inward");
                }
                self.market_info_mut(&market).lowest_sell = pos.buy_price;
                lo_sell = pos.buy_price;
            } else if !is_buy && hi_buy.is_greater_than_zero() && hi_buy < pos.sell_price {
                if chatty {
                    debug!(%market, sell = %pos.sell_price, %hi_buy, "hi-buy adjusted inward");
                }
                self.market_info_mut(&market).highest_buy = pos.sell_price;
                hi_buy = pos.sell_price;
            }
        }

        let calculated = pos.price_reset_count < 1 && self.settings.should_slippage_be_calculated;
        let (new_price, haggle) = if is_buy {
            if calculated && lo_sell.is_greater_than_zero() {
                (lo_sell - ticksize, "calculated")
            } else {
                (pos.buy_price - ticksize, "additive")
            }
        } else if calculated && hi_buy.is_greater_than_zero() {
            (hi_buy + ticksize, "calculated")
        } else {
            (pos.sell_price + ticksize, "additive")
        };

        info!(
            haggle, side = %pos.side, %new_price, %ticksize,
            "post-only price walk for {}", pos.stringify_order()
        );

        // swap the posted price in the stray-detection index
        let old_price = pos.price;
        self.market_info_mut(&market).remove_order_price(old_price);

        let info_snapshot = self.market_info_mut(&market).clone();
        let Some(pos) = self.store.get_mut(id) else {
            return;
        };
        if is_buy {
            pos.buy_price = new_price;
        } else {
            pos.sell_price = new_price;
        }
        pos.is_slippage = true;
        pos.price_reset_count += 1;
        pos.apply_offset(&info_snapshot);

        if pos.price.is_zero_or_less() {
            warn!(
                %market, %new_price,
                "slippage walk produced a non-positive price; leaving for the timeout sweep"
            );
        }

        let price = pos.price;
        self.market_info_mut(&market).order_prices.push(price);
    }
}
