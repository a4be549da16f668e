//! Position state and lifecycle metadata.
//!
//! A [`Position`] is a live or queued exchange order owned by the engine.
//!
//! State transitions:
//! ```text
//! (constructed) ─► Queued ──submit ack──► Active
//!                     │                      │
//!                     │                      ├─ fill signal ─► flip or delete
//!                     │                      ├─ cancel ─► Cancelling ──ack──► per-reason action
//!                     │                      └─ slippage expiry ─► better price or deferred re-check
//!                     └─ cancel-while-queued: flagged, issued on activation
//! ```

use std::fmt;

use crate::coin::Coin;
use crate::market::{Market, MarketInfo, SlotIndex};
use crate::transport::{OrderSpec, PosId};

/// Side of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Side> {
        match s {
            "buy" => Some(Side::Buy),
            "sell" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn is_buy(&self) -> bool {
        matches!(self, Side::Buy)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        })
    }
}

/// Why a cancel was issued; drives the post-cancel action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Diverge/converge two-phase replace.
    Dc,
    /// Rebalancer-requested side flip.
    ShortLong,
    /// Slippage position being reset to a better price.
    SlippageReset,
    /// One-time order aged out.
    MaxAge,
    /// Trimming the low edge of the band.
    Lowest,
    /// Trimming the high edge of the band.
    Highest,
    /// Operator-initiated.
    User,
}

impl CancelReason {
    /// Short label for log lines.
    pub fn label(&self) -> &'static str {
        match self {
            CancelReason::Dc => "dc",
            CancelReason::ShortLong => "s/l",
            CancelReason::SlippageReset => "slip",
            CancelReason::MaxAge => "age",
            CancelReason::Lowest => "lo",
            CancelReason::Highest => "hi",
            CancelReason::User => "user",
        }
    }
}

/// Which redundant signal detected a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillType {
    GetOrder,
    History,
    Ticker,
    Cancel,
    Wss,
}

impl FillType {
    pub fn label(&self) -> &'static str {
        match self {
            FillType::GetOrder => "getorder-fill",
            FillType::History => "history-fill",
            FillType::Ticker => "ticker-fill",
            FillType::Cancel => "cancel-fill",
            FillType::Wss => "wss-fill",
        }
    }
}

/// A live or queued exchange order.
#[derive(Debug, Clone)]
pub struct Position {
    pub id: PosId,
    pub market: Market,
    pub side: Side,
    /// Sorted slot indices this position spans; one for a normal order,
    /// `order_dc` for a landmark (fewer only on the grid boundary).
    pub market_indices: Vec<SlotIndex>,
    pub strategy_tag: String,
    /// Exchange-assigned id; empty until acknowledged.
    pub order_number: String,

    pub buy_price: Coin,
    pub sell_price: Coin,
    /// Captured at construction; bounds for the slippage walk.
    pub buy_price_original: Coin,
    pub sell_price_original: Coin,
    /// The active side's posted price after offset/sentiment.
    pub price: Coin,

    pub quantity: Coin,
    /// Quote notional.
    pub btc_amount: Coin,

    pub is_onetime: bool,
    pub is_taker: bool,
    pub is_landmark: bool,
    pub is_slippage: bool,
    pub is_cancelling: bool,
    /// Set on band-edge auto-placements far from the spread.
    pub is_new_hilo_order: bool,

    pub order_request_time: i64,
    pub order_set_time: i64,
    pub order_cancel_time: i64,
    pub order_getorder_time: i64,
    pub max_age_minutes: i64,

    pub cancel_reason: Option<CancelReason>,
    pub price_reset_count: u32,
}

impl Position {
    /// Construct a queued position. The caller has already validated and
    /// canonicalized prices and size; `market_indices` arrives sorted.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: PosId,
        market: Market,
        side: Side,
        buy_price: Coin,
        sell_price: Coin,
        order_size: Coin,
        strategy_tag: &str,
        market_indices: Vec<SlotIndex>,
        is_landmark: bool,
        info: &MarketInfo,
        now: i64,
    ) -> Position {
        let mut pos = Position {
            id,
            market,
            side,
            market_indices,
            strategy_tag: strategy_tag.to_string(),
            order_number: String::new(),
            buy_price,
            sell_price,
            buy_price_original: buy_price,
            sell_price_original: sell_price,
            price: Coin::ZERO,
            quantity: Coin::ZERO,
            btc_amount: order_size,
            is_onetime: false,
            is_taker: false,
            is_landmark,
            is_slippage: false,
            is_cancelling: false,
            is_new_hilo_order: false,
            order_request_time: now,
            order_set_time: 0,
            order_cancel_time: 0,
            order_getorder_time: 0,
            max_age_minutes: 0,
            cancel_reason: None,
            price_reset_count: 0,
        };
        pos.apply_offset(info);
        pos
    }

    /// Recompute `price` and `quantity` from the active side's raw price,
    /// the market offset/sentiment, and the ticksizes.
    ///
    /// The offset skews the posted price away from mid by half the
    /// configured fraction (buys down, sells up); bullish sentiment lifts
    /// the whole band by the same half-offset.
    pub fn apply_offset(&mut self, info: &MarketInfo) {
        let base = match self.side {
            Side::Buy => self.buy_price,
            Side::Sell => self.sell_price,
        };

        let mut price = base;
        if info.market_offset != 0.0 {
            let half = info.market_offset / 2.0;
            price = match self.side {
                Side::Buy => price.ratio(1.0 - half),
                Side::Sell => price.ratio(1.0 + half),
            };
            if info.market_sentiment {
                price = price.ratio(1.0 + half);
            }
            price = price.truncated_by_ticksize(info.price_ticksize);
        }

        self.price = price;
        self.quantity = (self.btc_amount / price).truncated_by_ticksize(info.quantity_ticksize);
    }

    pub fn lowest_market_index(&self) -> SlotIndex {
        self.market_indices.first().copied().unwrap_or(0)
    }

    pub fn highest_market_index(&self) -> SlotIndex {
        self.market_indices.last().copied().unwrap_or(0)
    }

    pub fn is_queued(&self) -> bool {
        self.order_number.is_empty()
    }

    /// Spread tightness used to order batched fills: `buy / sell`, with
    /// one-time orders pinned to 1 so they dispatch last.
    pub fn fill_ratio(&self) -> Coin {
        if self.is_onetime || self.sell_price.is_zero_or_less() {
            return crate::coin::COIN;
        }
        self.buy_price / self.sell_price
    }

    /// Build the transport order for this position.
    pub fn order_spec(&self) -> OrderSpec {
        OrderSpec {
            market: self.market.clone(),
            side: self.side,
            price: self.price,
            quantity: self.quantity,
            btc_amount: self.btc_amount,
            is_taker: self.is_taker,
        }
    }

    /// One-line order description for logs.
    pub fn stringify_order(&self) -> String {
        format!(
            "{} {:<5} {} {} @ {}{}",
            self.market,
            self.side,
            if self.is_landmark { "L" } else { "-" },
            self.btc_amount,
            self.price,
            if self.order_number.is_empty() {
                String::new()
            } else {
                format!(" id:{}", self.order_number)
            }
        )
    }

    /// Ping-pong change description: `buy 100 -> sell 110` style.
    pub fn stringify_position_change(&self) -> String {
        let (from, to) = match self.side {
            Side::Buy => (self.buy_price, self.sell_price),
            Side::Sell => (self.sell_price, self.buy_price),
        };
        format!("{} {:<5} {} -> {}", self.market, self.side, from, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_offset(offset: f64, sentiment: bool) -> MarketInfo {
        MarketInfo {
            market_offset: offset,
            market_sentiment: sentiment,
            ..MarketInfo::default()
        }
    }

    fn make_pos(side: Side, info: &MarketInfo) -> Position {
        Position::new(
            PosId(1),
            Market::from("TEST-BTC"),
            side,
            Coin::parse("100"),
            Coin::parse("110"),
            Coin::parse("0.5"),
            "",
            vec![3],
            false,
            info,
            1_000,
        )
    }

    #[test]
    fn zero_offset_uses_raw_side_price() {
        let info = info_with_offset(0.0, false);
        let buy = make_pos(Side::Buy, &info);
        assert_eq!(buy.price, Coin::parse("100"));
        let sell = make_pos(Side::Sell, &info);
        assert_eq!(sell.price, Coin::parse("110"));
    }

    #[test]
    fn offset_skews_away_from_mid() {
        let info = info_with_offset(0.01, false);
        let buy = make_pos(Side::Buy, &info);
        assert!(buy.price < Coin::parse("100"));
        let sell = make_pos(Side::Sell, &info);
        assert!(sell.price > Coin::parse("110"));
    }

    #[test]
    fn bullish_sentiment_lifts_the_band() {
        let flat = info_with_offset(0.01, false);
        let bull = info_with_offset(0.01, true);
        assert!(make_pos(Side::Buy, &bull).price > make_pos(Side::Buy, &flat).price);
        assert!(make_pos(Side::Sell, &bull).price > make_pos(Side::Sell, &flat).price);
    }

    #[test]
    fn quantity_is_notional_over_price() {
        let info = info_with_offset(0.0, false);
        let buy = make_pos(Side::Buy, &info);
        assert_eq!(buy.quantity, Coin::parse("0.005"));
    }

    #[test]
    fn fill_ratio_pins_onetime_last() {
        let info = info_with_offset(0.0, false);
        let mut pos = make_pos(Side::Buy, &info);
        assert!(pos.fill_ratio() < crate::coin::COIN);
        pos.is_onetime = true;
        assert_eq!(pos.fill_ratio(), crate::coin::COIN);
    }

    #[test]
    fn originals_captured_at_construction() {
        let info = info_with_offset(0.0, false);
        let mut pos = make_pos(Side::Buy, &info);
        pos.buy_price = Coin::parse("99");
        assert_eq!(pos.buy_price_original, Coin::parse("100"));
    }
}
