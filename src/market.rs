//! Market identifiers, per-market settings, and the declarative order grid.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::coin::{Coin, SATOSHI};

/// Index into a market's `position_index`.
///
/// Signed so boundary arithmetic (`max_buy_index - landmark_start - nice`)
/// can go below zero without wrapping.
pub type SlotIndex = i64;

/// Separator style the exchange uses in market symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketNaming {
    /// `BTC-USD` style; underscores are converted to dashes.
    #[default]
    Dashes,
    /// `BTC_USD` style; dashes are converted to underscores.
    Underscores,
}

/// A trading pair identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Market(String);

impl Market {
    /// Build a market id, converting accidental underscore to dash or vice
    /// versa per the exchange's naming convention.
    pub fn normalized(raw: &str, naming: MarketNaming) -> Market {
        let s = match naming {
            MarketNaming::Dashes => raw.replace('_', "-"),
            MarketNaming::Underscores => raw.replace('-', "_"),
        };
        Market(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Market {
    fn from(s: &str) -> Market {
        Market(s.to_string())
    }
}

/// One entry of the declarative grid: a planned ping-pong pair.
///
/// Slots are immutable apart from `fill_count` advancement. When
/// `alternate_size` is set, each fill toggles which of the two sizes the
/// next order uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSlot {
    pub buy_price: Coin,
    pub sell_price: Coin,
    pub order_size: Coin,
    pub alternate_size: Option<Coin>,
    pub fill_count: u64,
}

impl PositionSlot {
    pub fn new(buy_price: Coin, sell_price: Coin, order_size: Coin, alternate_size: Option<Coin>) -> Self {
        Self {
            buy_price,
            sell_price,
            order_size,
            alternate_size,
            fill_count: 0,
        }
    }

    /// Advance the fill count and swap in the alternate size if one exists.
    pub fn resize_by_alternate_size(&mut self) {
        self.fill_count += 1;
        if let Some(alt) = self.alternate_size {
            self.alternate_size = Some(self.order_size);
            self.order_size = alt;
        }
    }

    /// Size string in saved-index form: `size` or `size/alternate`.
    pub fn size_field(&self) -> String {
        match self.alternate_size {
            Some(alt) => format!("{}/{}", self.order_size, alt),
            None => self.order_size.to_string(),
        }
    }
}

/// Per-market live state and tuning.
#[derive(Debug, Clone)]
pub struct MarketInfo {
    /// Multiset of prices currently posted (one entry per live position).
    pub order_prices: Vec<Coin>,
    /// The declarative grid, ordered low to high.
    pub position_index: Vec<PositionSlot>,
    /// Latest observed top-of-book bid.
    pub highest_buy: Coin,
    /// Latest observed top-of-book ask.
    pub lowest_sell: Coin,
    pub price_ticksize: Coin,
    pub quantity_ticksize: Coin,
    /// Minimum live ping-pong orders per side; 0 disables automation.
    pub order_min: i64,
    /// Maximum live ping-pong orders per side; 0 disables automation.
    pub order_max: i64,
    /// Run length required to form a landmark; < 2 disables DC.
    pub order_dc: i64,
    /// Hysteresis added to the converge boundary.
    pub order_dc_nice: i64,
    /// How far from the spread landmark territory starts.
    pub order_landmark_start: i64,
    /// Headroom below `order_max` reserved for landmark placement.
    pub order_landmark_thresh: i64,
    /// Bullish sentiment lifts the offset band upward.
    pub market_sentiment: bool,
    /// Fractional price offset applied to posted prices.
    pub market_offset: f64,
    /// Per-market slippage re-check timeout (ms).
    pub slippage_timeout: i64,
    /// Exchange-enforced percent-price lower multiplier.
    pub price_min_mul: Coin,
    /// Exchange-enforced percent-price upper multiplier.
    pub price_max_mul: Coin,
}

impl Default for MarketInfo {
    fn default() -> Self {
        Self {
            order_prices: Vec::new(),
            position_index: Vec::new(),
            highest_buy: Coin::ZERO,
            lowest_sell: Coin::ZERO,
            price_ticksize: SATOSHI,
            quantity_ticksize: SATOSHI,
            order_min: 0,
            order_max: 0,
            order_dc: 0,
            order_dc_nice: 0,
            order_landmark_start: 0,
            order_landmark_thresh: 0,
            market_sentiment: false,
            market_offset: 0.0,
            slippage_timeout: 2 * 60 * 1000,
            price_min_mul: Coin::ZERO,
            price_max_mul: Coin::ZERO,
        }
    }
}

impl MarketInfo {
    /// Withdraw one occurrence of `price` from the posted-price multiset.
    pub fn remove_order_price(&mut self, price: Coin) -> bool {
        if let Some(i) = self.order_prices.iter().position(|p| *p == price) {
            self.order_prices.swap_remove(i);
            true
        } else {
            false
        }
    }

    pub fn slot(&self, idx: SlotIndex) -> Option<&PositionSlot> {
        if idx < 0 {
            return None;
        }
        self.position_index.get(idx as usize)
    }

    pub fn slot_mut(&mut self, idx: SlotIndex) -> Option<&mut PositionSlot> {
        if idx < 0 {
            return None;
        }
        self.position_index.get_mut(idx as usize)
    }

    pub fn index_len(&self) -> SlotIndex {
        self.position_index.len() as SlotIndex
    }
}

/// The per-market settings table, keyed by market id.
pub type MarketTable = HashMap<Market, MarketInfo>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_normalization() {
        assert_eq!(Market::normalized("BTC_ETH", MarketNaming::Dashes).as_str(), "BTC-ETH");
        assert_eq!(Market::normalized("BTC-ETH", MarketNaming::Underscores).as_str(), "BTC_ETH");
    }

    #[test]
    fn alternate_size_toggles_each_fill() {
        let mut slot = PositionSlot::new(
            Coin::parse("100"),
            Coin::parse("110"),
            Coin::parse("0.001"),
            Some(Coin::parse("0.002")),
        );

        slot.resize_by_alternate_size();
        assert_eq!(slot.fill_count, 1);
        assert_eq!(slot.order_size, Coin::parse("0.002"));
        assert_eq!(slot.alternate_size, Some(Coin::parse("0.001")));

        slot.resize_by_alternate_size();
        assert_eq!(slot.fill_count, 2);
        assert_eq!(slot.order_size, Coin::parse("0.001"));
    }

    #[test]
    fn fill_count_advances_without_alternate() {
        let mut slot = PositionSlot::new(
            Coin::parse("100"),
            Coin::parse("110"),
            Coin::parse("0.001"),
            None,
        );
        slot.resize_by_alternate_size();
        assert_eq!(slot.fill_count, 1);
        assert_eq!(slot.order_size, Coin::parse("0.001"));
    }

    #[test]
    fn order_price_multiset_removes_one() {
        let mut info = MarketInfo::default();
        let p = Coin::parse("100");
        info.order_prices.push(p);
        info.order_prices.push(p);
        assert!(info.remove_order_price(p));
        assert_eq!(info.order_prices.len(), 1);
        assert!(info.remove_order_price(p));
        assert!(!info.remove_order_price(p));
    }

    #[test]
    fn size_field_round_trip() {
        let slot = PositionSlot::new(
            Coin::parse("1"),
            Coin::parse("2"),
            Coin::parse("0.001"),
            Some(Coin::parse("0.002")),
        );
        assert_eq!(slot.size_field(), "0.00100000/0.00200000");
    }
}
