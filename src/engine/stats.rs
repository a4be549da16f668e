//! Fill and strategy statistics collaborator.
//!
//! The engine reports every fill here before flipping the slot, and every
//! completed shortlong flip with its strategy tag. The daemon logs the
//! summary on its stats timer.

use std::collections::HashMap;

use tracing::info;

use crate::coin::Coin;
use crate::engine::position::{Position, Side};
use crate::market::Market;

#[derive(Debug, Clone, Default)]
pub struct MarketStats {
    pub fills: u64,
    pub buy_volume: Coin,
    pub sell_volume: Coin,
}

#[derive(Debug, Default)]
pub struct EngineStats {
    per_market: HashMap<Market, MarketStats>,
    per_strategy_volume: HashMap<String, Coin>,
    total_fills: u64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a detected fill.
    pub fn record_fill(&mut self, pos: &Position) {
        let entry = self.per_market.entry(pos.market.clone()).or_default();
        entry.fills += 1;
        match pos.side {
            Side::Buy => entry.buy_volume += pos.btc_amount,
            Side::Sell => entry.sell_volume += pos.btc_amount,
        }
        self.total_fills += 1;
    }

    /// Record a completed shortlong flip under its strategy tag.
    pub fn record_strategy(&mut self, pos: &Position) {
        if pos.strategy_tag.is_empty() {
            return;
        }
        let vol = self
            .per_strategy_volume
            .entry(pos.strategy_tag.clone())
            .or_insert(Coin::ZERO);
        *vol += pos.btc_amount;
    }

    pub fn total_fills(&self) -> u64 {
        self.total_fills
    }

    pub fn market(&self, market: &Market) -> Option<&MarketStats> {
        self.per_market.get(market)
    }

    pub fn strategy_volume(&self, tag: &str) -> Coin {
        self.per_strategy_volume
            .get(tag)
            .copied()
            .unwrap_or(Coin::ZERO)
    }

    /// Emit the summary as one log line per market.
    pub fn log_summary(&self) {
        for (market, stats) in &self.per_market {
            info!(
                target: "gridpong::stats",
                %market,
                fills = stats.fills,
                buy_volume = %stats.buy_volume,
                sell_volume = %stats.sell_volume,
                "market stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::MarketInfo;
    use crate::transport::PosId;

    fn pos(side: Side, tag: &str) -> Position {
        Position::new(
            PosId(1),
            Market::from("A-B"),
            side,
            Coin::parse("100"),
            Coin::parse("110"),
            Coin::parse("0.5"),
            tag,
            vec![0],
            false,
            &MarketInfo::default(),
            0,
        )
    }

    #[test]
    fn fills_tally_per_side() {
        let mut stats = EngineStats::new();
        stats.record_fill(&pos(Side::Buy, ""));
        stats.record_fill(&pos(Side::Sell, ""));
        let m = stats.market(&Market::from("A-B")).unwrap();
        assert_eq!(m.fills, 2);
        assert_eq!(m.buy_volume, Coin::parse("0.5"));
        assert_eq!(m.sell_volume, Coin::parse("0.5"));
        assert_eq!(stats.total_fills(), 2);
    }

    #[test]
    fn strategy_volume_keyed_by_tag() {
        let mut stats = EngineStats::new();
        stats.record_strategy(&pos(Side::Buy, "spruce-1"));
        stats.record_strategy(&pos(Side::Buy, "spruce-1"));
        stats.record_strategy(&pos(Side::Buy, ""));
        assert_eq!(stats.strategy_volume("spruce-1"), Coin::parse("1"));
        assert_eq!(stats.strategy_volume(""), Coin::ZERO);
    }
}
