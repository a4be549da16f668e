//! Engine tuning and exchange profile.
//!
//! Everything the original expressed as compile-time exchange switches lives
//! here as injected configuration: id scoping, post-only support, order
//! status probing, percent-price enforcement, and the slippage pricing
//! strategy.

use serde::{Deserialize, Serialize};

use crate::market::MarketNaming;

/// How exchange order ids map to canonical local ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdScope {
    /// Ids are globally unique.
    #[default]
    Plain,
    /// Ids can collide across markets; prefix with the market symbol.
    PrefixMarket,
}

/// How `find_better_price` widens the price on repeated post-only rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageStrategy {
    /// Step by the price ticksize, growing as `1 + floor(resets^1.11)`.
    #[default]
    GrowingTicksize,
    /// Step by `price * slippage_multiplier + 1 satoshi`.
    Multiplier,
}

/// Engine-wide settings, dependency-injected into the reactor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Resubmit a queued order after this many ms without an ack.
    pub request_timeout: i64,
    /// Reissue a cancel after this many ms without an ack.
    pub cancel_timeout: i64,
    /// Grace after acknowledgment before open-orders fill inference.
    pub safety_delay_time: i64,
    /// Grace against ticker-inferred fills.
    pub ticker_safety_delay_time: i64,
    /// Wait before cancelling exchange orders with unknown ids.
    pub stray_grace_time_limit: i64,

    /// Reconcile stray orders at all.
    pub should_clear_stray_orders: bool,
    /// Strict mode: consider strays even at prices we never posted.
    pub should_clear_stray_orders_all: bool,
    /// Suppress fill inference on an empty open-orders snapshot.
    pub should_mitigate_blank_orderbook_flash: bool,
    /// Active-position count above which the blank snapshot is implausible.
    pub blank_book_mitigation_threshold: usize,
    /// Refuse to cancel more than this many strays in one snapshot.
    pub stray_cancel_burst_cap: usize,

    /// Pull the stored top-of-book inward when a crossed quote is observed.
    pub should_adjust_hibuy_losell: bool,
    /// First slippage attempt prices off the book instead of stepping.
    pub should_slippage_be_calculated: bool,
    /// Allow DC to touch slippage positions.
    pub should_dc_slippage_orders: bool,
    pub slippage_strategy: SlippageStrategy,
    /// Ratio for `SlippageStrategy::Multiplier`.
    pub slippage_multiplier: f64,

    /// Enforce the exchange percent-price band at submission.
    pub enforce_percent_price: bool,
    /// The exchange has reliable per-order status; probe instead of
    /// batch-inferring fills.
    pub probe_order_status: bool,
    /// Max `get_order` probes per tick.
    pub getorder_rate_limit: usize,
    /// Min ms between probes of the same order.
    pub getorder_min_interval: i64,

    pub id_scope: IdScope,
    pub market_naming: MarketNaming,

    /// Skip the DC sweep when this many commands are already queued.
    pub limit_commands_queued_dc_check: usize,
    /// Skip the timeout sweep when this many commands are already queued.
    pub limit_timeout_yield: usize,

    /// Epoch ms of the scheduled maintenance (save + cancel local); 0 off.
    pub maintenance_time: i64,

    /// Directory for saved market index files.
    pub index_dir: String,

    /// Extra slippage chatter in logs.
    pub is_chatty: bool,
    /// 0 silences per-order log lines.
    pub verbosity: u8,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout: 3 * 60 * 1000,
            cancel_timeout: 5 * 60 * 1000,
            safety_delay_time: 8_500,
            ticker_safety_delay_time: 20_000,
            stray_grace_time_limit: 10 * 60 * 1000,
            should_clear_stray_orders: false,
            should_clear_stray_orders_all: false,
            should_mitigate_blank_orderbook_flash: false,
            blank_book_mitigation_threshold: 50,
            stray_cancel_burst_cap: 50,
            should_adjust_hibuy_losell: true,
            should_slippage_be_calculated: true,
            should_dc_slippage_orders: false,
            slippage_strategy: SlippageStrategy::GrowingTicksize,
            slippage_multiplier: 0.005,
            enforce_percent_price: false,
            probe_order_status: false,
            getorder_rate_limit: 5,
            getorder_min_interval: 30_000,
            id_scope: IdScope::Plain,
            market_naming: MarketNaming::Dashes,
            limit_commands_queued_dc_check: 10,
            limit_timeout_yield: 20,
            maintenance_time: 0,
            index_dir: ".".to_string(),
            is_chatty: false,
            verbosity: 1,
        }
    }
}
