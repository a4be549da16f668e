//! Transport contract between the engine core and exchange adapters.
//!
//! The engine is a synchronous reactor: it issues typed commands through the
//! [`Transport`] trait and consumes parsed [`TransportEvent`]s delivered one
//! at a time by the async shell. Adapters own all HTTP/WebSocket machinery;
//! nothing in the core awaits.

use std::collections::HashMap;

use crate::coin::Coin;
use crate::engine::position::Side;
use crate::market::Market;

/// Stable internal handle for a position.
///
/// Positions live in the store's flat map; every secondary index and every
/// in-flight transport request refers to a position by `PosId`, never by
/// reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PosId(pub u64);

impl std::fmt::Display for PosId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Everything an adapter needs to place an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSpec {
    pub market: Market,
    pub side: Side,
    pub price: Coin,
    pub quantity: Coin,
    pub btc_amount: Coin,
    pub is_taker: bool,
}

/// Outbound command surface consumed by the engine.
///
/// `should_yield` is the adapter's backpressure predicate; sweeps consult it
/// between units of work and return early when it trips. `detach` unbinds any
/// in-flight request from a position that is being removed, so a late reply
/// cannot resolve against a dead handle.
pub trait Transport {
    fn submit(&mut self, pos: PosId, spec: &OrderSpec);
    fn cancel(&mut self, order_id: &str, pos: Option<PosId>);
    fn get_order(&mut self, order_id: &str, pos: Option<PosId>);
    fn get_open_orders(&mut self);
    fn get_ticker(&mut self);

    /// Transport backpressure predicate.
    fn should_yield(&self) -> bool;

    /// Number of commands waiting in the adapter's queue.
    fn queued_commands(&self) -> usize;

    /// Forget any in-flight requests bound to `pos`.
    fn detach(&mut self, pos: PosId);
}

/// Top-of-book observation for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickerInfo {
    pub bid: Coin,
    pub ask: Coin,
}

/// One exchange-reported open order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOrder {
    pub market: Market,
    pub order_number: String,
    pub side: Side,
    pub price: Coin,
    pub btc_amount: Coin,
}

/// Exchange-reported order status from an explicit `get_order`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Filled,
    Cancelled,
    Partial,
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelStatus {
    OrderCanceled,
    OrderCancelRejected,
}

/// Classified placement failure, as parsed by the adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Post-only order would have crossed; the engine walks the price.
    PostOnlyRejected,
    /// Not enough balance; the queued position is dropped.
    InsufficientBalance,
    /// Anything else; the request-timeout sweep will resubmit.
    Other(String),
}

/// Parsed inbound events, delivered one at a time to the reactor.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Ticker snapshot. `request_time_ms <= 0` marks a push feed with no
    /// request linkage; fills are not inferred from those.
    Ticker {
        tickers: HashMap<Market, TickerInfo>,
        request_time_ms: i64,
    },
    /// Fresh pull of the exchange's open-order list.
    OpenOrders {
        order_ids: Vec<String>,
        orders: Vec<OpenOrder>,
        request_time_ms: i64,
    },
    /// Reply to an explicit `get_order`.
    OrderStatus {
        order_id: String,
        status: OrderStatus,
        filled_quantity: Coin,
        filled_fee: Coin,
    },
    /// Reply to a submission.
    NewOrderAck {
        pos: PosId,
        order_number: Option<String>,
        error: Option<SubmitError>,
    },
    /// Reply to a cancel.
    CancelAck {
        order_id: String,
        status: CancelStatus,
    },
    /// Websocket push fill notification.
    FillNotification { order_id: String },
    /// Order ids the adapter's history poller saw complete.
    HistoryFills { order_ids: Vec<String> },
}
