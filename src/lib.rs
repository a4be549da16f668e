#![deny(unreachable_pub)]

//! # gridpong
//!
//! An automated market-making and portfolio-rebalancing daemon core. Given
//! a per-market grid of planned ping-pong order pairs and a stream of ticker
//! and order-lifecycle events, the engine keeps a bounded band of the grid
//! live near the spread, detects fills through several redundant signals and
//! flips filled slots to the opposite side, repairs post-only slippage, and
//! consolidates adjacent resting orders into landmark orders (and back) as
//! the band moves.
//!
//! The core is a single-threaded reactor ([`engine::Engine`]); exchange
//! adapters live behind the [`transport::Transport`] trait and deliver
//! parsed [`transport::TransportEvent`]s through the tokio shell in
//! [`runtime`].

pub mod coin;
pub mod config;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod market;
pub mod runtime;
pub mod sim;
pub mod transport;

pub use coin::{Coin, A_LOT, COIN, SATOSHI};
pub use config::DaemonConfig;
pub use engine::{
    CancelReason, Clock, DcGroup, Engine, EngineSettings, EngineStats, FillType, IdScope,
    Position, PositionStore, Side, SlippageStrategy,
};
pub use errors::{Error, Result};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use market::{Market, MarketInfo, MarketNaming, PositionSlot, SlotIndex};
pub use runtime::{Reactor, ReactorTimers};
pub use sim::{SimCommand, SimTransport};
pub use transport::{
    CancelStatus, OpenOrder, OrderSpec, OrderStatus, PosId, SubmitError, TickerInfo, Transport,
    TransportEvent,
};
