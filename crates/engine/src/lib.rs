//! Box-arbitrage engine for binary prediction markets.
//!
//! A binary market's two outcome tokens resolve to exactly $1 between them.
//! Whenever `ask_up + ask_down < 1.00`, buying both legs locks the
//! difference as risk-free profit. This crate provides everything around
//! that idea:
//!
//! - [`types`]: orders, books, sides, and placement policies
//! - [`manager`]: the [`manager::OrderManager`] contract both engines share
//! - [`paper`]: simulated fills against live public quotes
//! - [`live`]: delegation to an external signed venue client
//! - [`scanner`]: the polling loop that finds and takes the box
//! - [`ledger`]: persistent per-session trade and cycle records
//! - [`client`]: rate-limited public book reads
//! - [`normalize`]: tolerant decoding of venue response shapes
//! - [`config`]: environment-driven runtime configuration

pub mod client;
pub mod config;
pub mod ledger;
pub mod live;
pub mod manager;
pub mod normalize;
pub mod paper;
pub mod scanner;
pub mod types;
pub mod venue;

pub use client::BookClient;
pub use config::{Config, TradingMode};
pub use ledger::{Cycle, CycleStatus, LedgerError, SessionStats, TradeLedger, TradeRecord};
pub use live::LiveOrderManager;
pub use manager::{BatchLeg, FillCallback, OrderError, OrderManager};
pub use paper::{FillMode, PaperOrderManager};
pub use scanner::{BoxScanner, MarketWindow, ScanSummary, ScannerConfig, ScannerError};
pub use types::{Order, OrderBook, OrderStatus, Side, TimeInForce};
pub use venue::{VenueClient, VenueError, VenueOrderRequest};
