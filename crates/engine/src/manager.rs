//! The order-manager contract shared by the paper and live engines.
//!
//! Both execution engines implement [`OrderManager`], so the scanner and any
//! other strategy code are written once against the contract and selected at
//! construction time. No runtime mode-switching exists anywhere else.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::types::{Order, OrderBook, Side, TimeInForce};
use crate::venue::VenueError;

/// Future returned by a fill callback.
pub type FillFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Callback invoked exactly once per observed fill transition:
/// `(side, fill_price, fill_qty)`.
pub type FillCallback = Arc<dyn Fn(Side, Decimal, Decimal) -> FillFuture + Send + Sync>;

/// One leg of a batched placement request.
#[derive(Debug, Clone, Copy)]
pub struct BatchLeg {
    /// Outcome leg to buy.
    pub side: Side,
    /// Limit price in (0, 1).
    pub price: Decimal,
    /// Size in shares.
    pub size: Decimal,
}

/// Errors surfaced by order placement.
///
/// Transient book-fetch failures are never represented here; those degrade
/// to default/cached books inside the engines.
#[derive(Error, Debug)]
pub enum OrderError {
    /// Limit price outside (0, 1).
    #[error("limit price {0} outside (0, 1)")]
    InvalidPrice(Decimal),

    /// Non-positive size.
    #[error("order size {0} must be positive")]
    InvalidSize(Decimal),

    /// Market order with no ask liquidity available.
    #[error("no ask liquidity for {0}")]
    NoLiquidity(Side),

    /// The external venue client failed the request.
    #[error(transparent)]
    Venue(#[from] VenueError),
}

/// Validates limit-order preconditions shared by both engines.
pub(crate) fn validate_limit(price: Decimal, size: Decimal) -> Result<(), OrderError> {
    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return Err(OrderError::InvalidPrice(price));
    }
    if size <= Decimal::ZERO {
        return Err(OrderError::InvalidSize(size));
    }
    Ok(())
}

/// Uniform order placement, cancellation, and book-query contract.
///
/// Implemented by [`crate::paper::PaperOrderManager`] (simulated fills
/// against live quotes) and [`crate::live::LiveOrderManager`] (delegation to
/// the external venue client).
#[async_trait]
pub trait OrderManager: Send + Sync {
    /// Places a limit buy. Returns the order in OPEN status, or FILLED if the
    /// price crosses the live ask (the fill callback fires before return).
    async fn place_limit_buy(
        &self,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<Order, OrderError>;

    /// Places all legs in a single request/epoch so correlated legs are
    /// evaluated against the same book instant. With [`TimeInForce::Fok`],
    /// legs that cannot fill in full are rejected and never rest.
    async fn place_batch_buy(
        &self,
        legs: &[BatchLeg],
        tif: TimeInForce,
    ) -> Result<Vec<Order>, OrderError>;

    /// Cancels one order. Returns false for unknown or already-terminal
    /// orders, and for best-effort venue cancel failures.
    async fn cancel_order(&self, order_id: &str) -> bool;

    /// Cancels every active order owned by this manager; returns the count.
    /// Idempotent: a second sweep returns 0.
    async fn cancel_all_orders(&self) -> usize;

    /// Buys at the current best ask as an immediately-filled order.
    async fn market_buy(&self, side: Side, size: Decimal) -> Result<Order, OrderError>;

    /// Returns a book snapshot for one leg. Never fails: transient fetch
    /// errors degrade to a cached or default book.
    async fn get_order_book(&self, side: Side) -> OrderBook;

    /// Returns both legs' books from a single snapshot epoch, so the caller
    /// evaluates correlated legs against the same instant.
    async fn get_book_pair(&self) -> (OrderBook, OrderBook);

    /// Re-synchronizes one order against the authoritative source and fires
    /// the fill callback if a transition to FILLED is newly observed.
    /// Returns `None` for unknown ids.
    async fn refresh_order_status(&self, order_id: &str) -> Option<Order>;

    /// Registers the single fill callback, invoked exactly once per fill.
    fn set_fill_callback(&self, callback: FillCallback);

    /// Returns active orders, optionally filtered by side.
    fn open_orders(&self, side: Option<Side>) -> Vec<Order>;
}
