//! Core order and book entities for binary-market trading.
//!
//! This module provides the value objects shared by both execution engines:
//! - [`Side`]: the two complementary outcome legs of a binary market
//! - [`Order`]: a resting or filled limit order with lifecycle status
//! - [`OrderBook`]: an immutable two-sided price ladder snapshot
//! - [`TimeInForce`]: order placement policy (FOK/FAK/GTC/GTD)

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Outcome leg of a binary market.
///
/// Up/Down markets and YES/NO markets are the same structure; `YES` and `NO`
/// are accepted as aliases on deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// The UP (YES) leg.
    #[serde(alias = "YES")]
    Up,
    /// The DOWN (NO) leg.
    #[serde(alias = "NO")]
    Down,
}

impl Side {
    /// Returns the complementary leg.
    #[must_use]
    pub fn other(&self) -> Self {
        match self {
            Side::Up => Side::Down,
            Side::Down => Side::Up,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Up => write!(f, "UP"),
            Side::Down => write!(f, "DOWN"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UP" | "YES" => Ok(Side::Up),
            "DOWN" | "NO" => Ok(Side::Down),
            other => Err(format!("unknown side: {other}")),
        }
    }
}

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Submitted but not yet acknowledged.
    Pending,
    /// Resting on the book.
    Open,
    /// Partially filled, remainder still live.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled before completion.
    Cancelled,
    /// Rejected by the venue or simulator.
    Rejected,
}

impl OrderStatus {
    /// Returns true if no further transitions are possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Returns true if the order can still fill or be cancelled.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "PENDING"),
            OrderStatus::Open => write!(f, "OPEN"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Order placement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Fill-or-Kill: fill entirely and immediately, or cancel. Required for
    /// dual-leg entries to avoid resting exposure on a single leg.
    Fok,
    /// Fill-and-Kill: fill what is available, cancel the rest.
    Fak,
    /// Good-til-Cancelled: rests on the book.
    Gtc,
    /// Good-til-Date: rests until a venue-side expiry.
    Gtd,
}

impl TimeInForce {
    /// Returns true if unfilled remainder may rest on the book.
    #[must_use]
    pub fn rests(&self) -> bool {
        matches!(self, TimeInForce::Gtc | TimeInForce::Gtd)
    }
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeInForce::Fok => write!(f, "FOK"),
            TimeInForce::Fak => write!(f, "FAK"),
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Gtd => write!(f, "GTD"),
        }
    }
}

impl FromStr for TimeInForce {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "FOK" => Ok(TimeInForce::Fok),
            "FAK" => Ok(TimeInForce::Fak),
            "GTC" => Ok(TimeInForce::Gtc),
            "GTD" => Ok(TimeInForce::Gtd),
            other => Err(format!("unknown order type: {other}")),
        }
    }
}

/// A limit order owned by an order manager.
///
/// Created on placement, mutated only by the owning manager on
/// fill/cancel/reject, and retained in the manager's table for the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Opaque order identifier (venue-assigned or simulator-generated).
    pub id: String,
    /// Outcome leg this order buys.
    pub side: Side,
    /// Limit price in [0, 1].
    pub price: Decimal,
    /// Requested size in shares.
    pub size: Decimal,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Quantity filled so far. Invariant: `filled_qty <= size`.
    pub filled_qty: Decimal,
    /// Volume-weighted average fill price (zero until a fill occurs).
    pub filled_avg_price: Decimal,
    /// Placement timestamp.
    pub created_at: DateTime<Utc>,
    /// Venue token identifier for the leg.
    pub token_id: String,
}

impl Order {
    /// Creates a new order in the given initial status.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        side: Side,
        price: Decimal,
        size: Decimal,
        status: OrderStatus,
        token_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            side,
            price,
            size,
            status,
            filled_qty: Decimal::ZERO,
            filled_avg_price: Decimal::ZERO,
            created_at: Utc::now(),
            token_id: token_id.into(),
        }
    }

    /// Unfilled quantity.
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        self.size - self.filled_qty
    }

    /// Returns true if the order is OPEN or PARTIALLY_FILLED.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Requested notional value (`price * size`).
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }

    /// Marks the order fully filled at the given price.
    pub(crate) fn mark_filled(&mut self, fill_price: Decimal) {
        self.status = OrderStatus::Filled;
        self.filled_qty = self.size;
        self.filled_avg_price = fill_price;
    }
}

/// Immutable snapshot of a two-sided price ladder.
///
/// Bids are sorted descending by price, asks ascending. Entries with
/// non-positive price or size are dropped at construction. A fresh snapshot
/// is built on every fetch; there is no update-in-place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBook {
    /// Bid levels `(price, size)`, best (highest) first.
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels `(price, size)`, best (lowest) first.
    pub asks: Vec<(Decimal, Decimal)>,
}

impl OrderBook {
    /// Builds a snapshot, filtering non-positive entries and enforcing the
    /// sort invariant (bids descending, asks ascending).
    #[must_use]
    pub fn new(mut bids: Vec<(Decimal, Decimal)>, mut asks: Vec<(Decimal, Decimal)>) -> Self {
        bids.retain(|(p, s)| *p > Decimal::ZERO && *s > Decimal::ZERO);
        asks.retain(|(p, s)| *p > Decimal::ZERO && *s > Decimal::ZERO);
        bids.sort_by(|a, b| b.0.cmp(&a.0));
        asks.sort_by(|a, b| a.0.cmp(&b.0));
        Self { bids, asks }
    }

    /// An empty book (both sides bare).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Best (highest) bid price.
    #[must_use]
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|(p, _)| *p)
    }

    /// Best (lowest) ask price.
    #[must_use]
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|(p, _)| *p)
    }

    /// Best ask level as `(price, size)`, used for top-of-book sizing.
    #[must_use]
    pub fn best_ask_level(&self) -> Option<(Decimal, Decimal)> {
        self.asks.first().copied()
    }

    /// Bid-ask spread, if both sides have liquidity.
    #[must_use]
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Mid price, if both sides have liquidity.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Returns true if either side has at least one level.
    #[must_use]
    pub fn has_liquidity(&self) -> bool {
        !self.bids.is_empty() || !self.asks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_book() -> OrderBook {
        OrderBook::new(
            vec![(dec!(0.47), dec!(200)), (dec!(0.48), dec!(100))],
            vec![(dec!(0.51), dec!(250)), (dec!(0.50), dec!(150))],
        )
    }

    #[test]
    fn test_book_sorts_bids_descending_asks_ascending() {
        let book = sample_book();
        assert_eq!(book.bids[0].0, dec!(0.48));
        assert_eq!(book.bids[1].0, dec!(0.47));
        assert_eq!(book.asks[0].0, dec!(0.50));
        assert_eq!(book.asks[1].0, dec!(0.51));
    }

    #[test]
    fn test_book_drops_non_positive_entries() {
        let book = OrderBook::new(
            vec![
                (dec!(0.48), Decimal::ZERO),
                (dec!(-0.10), dec!(100)),
                (dec!(0.47), dec!(100)),
            ],
            vec![(Decimal::ZERO, dec!(50)), (dec!(0.52), dec!(-5))],
        );
        assert_eq!(book.bids.len(), 1);
        assert!(book.asks.is_empty());
    }

    #[test]
    fn test_book_derived_prices() {
        let book = sample_book();
        assert_eq!(book.best_bid(), Some(dec!(0.48)));
        assert_eq!(book.best_ask(), Some(dec!(0.50)));
        assert_eq!(book.best_ask_level(), Some((dec!(0.50), dec!(150))));
        assert_eq!(book.spread(), Some(dec!(0.02)));
        assert_eq!(book.mid_price(), Some(dec!(0.49)));
    }

    #[test]
    fn test_book_one_sided_derived_none() {
        let bids_only = OrderBook::new(vec![(dec!(0.48), dec!(100))], vec![]);
        assert_eq!(bids_only.best_ask(), None);
        assert_eq!(bids_only.spread(), None);
        assert_eq!(bids_only.mid_price(), None);
        assert!(bids_only.has_liquidity());

        let empty = OrderBook::empty();
        assert!(!empty.has_liquidity());
        assert_eq!(empty.best_bid(), None);
    }

    #[test]
    fn test_order_remaining_and_active() {
        let mut order = Order::new("o-1", Side::Up, dec!(0.48), dec!(10), OrderStatus::Open, "tok");
        assert_eq!(order.remaining(), dec!(10));
        assert!(order.is_active());

        order.filled_qty = dec!(4);
        order.status = OrderStatus::PartiallyFilled;
        assert_eq!(order.remaining(), dec!(6));
        assert!(order.is_active());

        order.mark_filled(dec!(0.47));
        assert_eq!(order.remaining(), Decimal::ZERO);
        assert!(!order.is_active());
        assert_eq!(order.filled_avg_price, dec!(0.47));
    }

    #[test]
    fn test_status_terminal_and_active_partition() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Open,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ] {
            let active = matches!(status, OrderStatus::Open | OrderStatus::PartiallyFilled);
            assert_eq!(status.is_active(), active);
            let terminal = matches!(
                status,
                OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
            );
            assert_eq!(status.is_terminal(), terminal);
        }
    }

    #[test]
    fn test_side_parsing_and_aliases() {
        assert_eq!("UP".parse::<Side>().unwrap(), Side::Up);
        assert_eq!("yes".parse::<Side>().unwrap(), Side::Up);
        assert_eq!("no".parse::<Side>().unwrap(), Side::Down);
        assert!("MAYBE".parse::<Side>().is_err());

        let up: Side = serde_json::from_str("\"YES\"").unwrap();
        assert_eq!(up, Side::Up);
        assert_eq!(serde_json::to_string(&Side::Down).unwrap(), "\"DOWN\"");
    }

    #[test]
    fn test_tif_parsing() {
        assert_eq!("fok".parse::<TimeInForce>().unwrap(), TimeInForce::Fok);
        assert_eq!("GTD".parse::<TimeInForce>().unwrap(), TimeInForce::Gtd);
        assert!(TimeInForce::Gtc.rests());
        assert!(!TimeInForce::Fok.rests());
    }
}
