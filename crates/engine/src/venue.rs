//! Interface to the external signed venue client.
//!
//! Signing, authentication, and HTTP transport to the venue's private
//! endpoints live outside this crate. The live engine only requires the
//! [`VenueClient`] capability surface below; payloads are raw JSON because
//! the client's response shapes have varied across versions and are
//! normalized in [`crate::normalize`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::types::{Side, TimeInForce};

/// Errors from the external venue client.
#[derive(Error, Debug)]
pub enum VenueError {
    /// Transport-level failure (connection, timeout, TLS).
    #[error("venue transport error: {0}")]
    Transport(String),

    /// The venue accepted the request but rejected its content.
    #[error("venue rejected request: {0}")]
    Rejected(String),
}

/// Parameters for one signed order submission.
#[derive(Debug, Clone, Serialize)]
pub struct VenueOrderRequest {
    /// Token identifier of the leg being bought.
    pub token_id: String,
    /// Outcome leg (informational; the token id is authoritative).
    pub side: Side,
    /// Limit price.
    pub price: Decimal,
    /// Size in shares.
    pub size: Decimal,
    /// Placement policy.
    pub tif: TimeInForce,
}

/// Capability surface of the external exchange client.
///
/// Responses are raw JSON values: field names for order ids, statuses and
/// fill quantities are not contractually fixed across client versions.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Submits one signed order.
    async fn post_order(&self, request: &VenueOrderRequest) -> Result<Value, VenueError>;

    /// Submits a batch of signed orders in a single request. The response
    /// vector is positionally aligned with the request slice.
    async fn post_orders(&self, requests: &[VenueOrderRequest]) -> Result<Vec<Value>, VenueError>;

    /// Cancels one order by id.
    async fn cancel(&self, order_id: &str) -> Result<(), VenueError>;

    /// Fetches the venue's view of one order.
    async fn get_order(&self, order_id: &str) -> Result<Value, VenueError>;

    /// Fetches several books in one request, positionally aligned with
    /// `token_ids`.
    async fn get_order_books(&self, token_ids: &[String]) -> Result<Vec<Value>, VenueError>;
}
