//! Public order-book client for the venue's unauthenticated CLOB endpoint.
//!
//! Book reads need no signing, so the paper engine talks to the venue
//! directly through this client. Requests are rate limited client-side to
//! stay under the venue's published ceiling, and every failure degrades to
//! `None` so callers fall back to cached or default books instead of
//! propagating transport errors into the trading loop.

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::normalize::parse_decimal;
use crate::types::OrderBook;

const DEFAULT_BASE_URL: &str = "https://clob.polymarket.com";

/// Raw book payload as served by the CLOB `/book` endpoint.
#[derive(Debug, Deserialize)]
struct RawBook {
    #[serde(default)]
    bids: Vec<RawLevel>,
    #[serde(default)]
    asks: Vec<RawLevel>,
}

/// One price level; the venue encodes decimals as strings.
#[derive(Debug, Deserialize)]
struct RawLevel {
    price: serde_json::Value,
    size: serde_json::Value,
}

/// Rate-limited HTTP client for public book snapshots.
pub struct BookClient {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl BookClient {
    /// Creates a client against the production CLOB host.
    #[must_use]
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a client against an explicit host. Used by tests and by
    /// deployments pointed at a gateway.
    #[must_use]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url: base_url.into(),
            // Public endpoint ceiling is 100 req/10s; stay well under it.
            limiter: RateLimiter::direct(Quota::per_minute(nonzero!(300u32))),
        }
    }

    /// Fetches one book snapshot.
    ///
    /// Returns `None` on any transport, HTTP, or decode failure; callers
    /// degrade to cached or default books.
    pub async fn fetch_book(&self, token_id: &str) -> Option<OrderBook> {
        self.limiter.until_ready().await;

        let url = format!("{}/book", self.base_url);
        let response = match self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!(token_id = %token_id, error = %e, "Book fetch failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(token_id = %token_id, status = %response.status(), "Book fetch returned error status");
            return None;
        }

        let raw: RawBook = match response.json().await {
            Ok(raw) => raw,
            Err(e) => {
                debug!(token_id = %token_id, error = %e, "Book payload decode failed");
                return None;
            }
        };

        Some(book_from_raw(raw))
    }

    /// Fetches both legs' books concurrently, as one snapshot epoch.
    pub async fn fetch_pair(
        &self,
        up_token_id: &str,
        down_token_id: &str,
    ) -> (Option<OrderBook>, Option<OrderBook>) {
        tokio::join!(
            self.fetch_book(up_token_id),
            self.fetch_book(down_token_id)
        )
    }
}

impl Default for BookClient {
    fn default() -> Self {
        Self::new()
    }
}

fn book_from_raw(raw: RawBook) -> OrderBook {
    let parse_side = |levels: Vec<RawLevel>| {
        levels
            .into_iter()
            .filter_map(|level| {
                let price = parse_decimal(&level.price)?;
                let size = parse_decimal(&level.size)?;
                Some((price, size))
            })
            .collect::<Vec<_>>()
    };
    OrderBook::new(parse_side(raw.bids), parse_side(raw.asks))
}
