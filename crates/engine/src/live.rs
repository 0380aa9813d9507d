//! Live engine: real money via the external signed venue client.
//!
//! This engine owns local order bookkeeping and fill detection; signing and
//! transport belong to the [`VenueClient`] implementation supplied by the
//! embedding application. Venue responses are normalized through
//! [`crate::normalize`] so shape drift across client versions stays out of
//! the engine logic.

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::manager::{
    validate_limit, BatchLeg, FillCallback, OrderError, OrderManager,
};
use crate::normalize::{
    book_from_value, extract_avg_fill_price, extract_filled_size, extract_order_id, extract_status,
};
use crate::types::{Order, OrderBook, OrderStatus, Side, TimeInForce};
use crate::venue::{VenueClient, VenueOrderRequest};
use async_trait::async_trait;

struct LiveState {
    orders: HashMap<String, Order>,
    /// Order ids whose fill callback has already fired. Fill notification is
    /// exactly-once even when polling and explicit refresh race.
    notified: HashSet<String>,
}

/// Order manager that delegates placement to a signed venue client.
pub struct LiveOrderManager<C: VenueClient> {
    client: C,
    up_token_id: String,
    down_token_id: String,
    state: Mutex<LiveState>,
    fill_cb: RwLock<Option<FillCallback>>,
}

impl<C: VenueClient> LiveOrderManager<C> {
    /// Creates a live engine for one market's token pair.
    #[must_use]
    pub fn new(
        client: C,
        up_token_id: impl Into<String>,
        down_token_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            up_token_id: up_token_id.into(),
            down_token_id: down_token_id.into(),
            state: Mutex::new(LiveState {
                orders: HashMap::new(),
                notified: HashSet::new(),
            }),
            fill_cb: RwLock::new(None),
        }
    }

    fn token_for(&self, side: Side) -> &str {
        match side {
            Side::Up => &self.up_token_id,
            Side::Down => &self.down_token_id,
        }
    }

    /// Registers an order from a raw placement response. The venue's id is
    /// used when present; otherwise a local id keeps bookkeeping coherent.
    fn register_order(
        &self,
        response: &serde_json::Value,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Order {
        let id = extract_order_id(response).unwrap_or_else(|| format!("live-{}", Uuid::new_v4()));
        let status = extract_status(response).unwrap_or(OrderStatus::Open);
        let mut order = Order::new(&id, side, price, size, status, self.token_for(side));
        if status == OrderStatus::Filled {
            order.filled_qty = size;
            let avg = extract_avg_fill_price(response);
            order.filled_avg_price = if avg > Decimal::ZERO { avg } else { price };
        }
        info!(order_id = %id, side = %side, price = %price, size = %size, status = %status, "Live order placed");

        let mut state = self.state.lock();
        state.orders.insert(id, order.clone());
        order
    }

    /// Applies a venue view of one order to the local table. Returns the
    /// fill notification if this call newly observed the FILLED transition.
    fn apply_venue_view(
        &self,
        order_id: &str,
        view: &serde_json::Value,
    ) -> Option<(Order, Option<(Side, Decimal, Decimal)>)> {
        let mut state = self.state.lock();
        let order = state.orders.get_mut(order_id)?;

        if let Some(status) = extract_status(view) {
            order.status = status;
        }
        let filled = extract_filled_size(view);
        if filled > Decimal::ZERO {
            order.filled_qty = filled.min(order.size);
        }
        let avg = extract_avg_fill_price(view);
        if avg > Decimal::ZERO {
            order.filled_avg_price = avg;
        }
        if order.status == OrderStatus::Filled && order.filled_qty.is_zero() {
            order.filled_qty = order.size;
        }
        if order.status == OrderStatus::Filled && order.filled_avg_price.is_zero() {
            order.filled_avg_price = order.price;
        }

        let snapshot = order.clone();
        let fill = if snapshot.status == OrderStatus::Filled
            && state.notified.insert(order_id.to_string())
        {
            Some((
                snapshot.side,
                snapshot.filled_avg_price,
                snapshot.filled_qty,
            ))
        } else {
            None
        };
        Some((snapshot, fill))
    }

    async fn notify(&self, fill: Option<(Side, Decimal, Decimal)>) {
        let Some((side, price, qty)) = fill else {
            return;
        };
        let cb = self.fill_cb.read().clone();
        if let Some(cb) = cb {
            cb(side, price, qty).await;
        }
    }

    /// One fill-detection sweep: queries the venue for every active order
    /// and fires callbacks for newly observed fills. Returns the number of
    /// new fills.
    pub async fn poll_fills_once(&self) -> usize {
        let active_ids: Vec<String> = {
            let state = self.state.lock();
            state
                .orders
                .values()
                .filter(|o| o.is_active())
                .map(|o| o.id.clone())
                .collect()
        };

        let mut fills = 0;
        for id in active_ids {
            let view = match self.client.get_order(&id).await {
                Ok(view) => view,
                Err(e) => {
                    debug!(order_id = %id, error = %e, "Order status query failed");
                    continue;
                }
            };
            if let Some((_, Some(fill))) = self.apply_venue_view(&id, &view) {
                info!(order_id = %id, side = %fill.0, price = %fill.1, qty = %fill.2, "Live fill detected");
                self.notify(Some(fill)).await;
                fills += 1;
            }
        }
        fills
    }

    /// Runs fill-detection sweeps forever at the given interval. Intended to
    /// be spawned alongside the trading loop.
    pub async fn poll_fills(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.poll_fills_once().await;
        }
    }
}

#[async_trait]
impl<C: VenueClient> OrderManager for LiveOrderManager<C> {
    async fn place_limit_buy(
        &self,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<Order, OrderError> {
        validate_limit(price, size)?;
        let request = VenueOrderRequest {
            token_id: self.token_for(side).to_string(),
            side,
            price,
            size,
            tif: TimeInForce::Gtc,
        };
        let response = self.client.post_order(&request).await?;
        let order = self.register_order(&response, side, price, size);
        if order.status == OrderStatus::Filled {
            let fill = {
                let mut state = self.state.lock();
                state
                    .notified
                    .insert(order.id.clone())
                    .then(|| (order.side, order.filled_avg_price, order.filled_qty))
            };
            self.notify(fill).await;
        }
        Ok(order)
    }

    async fn place_batch_buy(
        &self,
        legs: &[BatchLeg],
        tif: TimeInForce,
    ) -> Result<Vec<Order>, OrderError> {
        for leg in legs {
            validate_limit(leg.price, leg.size)?;
        }
        let requests: Vec<VenueOrderRequest> = legs
            .iter()
            .map(|leg| VenueOrderRequest {
                token_id: self.token_for(leg.side).to_string(),
                side: leg.side,
                price: leg.price,
                size: leg.size,
                tif,
            })
            .collect();

        // One signed request carries every leg; the venue evaluates them
        // against the same book instant.
        let responses = self.client.post_orders(&requests).await?;

        let mut orders = Vec::with_capacity(legs.len());
        let mut fills = Vec::new();
        for (leg, response) in legs.iter().zip(responses.iter()) {
            let order = self.register_order(response, leg.side, leg.price, leg.size);
            if order.status == OrderStatus::Filled {
                let newly = {
                    let mut state = self.state.lock();
                    state.notified.insert(order.id.clone())
                };
                if newly {
                    fills.push((order.side, order.filled_avg_price, order.filled_qty));
                }
            }
            orders.push(order);
        }
        if responses.len() != legs.len() {
            warn!(
                expected = legs.len(),
                got = responses.len(),
                "Batch placement response count mismatch"
            );
        }
        for fill in fills {
            self.notify(Some(fill)).await;
        }
        Ok(orders)
    }

    async fn cancel_order(&self, order_id: &str) -> bool {
        let known_active = {
            let state = self.state.lock();
            state
                .orders
                .get(order_id)
                .map_or(false, |order| order.is_active())
        };
        if !known_active {
            return false;
        }

        match self.client.cancel(order_id).await {
            Ok(()) => {
                let mut state = self.state.lock();
                if let Some(order) = state.orders.get_mut(order_id) {
                    order.status = OrderStatus::Cancelled;
                }
                info!(order_id = %order_id, "Live order cancelled");
                true
            }
            Err(e) => {
                // Best effort; the order may have filled in flight. Polling
                // will pick up the true state.
                warn!(order_id = %order_id, error = %e, "Venue cancel failed");
                false
            }
        }
    }

    async fn cancel_all_orders(&self) -> usize {
        let active_ids: Vec<String> = {
            let state = self.state.lock();
            state
                .orders
                .values()
                .filter(|o| o.is_active())
                .map(|o| o.id.clone())
                .collect()
        };

        let mut cancelled = 0;
        for id in active_ids {
            if self.cancel_order(&id).await {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(count = cancelled, "Cancelled all live orders");
        }
        cancelled
    }

    async fn market_buy(&self, side: Side, size: Decimal) -> Result<Order, OrderError> {
        if size <= Decimal::ZERO {
            return Err(OrderError::InvalidSize(size));
        }
        let book = self.get_order_book(side).await;
        let Some(ask) = book.best_ask() else {
            return Err(OrderError::NoLiquidity(side));
        };
        // A marketable limit at the ask; FAK so nothing rests.
        let request = VenueOrderRequest {
            token_id: self.token_for(side).to_string(),
            side,
            price: ask,
            size,
            tif: TimeInForce::Fak,
        };
        let response = self.client.post_order(&request).await?;
        let order = self.register_order(&response, side, ask, size);
        if order.status == OrderStatus::Filled {
            let fill = {
                let mut state = self.state.lock();
                state
                    .notified
                    .insert(order.id.clone())
                    .then(|| (order.side, order.filled_avg_price, order.filled_qty))
            };
            self.notify(fill).await;
        }
        Ok(order)
    }

    async fn get_order_book(&self, side: Side) -> OrderBook {
        let token = self.token_for(side).to_string();
        match self.client.get_order_books(&[token]).await {
            Ok(payloads) => payloads.first().map(book_from_value).unwrap_or_default(),
            Err(e) => {
                debug!(side = %side, error = %e, "Book fetch failed, returning empty book");
                OrderBook::empty()
            }
        }
    }

    async fn get_book_pair(&self) -> (OrderBook, OrderBook) {
        let tokens = [self.up_token_id.clone(), self.down_token_id.clone()];
        match self.client.get_order_books(&tokens).await {
            Ok(payloads) => {
                let up = payloads.first().map(book_from_value).unwrap_or_default();
                let down = payloads.get(1).map(book_from_value).unwrap_or_default();
                (up, down)
            }
            Err(e) => {
                debug!(error = %e, "Book pair fetch failed, returning empty books");
                (OrderBook::empty(), OrderBook::empty())
            }
        }
    }

    async fn refresh_order_status(&self, order_id: &str) -> Option<Order> {
        let known = {
            let state = self.state.lock();
            state.orders.contains_key(order_id)
        };
        if !known {
            return None;
        }

        match self.client.get_order(order_id).await {
            Ok(view) => {
                let (snapshot, fill) = self.apply_venue_view(order_id, &view)?;
                self.notify(fill).await;
                Some(snapshot)
            }
            Err(e) => {
                debug!(order_id = %order_id, error = %e, "Order refresh failed, returning local view");
                let state = self.state.lock();
                state.orders.get(order_id).cloned()
            }
        }
    }

    fn set_fill_callback(&self, callback: FillCallback) {
        *self.fill_cb.write() = Some(callback);
    }

    fn open_orders(&self, side: Option<Side>) -> Vec<Order> {
        let state = self.state.lock();
        state
            .orders
            .values()
            .filter(|o| o.is_active() && side.map_or(true, |s| o.side == s))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::venue::VenueError;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Scripted venue client: pops queued responses in order.
    #[derive(Default)]
    struct MockVenue {
        post_responses: Mutex<VecDeque<Result<Value, VenueError>>>,
        order_views: Mutex<VecDeque<Result<Value, VenueError>>>,
        cancel_results: Mutex<VecDeque<Result<(), VenueError>>>,
        books: Mutex<VecDeque<Result<Vec<Value>, VenueError>>>,
    }

    impl MockVenue {
        fn queue_post(&self, response: Result<Value, VenueError>) {
            self.post_responses.lock().push_back(response);
        }
        fn queue_view(&self, view: Result<Value, VenueError>) {
            self.order_views.lock().push_back(view);
        }
        fn queue_cancel(&self, result: Result<(), VenueError>) {
            self.cancel_results.lock().push_back(result);
        }
        fn queue_books(&self, books: Result<Vec<Value>, VenueError>) {
            self.books.lock().push_back(books);
        }
    }

    #[async_trait]
    impl VenueClient for MockVenue {
        async fn post_order(&self, _request: &VenueOrderRequest) -> Result<Value, VenueError> {
            self.post_responses
                .lock()
                .pop_front()
                .unwrap_or(Err(VenueError::Transport("no scripted response".into())))
        }

        async fn post_orders(
            &self,
            requests: &[VenueOrderRequest],
        ) -> Result<Vec<Value>, VenueError> {
            let mut out = Vec::with_capacity(requests.len());
            for _ in requests {
                out.push(self.post_order(&requests[0]).await?);
            }
            Ok(out)
        }

        async fn cancel(&self, _order_id: &str) -> Result<(), VenueError> {
            self.cancel_results.lock().pop_front().unwrap_or(Ok(()))
        }

        async fn get_order(&self, _order_id: &str) -> Result<Value, VenueError> {
            self.order_views
                .lock()
                .pop_front()
                .unwrap_or(Err(VenueError::Transport("no scripted view".into())))
        }

        async fn get_order_books(&self, _token_ids: &[String]) -> Result<Vec<Value>, VenueError> {
            self.books
                .lock()
                .pop_front()
                .unwrap_or(Err(VenueError::Transport("no scripted books".into())))
        }
    }

    fn live(venue: MockVenue) -> LiveOrderManager<MockVenue> {
        LiveOrderManager::new(venue, "tok-up", "tok-down")
    }

    #[tokio::test]
    async fn test_place_limit_buy_uses_venue_id() {
        let venue = MockVenue::default();
        venue.queue_post(Ok(json!({"orderID": "v-123", "status": "live"})));
        let mgr = live(venue);

        let order = mgr
            .place_limit_buy(Side::Up, dec!(0.47), dec!(10))
            .await
            .unwrap();
        assert_eq!(order.id, "v-123");
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(mgr.open_orders(None).len(), 1);
    }

    #[tokio::test]
    async fn test_place_limit_buy_generates_local_id_when_missing() {
        let venue = MockVenue::default();
        venue.queue_post(Ok(json!({"status": "live"})));
        let mgr = live(venue);

        let order = mgr
            .place_limit_buy(Side::Up, dec!(0.47), dec!(10))
            .await
            .unwrap();
        assert!(order.id.starts_with("live-"));
    }

    #[tokio::test]
    async fn test_place_limit_buy_propagates_venue_error() {
        let venue = MockVenue::default();
        venue.queue_post(Err(VenueError::Rejected("insufficient balance".into())));
        let mgr = live(venue);

        let result = mgr.place_limit_buy(Side::Up, dec!(0.47), dec!(10)).await;
        assert!(matches!(result, Err(OrderError::Venue(_))));
        assert!(mgr.open_orders(None).is_empty());
    }

    #[tokio::test]
    async fn test_immediate_fill_fires_callback_once() {
        let venue = MockVenue::default();
        venue.queue_post(Ok(json!({
            "orderId": "v-9",
            "status": "matched",
            "matchedSize": "10",
            "avgFillPrice": "0.46"
        })));
        // A later poll sees the same filled state; no second callback.
        venue.queue_view(Ok(json!({"status": "matched", "matched_size": "10"})));
        let mgr = live(venue);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = Arc::clone(&calls);
        mgr.set_fill_callback(Arc::new(move |_, price, qty| {
            let calls = Arc::clone(&calls_cb);
            Box::pin(async move {
                assert_eq!(price, dec!(0.46));
                assert_eq!(qty, dec!(10));
                calls.fetch_add(1, Ordering::SeqCst);
            })
        }));

        let order = mgr
            .place_limit_buy(Side::Up, dec!(0.47), dec!(10))
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_avg_price, dec!(0.46));

        mgr.refresh_order_status("v-9").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_fills_once_detects_new_fill() {
        let venue = MockVenue::default();
        venue.queue_post(Ok(json!({"order_id": "v-1", "status": "open"})));
        venue.queue_view(Ok(json!({
            "status": "filled",
            "filled_size": "10",
            "avg_fill_price": "0.47"
        })));
        let mgr = live(venue);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = Arc::clone(&calls);
        mgr.set_fill_callback(Arc::new(move |_, _, _| {
            let calls = Arc::clone(&calls_cb);
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        }));

        mgr.place_limit_buy(Side::Up, dec!(0.47), dec!(10))
            .await
            .unwrap();
        assert_eq!(mgr.poll_fills_once().await, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Terminal order is skipped on the next sweep.
        assert_eq!(mgr.poll_fills_once().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_returns_false_on_venue_error() {
        let venue = MockVenue::default();
        venue.queue_post(Ok(json!({"id": "v-2", "status": "open"})));
        venue.queue_cancel(Err(VenueError::Transport("timeout".into())));
        let mgr = live(venue);

        mgr.place_limit_buy(Side::Up, dec!(0.47), dec!(10))
            .await
            .unwrap();
        assert!(!mgr.cancel_order("v-2").await);
        // Local state is untouched; the order stays active for polling.
        assert_eq!(mgr.open_orders(None).len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_unknown_returns_false_without_venue_call() {
        let venue = MockVenue::default();
        let mgr = live(venue);
        assert!(!mgr.cancel_order("never-placed").await);
    }

    #[tokio::test]
    async fn test_cancel_all_counts_then_zero() {
        let venue = MockVenue::default();
        venue.queue_post(Ok(json!({"id": "v-a", "status": "open"})));
        venue.queue_post(Ok(json!({"id": "v-b", "status": "open"})));
        let mgr = live(venue);

        mgr.place_limit_buy(Side::Up, dec!(0.40), dec!(10))
            .await
            .unwrap();
        mgr.place_limit_buy(Side::Down, dec!(0.40), dec!(10))
            .await
            .unwrap();

        assert_eq!(mgr.cancel_all_orders().await, 2);
        assert_eq!(mgr.cancel_all_orders().await, 0);
    }

    #[tokio::test]
    async fn test_market_buy_no_liquidity() {
        let venue = MockVenue::default();
        venue.queue_books(Ok(vec![json!({"bids": [], "asks": []})]));
        let mgr = live(venue);

        let result = mgr.market_buy(Side::Up, dec!(5)).await;
        assert!(matches!(result, Err(OrderError::NoLiquidity(Side::Up))));
    }

    #[tokio::test]
    async fn test_market_buy_places_marketable_limit_at_ask() {
        let venue = MockVenue::default();
        venue.queue_books(Ok(vec![json!({
            "bids": [],
            "asks": [{"price": "0.53", "size": "40"}]
        })]));
        venue.queue_post(Ok(json!({
            "id": "v-m",
            "status": "matched",
            "filledSize": "5"
        })));
        let mgr = live(venue);

        let order = mgr.market_buy(Side::Up, dec!(5)).await.unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.price, dec!(0.53));
        // No avg price in the response; falls back to the submitted price.
        assert_eq!(order.filled_avg_price, dec!(0.53));
    }

    #[tokio::test]
    async fn test_get_book_pair_single_request() {
        let venue = MockVenue::default();
        venue.queue_books(Ok(vec![
            json!({"bids": [], "asks": [{"price": "0.47", "size": "10"}]}),
            json!({"bids": [], "asks": [{"price": "0.49", "size": "8"}]}),
        ]));
        let mgr = live(venue);

        let (up, down) = mgr.get_book_pair().await;
        assert_eq!(up.best_ask(), Some(dec!(0.47)));
        assert_eq!(down.best_ask(), Some(dec!(0.49)));
    }

    #[tokio::test]
    async fn test_get_order_book_error_degrades_to_empty() {
        let venue = MockVenue::default();
        venue.queue_books(Err(VenueError::Transport("down".into())));
        let mgr = live(venue);

        let book = mgr.get_order_book(Side::Up).await;
        assert!(!book.has_liquidity());
    }

    #[tokio::test]
    async fn test_refresh_falls_back_to_local_view_on_error() {
        let venue = MockVenue::default();
        venue.queue_post(Ok(json!({"id": "v-3", "status": "open"})));
        venue.queue_view(Err(VenueError::Transport("down".into())));
        let mgr = live(venue);

        mgr.place_limit_buy(Side::Up, dec!(0.47), dec!(10))
            .await
            .unwrap();
        let order = mgr.refresh_order_status("v-3").await.unwrap();
        assert_eq!(order.status, OrderStatus::Open);
        assert!(mgr.refresh_order_status("unknown").await.is_none());
    }
}
