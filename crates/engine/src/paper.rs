//! Paper-trading engine: real quotes, simulated fills.
//!
//! Orders never reach the venue. Fill decisions are made against live book
//! snapshots fetched through [`BookClient`], cached for a short TTL so both
//! legs of a dual-leg entry are judged against the same instant. When the
//! book feed is unavailable the engine degrades to a fixed default book so
//! a session can keep running offline.

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::BookClient;
use crate::manager::{
    validate_limit, BatchLeg, FillCallback, OrderError, OrderManager,
};
use crate::types::{Order, OrderBook, OrderStatus, Side, TimeInForce};
use async_trait::async_trait;

/// Price used for market buys when not even the default book has an ask.
const MARKET_FALLBACK_PRICE: Decimal = dec!(0.55);

/// Book cache lifetime; both legs of a pair share one refresh epoch.
const DEFAULT_CACHE_TTL: Duration = Duration::from_millis(500);

/// Fill policy for simulated orders.
#[derive(Debug, Clone, Copy)]
pub enum FillMode {
    /// Fill immediately when the limit price crosses the live ask; rest
    /// otherwise. The default, and the only mode meaningful for arbitrage
    /// rehearsal.
    Realistic,
    /// Fill resting orders at their limit price with the given probability
    /// after a random delay. Useful for exercising fill plumbing without
    /// market movement.
    Random {
        /// Per-check fill probability in [0, 1].
        probability: f64,
        /// Minimum spawn-to-fill delay.
        min_delay: Duration,
        /// Maximum spawn-to-fill delay.
        max_delay: Duration,
    },
}

impl Default for FillMode {
    fn default() -> Self {
        FillMode::Realistic
    }
}

/// Mutable simulator state, guarded by one mutex.
struct PaperState {
    orders: HashMap<String, Order>,
    book_up: OrderBook,
    book_down: OrderBook,
    cached_at: Option<Instant>,
}

struct PaperInner {
    client: BookClient,
    up_token_id: String,
    down_token_id: String,
    mode: FillMode,
    cache_ttl: Duration,
    state: Mutex<PaperState>,
    fill_cb: RwLock<Option<FillCallback>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Simulated order manager backed by live public quotes.
///
/// Cloning shares the same simulator state. Dropping the last handle aborts
/// any outstanding delayed-fill tasks.
#[derive(Clone)]
pub struct PaperOrderManager {
    inner: Arc<PaperInner>,
}

/// Builder for [`PaperOrderManager`].
pub struct PaperBuilder {
    client: BookClient,
    up_token_id: String,
    down_token_id: String,
    mode: FillMode,
    cache_ttl: Duration,
}

impl PaperBuilder {
    /// Overrides the fill mode.
    #[must_use]
    pub fn fill_mode(mut self, mode: FillMode) -> Self {
        self.mode = mode;
        self
    }

    /// Overrides the book cache TTL (tests use zero to force refetches).
    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn build(self) -> PaperOrderManager {
        PaperOrderManager {
            inner: Arc::new(PaperInner {
                client: self.client,
                up_token_id: self.up_token_id,
                down_token_id: self.down_token_id,
                mode: self.mode,
                cache_ttl: self.cache_ttl,
                state: Mutex::new(PaperState {
                    orders: HashMap::new(),
                    book_up: default_book(),
                    book_down: default_book(),
                    cached_at: None,
                }),
                fill_cb: RwLock::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl PaperOrderManager {
    /// Creates a paper engine for one market's token pair with default
    /// fill mode and cache TTL.
    #[must_use]
    pub fn new(
        client: BookClient,
        up_token_id: impl Into<String>,
        down_token_id: impl Into<String>,
    ) -> Self {
        Self::builder(client, up_token_id, down_token_id).build()
    }

    /// Starts a builder for non-default fill mode or cache TTL.
    #[must_use]
    pub fn builder(
        client: BookClient,
        up_token_id: impl Into<String>,
        down_token_id: impl Into<String>,
    ) -> PaperBuilder {
        PaperBuilder {
            client,
            up_token_id: up_token_id.into(),
            down_token_id: down_token_id.into(),
            mode: FillMode::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Re-evaluates every resting order against current conditions; returns
    /// the number of fills produced.
    ///
    /// Realistic mode fills orders whose limit now crosses the refreshed
    /// ask. Random mode fills each resting order with the configured
    /// probability at its own limit price.
    pub async fn check_pending_fills(&self) -> usize {
        let mut fills = Vec::new();
        match self.inner.mode {
            FillMode::Realistic => {
                self.inner.refresh_books(false).await;
                let mut state = self.inner.state.lock();
                let ask_up = state.book_up.best_ask();
                let ask_down = state.book_down.best_ask();
                for order in state.orders.values_mut().filter(|o| o.is_active()) {
                    let ask = match order.side {
                        Side::Up => ask_up,
                        Side::Down => ask_down,
                    };
                    let Some(ask) = ask else { continue };
                    if order.price >= ask {
                        let qty = order.remaining();
                        order.mark_filled(ask);
                        fills.push((order.side, ask, qty));
                        info!(order_id = %order.id, price = %ask, "Paper order filled on ask crossing");
                    }
                }
            }
            FillMode::Random { probability, .. } => {
                let mut rng = StdRng::from_entropy();
                let mut state = self.inner.state.lock();
                for order in state.orders.values_mut().filter(|o| o.is_active()) {
                    if rng.gen::<f64>() >= probability {
                        continue;
                    }
                    let qty = order.remaining();
                    order.mark_filled(order.price);
                    fills.push((order.side, order.price, qty));
                    info!(order_id = %order.id, price = %order.price, "Paper order filled (random mode)");
                }
            }
        }
        let count = fills.len();
        self.inner.notify_fills(fills).await;
        count
    }

    /// Forces an active order into FILLED at the given price (or its limit
    /// price). Diagnostic hook; returns false for unknown/terminal orders.
    pub async fn simulate_fill(&self, order_id: &str, price: Option<Decimal>) -> bool {
        let fill = {
            let mut state = self.inner.state.lock();
            match state.orders.get_mut(order_id) {
                Some(order) if order.is_active() => {
                    let fill_price = price.unwrap_or(order.price);
                    let qty = order.remaining();
                    order.mark_filled(fill_price);
                    Some((order.side, fill_price, qty))
                }
                _ => None,
            }
        };
        match fill {
            Some(f) => {
                self.inner.notify_fills(vec![f]).await;
                true
            }
            None => false,
        }
    }
}

impl PaperInner {
    /// Ensures the cached book pair is within TTL, refreshing both legs in
    /// one epoch when stale. `force` ignores the TTL.
    async fn refresh_books(&self, force: bool) {
        let stale = {
            let state = self.state.lock();
            force
                || state
                    .cached_at
                    .map_or(true, |at| at.elapsed() > self.cache_ttl)
        };
        if !stale {
            return;
        }

        let (up, down) = self
            .client
            .fetch_pair(&self.up_token_id, &self.down_token_id)
            .await;
        if up.is_none() || down.is_none() {
            debug!("Book refresh incomplete, falling back to default levels");
        }

        let mut state = self.state.lock();
        state.book_up = up.unwrap_or_else(default_book);
        state.book_down = down.unwrap_or_else(default_book);
        state.cached_at = Some(Instant::now());
    }

    fn token_for(&self, side: Side) -> &str {
        match side {
            Side::Up => &self.up_token_id,
            Side::Down => &self.down_token_id,
        }
    }

    fn book_for(state: &PaperState, side: Side) -> &OrderBook {
        match side {
            Side::Up => &state.book_up,
            Side::Down => &state.book_down,
        }
    }

    /// Awaits the fill callback for each notification, outside any lock.
    async fn notify_fills(&self, fills: Vec<(Side, Decimal, Decimal)>) {
        if fills.is_empty() {
            return;
        }
        let cb = self.fill_cb.read().clone();
        if let Some(cb) = cb {
            for (side, price, qty) in fills {
                cb(side, price, qty).await;
            }
        }
    }

    /// Spawns the delayed-fill task for a resting order under random mode.
    /// The task holds a weak handle so it dies with the engine.
    fn spawn_random_fill(self: &Arc<Self>, order_id: String) {
        let FillMode::Random {
            probability,
            min_delay,
            max_delay,
        } = self.mode
        else {
            return;
        };

        let mut rng = StdRng::from_entropy();
        let will_fill = rng.gen::<f64>() < probability;
        let delay = if max_delay > min_delay {
            min_delay + rng.gen_range(Duration::ZERO..max_delay - min_delay)
        } else {
            min_delay
        };

        let weak: Weak<PaperInner> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !will_fill {
                return;
            }
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let fill = {
                let mut state = inner.state.lock();
                match state.orders.get_mut(&order_id) {
                    Some(order) if order.is_active() => {
                        let qty = order.remaining();
                        order.mark_filled(order.price);
                        info!(order_id = %order_id, price = %order.price, "Paper order filled (random mode)");
                        Some((order.side, order.price, qty))
                    }
                    _ => None,
                }
            };
            if let Some(f) = fill {
                inner.notify_fills(vec![f]).await;
            }
        });
        self.tasks.lock().push(handle);
    }
}

impl Drop for PaperInner {
    fn drop(&mut self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }
}

/// Fixed fallback book used when the quote feed is unavailable.
fn default_book() -> OrderBook {
    OrderBook::new(vec![(dec!(0.50), dec!(100))], vec![(dec!(0.52), dec!(100))])
}

fn paper_order_id() -> String {
    format!("paper-{}", Uuid::new_v4())
}

#[async_trait]
impl OrderManager for PaperOrderManager {
    async fn place_limit_buy(
        &self,
        side: Side,
        price: Decimal,
        size: Decimal,
    ) -> Result<Order, OrderError> {
        validate_limit(price, size)?;
        self.inner.refresh_books(false).await;

        let id = paper_order_id();
        let token_id = self.inner.token_for(side).to_string();
        let mut fills = Vec::new();
        let order = {
            let mut state = self.inner.state.lock();
            let best_ask = PaperInner::book_for(&state, side).best_ask();
            let mut order = Order::new(&id, side, price, size, OrderStatus::Open, token_id);

            match best_ask {
                Some(ask) if matches!(self.inner.mode, FillMode::Realistic) && price >= ask => {
                    order.mark_filled(ask);
                    fills.push((side, ask, size));
                    info!(order_id = %id, side = %side, price = %ask, size = %size, "Paper limit buy crossed, filled");
                }
                _ => {
                    debug!(order_id = %id, side = %side, price = %price, size = %size, "Paper limit buy resting");
                }
            }
            state.orders.insert(id.clone(), order.clone());
            order
        };

        if order.is_active() {
            self.inner.spawn_random_fill(id);
        }
        self.inner.notify_fills(fills).await;
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
        // One forced refresh so every leg sees the same snapshot epoch.
        self.inner.refresh_books(true).await;

        let mut fills = Vec::new();
        let mut resting = Vec::new();
        let orders = {
            let mut state = self.inner.state.lock();
            let mut orders = Vec::with_capacity(legs.len());
            for leg in legs {
                let id = paper_order_id();
                let token_id = self.inner.token_for(leg.side).to_string();
                let mut order = Order::new(
                    &id,
                    leg.side,
                    leg.price,
                    leg.size,
                    OrderStatus::Open,
                    token_id,
                );
                let top = PaperInner::book_for(&state, leg.side).best_ask_level();

                match (tif, top) {
                    (TimeInForce::Fok, Some((ask, ask_size)))
                        if leg.price >= ask && ask_size >= leg.size =>
                    {
                        order.mark_filled(ask);
                        fills.push((leg.side, ask, leg.size));
                        info!(order_id = %id, side = %leg.side, price = %ask, size = %leg.size, "Paper FOK leg filled");
                    }
                    (TimeInForce::Fok, _) => {
                        order.status = OrderStatus::Rejected;
                        warn!(order_id = %id, side = %leg.side, "Paper FOK leg rejected, cannot fill in full");
                    }
                    (TimeInForce::Fak, Some((ask, ask_size))) if leg.price >= ask => {
                        let qty = leg.size.min(ask_size);
                        order.filled_qty = qty;
                        order.filled_avg_price = ask;
                        order.status = if qty == leg.size {
                            OrderStatus::Filled
                        } else {
                            // Remainder is killed, never rests.
                            OrderStatus::Cancelled
                        };
                        fills.push((leg.side, ask, qty));
                    }
                    (TimeInForce::Fak, _) => {
                        order.status = OrderStatus::Rejected;
                    }
                    (_, Some((ask, _))) if leg.price >= ask => {
                        order.mark_filled(ask);
                        fills.push((leg.side, ask, leg.size));
                    }
                    _ => {
                        resting.push(id.clone());
                    }
                }
                state.orders.insert(id, order.clone());
                orders.push(order);
            }
            orders
        };

        for id in resting {
            self.inner.spawn_random_fill(id);
        }
        self.inner.notify_fills(fills).await;
        Ok(orders)
    }

    async fn cancel_order(&self, order_id: &str) -> bool {
        let mut state = self.inner.state.lock();
        match state.orders.get_mut(order_id) {
            Some(order) if order.is_active() => {
                order.status = OrderStatus::Cancelled;
                info!(order_id = %order_id, "Paper order cancelled");
                true
            }
            _ => false,
        }
    }

    async fn cancel_all_orders(&self) -> usize {
        let mut state = self.inner.state.lock();
        let mut cancelled = 0;
        for order in state.orders.values_mut() {
            if order.is_active() {
                order.status = OrderStatus::Cancelled;
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(count = cancelled, "Cancelled all paper orders");
        }
        cancelled
    }

    async fn market_buy(&self, side: Side, size: Decimal) -> Result<Order, OrderError> {
        if size <= Decimal::ZERO {
            return Err(OrderError::InvalidSize(size));
        }
        self.inner.refresh_books(false).await;

        let id = paper_order_id();
        let token_id = self.inner.token_for(side).to_string();
        let order = {
            let mut state = self.inner.state.lock();
            let price = PaperInner::book_for(&state, side)
                .best_ask()
                .unwrap_or(MARKET_FALLBACK_PRICE);
            let mut order = Order::new(&id, side, price, size, OrderStatus::Open, token_id);
            order.mark_filled(price);
            info!(order_id = %id, side = %side, price = %price, size = %size, "Paper market buy filled");
            state.orders.insert(id, order.clone());
            order
        };

        self.inner
            .notify_fills(vec![(side, order.filled_avg_price, size)])
            .await;
        Ok(order)
    }

    async fn get_order_book(&self, side: Side) -> OrderBook {
        self.inner.refresh_books(false).await;
        let state = self.inner.state.lock();
        PaperInner::book_for(&state, side).clone()
    }

    async fn get_book_pair(&self) -> (OrderBook, OrderBook) {
        self.inner.refresh_books(false).await;
        let state = self.inner.state.lock();
        (state.book_up.clone(), state.book_down.clone())
    }

    async fn refresh_order_status(&self, order_id: &str) -> Option<Order> {
        let state = self.inner.state.lock();
        state.orders.get(order_id).cloned()
    }

    fn set_fill_callback(&self, callback: FillCallback) {
        *self.inner.fill_cb.write() = Some(callback);
    }

    fn open_orders(&self, side: Option<Side>) -> Vec<Order> {
        let state = self.inner.state.lock();
        state
            .orders
            .values()
            .filter(|o| o.is_active() && side.map_or(true, |s| o.side == s))
            .cloned()
            .collect()
    }
}
