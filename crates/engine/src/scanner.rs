//! Box-arbitrage scanner for one binary market window.
//!
//! The box: when `ask_up + ask_down < 1.00`, buying both legs costs less
//! than the guaranteed $1 payout of whichever leg wins. The scanner polls
//! both books, and when the edge clears the threshold it submits both legs
//! as one FOK batch so a partial box never rests. Fills flow into the
//! [`TradeLedger`] through the engine's fill callback; a ledger that cannot
//! persist aborts the scan.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::ledger::{CycleStatus, LedgerError, TradeLedger};
use crate::manager::{BatchLeg, OrderError, OrderManager};
use crate::types::{OrderBook, OrderStatus, Side, TimeInForce};

/// Scanner failures. Book-feed gaps and rejected entries are not errors;
/// only placement transport failures and ledger persistence failures are.
#[derive(Error, Debug)]
pub enum ScannerError {
    #[error(transparent)]
    Order(#[from] OrderError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// One tradeable market window: a binary market with a fixed expiry.
#[derive(Debug, Clone)]
pub struct MarketWindow {
    /// Human-readable market identifier, used in logs.
    pub market_slug: String,
    /// Short asset tag used in cycle ids (for example `BTC`).
    pub asset: String,
    pub up_token_id: String,
    pub down_token_id: String,
    /// Market resolution instant.
    pub expiry: DateTime<Utc>,
}

/// Scanner tuning knobs.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Minimum edge (`1 - pair_cost`) worth entering.
    pub min_edge: Decimal,
    /// Target spend per entry attempt, in dollars.
    pub usd_per_attempt: Decimal,
    /// Delay between book polls.
    pub poll_interval: Duration,
    /// Stop scanning this long before expiry; late fills cannot be managed.
    pub stop_buffer: Duration,
    /// Placement policy for entries. FOK unless deliberately overridden.
    pub tif: TimeInForce,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_edge: dec!(0.005),
            usd_per_attempt: dec!(5.0),
            poll_interval: Duration::from_millis(250),
            stop_buffer: Duration::from_secs(60),
            tif: TimeInForce::Fok,
        }
    }
}

/// A sized entry opportunity derived from one book-pair snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opportunity {
    pub ask_up: Decimal,
    pub ask_down: Decimal,
    /// `ask_up + ask_down`.
    pub pair_cost: Decimal,
    /// `1 - pair_cost`.
    pub edge: Decimal,
    /// Shares per leg: target spend over pair cost, capped at both
    /// top-of-book sizes.
    pub qty: Decimal,
}

/// Sizes an entry from a book-pair snapshot, or `None` when there is no
/// edge or no usable liquidity.
#[must_use]
pub fn evaluate_books(
    up: &OrderBook,
    down: &OrderBook,
    config: &ScannerConfig,
) -> Option<Opportunity> {
    let (ask_up, size_up) = up.best_ask_level()?;
    let (ask_down, size_down) = down.best_ask_level()?;

    let pair_cost = ask_up + ask_down;
    let edge = Decimal::ONE - pair_cost;
    if edge < config.min_edge {
        return None;
    }

    let qty = (config.usd_per_attempt / pair_cost)
        .min(size_up)
        .min(size_down);
    if qty <= Decimal::ZERO {
        return None;
    }

    Some(Opportunity {
        ask_up,
        ask_down,
        pair_cost,
        edge,
        qty,
    })
}

/// Outcome of one scan over a market window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanSummary {
    /// Book-pair snapshots evaluated.
    pub attempts: usize,
    /// Entry batches submitted.
    pub submissions: usize,
    /// Boxes fully filled with profit locked.
    pub locked: usize,
}

/// Scans one market window until its deadline, taking every box that
/// appears along the way.
pub struct BoxScanner<M: OrderManager> {
    manager: Arc<M>,
    ledger: Arc<Mutex<TradeLedger>>,
    window: MarketWindow,
    config: ScannerConfig,
    /// Set by the fill callback when the ledger fails to persist a trade.
    ledger_failure: Arc<Mutex<Option<LedgerError>>>,
}

impl<M: OrderManager> BoxScanner<M> {
    #[must_use]
    pub fn new(
        manager: Arc<M>,
        ledger: Arc<Mutex<TradeLedger>>,
        window: MarketWindow,
        config: ScannerConfig,
    ) -> Self {
        Self {
            manager,
            ledger,
            window,
            config,
            ledger_failure: Arc::new(Mutex::new(None)),
        }
    }

    /// Routes engine fill notifications into the ledger. Persistence
    /// failures are parked for the scan loop to surface.
    fn install_fill_callback(&self) {
        let ledger = Arc::clone(&self.ledger);
        let failure = Arc::clone(&self.ledger_failure);
        let market_slug = self.window.market_slug.clone();
        let asset = self.window.asset.clone();
        self.manager
            .set_fill_callback(Arc::new(move |side, price, qty| {
                let result = ledger.lock().record_trade(
                    side,
                    price,
                    qty,
                    "ENTERING",
                    Some(&market_slug),
                    Some(&asset),
                );
                if let Err(e) = result {
                    error!(error = %e, "Failed to persist fill, aborting scan");
                    *failure.lock() = Some(e);
                }
                Box::pin(async {})
            }));
    }

    fn take_ledger_failure(&self) -> Option<LedgerError> {
        self.ledger_failure.lock().take()
    }

    /// Runs the scan loop until the window's deadline passes or a fatal
    /// error occurs. Each locked or stopped box closes its cycle and the
    /// loop keeps scanning for the next one.
    pub async fn run(&self) -> Result<ScanSummary, ScannerError> {
        self.install_fill_callback();

        let deadline = self.window.expiry
            - chrono::Duration::from_std(self.config.stop_buffer)
                .unwrap_or_else(|_| chrono::Duration::zero());
        info!(
            market = %self.window.market_slug,
            deadline = %deadline,
            min_edge = %self.config.min_edge,
            usd_per_attempt = %self.config.usd_per_attempt,
            "Scan started"
        );

        let mut summary = ScanSummary::default();
        while Utc::now() < deadline {
            if let Some(e) = self.take_ledger_failure() {
                self.manager.cancel_all_orders().await;
                return Err(e.into());
            }

            let (up, down) = self.manager.get_book_pair().await;
            summary.attempts += 1;

            let Some(opp) = evaluate_books(&up, &down, &self.config) else {
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            };
            debug!(
                ask_up = %opp.ask_up,
                ask_down = %opp.ask_down,
                edge = %opp.edge,
                qty = %opp.qty,
                "Edge found"
            );

            // Open the cycle only now: pure scanning leaves no ledger trace.
            {
                let mut ledger = self.ledger.lock();
                if ledger.current_cycle().is_none() {
                    ledger.start_cycle(&self.window.market_slug, &self.window.asset)?;
                }
            }

            let legs = [
                BatchLeg {
                    side: Side::Up,
                    price: opp.ask_up,
                    size: opp.qty,
                },
                BatchLeg {
                    side: Side::Down,
                    price: opp.ask_down,
                    size: opp.qty,
                },
            ];
            let orders = match self.manager.place_batch_buy(&legs, self.config.tif).await {
                Ok(orders) => orders,
                Err(e) => {
                    // Fills may be in flight; flatten and stop the cycle
                    // before surfacing the failure.
                    warn!(market = %self.window.market_slug, error = %e, "Entry submission failed");
                    self.manager.cancel_all_orders().await;
                    self.ledger
                        .lock()
                        .complete_cycle(CycleStatus::Stopped, Decimal::ZERO)?;
                    return Err(e.into());
                }
            };
            summary.submissions += 1;

            if let Some(e) = self.take_ledger_failure() {
                self.manager.cancel_all_orders().await;
                return Err(e.into());
            }

            let filled: Vec<_> = orders
                .iter()
                .filter(|o| o.status == OrderStatus::Filled)
                .collect();

            if filled.len() == orders.len() {
                let min_fill = filled
                    .iter()
                    .map(|o| o.filled_qty)
                    .min()
                    .unwrap_or(Decimal::ZERO);
                let (total_cost, locked_profit) = {
                    let mut ledger = self.ledger.lock();
                    let total_cost = ledger
                        .current_cycle()
                        .map(|c| c.total_cost)
                        .unwrap_or(Decimal::ZERO);
                    let locked_profit = min_fill - total_cost;
                    ledger.complete_cycle(CycleStatus::Locked, locked_profit)?;
                    (total_cost, locked_profit)
                };
                info!(
                    market = %self.window.market_slug,
                    qty = %min_fill,
                    total_cost = %total_cost,
                    locked_profit = %locked_profit,
                    "Box complete, profit locked"
                );
                summary.locked += 1;
                // Keep scanning: the window may offer more boxes before the
                // deadline, each under a fresh cycle.
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            if !filled.is_empty() {
                // Single-leg exposure: flatten and stop the cycle, then
                // keep scanning the rest of the window.
                warn!(
                    market = %self.window.market_slug,
                    filled = filled.len(),
                    legs = orders.len(),
                    "Partial box, cancelling remainder and stopping cycle"
                );
                self.manager.cancel_all_orders().await;
                self.ledger
                    .lock()
                    .complete_cycle(CycleStatus::Stopped, Decimal::ZERO)?;
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            // Both legs rejected: the book moved under us. The cycle stays
            // open for the next attempt in this window.
            debug!(market = %self.window.market_slug, "Entry rejected, re-scanning");
            tokio::time::sleep(self.config.poll_interval).await;
        }

        // Deadline passed. Flatten anything resting and expire the cycle.
        let open_cycle = self.ledger.lock().current_cycle().is_some();
        if open_cycle {
            self.manager.cancel_all_orders().await;
            self.ledger
                .lock()
                .complete_cycle(CycleStatus::Expired, Decimal::ZERO)?;
        }
        info!(
            market = %self.window.market_slug,
            attempts = summary.attempts,
            submissions = summary.submissions,
            locked = summary.locked,
            "Scan window closed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BookClient;
    use crate::paper::PaperOrderManager;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn book(ask: &str, size: &str) -> serde_json::Value {
        json!({"bids": [], "asks": [{"price": ask, "size": size}]})
    }

    async fn mount_book(server: &MockServer, token: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/book"))
            .and(query_param("token_id", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_book_n(server: &MockServer, token: &str, body: serde_json::Value, n: u64) {
        Mock::given(method("GET"))
            .and(path("/book"))
            .and(query_param("token_id", token))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .up_to_n_times(n)
            .mount(server)
            .await;
    }

    fn window(expiry_in: Duration) -> MarketWindow {
        MarketWindow {
            market_slug: "btc-updown-15m".into(),
            asset: "BTC".into(),
            up_token_id: "tok-up".into(),
            down_token_id: "tok-down".into(),
            expiry: Utc::now() + chrono::Duration::from_std(expiry_in).unwrap(),
        }
    }

    fn fast_config() -> ScannerConfig {
        ScannerConfig {
            poll_interval: Duration::from_millis(10),
            stop_buffer: Duration::ZERO,
            ..ScannerConfig::default()
        }
    }

    fn paper(server: &MockServer) -> Arc<PaperOrderManager> {
        Arc::new(
            PaperOrderManager::builder(
                BookClient::with_base_url(server.uri()),
                "tok-up",
                "tok-down",
            )
            .cache_ttl(Duration::ZERO)
            .build(),
        )
    }

    fn ledger(dir: &TempDir, name: &str) -> Arc<Mutex<TradeLedger>> {
        Arc::new(Mutex::new(TradeLedger::new(dir.path(), name).unwrap()))
    }

    #[test]
    fn test_evaluate_sizes_from_target_spend() {
        let up = OrderBook::new(vec![], vec![(dec!(0.47), dec!(10))]);
        let down = OrderBook::new(vec![], vec![(dec!(0.49), dec!(8))]);
        let opp = evaluate_books(&up, &down, &ScannerConfig::default()).unwrap();

        assert_eq!(opp.pair_cost, dec!(0.96));
        assert_eq!(opp.edge, dec!(0.04));
        // 5.00 / 0.96, under both top-of-book sizes
        assert!((opp.qty - dec!(5.2083)).abs() < dec!(0.001));
    }

    #[test]
    fn test_evaluate_caps_at_top_of_book() {
        let up = OrderBook::new(vec![], vec![(dec!(0.47), dec!(3))]);
        let down = OrderBook::new(vec![], vec![(dec!(0.49), dec!(8))]);
        let opp = evaluate_books(&up, &down, &ScannerConfig::default()).unwrap();
        assert_eq!(opp.qty, dec!(3));
    }

    #[test]
    fn test_evaluate_rejects_thin_edge_and_missing_side() {
        let config = ScannerConfig::default();
        let up = OrderBook::new(vec![], vec![(dec!(0.50), dec!(10))]);
        let down = OrderBook::new(vec![], vec![(dec!(0.498), dec!(10))]);
        // edge 0.002 < 0.005
        assert!(evaluate_books(&up, &down, &config).is_none());

        let empty = OrderBook::empty();
        assert!(evaluate_books(&up, &empty, &config).is_none());
        assert!(evaluate_books(&empty, &down, &config).is_none());
    }

    #[tokio::test]
    async fn test_scan_locks_profit_end_to_end() {
        let server = MockServer::start().await;
        // Edge available for one scan epoch plus the batch's forced
        // refresh, then the books drift apart.
        mount_book_n(&server, "tok-up", book("0.47", "10"), 2).await;
        mount_book(&server, "tok-up", book("0.52", "10")).await;
        mount_book_n(&server, "tok-down", book("0.49", "8"), 2).await;
        mount_book(&server, "tok-down", book("0.52", "8")).await;

        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, "lock");
        let scanner = BoxScanner::new(
            paper(&server),
            Arc::clone(&ledger),
            window(Duration::from_millis(500)),
            fast_config(),
        );

        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.locked, 1);
        assert_eq!(summary.submissions, 1);

        let ledger = ledger.lock();
        assert!(ledger.current_cycle().is_none());
        assert_eq!(ledger.cycles().len(), 1);
        let cycle = &ledger.cycles()[0];
        assert_eq!(cycle.status, CycleStatus::Locked);
        assert_eq!(cycle.trade_count, 2);
        // q = 5/0.96 ~ 5.2083; cost = q * 0.96 = 5.00; profit = q * 0.04
        assert!((cycle.total_cost - dec!(5.0)).abs() < dec!(0.001));
        assert!((cycle.locked_profit - dec!(0.2083)).abs() < dec!(0.001));
        assert_eq!(ledger.trades().len(), 2);
        assert_eq!(ledger.trades()[0].asset.as_deref(), Some("BTC"));
        assert_eq!(ledger.stats().locked_cycles, 1);
    }

    #[tokio::test]
    async fn test_scan_keeps_taking_boxes_until_deadline() {
        let server = MockServer::start().await;
        // The edge never goes away, so every poll finds another box.
        mount_book(&server, "tok-up", book("0.47", "10")).await;
        mount_book(&server, "tok-down", book("0.49", "8")).await;

        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, "repeat");
        let scanner = BoxScanner::new(
            paper(&server),
            Arc::clone(&ledger),
            window(Duration::from_millis(500)),
            fast_config(),
        );

        let summary = scanner.run().await.unwrap();
        assert!(summary.locked >= 2, "locked {} boxes", summary.locked);
        assert_eq!(summary.submissions, summary.locked);

        let ledger = ledger.lock();
        assert!(ledger.current_cycle().is_none());
        assert_eq!(ledger.cycles().len(), summary.locked);
        assert!(ledger
            .cycles()
            .iter()
            .all(|c| c.status == CycleStatus::Locked));
        // Two fills per box, each under its own cycle.
        assert_eq!(ledger.trades().len(), summary.locked * 2);
        assert_eq!(ledger.stats().locked_cycles, summary.locked);
    }

    #[tokio::test]
    async fn test_scan_without_edge_leaves_ledger_untouched() {
        let server = MockServer::start().await;
        // Pair cost 1.04: never an edge.
        mount_book(&server, "tok-up", book("0.52", "100")).await;
        mount_book(&server, "tok-down", book("0.52", "100")).await;

        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, "noedge");
        let mgr = paper(&server);
        let scanner = BoxScanner::new(
            Arc::clone(&mgr),
            Arc::clone(&ledger),
            window(Duration::from_millis(300)),
            fast_config(),
        );

        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.locked, 0);
        assert_eq!(summary.submissions, 0);
        assert!(summary.attempts > 0);

        let ledger = ledger.lock();
        assert!(ledger.trades().is_empty());
        assert!(ledger.cycles().is_empty());
        assert!(ledger.current_cycle().is_none());
        assert!(mgr.open_orders(None).is_empty());
    }

    #[tokio::test]
    async fn test_partial_fill_stops_cycle() {
        let server = MockServer::start().await;
        // Up always fillable; down shows an edge once, then jumps so the
        // FOK leg cannot fill at the batch's snapshot.
        mount_book(&server, "tok-up", book("0.47", "10")).await;
        mount_book_n(&server, "tok-down", book("0.49", "8"), 1).await;
        mount_book(&server, "tok-down", book("0.60", "8")).await;

        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, "stop");
        let scanner = BoxScanner::new(
            paper(&server),
            Arc::clone(&ledger),
            window(Duration::from_millis(500)),
            fast_config(),
        );

        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.locked, 0);
        assert_eq!(summary.submissions, 1);

        let ledger = ledger.lock();
        assert_eq!(ledger.cycles().len(), 1);
        let cycle = &ledger.cycles()[0];
        assert_eq!(cycle.status, CycleStatus::Stopped);
        // Only the up leg filled.
        assert_eq!(ledger.trades().len(), 1);
        assert_eq!(ledger.trades()[0].side, Side::Up);
        // Estimated loss booked against the filled leg's cost.
        assert!(cycle.locked_profit < Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_rejected_entry_expires_at_deadline() {
        let server = MockServer::start().await;
        // Both legs show an edge on the scan snapshot, then both jump so
        // the batch rejects; afterwards there is never an edge again.
        mount_book_n(&server, "tok-up", book("0.47", "10"), 1).await;
        mount_book(&server, "tok-up", book("0.60", "10")).await;
        mount_book_n(&server, "tok-down", book("0.49", "8"), 1).await;
        mount_book(&server, "tok-down", book("0.60", "8")).await;

        let dir = TempDir::new().unwrap();
        let ledger = ledger(&dir, "expire");
        let scanner = BoxScanner::new(
            paper(&server),
            Arc::clone(&ledger),
            window(Duration::from_millis(400)),
            fast_config(),
        );

        let summary = scanner.run().await.unwrap();
        assert_eq!(summary.locked, 0);
        assert_eq!(summary.submissions, 1);

        let ledger = ledger.lock();
        assert!(ledger.trades().is_empty());
        assert_eq!(ledger.cycles().len(), 1);
        assert_eq!(ledger.cycles()[0].status, CycleStatus::Expired);
        assert_eq!(ledger.cycles()[0].locked_profit, Decimal::ZERO);
    }
}
