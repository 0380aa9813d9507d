//! Session ledger: every fill and every arbitrage cycle, persisted to disk.
//!
//! One JSON file per session (`session_<name>.json`) holds the trade log,
//! the cycle history, and derived statistics. The file is rewritten after
//! every mutation via a temp-file rename so a crash never leaves a torn
//! file, and a restarted session resumes from whatever was on disk.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::Side;

/// Ledger persistence errors. These are fatal to a trading session: a
/// ledger that cannot record what happened must stop the strategy.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("ledger io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Outcome of one arbitrage cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleStatus {
    /// In flight: entry attempted, outcome not yet known.
    Open,
    /// Both legs filled; profit is locked regardless of resolution.
    Locked,
    /// Exited early (single-leg exposure or operator stop).
    Stopped,
    /// Window ended without a completed box.
    Expired,
}

impl std::fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleStatus::Open => write!(f, "OPEN"),
            CycleStatus::Locked => write!(f, "LOCKED"),
            CycleStatus::Stopped => write!(f, "STOPPED"),
            CycleStatus::Expired => write!(f, "EXPIRED"),
        }
    }
}

/// One executed fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub side: Side,
    /// Always `BUY` in this strategy; kept for forward compatibility with
    /// exit orders.
    pub action: String,
    pub price: Decimal,
    pub qty: Decimal,
    /// `price * qty`.
    pub notional: Decimal,
    /// Strategy state label at the moment of the fill.
    pub state: String,
    /// Cycle this fill belongs to, when one was open.
    pub cycle_id: Option<String>,
    /// Market this fill traded; falls back to the open cycle's.
    pub market_slug: Option<String>,
    /// Asset tag; falls back to the open cycle's.
    pub asset: Option<String>,
}

/// One arbitrage cycle: the attempt to buy both legs of one market window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cycle {
    /// `{asset}_{HHMMSS}` of the start instant.
    pub id: String,
    pub market_slug: String,
    pub asset: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: CycleStatus,
    /// UP leg entry price, once a fill on that leg is attributed.
    pub up_price: Option<Decimal>,
    /// UP leg filled quantity.
    pub up_qty: Option<Decimal>,
    /// DOWN leg entry price.
    pub down_price: Option<Decimal>,
    /// DOWN leg filled quantity.
    pub down_qty: Option<Decimal>,
    /// Sum of fill notionals attributed to this cycle.
    pub total_cost: Decimal,
    /// Realized result: positive when locked, negative for the stopped-loss
    /// estimate, zero when expired untouched.
    pub locked_profit: Decimal,
    /// Number of fills attributed to this cycle.
    pub trade_count: usize,
}

/// Aggregate statistics, derived from the trade and cycle history and
/// serialized into the session file so reports never recompute them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_trades: usize,
    pub total_cycles: usize,
    /// LOCKED + STOPPED. An EXPIRED cycle never completed an attempt and
    /// is counted separately.
    pub completed_cycles: usize,
    pub locked_cycles: usize,
    pub stopped_cycles: usize,
    pub expired_cycles: usize,
    /// Sum of positive locked profits.
    pub gross_profit: Decimal,
    /// Sum of negative locked profits and stopped-loss estimates, as a
    /// positive magnitude.
    pub gross_loss: Decimal,
    /// `gross_profit - gross_loss`.
    pub net_pnl: Decimal,
    /// `locked_cycles / completed_cycles`, 0 when nothing has completed.
    pub win_rate: f64,
    /// `net_pnl / completed_cycles`, 0 when nothing has completed.
    pub avg_profit_per_cycle: Decimal,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: f64,
}

/// On-disk session schema.
#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    session_name: String,
    session_start: DateTime<Utc>,
    session_end: Option<DateTime<Utc>>,
    trades: Vec<TradeRecord>,
    cycles: Vec<Cycle>,
    stats: SessionStats,
}

/// Default fraction of a stopped cycle's cost booked as estimated loss.
pub const DEFAULT_STOPPED_LOSS_FACTOR: Decimal = dec!(0.5);

/// Session trade and cycle ledger.
///
/// Not internally synchronized; callers wanting shared access wrap it in a
/// mutex.
pub struct TradeLedger {
    session_name: String,
    path: PathBuf,
    session_start: DateTime<Utc>,
    session_end: Option<DateTime<Utc>>,
    trades: Vec<TradeRecord>,
    cycles: Vec<Cycle>,
    current: Option<Cycle>,
    stopped_loss_factor: Decimal,
}

impl TradeLedger {
    /// Creates a fresh ledger writing to `dir/session_<name>.json`.
    pub fn new(dir: impl AsRef<Path>, session_name: impl Into<String>) -> Result<Self, LedgerError> {
        let session_name = session_name.into();
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: session_path(dir, &session_name),
            session_name,
            session_start: Utc::now(),
            session_end: None,
            trades: Vec::new(),
            cycles: Vec::new(),
            current: None,
            stopped_loss_factor: DEFAULT_STOPPED_LOSS_FACTOR,
        })
    }

    /// Overrides the stopped-loss estimate factor.
    #[must_use]
    pub fn with_stopped_loss_factor(mut self, factor: Decimal) -> Self {
        self.stopped_loss_factor = factor;
        self
    }

    /// Loads an existing session file, or starts fresh when the file is
    /// missing or unreadable.
    ///
    /// A cycle left OPEN by an interrupted run is closed as EXPIRED: its
    /// outcome is unknowable after the window has passed, and resuming it
    /// would attribute new fills to a dead attempt.
    pub fn load_or_new(
        dir: impl AsRef<Path>,
        session_name: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        let session_name = session_name.into();
        let dir = dir.as_ref();
        let path = session_path(dir, &session_name);

        let file: SessionFile = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Session file unreadable, starting fresh");
                    return Self::new(dir, session_name);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Self::new(dir, session_name);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Session file unreadable, starting fresh");
                return Self::new(dir, session_name);
            }
        };

        let mut cycles = file.cycles;
        for cycle in cycles.iter_mut().filter(|c| c.status == CycleStatus::Open) {
            warn!(cycle_id = %cycle.id, "Interrupted cycle found on load, closing as EXPIRED");
            cycle.status = CycleStatus::Expired;
            cycle.completed_at = Some(Utc::now());
        }

        let mut ledger = Self {
            path,
            session_name,
            session_start: file.session_start,
            session_end: None,
            trades: file.trades,
            cycles,
            current: None,
            stopped_loss_factor: DEFAULT_STOPPED_LOSS_FACTOR,
        };
        ledger.save()?;
        info!(
            session = %ledger.session_name,
            trades = ledger.trades.len(),
            cycles = ledger.cycles.len(),
            "Resumed session ledger"
        );
        Ok(ledger)
    }

    /// Reads a session file's statistics without constructing a live
    /// ledger. Used for reporting on past sessions.
    pub fn read_stats(path: impl AsRef<Path>) -> Result<SessionStats, LedgerError> {
        let contents = fs::read_to_string(path)?;
        let file: SessionFile = serde_json::from_str(&contents)?;
        Ok(file.stats)
    }

    /// Opens a new cycle for one market window. The scanner guarantees a
    /// single open cycle; a violation is a logic bug, handled by expiring
    /// the stale cycle rather than corrupting its accounting.
    pub fn start_cycle(&mut self, market_slug: &str, asset: &str) -> Result<String, LedgerError> {
        if self.current.is_some() {
            warn!(asset = %asset, "Starting cycle while one is open, expiring the old one");
            self.complete_cycle(CycleStatus::Expired, Decimal::ZERO)?;
        }

        let now = Utc::now();
        let id = format!("{}_{}", asset, now.format("%H%M%S"));
        self.current = Some(Cycle {
            id: id.clone(),
            market_slug: market_slug.to_string(),
            asset: asset.to_string(),
            started_at: now,
            completed_at: None,
            status: CycleStatus::Open,
            up_price: None,
            up_qty: None,
            down_price: None,
            down_qty: None,
            total_cost: Decimal::ZERO,
            locked_profit: Decimal::ZERO,
            trade_count: 0,
        });
        info!(cycle_id = %id, market = %market_slug, "Cycle started");
        self.save()?;
        Ok(id)
    }

    /// Records one fill, attributing it to the open cycle if any.
    ///
    /// `state` labels the strategy's state at fill time. `market_slug` and
    /// `asset` override the open cycle's values; pass `None` to inherit.
    pub fn record_trade(
        &mut self,
        side: Side,
        price: Decimal,
        qty: Decimal,
        state: &str,
        market_slug: Option<&str>,
        asset: Option<&str>,
    ) -> Result<(), LedgerError> {
        let notional = price * qty;
        let cycle_id = self.current.as_ref().map(|c| c.id.clone());
        let market_slug = market_slug
            .map(str::to_string)
            .or_else(|| self.current.as_ref().map(|c| c.market_slug.clone()));
        let asset = asset
            .map(str::to_string)
            .or_else(|| self.current.as_ref().map(|c| c.asset.clone()));
        if let Some(cycle) = self.current.as_mut() {
            cycle.total_cost += notional;
            cycle.trade_count += 1;
            let (leg_price, leg_qty) = match side {
                Side::Up => (&mut cycle.up_price, &mut cycle.up_qty),
                Side::Down => (&mut cycle.down_price, &mut cycle.down_qty),
            };
            *leg_price = Some(price);
            *leg_qty = Some(leg_qty.unwrap_or(Decimal::ZERO) + qty);
        }
        self.trades.push(TradeRecord {
            timestamp: Utc::now(),
            side,
            action: "BUY".to_string(),
            price,
            qty,
            notional,
            state: state.to_string(),
            cycle_id,
            market_slug,
            asset,
        });
        info!(side = %side, price = %price, qty = %qty, notional = %notional, "Trade recorded");
        self.save()
    }

    /// Closes the open cycle with the given outcome.
    ///
    /// `locked_profit` is honored for LOCKED; STOPPED books an estimated
    /// loss of `stopped_loss_factor * total_cost`; EXPIRED books zero.
    /// A no-op when no cycle is open.
    pub fn complete_cycle(
        &mut self,
        status: CycleStatus,
        locked_profit: Decimal,
    ) -> Result<(), LedgerError> {
        let Some(mut cycle) = self.current.take() else {
            return Ok(());
        };
        cycle.status = status;
        cycle.completed_at = Some(Utc::now());
        cycle.locked_profit = match status {
            CycleStatus::Locked => locked_profit,
            CycleStatus::Stopped => -(self.stopped_loss_factor * cycle.total_cost),
            CycleStatus::Open | CycleStatus::Expired => Decimal::ZERO,
        };
        info!(
            cycle_id = %cycle.id,
            status = %status,
            total_cost = %cycle.total_cost,
            locked_profit = %cycle.locked_profit,
            "Cycle completed"
        );
        self.cycles.push(cycle);
        self.save()
    }

    /// The open cycle, if any.
    #[must_use]
    pub fn current_cycle(&self) -> Option<&Cycle> {
        self.current.as_ref()
    }

    /// Completed cycles, oldest first.
    #[must_use]
    pub fn cycles(&self) -> &[Cycle] {
        &self.cycles
    }

    /// All recorded fills, oldest first.
    #[must_use]
    pub fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }

    /// The most recent `n` fills, oldest first.
    #[must_use]
    pub fn recent_trades(&self, n: usize) -> &[TradeRecord] {
        &self.trades[self.trades.len().saturating_sub(n)..]
    }

    /// The most recent `n` completed cycles, oldest first.
    #[must_use]
    pub fn recent_cycles(&self, n: usize) -> &[Cycle] {
        &self.cycles[self.cycles.len().saturating_sub(n)..]
    }

    /// Aggregates the cycle history into performance statistics.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let end_time = self.session_end.unwrap_or_else(Utc::now);
        let mut stats = SessionStats {
            total_trades: self.trades.len(),
            total_cycles: self.cycles.len(),
            completed_cycles: 0,
            locked_cycles: 0,
            stopped_cycles: 0,
            expired_cycles: 0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            win_rate: 0.0,
            avg_profit_per_cycle: Decimal::ZERO,
            start_time: self.session_start,
            end_time,
            duration_hours: (end_time - self.session_start).num_milliseconds() as f64
                / 3_600_000.0,
        };
        for cycle in &self.cycles {
            match cycle.status {
                CycleStatus::Locked => {
                    stats.locked_cycles += 1;
                    stats.completed_cycles += 1;
                    if cycle.locked_profit > Decimal::ZERO {
                        stats.gross_profit += cycle.locked_profit;
                    } else {
                        stats.gross_loss += cycle.locked_profit.abs();
                    }
                }
                CycleStatus::Stopped => {
                    stats.stopped_cycles += 1;
                    stats.completed_cycles += 1;
                    stats.gross_loss += cycle.locked_profit.abs();
                }
                CycleStatus::Expired => stats.expired_cycles += 1,
                CycleStatus::Open => {}
            }
        }
        stats.net_pnl = stats.gross_profit - stats.gross_loss;
        if stats.completed_cycles > 0 {
            let locked = Decimal::from(stats.locked_cycles as u64);
            let completed = Decimal::from(stats.completed_cycles as u64);
            stats.win_rate = (locked / completed).to_f64().unwrap_or(0.0);
            stats.avg_profit_per_cycle = stats.net_pnl / completed;
        }
        stats
    }

    /// Marks the session ended and persists the final state.
    pub fn end_session(&mut self) -> Result<(), LedgerError> {
        self.session_end = Some(Utc::now());
        self.save()
    }

    /// Path of the session file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serializes the full session to disk via temp-file rename.
    pub fn save(&self) -> Result<(), LedgerError> {
        let mut cycles = self.cycles.clone();
        if let Some(current) = &self.current {
            cycles.push(current.clone());
        }
        let file = SessionFile {
            session_name: self.session_name.clone(),
            session_start: self.session_start,
            session_end: self.session_end,
            trades: self.trades.clone(),
            cycles,
            stats: self.stats(),
        };

        let json = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn session_path(dir: &Path, session_name: &str) -> PathBuf {
    dir.join(format!("session_{session_name}.json"))
}
