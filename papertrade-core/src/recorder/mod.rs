//! Session recorder
//!
//! Durable, append-only record of one paper trading session:
//!
//! ```text
//! <output_dir>/<YYYY-MM-DD>/<HH-MM-SS>_<strategy>/
//!     session.json        session header, written at open and again at finalize
//!     orders.jsonl        one line per order state change
//!     trades.jsonl        one line per fill
//!     marks.jsonl         one line per mark-to-market or trading day roll
//!     live_snapshot.json  latest account/positions, replaced atomically
//!     summary.json        written by finalize
//! ```
//!
//! The JSONL logs are the source of truth; [`replay::rebuild`] reconstructs the
//! ledger from them. Fill and mark lines carry the ledger sequence number they
//! were applied at, which fixes their relative order across the two files.

pub mod replay;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::market::Symbol;
use crate::paper_trading::{Account, Fill, FillEffect, MarkEffect, Order, Position};

pub const SESSION_FILE: &str = "session.json";
pub const ORDERS_FILE: &str = "orders.jsonl";
pub const TRADES_FILE: &str = "trades.jsonl";
pub const MARKS_FILE: &str = "marks.jsonl";
pub const SNAPSHOT_FILE: &str = "live_snapshot.json";
pub const SUMMARY_FILE: &str = "summary.json";

/// Session header
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub strategy_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub config_snapshot: serde_json::Value,
    pub session_dir: PathBuf,
}

/// One line of `trades.jsonl`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(flatten)]
    pub fill: Fill,
    /// Ledger sequence number of the fill; zero in logs written without one
    #[serde(default)]
    pub sequence: u64,
    pub realized_pnl: f64,
    pub closed_quantity: f64,
    pub position_after: f64,
    pub cash_after: f64,
}

/// One line of `marks.jsonl`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkRecord {
    Mark {
        sequence: u64,
        symbol: Symbol,
        price: f64,
        timestamp: DateTime<Utc>,
    },
    DayRoll {
        sequence: u64,
        timestamp: DateTime<Utc>,
    },
}

impl MarkRecord {
    pub fn sequence(&self) -> u64 {
        match self {
            MarkRecord::Mark { sequence, .. } | MarkRecord::DayRoll { sequence, .. } => *sequence,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub account: Account,
    pub positions: Vec<Position>,
}

/// Terminal session statistics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub strategy_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_fills: u64,
    /// Fills that reduced or closed a position
    pub closing_trades: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    /// Winning share of closing trades, in percent
    pub win_rate: f64,
    pub realized_pnl: f64,
    pub commission_paid: f64,
    pub total_pnl: f64,
    pub max_drawdown: f64,
    pub initial_capital: f64,
    pub final_equity: f64,
}

#[derive(Default)]
struct Tally {
    fills: u64,
    closing: u64,
    winners: u64,
    losers: u64,
    realized: f64,
    commission: f64,
}

/// Session recorder
pub struct SessionRecorder {
    record: SessionRecord,
    fsync: bool,
    orders: Option<File>,
    trades: Option<File>,
    marks: Option<File>,
    tally: Tally,
    last_account: Option<Account>,
}

impl SessionRecorder {
    /// Create the session directory and write the session header.
    pub fn open(
        config: &RecorderConfig,
        strategy_name: &str,
        config_snapshot: serde_json::Value,
    ) -> Result<Self, RecorderError> {
        let start_time = Utc::now();
        let session_dir = session_dir_for(&config.output_dir, strategy_name, start_time)?;

        let record = SessionRecord {
            session_id: Uuid::new_v4(),
            strategy_name: strategy_name.to_string(),
            start_time,
            end_time: None,
            config_snapshot,
            session_dir: session_dir.clone(),
        };
        write_json_atomic(&session_dir.join(SESSION_FILE), &record)?;

        let orders = open_append(&session_dir.join(ORDERS_FILE))?;
        let trades = open_append(&session_dir.join(TRADES_FILE))?;
        let marks = open_append(&session_dir.join(MARKS_FILE))?;

        info!("📁 Recording session {} to {}", record.session_id, session_dir.display());

        Ok(Self {
            record,
            fsync: config.fsync,
            orders: Some(orders),
            trades: Some(trades),
            marks: Some(marks),
            tally: Tally::default(),
            last_account: None,
        })
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn session_dir(&self) -> &Path {
        &self.record.session_dir
    }

    /// Append an order state change.
    pub fn record_order(&mut self, order: &Order) -> Result<(), RecorderError> {
        let path = self.record.session_dir.join(ORDERS_FILE);
        let file = self.orders.as_mut().ok_or(RecorderError::Finalized)?;
        append_line(file, &path, order, self.fsync)
    }

    /// Append a fill together with its ledger effect.
    pub fn record_fill(&mut self, fill: &Fill, effect: &FillEffect) -> Result<(), RecorderError> {
        let path = self.record.session_dir.join(TRADES_FILE);
        let file = self.trades.as_mut().ok_or(RecorderError::Finalized)?;
        let line = TradeRecord {
            fill: fill.clone(),
            sequence: effect.sequence,
            realized_pnl: effect.realized_pnl,
            closed_quantity: effect.closed_quantity,
            position_after: effect.position.net_quantity,
            cash_after: effect.account.cash_balance,
        };
        append_line(file, &path, &line, self.fsync)?;

        self.tally.fills += 1;
        self.tally.commission += fill.commission;
        self.tally.realized += effect.realized_pnl;
        if effect.closed_quantity > 0.0 {
            self.tally.closing += 1;
            if effect.realized_pnl > 0.0 {
                self.tally.winners += 1;
            } else if effect.realized_pnl < 0.0 {
                self.tally.losers += 1;
            }
        }
        self.last_account = Some(effect.account.clone());
        Ok(())
    }

    /// Append a mark-to-market of `symbol` at `price`.
    pub fn record_mark(&mut self, symbol: &Symbol, price: f64, effect: &MarkEffect) -> Result<(), RecorderError> {
        let line = MarkRecord::Mark {
            sequence: effect.sequence,
            symbol: symbol.clone(),
            price,
            timestamp: effect.timestamp,
        };
        self.append_mark(&line)?;
        self.last_account = Some(effect.account.clone());
        Ok(())
    }

    /// Append a trading day roll applied at ledger `sequence`.
    pub fn record_day_roll(&mut self, sequence: u64, timestamp: DateTime<Utc>) -> Result<(), RecorderError> {
        self.append_mark(&MarkRecord::DayRoll { sequence, timestamp })
    }

    fn append_mark(&mut self, line: &MarkRecord) -> Result<(), RecorderError> {
        let path = self.record.session_dir.join(MARKS_FILE);
        let file = self.marks.as_mut().ok_or(RecorderError::Finalized)?;
        append_line(file, &path, line, self.fsync)
    }

    /// Replace `live_snapshot.json` with the current account and positions.
    pub fn record_snapshot(&mut self, account: &Account, positions: &[Position]) -> Result<(), RecorderError> {
        if self.orders.is_none() {
            return Err(RecorderError::Finalized);
        }
        let snapshot = LiveSnapshot {
            session_id: self.record.session_id,
            timestamp: Utc::now(),
            account: account.clone(),
            positions: positions.to_vec(),
        };
        write_json_atomic(&self.record.session_dir.join(SNAPSHOT_FILE), &snapshot)?;
        self.last_account = Some(account.clone());
        debug!("Snapshot written: equity {:.2}", account.equity);
        Ok(())
    }

    /// Write the summary, stamp the end time and close the logs.
    pub fn finalize(&mut self) -> Result<SessionRecord, RecorderError> {
        let (Some(orders), Some(trades), Some(marks)) = (self.orders.take(), self.trades.take(), self.marks.take())
        else {
            return Err(RecorderError::Finalized);
        };
        let dir = self.record.session_dir.clone();
        for (mut file, name) in [(orders, ORDERS_FILE), (trades, TRADES_FILE), (marks, MARKS_FILE)] {
            file.flush().map_err(|e| RecorderError::io(dir.join(name), e))?;
            if self.fsync {
                file.sync_all().map_err(|e| RecorderError::io(dir.join(name), e))?;
            }
        }

        let end_time = Utc::now();
        self.record.end_time = Some(end_time);
        let summary = self.summary(end_time);
        write_json_atomic(&dir.join(SUMMARY_FILE), &summary)?;
        write_json_atomic(&dir.join(SESSION_FILE), &self.record)?;

        info!(
            "📊 Session {} finalized: {} fills, win rate {:.1}%, total P&L {:.2}",
            self.record.session_id, summary.total_fills, summary.win_rate, summary.total_pnl
        );
        Ok(self.record.clone())
    }

    fn summary(&self, end_time: DateTime<Utc>) -> SessionSummary {
        let initial_capital = self
            .record
            .config_snapshot
            .get("initial_capital")
            .and_then(|v| v.as_f64())
            .or_else(|| self.last_account.as_ref().map(|a| a.initial_capital))
            .unwrap_or(0.0);
        let (final_equity, max_drawdown) = self
            .last_account
            .as_ref()
            .map(|a| (a.equity, a.max_drawdown_seen))
            .unwrap_or((initial_capital, 0.0));

        let tally = &self.tally;
        let win_rate = if tally.closing > 0 {
            tally.winners as f64 / tally.closing as f64 * 100.0
        } else {
            0.0
        };

        SessionSummary {
            session_id: self.record.session_id,
            strategy_name: self.record.strategy_name.clone(),
            start_time: self.record.start_time,
            end_time,
            duration_seconds: (end_time - self.record.start_time).num_milliseconds() as f64 / 1000.0,
            total_fills: tally.fills,
            closing_trades: tally.closing,
            winning_trades: tally.winners,
            losing_trades: tally.losers,
            win_rate,
            realized_pnl: tally.realized,
            commission_paid: tally.commission,
            total_pnl: final_equity - initial_capital,
            max_drawdown,
            initial_capital,
            final_equity,
        }
    }

    /// Swap the trades log for a read-only handle so the next append fails.
    #[cfg(test)]
    pub(crate) fn break_trades_log(&mut self) -> std::io::Result<()> {
        self.trades = Some(File::open(self.record.session_dir.join(TRADES_FILE))?);
        Ok(())
    }
}

/// `<output_dir>/<date>/<time>_<strategy>`, made unique if it already exists.
fn session_dir_for(output_dir: &Path, strategy_name: &str, start: DateTime<Utc>) -> Result<PathBuf, RecorderError> {
    let strategy: String = strategy_name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let day_dir = output_dir.join(start.format("%Y-%m-%d").to_string());
    let base = format!("{}_{}", start.format("%H-%M-%S"), strategy);

    let mut dir = day_dir.join(&base);
    while dir.exists() {
        dir = day_dir.join(format!("{}_{}", base, nanoid::nanoid!(6)));
    }
    fs::create_dir_all(&dir).map_err(|e| RecorderError::io(&dir, e))?;
    Ok(dir)
}

fn open_append(path: &Path) -> Result<File, RecorderError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RecorderError::io(path, e))
}

fn append_line<T: Serialize>(file: &mut File, path: &Path, value: &T, fsync: bool) -> Result<(), RecorderError> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    file.write_all(&line).map_err(|e| RecorderError::io(path, e))?;
    file.flush().map_err(|e| RecorderError::io(path, e))?;
    if fsync {
        file.sync_data().map_err(|e| RecorderError::io(path, e))?;
    }
    Ok(())
}

/// Write via a sibling temp file and rename, so readers never see a torn file.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RecorderError> {
    let tmp = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp, bytes).map_err(|e| RecorderError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| RecorderError::io(path, e))
}
