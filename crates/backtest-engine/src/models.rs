use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::commission::CommissionModel;
use crate::error::EngineError;

/// Trading-days-per-year convention used everywhere returns are annualized.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;
pub const DEFAULT_CAPITAL_PER_PAIR: f64 = 10_000.0;
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.0;
pub const DEFAULT_MAX_POSITION_PCT: f64 = 0.10;
pub const DEFAULT_MAX_GROSS_EXPOSURE: f64 = 2.0;
pub const DEFAULT_NEUTRALITY_TOLERANCE: f64 = 0.01;
pub const MIN_TRADING_DAYS_FOR_METRICS: usize = 20;
/// Weight-signal trades smaller than this (in shares) are skipped rather
/// than executed, matching the reference execution model.
pub const MIN_TRADE_SHARES: f64 = 0.01;

/// One day's OHLCV row for one symbol, already adjusted for splits/dividends
/// upstream. Exact decimal in storage; converted to `f64` once, at the
/// boundary where simulation math begins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub adj_close: Decimal,
    pub volume: i64,
}

impl PriceBar {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: String,
        date: NaiveDate,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        adj_close: Decimal,
        volume: i64,
    ) -> Result<Self, EngineError> {
        if high < low {
            return Err(EngineError::DataQuality {
                check_name: "ohlc_consistency".to_string(),
                symbol: Some(symbol),
                details: format!("high ({high}) < low ({low})"),
            });
        }
        if open < Decimal::ZERO || close < Decimal::ZERO {
            return Err(EngineError::DataQuality {
                check_name: "negative_price".to_string(),
                symbol: Some(symbol),
                details: "open/close must be non-negative".to_string(),
            });
        }
        if !(low <= open && open <= high) || !(low <= close && close <= high) {
            return Err(EngineError::DataQuality {
                check_name: "ohlc_consistency".to_string(),
                symbol: Some(symbol),
                details: "open/close must fall within [low, high]".to_string(),
            });
        }
        if volume < 0 {
            return Err(EngineError::DataQuality {
                check_name: "negative_volume".to_string(),
                symbol: Some(symbol),
                details: "volume must be non-negative".to_string(),
            });
        }
        Ok(Self {
            symbol,
            date,
            open,
            high,
            low,
            close,
            adj_close,
            volume,
        })
    }

    /// Price according to the chosen `PriceColumn`, as `f64` for simulation math.
    pub fn price(&self, column: PriceColumn) -> f64 {
        let d = match column {
            PriceColumn::Close => self.close,
            PriceColumn::AdjClose => self.adj_close,
            PriceColumn::Open => self.open,
        };
        d.to_f64().unwrap_or(0.0)
    }
}

/// Which OHLCV column the engine reads for fills and signal evaluation.
/// Default is `AdjClose`, matching the reference implementation's
/// `DEFAULT_PRICE_COLUMN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceColumn {
    Open,
    Close,
    AdjClose,
}

impl Default for PriceColumn {
    fn default() -> Self {
        PriceColumn::AdjClose
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorporateActionType {
    Split,
    Dividend,
    Delisting,
    Merger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    pub symbol: String,
    pub date: NaiveDate,
    pub kind: CorporateActionType,
    pub value: Decimal,
}

/// Capability returning the tradable symbol set, optionally as of a date.
///
/// `StaticUniverse` ignores `as_of` entirely and therefore carries
/// survivorship bias: a symbol delisted before the query date is still
/// reported as a member. Point-in-time-accurate membership (e.g. historical
/// index constituents) is an ingestion-side concern outside this crate;
/// document the caveat at call sites rather than attempt to fix it here.
pub trait Universe: Send + Sync {
    fn symbols(&self, as_of: Option<NaiveDate>) -> Vec<String>;
}

pub struct StaticUniverse {
    symbols: Vec<String>,
}

impl StaticUniverse {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }
}

impl Universe for StaticUniverse {
    fn symbols(&self, _as_of: Option<NaiveDate>) -> Vec<String> {
        self.symbols.clone()
    }
}

/// Per-symbol position. `shares > 0` is long, `< 0` is short, `= 0` is flat
/// (and is removed from `Portfolio.positions` rather than kept around at
/// zero).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub shares: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            shares: 0.0,
            avg_entry_price: 0.0,
            current_price: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.shares == 0.0
    }

    pub fn market_value(&self) -> f64 {
        self.shares * self.current_price
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.market_value() - self.shares * self.avg_entry_price
    }

    /// Apply a signed share delta at `price`, following the documented
    /// add-shares rule: same-direction adds blend the average entry price;
    /// opposite-direction reduces realize P&L on the closed portion; a
    /// reduction larger than the current position flips direction and opens
    /// the remainder fresh. Returns the realized P&L from this single call.
    pub fn add_shares(&mut self, signed_shares: f64, price: f64) -> f64 {
        if self.shares == 0.0 {
            self.shares = signed_shares;
            self.avg_entry_price = price;
            return 0.0;
        }

        let same_direction = self.shares.signum() == signed_shares.signum();
        if same_direction {
            let new_shares = self.shares + signed_shares;
            self.avg_entry_price =
                (self.shares * self.avg_entry_price + signed_shares * price) / new_shares;
            self.shares = new_shares;
            return 0.0;
        }

        let closing = signed_shares.abs().min(self.shares.abs());
        let realized = if self.shares > 0.0 {
            closing * (price - self.avg_entry_price)
        } else {
            closing * (self.avg_entry_price - price)
        };
        self.realized_pnl += realized;

        if signed_shares.abs() > self.shares.abs() {
            // Flip: close everything, then open the remainder at `price`.
            let remainder = signed_shares + self.shares;
            self.shares = remainder;
            self.avg_entry_price = price;
        } else {
            self.shares += signed_shares;
            if self.shares == 0.0 {
                self.avg_entry_price = 0.0;
            }
        }
        realized
    }
}

/// Two `Position`s traded together: a long leg with positive shares and a
/// short leg with negative shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairPosition {
    pub pair_id: String,
    pub long_leg: Position,
    pub short_leg: Position,
    pub hedge_ratio: f64,
    pub entry_date: NaiveDate,
}

impl PairPosition {
    pub fn is_closed(&self) -> bool {
        self.long_leg.is_flat() && self.short_leg.is_flat()
    }

    pub fn market_value(&self) -> f64 {
        self.long_leg.market_value() + self.short_leg.market_value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeSide {
    Long,
    Short,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub date: NaiveDate,
    pub symbol: String,
    pub side: TradeSide,
    pub shares: f64,
    pub price: f64,
    pub commission: f64,
    pub pair_id: Option<String>,
}

impl Trade {
    /// Signed share delta: positive for LONG (buy/cover), negative for SHORT
    /// (sell/short).
    pub fn signed_shares(&self) -> f64 {
        match self.side {
            TradeSide::Long => self.shares,
            TradeSide::Short => -self.shares,
        }
    }

    pub fn notional(&self) -> f64 {
        self.shares * self.price
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairSignalType {
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairSignal {
    pub signal_type: PairSignalType,
    pub long_symbol: String,
    pub short_symbol: String,
    pub hedge_ratio: f64,
    pub pair_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSignal {
    pub weights: Vec<(String, f64)>,
    pub rebalance: bool,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Exactly one of a pair instruction, a target-weight instruction, or
/// nothing at all. A strategy emits at most one `Signal` per bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    Pair(PairSignal),
    Weight(WeightSignal),
    None,
}

/// Cash, per-symbol positions, per-pair positions, and the running equity
/// curve. Owned exclusively by the simulation runner; a strategy may read it
/// (through accessors the runner chooses to expose) but never mutates it
/// directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub initial_capital: f64,
    pub cash: f64,
    pub positions: HashMap<String, Position>,
    pub pair_positions: HashMap<String, PairPosition>,
    pub equity_curve: Vec<(NaiveDate, f64)>,
    pub cumulative_commission: f64,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            cash: initial_capital,
            positions: HashMap::new(),
            pair_positions: HashMap::new(),
            equity_curve: Vec::new(),
            cumulative_commission: 0.0,
        }
    }

    pub fn reset(&mut self) {
        *self = Portfolio::new(self.initial_capital);
    }

    pub fn equity(&self) -> f64 {
        self.cash
            + self.positions.values().map(Position::market_value).sum::<f64>()
            + self.pair_positions.values().map(PairPosition::market_value).sum::<f64>()
    }

    pub fn gross_exposure(&self) -> f64 {
        self.positions.values().map(|p| p.market_value().abs()).sum::<f64>()
            + self
                .pair_positions
                .values()
                .map(|p| p.long_leg.market_value().abs() + p.short_leg.market_value().abs())
                .sum::<f64>()
    }

    pub fn net_exposure(&self) -> f64 {
        self.positions.values().map(Position::market_value).sum::<f64>()
            + self.pair_positions.values().map(PairPosition::market_value).sum::<f64>()
    }

    pub fn num_positions(&self) -> usize {
        self.positions.len()
    }

    pub fn num_pair_positions(&self) -> usize {
        self.pair_positions.len()
    }

    pub fn realized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.realized_pnl).sum::<f64>()
            + self
                .pair_positions
                .values()
                .map(|p| p.long_leg.realized_pnl + p.short_leg.realized_pnl)
                .sum::<f64>()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.values().map(Position::unrealized_pnl).sum::<f64>()
            + self
                .pair_positions
                .values()
                .map(|p| p.long_leg.unrealized_pnl() + p.short_leg.unrealized_pnl())
                .sum::<f64>()
    }

    /// Refresh `current_price` on every held position; symbols not currently
    /// held are ignored.
    pub fn update_prices(&mut self, prices: &HashMap<String, f64>) {
        for (symbol, pos) in self.positions.iter_mut() {
            if let Some(&price) = prices.get(symbol) {
                pos.current_price = price;
            }
        }
        for pair in self.pair_positions.values_mut() {
            if let Some(&price) = prices.get(&pair.long_leg.symbol) {
                pair.long_leg.current_price = price;
            }
            if let Some(&price) = prices.get(&pair.short_leg.symbol) {
                pair.short_leg.current_price = price;
            }
        }
    }

    /// Append an equity-curve point. Caller must advance `date`
    /// monotonically; the portfolio does not check this itself (the
    /// simulation loop's date sequence already guarantees it).
    pub fn record_equity(&mut self, date: NaiveDate) {
        self.equity_curve.push((date, self.equity()));
    }

    /// Commit a single-symbol trade: debits cash for a LONG trade
    /// (`shares*price + commission`), credits cash for a SHORT trade
    /// (`shares*price - commission`). Returns the realized P&L from this
    /// fill (non-zero only if it closes or flips an existing position).
    pub fn execute_trade(&mut self, trade: &Trade) -> Result<f64, EngineError> {
        let cost = trade.notional() + trade.commission;
        if trade.side == TradeSide::Long && cost > self.cash {
            return Err(EngineError::InsufficientCapital {
                required: cost,
                available: self.cash,
                symbol: Some(trade.symbol.clone()),
            });
        }

        match trade.side {
            TradeSide::Long => self.cash -= cost,
            TradeSide::Short => self.cash += trade.notional() - trade.commission,
        }
        self.cumulative_commission += trade.commission;

        let position = self
            .positions
            .entry(trade.symbol.clone())
            .or_insert_with(|| Position::new(trade.symbol.clone()));
        position.current_price = trade.price;
        let realized = position.add_shares(trade.signed_shares(), trade.price);
        if position.is_flat() {
            self.positions.remove(&trade.symbol);
        }
        Ok(realized)
    }

    /// Atomically open a new pair position: validates cash for the long leg,
    /// applies both cash flows, and stores the `PairPosition`.
    pub fn open_pair(
        &mut self,
        pair_id: String,
        long_trade: &Trade,
        short_trade: &Trade,
        hedge_ratio: f64,
        entry_date: NaiveDate,
    ) -> Result<(), EngineError> {
        let long_cost = long_trade.notional() + long_trade.commission;
        if long_cost > self.cash {
            return Err(EngineError::InsufficientCapital {
                required: long_cost,
                available: self.cash,
                symbol: Some(long_trade.symbol.clone()),
            });
        }

        let mut long_leg = Position::new(long_trade.symbol.clone());
        long_leg.current_price = long_trade.price;
        long_leg.add_shares(long_trade.signed_shares(), long_trade.price);

        let mut short_leg = Position::new(short_trade.symbol.clone());
        short_leg.current_price = short_trade.price;
        short_leg.add_shares(short_trade.signed_shares(), short_trade.price);

        self.cash -= long_cost;
        self.cash += short_trade.notional() - short_trade.commission;
        self.cumulative_commission += long_trade.commission + short_trade.commission;

        self.pair_positions.insert(
            pair_id.clone(),
            PairPosition {
                pair_id,
                long_leg,
                short_leg,
                hedge_ratio,
                entry_date,
            },
        );
        Ok(())
    }

    /// Close an existing pair position using the provided close trades
    /// (shares must match the held leg sizes; this is validated by the
    /// execution model before it gets here).
    pub fn close_pair(
        &mut self,
        pair_id: &str,
        long_close: &Trade,
        short_close: &Trade,
    ) -> Result<f64, EngineError> {
        let mut pair = self
            .pair_positions
            .remove(pair_id)
            .ok_or_else(|| EngineError::Execution {
                symbol: None,
                reason: format!("no active pair with id '{pair_id}'"),
            })?;

        self.cash += long_close.notional() - long_close.commission;
        self.cash -= short_close.notional() + short_close.commission;
        self.cumulative_commission += long_close.commission + short_close.commission;

        let long_realized = pair.long_leg.add_shares(long_close.signed_shares(), long_close.price);
        let short_realized = pair.short_leg.add_shares(short_close.signed_shares(), short_close.price);
        Ok(long_realized + short_realized)
    }
}

/// Append-only record of executed trades.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeLog {
    pub trades: Vec<Trade>,
}

impl TradeLog {
    pub fn push(&mut self, trade: Trade) {
        self.trades.push(trade);
    }

    pub fn for_symbol<'a>(&'a self, symbol: &'a str) -> impl Iterator<Item = &'a Trade> {
        self.trades.iter().filter(move |t| t.symbol == symbol)
    }

    pub fn for_pair<'a>(&'a self, pair_id: &'a str) -> impl Iterator<Item = &'a Trade> {
        self.trades
            .iter()
            .filter(move |t| t.pair_id.as_deref() == Some(pair_id))
    }

    pub fn in_range(&self, start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(move |t| t.date >= start && t.date <= end)
    }
}

/// A matched entry/exit pair reconstructed from the trade log, never
/// mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub pair_id: String,
    pub entry_date: NaiveDate,
    pub exit_date: Option<NaiveDate>,
    pub long_symbol: String,
    pub short_symbol: String,
    pub long_entry_price: f64,
    pub short_entry_price: f64,
    pub long_exit_price: f64,
    pub short_exit_price: f64,
    pub long_shares: f64,
    pub short_shares: f64,
    pub pnl: f64,
    pub holding_days: i64,
    pub return_pct: f64,
    pub commission: f64,
    pub is_open: bool,
}

impl RoundTrip {
    pub fn entry_notional(&self) -> f64 {
        self.long_shares * self.long_entry_price + self.short_shares * self.short_entry_price
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > 0.0
    }
}

/// Aggregate statistics over a set of round trips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStatistics {
    pub total_round_trips: usize,
    pub closed_round_trips: usize,
    pub open_round_trips: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub avg_holding_days: f64,
    pub max_holding_days: i64,
    pub min_holding_days: i64,
    pub avg_return_pct: f64,
    pub best_trade_pct: f64,
    pub worst_trade_pct: f64,
    pub total_pnl: f64,
    pub total_commission: f64,
}

/// One maximal contiguous span where equity sat below its prior running max.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawdownPeriod {
    pub start_date: NaiveDate,
    pub trough_date: NaiveDate,
    pub recovery_date: Option<NaiveDate>,
    pub peak_equity: f64,
    pub trough_equity: f64,
    pub drawdown_pct: f64,
    pub duration_days: i64,
    pub recovery_days: Option<i64>,
}

/// Validated runner configuration. Constructed only through `try_new`, which
/// enforces the same invariants as the reference `BacktestConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub capital_per_pair: f64,
    pub price_column: PriceColumn,
    pub risk_free_rate: f64,
    #[serde(skip)]
    pub commission_model: CommissionModel,
}

impl BacktestConfig {
    #[allow(clippy::too_many_arguments)]
    pub fn try_new(
        start_date: NaiveDate,
        end_date: NaiveDate,
        initial_capital: f64,
        capital_per_pair: f64,
        price_column: PriceColumn,
        risk_free_rate: f64,
        commission_model: CommissionModel,
    ) -> Result<Self, EngineError> {
        if start_date >= end_date {
            return Err(EngineError::InvalidConfig(format!(
                "start_date ({start_date}) must be before end_date ({end_date})"
            )));
        }
        if initial_capital <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "initial_capital must be positive".to_string(),
            ));
        }
        if capital_per_pair <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "capital_per_pair must be positive".to_string(),
            ));
        }
        if capital_per_pair > initial_capital {
            return Err(EngineError::InvalidConfig(
                "capital_per_pair cannot exceed initial_capital".to_string(),
            ));
        }
        Ok(Self {
            start_date,
            end_date,
            initial_capital,
            capital_per_pair,
            price_column,
            risk_free_rate,
            commission_model,
        })
    }

    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}

/// Tabular row used by `BacktestResult::trades_df`-equivalent output; this
/// crate carries no dataframe dependency, so the "frame" is a `Vec` of this
/// struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub date: NaiveDate,
    pub symbol: String,
    pub side: TradeSide,
    pub shares: f64,
    pub price: f64,
    pub commission: f64,
    pub pair_id: Option<String>,
}

impl From<&Trade> for TradeRow {
    fn from(t: &Trade) -> Self {
        Self {
            date: t.date,
            symbol: t.symbol.clone(),
            side: t.side,
            shares: t.shares,
            price: t.price,
            commission: t.commission,
            pair_id: t.pair_id.clone(),
        }
    }
}

/// Everything a completed run produced: the final portfolio state, the full
/// trade log, the reconstructed round trips, and the derived performance
/// report. Immutable once assembled by the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub config: BacktestConfig,
    pub portfolio: Portfolio,
    pub trade_log: TradeLog,
    pub round_trips: Vec<RoundTrip>,
    pub trade_statistics: TradeStatistics,
    pub metrics: crate::metrics::PerformanceMetrics,
}

impl BacktestResult {
    pub fn equity_curve(&self) -> &[(NaiveDate, f64)] {
        &self.portfolio.equity_curve
    }

    pub fn daily_returns(&self) -> Vec<f64> {
        self.portfolio
            .equity_curve
            .windows(2)
            .map(|w| (w[1].1 - w[0].1) / w[0].1)
            .collect()
    }

    pub fn cumulative_returns(&self) -> Vec<f64> {
        let initial = self.portfolio.initial_capital;
        self.portfolio
            .equity_curve
            .iter()
            .map(|(_, equity)| (equity - initial) / initial)
            .collect()
    }

    pub fn trades_df(&self) -> Vec<TradeRow> {
        self.trade_log.trades.iter().map(TradeRow::from).collect()
    }

    pub fn final_equity(&self) -> f64 {
        self.portfolio.equity_curve.last().map(|(_, e)| *e).unwrap_or(self.portfolio.initial_capital)
    }

    pub fn summary(&self) -> String {
        format!(
            "{}: {:.2}% return, {:.2} Sharpe, {} round trips ({:.1}% win rate), max drawdown {:.2}%",
            self.strategy_name,
            self.metrics.total_return * 100.0,
            self.metrics.sharpe_ratio,
            self.trade_statistics.closed_round_trips,
            self.trade_statistics.win_rate * 100.0,
            self.metrics.max_drawdown * 100.0,
        )
    }

    /// Serializes the full result to pretty-printed JSON for a caller that
    /// wants to persist or ship it, rather than consume the typed struct.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
