use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::constraints::Constraint;
use crate::error::EngineError;
use crate::execution::CloseExecution;
use crate::models::{
    BacktestConfig, BacktestResult, Portfolio, PriceBar, Signal, TradeLog,
};
use crate::pit::PointInTime;
use crate::strategy::Strategy;
use crate::trade_analysis::{calculate_trade_statistics, match_round_trips};

/// Drives the event loop: for every trading day in `[config.start_date,
/// config.end_date]`, advance the point-in-time view first, read that day's
/// prices, dispatch the strategy's signal through the constraint chain, then
/// execute whatever survives at the close.
pub struct BacktestRunner {
    config: BacktestConfig,
    constraints: Vec<Box<dyn Constraint>>,
}

impl BacktestRunner {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            constraints: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint: Box<dyn Constraint>) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// Run `strategy` against `bars` (per-symbol rows, need not be
    /// pre-sorted). Any error aborts the run; there is no partial result.
    pub fn run(
        &self,
        bars: BTreeMap<String, Vec<PriceBar>>,
        strategy: &mut dyn Strategy,
    ) -> Result<BacktestResult, EngineError> {
        let _span = tracing::debug_span!("backtest_run", strategy = strategy.name()).entered();

        let mut bars = bars;
        for rows in bars.values_mut() {
            rows.sort_by_key(|b| b.date);
        }

        let trading_dates = self.trading_dates(&bars);
        if trading_dates.is_empty() {
            return Err(EngineError::Backtest {
                phase: "setup".to_string(),
                message: "no trading dates within the configured date range".to_string(),
            });
        }

        let mut portfolio = Portfolio::new(self.config.initial_capital);
        let mut trade_log = TradeLog::default();
        let execution = CloseExecution::new(&self.config.commission_model);

        let mut pit = PointInTime::new(bars.clone(), trading_dates[0]);
        strategy.on_start(self.config.start_date, self.config.end_date);

        for &date in &trading_dates {
            pit = pit.advance_to(date)?;

            let prices = self.prices_on(&pit, &bars, date);
            portfolio.update_prices(&prices);

            let signal = strategy.on_bar(date, &pit).map_err(|e| EngineError::Strategy {
                strategy_name: strategy.name().to_string(),
                date,
                message: e.to_string(),
            })?;

            if matches!(signal, Signal::None) {
                portfolio.record_equity(date);
                continue;
            }

            let signal = match self.apply_constraints(signal, &portfolio) {
                Ok(signal) => signal,
                Err(e) => {
                    warn!(%date, error = %e, "signal rejected by constraint chain");
                    portfolio.record_equity(date);
                    continue;
                }
            };

            let trades = match &signal {
                Signal::Pair(p) => execution.apply_pair_signal(
                    p,
                    date,
                    &prices,
                    &mut portfolio,
                    self.config.capital_per_pair,
                ),
                Signal::Weight(w) => execution.apply_weight_signal(w, date, &prices, &mut portfolio),
                Signal::None => Ok(Vec::new()),
            }?;

            for trade in &trades {
                strategy.on_fill(trade);
                trade_log.push(trade.clone());
            }
            debug!(%date, num_trades = trades.len(), "signal executed");

            portfolio.record_equity(date);
        }

        strategy.on_end();

        let end_date = *trading_dates.last().unwrap();
        let final_prices = self.prices_on(&pit, &bars, end_date);
        let round_trips = match_round_trips(&trade_log, Some(&final_prices), true, Some(end_date));
        let trade_statistics = calculate_trade_statistics(&round_trips);
        let metrics = crate::metrics::calculate_metrics(
            &portfolio.equity_curve,
            &round_trips,
            portfolio.cumulative_commission,
            self.config.risk_free_rate,
        );

        Ok(BacktestResult {
            strategy_name: strategy.name().to_string(),
            config: self.config.clone(),
            portfolio,
            trade_log,
            round_trips,
            trade_statistics,
            metrics,
        })
    }

    fn apply_constraints(&self, mut signal: Signal, portfolio: &Portfolio) -> Result<Signal, EngineError> {
        for constraint in &self.constraints {
            if !constraint.validate(&signal, portfolio) {
                signal = constraint.adjust(signal, portfolio)?;
            }
        }
        Ok(signal)
    }

    fn trading_dates(&self, bars: &BTreeMap<String, Vec<PriceBar>>) -> Vec<NaiveDate> {
        let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
        for rows in bars.values() {
            for bar in rows {
                if bar.date >= self.config.start_date && bar.date <= self.config.end_date {
                    dates.insert(bar.date);
                }
            }
        }
        dates.into_iter().collect()
    }

    fn prices_on(
        &self,
        pit: &PointInTime,
        bars: &BTreeMap<String, Vec<PriceBar>>,
        date: NaiveDate,
    ) -> HashMap<String, f64> {
        bars.keys()
            .filter_map(|symbol| {
                pit.for_symbol(symbol)
                    .into_iter()
                    .rev()
                    .find(|b| b.date == date)
                    .map(|b| (symbol.clone(), b.price(self.config.price_column)))
            })
            .collect()
    }
}
