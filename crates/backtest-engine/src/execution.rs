use std::collections::HashMap;

use chrono::NaiveDate;

use crate::commission::CommissionModel;
use crate::error::EngineError;
use crate::models::{
    PairSignal, PairSignalType, Portfolio, Trade, TradeSide, WeightSignal, MIN_TRADE_SHARES,
};

/// Close-price execution: fills at the current day's chosen price column,
/// no slippage, no partial fills, no market impact.
pub struct CloseExecution<'a> {
    pub commission_model: &'a CommissionModel,
}

impl<'a> CloseExecution<'a> {
    pub fn new(commission_model: &'a CommissionModel) -> Self {
        Self { commission_model }
    }

    /// Apply a `PairSignal` against `portfolio`, returning every trade it
    /// produced. `capital_per_pair` sizes a new OPEN; a CLOSE sizes off the
    /// currently held legs and ignores `capital_per_pair`.
    pub fn apply_pair_signal(
        &self,
        signal: &PairSignal,
        date: NaiveDate,
        prices: &HashMap<String, f64>,
        portfolio: &mut Portfolio,
        capital_per_pair: f64,
    ) -> Result<Vec<Trade>, EngineError> {
        match signal.signal_type {
            PairSignalType::Open => self.open_pair(signal, date, prices, portfolio, capital_per_pair),
            PairSignalType::Close => self.close_pair(signal, date, prices, portfolio),
        }
    }

    fn open_pair(
        &self,
        signal: &PairSignal,
        date: NaiveDate,
        prices: &HashMap<String, f64>,
        portfolio: &mut Portfolio,
        capital_per_pair: f64,
    ) -> Result<Vec<Trade>, EngineError> {
        let long_price = *prices.get(&signal.long_symbol).ok_or_else(|| EngineError::Execution {
            symbol: Some(signal.long_symbol.clone()),
            reason: "no price available to open pair".to_string(),
        })?;
        let short_price = *prices.get(&signal.short_symbol).ok_or_else(|| EngineError::Execution {
            symbol: Some(signal.short_symbol.clone()),
            reason: "no price available to open pair".to_string(),
        })?;

        let long_notional = capital_per_pair / (1.0 + signal.hedge_ratio);
        let short_notional = long_notional * signal.hedge_ratio;
        let long_shares = long_notional / long_price;
        let short_shares = short_notional / short_price;

        let long_commission = self.commission_model.calculate(long_shares, long_price);
        let short_commission = self.commission_model.calculate(short_shares, short_price);

        let pair_id = signal
            .pair_id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", signal.long_symbol, signal.short_symbol));

        let long_trade = Trade {
            date,
            symbol: signal.long_symbol.clone(),
            side: TradeSide::Long,
            shares: long_shares,
            price: long_price,
            commission: long_commission,
            pair_id: Some(pair_id.clone()),
        };
        let short_trade = Trade {
            date,
            symbol: signal.short_symbol.clone(),
            side: TradeSide::Short,
            shares: short_shares,
            price: short_price,
            commission: short_commission,
            pair_id: Some(pair_id.clone()),
        };

        portfolio.open_pair(pair_id, &long_trade, &short_trade, signal.hedge_ratio, date)?;
        Ok(vec![long_trade, short_trade])
    }

    fn close_pair(
        &self,
        signal: &PairSignal,
        date: NaiveDate,
        prices: &HashMap<String, f64>,
        portfolio: &mut Portfolio,
    ) -> Result<Vec<Trade>, EngineError> {
        let pair_id = signal.pair_id.clone().ok_or_else(|| EngineError::InvalidSignal {
            reason: "CLOSE pair signal requires pair_id".to_string(),
        })?;
        let pair = portfolio.pair_positions.get(&pair_id).ok_or_else(|| EngineError::Execution {
            symbol: None,
            reason: format!("no active pair with id '{pair_id}'"),
        })?;

        let long_symbol = pair.long_leg.symbol.clone();
        let short_symbol = pair.short_leg.symbol.clone();
        let long_shares = pair.long_leg.shares.abs();
        let short_shares = pair.short_leg.shares.abs();

        let long_price = *prices.get(&long_symbol).ok_or_else(|| EngineError::Execution {
            symbol: Some(long_symbol.clone()),
            reason: "no price available to close pair".to_string(),
        })?;
        let short_price = *prices.get(&short_symbol).ok_or_else(|| EngineError::Execution {
            symbol: Some(short_symbol.clone()),
            reason: "no price available to close pair".to_string(),
        })?;

        let long_commission = self.commission_model.calculate(long_shares, long_price);
        let short_commission = self.commission_model.calculate(short_shares, short_price);

        // Closing reverses each leg's side: sell the long, buy to cover the short.
        let long_close = Trade {
            date,
            symbol: long_symbol,
            side: TradeSide::Short,
            shares: long_shares,
            price: long_price,
            commission: long_commission,
            pair_id: Some(pair_id.clone()),
        };
        let short_close = Trade {
            date,
            symbol: short_symbol,
            side: TradeSide::Long,
            shares: short_shares,
            price: short_price,
            commission: short_commission,
            pair_id: Some(pair_id.clone()),
        };

        portfolio.close_pair(&pair_id, &long_close, &short_close)?;
        Ok(vec![long_close, short_close])
    }

    /// Apply a `WeightSignal`: for each symbol in insertion order, compute
    /// the share delta needed to hit its target weight of current equity and
    /// execute it immediately, skipping deltas smaller than
    /// `MIN_TRADE_SHARES`. All target prices must be known up front; if any
    /// is missing the whole signal is rejected before any trade runs.
    pub fn apply_weight_signal(
        &self,
        signal: &WeightSignal,
        date: NaiveDate,
        prices: &HashMap<String, f64>,
        portfolio: &mut Portfolio,
    ) -> Result<Vec<Trade>, EngineError> {
        for (symbol, _) in &signal.weights {
            if !prices.contains_key(symbol) {
                return Err(EngineError::Execution {
                    symbol: Some(symbol.clone()),
                    reason: "no price available for weight-signal target".to_string(),
                });
            }
        }

        let target_equity = portfolio.equity();
        let mut trades = Vec::new();

        for (symbol, weight) in &signal.weights {
            let price = prices[symbol];
            if price <= 0.0 {
                continue;
            }
            let target_shares = target_equity * weight / price;
            let current_shares = portfolio
                .positions
                .get(symbol)
                .map(|p| p.shares)
                .unwrap_or(0.0);
            let diff = target_shares - current_shares;
            if diff.abs() < MIN_TRADE_SHARES {
                continue;
            }

            let side = if diff > 0.0 { TradeSide::Long } else { TradeSide::Short };
            let shares = diff.abs();
            let commission = self.commission_model.calculate(shares, price);
            let trade = Trade {
                date,
                symbol: symbol.clone(),
                side,
                shares,
                price,
                commission,
                pair_id: None,
            };
            portfolio.execute_trade(&trade)?;
            trades.push(trade);
        }

        Ok(trades)
    }
}
