use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::models::{RoundTrip, TradeStatistics, MIN_TRADING_DAYS_FOR_METRICS, TRADING_DAYS_PER_YEAR};
use crate::trade_analysis::calculate_trade_statistics;

/// Full performance report computed from an equity curve and the round
/// trips derived from its trade log. Below `MIN_TRADING_DAYS_FOR_METRICS`
/// equity points this is returned zeroed (save for trade counts) rather
/// than computed on too little data to be meaningful.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_return: f64,
    pub annualized_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_duration_days: i64,
    pub drawdown_periods: Vec<DrawdownSummary>,
    pub var_95: f64,
    pub cvar_95: f64,
    pub skewness: f64,
    pub excess_kurtosis: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_trade_return_pct: f64,
    pub num_trades: usize,
    pub total_commission: f64,
    // Additive metrics beyond the base list; supplement the same daily
    // return series rather than change any value above.
    pub ulcer_index: f64,
    pub pain_index: f64,
    pub gain_to_pain_ratio: f64,
    pub monthly_returns: Vec<MonthlyReturn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawdownSummary {
    pub start_date: NaiveDate,
    pub trough_date: NaiveDate,
    pub recovery_date: Option<NaiveDate>,
    pub drawdown_pct: f64,
    pub duration_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    pub return_pct: f64,
}

pub fn calculate_metrics(
    equity_curve: &[(NaiveDate, f64)],
    round_trips: &[RoundTrip],
    total_commission: f64,
    risk_free_rate: f64,
) -> PerformanceMetrics {
    if equity_curve.len() < MIN_TRADING_DAYS_FOR_METRICS {
        return PerformanceMetrics {
            num_trades: round_trips.len(),
            total_commission,
            ..Default::default()
        };
    }

    let initial = equity_curve[0].1;
    let final_equity = equity_curve.last().unwrap().1;
    let total_return = (final_equity - initial) / initial;

    let exponent = TRADING_DAYS_PER_YEAR / equity_curve.len() as f64;
    let annualized_return = if final_equity > 0.0 && initial > 0.0 {
        (final_equity / initial).powf(exponent) - 1.0
    } else {
        0.0
    };

    let daily_returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .filter(|r| r.is_finite())
        .collect();

    let mean_daily = mean(&daily_returns);
    let volatility = stdev(&daily_returns) * TRADING_DAYS_PER_YEAR.sqrt();
    let rf_daily = risk_free_rate / TRADING_DAYS_PER_YEAR;
    let sharpe_ratio = {
        let sd = stdev(&daily_returns);
        if sd > 0.0 {
            (mean_daily - rf_daily) / sd * TRADING_DAYS_PER_YEAR.sqrt()
        } else {
            0.0
        }
    };

    // Downside deviation is measured against a zero target, not the downside
    // sample's own mean, so it isn't the plain `Statistics::std_dev` moment.
    let downside: Vec<f64> = daily_returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_vol = deviation_from_target(&downside, 0.0) * TRADING_DAYS_PER_YEAR.sqrt();
    let sortino_ratio = if downside_vol > 0.0 {
        (annualized_return - risk_free_rate) / downside_vol
    } else {
        0.0
    };

    let (max_drawdown, max_drawdown_duration, periods) = drawdown_analysis(equity_curve);
    let calmar_ratio = if max_drawdown.abs() > 0.0 {
        annualized_return / max_drawdown.abs()
    } else {
        0.0
    };

    let (var_95, cvar_95) = historical_var(&daily_returns, 0.95);
    let skewness = skew(&daily_returns, mean_daily);
    let excess_kurtosis = kurtosis(&daily_returns, mean_daily);

    let stats = calculate_trade_statistics(round_trips);

    let drawdown_curve = running_drawdown_curve(equity_curve);
    let ulcer_index = (drawdown_curve.iter().map(|d| d * d).sum::<f64>() / drawdown_curve.len() as f64).sqrt();
    let pain_index = drawdown_curve.iter().map(|d| d.abs()).sum::<f64>() / drawdown_curve.len() as f64;

    let gains: f64 = daily_returns.iter().copied().filter(|r| *r > 0.0).sum();
    let pains: f64 = daily_returns.iter().copied().filter(|r| *r < 0.0).map(f64::abs).sum();
    let gain_to_pain_ratio = if pains > 0.0 { gains / pains } else { 0.0 };

    PerformanceMetrics {
        total_return,
        annualized_return,
        volatility,
        sharpe_ratio,
        sortino_ratio,
        calmar_ratio,
        max_drawdown,
        max_drawdown_duration_days: max_drawdown_duration,
        drawdown_periods: periods,
        var_95,
        cvar_95,
        skewness,
        excess_kurtosis,
        win_rate: stats.win_rate,
        profit_factor: stats.profit_factor,
        avg_trade_return_pct: stats.avg_return_pct,
        num_trades: round_trips.len(),
        total_commission,
        ulcer_index,
        pain_index,
        gain_to_pain_ratio,
        monthly_returns: monthly_breakdown(equity_curve),
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.mean()
    }
}

/// Sample standard deviation (n-1 divisor), matching the corpus's own use of
/// `Statistics::std_dev` for volatility figures.
fn stdev(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        0.0
    } else {
        xs.std_dev()
    }
}

/// Root-mean-square deviation from a fixed `target` rather than the
/// sample's own mean — not a moment `statrs` exposes, needed for downside
/// deviation against a zero minimum-acceptable-return.
fn deviation_from_target(xs: &[f64], target: f64) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    (xs.iter().map(|x| (x - target).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

fn skew(xs: &[f64], mean_val: f64) -> f64 {
    if xs.len() < 4 {
        return 0.0;
    }
    let sd = stdev(xs);
    if sd == 0.0 {
        return 0.0;
    }
    let n = xs.len() as f64;
    xs.iter().map(|x| ((x - mean_val) / sd).powi(3)).sum::<f64>() / n
}

fn kurtosis(xs: &[f64], mean_val: f64) -> f64 {
    if xs.len() < 4 {
        return 0.0;
    }
    let sd = stdev(xs);
    if sd == 0.0 {
        return 0.0;
    }
    let n = xs.len() as f64;
    xs.iter().map(|x| ((x - mean_val) / sd).powi(4)).sum::<f64>() / n - 3.0
}

/// Historical VaR/CVaR via `statrs`'s percentile order statistic, the same
/// pattern used elsewhere in the corpus for tail-risk figures.
fn historical_var(returns: &[f64], confidence: f64) -> (f64, f64) {
    if returns.is_empty() {
        return (0.0, 0.0);
    }
    let mut data = Data::new(returns.to_vec());
    let percentile = (((1.0 - confidence) * 100.0).round() as usize).min(100);
    let var = data.percentile(percentile);
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    let cvar = if tail.is_empty() { var } else { tail.mean() };
    (var, cvar)
}

fn running_drawdown_curve(equity_curve: &[(NaiveDate, f64)]) -> Vec<f64> {
    let mut peak = equity_curve[0].1;
    equity_curve
        .iter()
        .map(|(_, equity)| {
            peak = peak.max(*equity);
            if peak > 0.0 {
                (equity - peak) / peak
            } else {
                0.0
            }
        })
        .collect()
}

fn drawdown_analysis(equity_curve: &[(NaiveDate, f64)]) -> (f64, i64, Vec<DrawdownSummary>) {
    let mut periods = Vec::new();
    let mut peak = equity_curve[0].1;
    let mut peak_date = equity_curve[0].0;
    let mut in_drawdown = false;
    let mut trough = peak;
    let mut trough_date = peak_date;

    let mut max_dd = 0.0;
    let mut max_dd_duration = 0i64;

    for &(date, equity) in equity_curve {
        if equity >= peak {
            if in_drawdown {
                // Recovered.
                let dd_pct = (trough - peak) / peak;
                let duration = (date - peak_date).num_days();
                max_dd = max_dd.min(dd_pct);
                max_dd_duration = max_dd_duration.max(duration);
                periods.push(DrawdownSummary {
                    start_date: peak_date,
                    trough_date,
                    recovery_date: Some(date),
                    drawdown_pct: dd_pct,
                    duration_days: duration,
                });
                in_drawdown = false;
            }
            peak = equity;
            peak_date = date;
        } else {
            if !in_drawdown {
                in_drawdown = true;
                trough = equity;
                trough_date = date;
            } else if equity < trough {
                trough = equity;
                trough_date = date;
            }
        }
    }

    if in_drawdown {
        let dd_pct = (trough - peak) / peak;
        let last_date = equity_curve.last().unwrap().0;
        let duration = (last_date - peak_date).num_days();
        max_dd = max_dd.min(dd_pct);
        max_dd_duration = max_dd_duration.max(duration);
        periods.push(DrawdownSummary {
            start_date: peak_date,
            trough_date,
            recovery_date: None,
            drawdown_pct: dd_pct,
            duration_days: duration,
        });
    }

    (max_dd, max_dd_duration, periods)
}

fn monthly_breakdown(equity_curve: &[(NaiveDate, f64)]) -> Vec<MonthlyReturn> {
    use chrono::Datelike;
    use std::collections::BTreeMap;

    let mut opens: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    let mut closes: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for &(date, equity) in equity_curve {
        let key = (date.year(), date.month());
        opens.entry(key).or_insert(equity);
        closes.insert(key, equity);
    }

    opens
        .into_iter()
        .map(|((year, month), open)| {
            let close = closes[&(year, month)];
            let return_pct = if open != 0.0 { (close - open) / open } else { 0.0 };
            MonthlyReturn { year, month, return_pct }
        })
        .collect()
}

/// Rolling Sharpe over `window` equity points, computed in parallel per
/// window when the curve is large enough to benefit.
pub fn rolling_sharpe(equity_curve: &[(NaiveDate, f64)], window: usize, risk_free_rate: f64) -> Vec<f64> {
    if equity_curve.len() <= window {
        return Vec::new();
    }
    let returns: Vec<f64> = equity_curve
        .windows(2)
        .map(|w| (w[1].1 - w[0].1) / w[0].1)
        .collect();

    let compute = |start: usize| -> f64 {
        let slice = &returns[start..start + window];
        let m = mean(slice);
        let sd = stdev(slice);
        if sd > 0.0 {
            (m - risk_free_rate / TRADING_DAYS_PER_YEAR) / sd * TRADING_DAYS_PER_YEAR.sqrt()
        } else {
            0.0
        }
    };

    if returns.len() > 512 {
        (0..=returns.len() - window).into_par_iter().map(compute).collect()
    } else {
        (0..=returns.len() - window).map(compute).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve(values: &[f64]) -> Vec<(NaiveDate, f64)> {
        let base = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (base + chrono::Duration::days(i as i64), *v))
            .collect()
    }

    #[test]
    fn below_minimum_days_returns_zeroed_metrics() {
        let c = curve(&[100.0, 101.0, 102.0]);
        let metrics = calculate_metrics(&c, &[], 0.0, 0.0);
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.num_trades, 0);
    }

    #[test]
    fn flat_equity_has_zero_drawdown_and_sharpe() {
        let values: Vec<f64> = (0..30).map(|_| 100_000.0).collect();
        let c = curve(&values);
        let metrics = calculate_metrics(&c, &[], 0.0, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
    }

    #[test]
    fn drawdown_detects_peak_trough_recovery() {
        let mut values = vec![100.0; 10];
        values.extend(vec![90.0, 85.0, 80.0]);
        values.extend(vec![95.0, 105.0]);
        values.extend(vec![105.0; 10]);
        let c = curve(&values);
        let metrics = calculate_metrics(&c, &[], 0.0, 0.0);
        assert!(metrics.max_drawdown < 0.0);
        assert!(!metrics.drawdown_periods.is_empty());
    }
}
