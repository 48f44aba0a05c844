use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;
use rust_decimal::prelude::*;

use crate::error::EngineError;
use crate::models::PriceBar;

pub const DEFAULT_EXTREME_MOVE_THRESHOLD: f64 = 0.50;
pub const DEFAULT_ADJUSTMENT_JUMP_THRESHOLD: f64 = 0.10;
pub const DEFAULT_MAX_CONSECUTIVE_MISSING: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Gap {
    pub symbol: String,
    pub before: NaiveDate,
    pub after: NaiveDate,
    pub calendar_days: i64,
    pub trading_days_missed: i64,
}

/// Flags any consecutive-date delta over 5 calendar days as a gap, which is
/// wider than a normal weekend (Friday -> Monday is 3 days).
pub fn find_gaps(symbol: &str, bars: &[PriceBar]) -> Vec<Gap> {
    bars.windows(2)
        .filter_map(|w| {
            let delta = (w[1].date - w[0].date).num_days();
            if delta > 5 {
                Some(Gap {
                    symbol: symbol.to_string(),
                    before: w[0].date,
                    after: w[1].date,
                    calendar_days: delta,
                    trading_days_missed: (delta * 5 / 7) - 1,
                })
            } else {
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingDataStrategy {
    ForwardFill,
    BackwardFill,
    Drop,
    Interpolate,
    Raise,
}

/// Repair a per-symbol bar sequence according to `strategy`. Forward/
/// backward fill refuse to paper over a run of more than `max_consecutive`
/// missing trading days — the original context is too stale to extrapolate
/// past that point. `Interpolate` has no such limit: a straight line between
/// two known points is defined no matter how far apart they are.
pub fn handle_missing_data(
    symbol: &str,
    bars: Vec<PriceBar>,
    strategy: MissingDataStrategy,
    max_consecutive: usize,
) -> Result<Vec<PriceBar>, EngineError> {
    let gaps = find_gaps(symbol, &bars);
    let max_run = gaps.iter().map(|g| g.trading_days_missed.max(0) as usize).max().unwrap_or(0);

    match strategy {
        MissingDataStrategy::Raise => {
            if !gaps.is_empty() {
                return Err(EngineError::DataQuality {
                    check_name: "missing_data".to_string(),
                    symbol: Some(symbol.to_string()),
                    details: format!("{} gap(s) found", gaps.len()),
                });
            }
            Ok(bars)
        }
        MissingDataStrategy::Drop => Ok(bars),
        MissingDataStrategy::ForwardFill => {
            if max_run > max_consecutive {
                return Err(EngineError::DataQuality {
                    check_name: "missing_data".to_string(),
                    symbol: Some(symbol.to_string()),
                    details: format!(
                        "longest gap ({max_run} trading days) exceeds max_consecutive ({max_consecutive})"
                    ),
                });
            }
            Ok(fill_gaps(symbol, bars, FillDirection::Forward))
        }
        MissingDataStrategy::BackwardFill => {
            if max_run > max_consecutive {
                return Err(EngineError::DataQuality {
                    check_name: "missing_data".to_string(),
                    symbol: Some(symbol.to_string()),
                    details: format!(
                        "longest gap ({max_run} trading days) exceeds max_consecutive ({max_consecutive})"
                    ),
                });
            }
            Ok(fill_gaps(symbol, bars, FillDirection::Backward))
        }
        MissingDataStrategy::Interpolate => Ok(interpolate_gaps(symbol, bars)),
    }
}

enum FillDirection {
    Forward,
    Backward,
}

/// Inserts one bar per missing calendar day inside a detected gap, carrying
/// the neighboring bar's OHLCV forward (or backward) unchanged except for
/// `date`. Days outside any detected gap are untouched.
fn fill_gaps(symbol: &str, bars: Vec<PriceBar>, direction: FillDirection) -> Vec<PriceBar> {
    if bars.is_empty() {
        return bars;
    }
    let mut filled = Vec::with_capacity(bars.len());
    filled.push(bars[0].clone());

    for window in bars.windows(2) {
        let (before, after) = (&window[0], &window[1]);
        let missing_days = (after.date - before.date).num_days() - 1;
        if missing_days > 0 && missing_days <= 5 {
            let source = match direction {
                FillDirection::Forward => before,
                FillDirection::Backward => after,
            };
            for i in 1..=missing_days {
                let mut synthetic = source.clone();
                synthetic.symbol = symbol.to_string();
                synthetic.date = before.date + chrono::Duration::days(i);
                filled.push(synthetic);
            }
        }
        filled.push(after.clone());
    }
    filled
}

/// Linearly interpolates every OHLCV field across a gap's missing calendar
/// days. Unlike `fill_gaps`, this runs regardless of gap length.
fn interpolate_gaps(symbol: &str, bars: Vec<PriceBar>) -> Vec<PriceBar> {
    if bars.is_empty() {
        return bars;
    }
    let mut filled = Vec::with_capacity(bars.len());
    filled.push(bars[0].clone());

    for window in bars.windows(2) {
        let (before, after) = (&window[0], &window[1]);
        let span = (after.date - before.date).num_days();
        if span > 1 {
            for i in 1..span {
                let lerp = |a: Decimal, b: Decimal| a + (b - a) * Decimal::from(i) / Decimal::from(span);
                filled.push(PriceBar {
                    symbol: symbol.to_string(),
                    date: before.date + chrono::Duration::days(i),
                    open: lerp(before.open, after.open),
                    high: lerp(before.high, after.high),
                    low: lerp(before.low, after.low),
                    close: lerp(before.close, after.close),
                    adj_close: lerp(before.adj_close, after.adj_close),
                    volume: (before.volume + after.volume) / 2,
                });
            }
        }
        filled.push(after.clone());
    }
    filled
}

#[derive(Debug, Clone, PartialEq)]
pub struct SanityIssue {
    pub symbol: String,
    pub date: NaiveDate,
    pub kind: String,
    pub detail: String,
}

/// Flags negative prices, `high < low`, close outside `[low, high]`, and
/// single-day moves larger than `extreme_move_threshold`.
pub fn check_price_sanity(symbol: &str, bars: &[PriceBar], extreme_move_threshold: f64) -> Vec<SanityIssue> {
    let mut issues = Vec::new();

    for (i, bar) in bars.iter().enumerate() {
        if bar.open < Decimal::ZERO || bar.close < Decimal::ZERO {
            issues.push(SanityIssue {
                symbol: symbol.to_string(),
                date: bar.date,
                kind: "negative_price".to_string(),
                detail: "open/close below zero".to_string(),
            });
        }
        if bar.high < bar.low {
            issues.push(SanityIssue {
                symbol: symbol.to_string(),
                date: bar.date,
                kind: "high_below_low".to_string(),
                detail: format!("high {} < low {}", bar.high, bar.low),
            });
        }
        if bar.close < bar.low || bar.close > bar.high {
            issues.push(SanityIssue {
                symbol: symbol.to_string(),
                date: bar.date,
                kind: "close_outside_range".to_string(),
                detail: format!("close {} outside [{}, {}]", bar.close, bar.low, bar.high),
            });
        }
        if i > 0 {
            let prev_close = bars[i - 1].close.to_f64().unwrap_or(0.0);
            let close = bar.close.to_f64().unwrap_or(0.0);
            if prev_close > 0.0 {
                let pct_change = ((close - prev_close) / prev_close).abs();
                if pct_change > extreme_move_threshold {
                    issues.push(SanityIssue {
                        symbol: symbol.to_string(),
                        date: bar.date,
                        kind: "extreme_move".to_string(),
                        detail: format!("{:.1}% single-day move", pct_change * 100.0),
                    });
                }
            }
        }
    }
    issues
}

/// Flags day-over-day adjustment-factor changes (`adj_close / close`)
/// greater than `jump_threshold`, a signal of an unexplained corporate
/// action in the adjusted series.
pub fn check_adjusted_prices(symbol: &str, bars: &[PriceBar], jump_threshold: f64) -> Vec<SanityIssue> {
    let factors: Vec<f64> = bars
        .iter()
        .map(|b| {
            let close = b.close.to_f64().unwrap_or(0.0);
            let adj = b.adj_close.to_f64().unwrap_or(0.0);
            if close > 0.0 {
                adj / close
            } else {
                1.0
            }
        })
        .collect();

    factors
        .windows(2)
        .zip(bars.windows(2))
        .filter_map(|(f, b)| {
            if f[0] == 0.0 {
                return None;
            }
            let jump = ((f[1] - f[0]) / f[0]).abs();
            if jump > jump_threshold {
                Some(SanityIssue {
                    symbol: symbol.to_string(),
                    date: b[1].date,
                    kind: "adjustment_jump".to_string(),
                    detail: format!("{:.1}% adjustment-factor change", jump * 100.0),
                })
            } else {
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    Inner,
    Outer,
    Left,
    Right,
}

/// Restricts two per-symbol date->bar maps to the date set implied by
/// `mode`, both returned sorted ascending. `Outer` is a true union of
/// dates — unlike the data-ingestion reference this is grounded on, which
/// leaves its outer branch unimplemented, this is required to be complete.
pub fn align_dates(
    left: &HashMap<NaiveDate, PriceBar>,
    right: &HashMap<NaiveDate, PriceBar>,
    mode: JoinMode,
) -> Vec<NaiveDate> {
    let left_dates: BTreeSet<NaiveDate> = left.keys().copied().collect();
    let right_dates: BTreeSet<NaiveDate> = right.keys().copied().collect();

    let dates: BTreeSet<NaiveDate> = match mode {
        JoinMode::Inner => left_dates.intersection(&right_dates).copied().collect(),
        JoinMode::Outer => left_dates.union(&right_dates).copied().collect(),
        JoinMode::Left => left_dates,
        JoinMode::Right => right_dates,
    };

    dates.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(date: &str, close: f64) -> PriceBar {
        PriceBar::new(
            "A".to_string(),
            NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            dec!(0),
            Decimal::try_from(close + 1.0).unwrap(),
            dec!(0),
            Decimal::try_from(close).unwrap(),
            Decimal::try_from(close).unwrap(),
            1000,
        )
        .unwrap()
    }

    #[test]
    fn gap_detection_flags_long_breaks() {
        let bars = vec![bar("2020-01-01", 10.0), bar("2020-01-20", 11.0)];
        let gaps = find_gaps("A", &bars);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].calendar_days, 19);
    }

    #[test]
    fn weekend_gap_is_not_flagged() {
        let bars = vec![bar("2020-01-03", 10.0), bar("2020-01-06", 10.5)]; // Fri -> Mon
        assert!(find_gaps("A", &bars).is_empty());
    }

    #[test]
    fn extreme_move_flagged() {
        let bars = vec![bar("2020-01-01", 100.0), bar("2020-01-02", 200.0)];
        let issues = check_price_sanity("A", &bars, DEFAULT_EXTREME_MOVE_THRESHOLD);
        assert!(issues.iter().any(|i| i.kind == "extreme_move"));
    }

    #[test]
    fn forward_fill_carries_last_known_price_into_gap() {
        let bars = vec![bar("2020-01-01", 10.0), bar("2020-01-04", 12.0)];
        let filled = handle_missing_data("A", bars, MissingDataStrategy::ForwardFill, 5).unwrap();
        assert_eq!(filled.len(), 4);
        assert_eq!(filled[1].close, dec!(10.0));
        assert_eq!(filled[2].close, dec!(10.0));
        assert_eq!(filled[3].close, dec!(12.0));
    }

    #[test]
    fn backward_fill_carries_next_known_price_into_gap() {
        let bars = vec![bar("2020-01-01", 10.0), bar("2020-01-04", 12.0)];
        let filled = handle_missing_data("A", bars, MissingDataStrategy::BackwardFill, 5).unwrap();
        assert_eq!(filled.len(), 4);
        assert_eq!(filled[1].close, dec!(12.0));
        assert_eq!(filled[2].close, dec!(12.0));
    }

    #[test]
    fn forward_fill_rejects_gap_longer_than_max_consecutive() {
        let bars = vec![bar("2020-01-01", 10.0), bar("2020-01-20", 12.0)];
        let err = handle_missing_data("A", bars, MissingDataStrategy::ForwardFill, 5).unwrap_err();
        assert!(matches!(err, EngineError::DataQuality { .. }));
    }

    #[test]
    fn interpolate_is_linear_and_unconditional() {
        let bars = vec![bar("2020-01-01", 10.0), bar("2020-01-04", 13.0)];
        let filled = handle_missing_data("A", bars, MissingDataStrategy::Interpolate, 0).unwrap();
        assert_eq!(filled.len(), 4);
        assert_eq!(filled[1].close, dec!(11.0));
        assert_eq!(filled[2].close, dec!(12.0));
    }

    #[test]
    fn outer_join_is_true_union() {
        let mut left = HashMap::new();
        left.insert(NaiveDate::parse_from_str("2020-01-01", "%Y-%m-%d").unwrap(), bar("2020-01-01", 1.0));
        let mut right = HashMap::new();
        right.insert(NaiveDate::parse_from_str("2020-01-02", "%Y-%m-%d").unwrap(), bar("2020-01-02", 1.0));
        let dates = align_dates(&left, &right, JoinMode::Outer);
        assert_eq!(dates.len(), 2);
    }
}
