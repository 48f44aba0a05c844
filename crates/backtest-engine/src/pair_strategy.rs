use std::collections::HashMap;

use chrono::NaiveDate;
use statrs::statistics::Statistics;

use crate::error::EngineError;
use crate::models::{PairSignal, PairSignalType, PriceColumn, Signal};
use crate::pit::PointInTime;
use crate::strategy::Strategy;

#[derive(Debug, Clone)]
struct CandidatePair {
    symbol_a: String,
    symbol_b: String,
}

impl CandidatePair {
    fn pair_id(&self) -> String {
        format!("{}_{}", self.symbol_a, self.symbol_b)
    }
}

#[derive(Debug, Clone)]
struct ActivePair {
    pair_id: String,
    long_symbol: String,
    short_symbol: String,
    /// The `(symbol_a, symbol_b)` orientation the z-score was computed in at
    /// entry. Exit must recompute in this same orientation, not the
    /// long/short orientation, or the sign of `z` flips relative to
    /// `entry_zscore` and `sign_flipped` fires immediately.
    formation_symbol_a: String,
    formation_symbol_b: String,
    entry_zscore: f64,
    days_held: i64,
}

/// Reference distance-based (Gatev-Goetzmann-Rouwenhorst) pair strategy:
/// formation by sum-of-squared-deviations over normalized cumulative
/// returns, trading by rolling spread z-score with a time stop.
pub struct DistancePairStrategy {
    pub symbols: Vec<String>,
    pub formation_period: usize,
    pub lookback: usize,
    pub entry_threshold: f64,
    pub exit_threshold: f64,
    pub max_holding_days: i64,
    pub top_n_pairs: usize,
    pub min_correlation: f64,
    pub price_column: PriceColumn,

    name: String,
    bars_seen: usize,
    candidates: Vec<CandidatePair>,
    formed: bool,
    active: Vec<ActivePair>,
}

impl DistancePairStrategy {
    pub fn new(symbols: Vec<String>) -> Self {
        Self {
            symbols,
            formation_period: 120,
            lookback: 120,
            entry_threshold: 2.0,
            exit_threshold: 0.5,
            max_holding_days: 20,
            top_n_pairs: 5,
            min_correlation: 0.8,
            price_column: PriceColumn::AdjClose,
            name: "distance_pair_strategy".to_string(),
            bars_seen: 0,
            candidates: Vec::new(),
            formed: false,
            active: Vec::new(),
        }
    }

    fn run_formation(&mut self, pit: &PointInTime) {
        let mut scored: Vec<(CandidatePair, f64)> = Vec::new();

        for i in 0..self.symbols.len() {
            for j in (i + 1)..self.symbols.len() {
                let a = &self.symbols[i];
                let b = &self.symbols[j];
                let series_a = last_n_bars(pit, a, self.price_column, self.formation_period);
                let series_b = last_n_bars(pit, b, self.price_column, self.formation_period);

                let aligned = align_by_date(&series_a, &series_b);
                let min_overlap = (self.formation_period as f64 * 0.8) as usize;
                if aligned.len() < min_overlap {
                    continue;
                }

                let (norm_a, norm_b) = normalize_pair(&aligned);
                let corr = correlation(&norm_a, &norm_b);
                if corr < self.min_correlation {
                    continue;
                }

                let ssd: f64 = norm_a
                    .iter()
                    .zip(norm_b.iter())
                    .map(|(x, y)| (x - y).powi(2))
                    .sum();

                scored.push((
                    CandidatePair {
                        symbol_a: a.clone(),
                        symbol_b: b.clone(),
                    },
                    ssd,
                ));
            }
        }

        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(self.top_n_pairs);
        self.candidates = scored.into_iter().map(|(pair, _)| pair).collect();
        self.formed = true;
    }

    fn zscore(&self, pit: &PointInTime, candidate: &CandidatePair) -> Option<f64> {
        let series_a = last_n_bars(pit, &candidate.symbol_a, self.price_column, self.lookback);
        let series_b = last_n_bars(pit, &candidate.symbol_b, self.price_column, self.lookback);
        let aligned = align_by_date(&series_a, &series_b);

        let min_len = (self.lookback as f64 * 0.5) as usize;
        if aligned.len() < min_len {
            return None;
        }

        let (norm_a, norm_b) = normalize_pair(&aligned);
        let spread: Vec<f64> = norm_a.iter().zip(norm_b.iter()).map(|(x, y)| x - y).collect();

        let mean = spread.iter().sum::<f64>() / spread.len() as f64;
        let variance = spread.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / spread.len() as f64;
        let stdev = variance.sqrt();
        if stdev == 0.0 || !stdev.is_finite() {
            return None;
        }

        let z = (spread.last().copied().unwrap_or(0.0) - mean) / stdev;
        z.is_finite().then_some(z)
    }

    fn check_exits(&mut self, pit: &PointInTime) -> Option<PairSignal> {
        for active in self.active.iter_mut() {
            active.days_held += 1;
        }

        let mut exit_index = None;
        for (idx, active) in self.active.iter().enumerate() {
            let candidate = CandidatePair {
                symbol_a: active.formation_symbol_a.clone(),
                symbol_b: active.formation_symbol_b.clone(),
            };
            // Recompute z in the same (a, b) orientation used at entry so its
            // sign is directly comparable to `entry_zscore`.
            let z = self.zscore(pit, &candidate);

            let time_stop = active.days_held >= self.max_holding_days;
            let mean_reverted = z.map(|z| z.abs() <= self.exit_threshold).unwrap_or(false);
            let sign_flipped = z
                .map(|z| z.signum() != active.entry_zscore.signum() && active.entry_zscore != 0.0)
                .unwrap_or(false);

            if time_stop || mean_reverted || sign_flipped {
                exit_index = Some(idx);
                break;
            }
        }

        exit_index.map(|idx| {
            let active = self.active.remove(idx);
            PairSignal {
                signal_type: PairSignalType::Close,
                long_symbol: active.long_symbol,
                short_symbol: active.short_symbol,
                hedge_ratio: 1.0,
                pair_id: Some(active.pair_id),
                metadata: Default::default(),
            }
        })
    }

    fn check_entries(&mut self, pit: &PointInTime) -> Option<PairSignal> {
        for candidate in self.candidates.clone() {
            let pair_id = candidate.pair_id();
            if self.active.iter().any(|a| a.pair_id == pair_id) {
                continue;
            }

            let Some(z) = self.zscore(pit, &candidate) else {
                continue;
            };

            if z > self.entry_threshold {
                // `a` is rich relative to `b`: short a, long b.
                self.active.push(ActivePair {
                    pair_id: pair_id.clone(),
                    long_symbol: candidate.symbol_b.clone(),
                    short_symbol: candidate.symbol_a.clone(),
                    formation_symbol_a: candidate.symbol_a.clone(),
                    formation_symbol_b: candidate.symbol_b.clone(),
                    entry_zscore: z,
                    days_held: 0,
                });
                return Some(PairSignal {
                    signal_type: PairSignalType::Open,
                    long_symbol: candidate.symbol_b,
                    short_symbol: candidate.symbol_a,
                    hedge_ratio: 1.0,
                    pair_id: Some(pair_id),
                    metadata: Default::default(),
                });
            } else if z < -self.entry_threshold {
                self.active.push(ActivePair {
                    pair_id: pair_id.clone(),
                    long_symbol: candidate.symbol_a.clone(),
                    short_symbol: candidate.symbol_b.clone(),
                    formation_symbol_a: candidate.symbol_a.clone(),
                    formation_symbol_b: candidate.symbol_b.clone(),
                    entry_zscore: z,
                    days_held: 0,
                });
                return Some(PairSignal {
                    signal_type: PairSignalType::Open,
                    long_symbol: candidate.symbol_a,
                    short_symbol: candidate.symbol_b,
                    hedge_ratio: 1.0,
                    pair_id: Some(pair_id),
                    metadata: Default::default(),
                });
            }
        }
        None
    }
}

impl Strategy for DistancePairStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_bar(&mut self, _date: NaiveDate, pit: &PointInTime) -> Result<Signal, EngineError> {
        self.bars_seen += 1;

        if !self.formed && self.bars_seen >= self.formation_period {
            self.run_formation(pit);
        }
        if !self.formed {
            return Ok(Signal::None);
        }

        if let Some(close) = self.check_exits(pit) {
            return Ok(Signal::Pair(close));
        }
        if let Some(open) = self.check_entries(pit) {
            return Ok(Signal::Pair(open));
        }
        Ok(Signal::None)
    }
}

fn last_n_bars(
    pit: &PointInTime,
    symbol: &str,
    column: PriceColumn,
    n: usize,
) -> Vec<(NaiveDate, f64)> {
    let rows = pit.for_symbol(symbol);
    let len = rows.len();
    let start = len.saturating_sub(n);
    rows[start..].iter().map(|b| (b.date, b.price(column))).collect()
}

fn align_by_date(a: &[(NaiveDate, f64)], b: &[(NaiveDate, f64)]) -> Vec<(f64, f64)> {
    let b_map: HashMap<NaiveDate, f64> = b.iter().cloned().collect();
    a.iter()
        .filter_map(|(date, price_a)| b_map.get(date).map(|price_b| (*price_a, *price_b)))
        .collect()
}

/// Re-normalize both series relative to their own first value in this
/// specific window (not the formation period's basis), matching the
/// reference strategy's rolling z-score computation.
fn normalize_pair(aligned: &[(f64, f64)]) -> (Vec<f64>, Vec<f64>) {
    let (p0_a, p0_b) = aligned[0];
    let norm_a = aligned.iter().map(|(a, _)| a / p0_a - 1.0).collect();
    let norm_b = aligned.iter().map(|(_, b)| b / p0_b - 1.0).collect();
    (norm_a, norm_b)
}

/// Pearson correlation. `statrs` has no bivariate moment, so the covariance
/// sum is still hand-written, but the per-series mean/std-dev it's
/// normalized by come from `Statistics` rather than a second hand-rolled pass.
fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean_a = a.mean();
    let mean_b = b.mean();
    let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - mean_a) * (y - mean_b)).sum::<f64>() / n;
    let std_a = a.population_std_dev();
    let std_b = b.population_std_dev();
    if std_a == 0.0 || std_b == 0.0 {
        0.0
    } else {
        cov / (std_a * std_b)
    }
}
