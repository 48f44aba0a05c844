use crate::error::EngineError;
use crate::models::{PairSignalType, Portfolio, Signal, WeightSignal};

/// A filter applied between strategy and execution. `validate` checks
/// whether a signal is acceptable as-is; `adjust` returns a modified signal
/// when it is not, or an error when it cannot be made acceptable.
pub trait Constraint {
    fn name(&self) -> &str;
    fn validate(&self, signal: &Signal, portfolio: &Portfolio) -> bool;
    fn adjust(&self, signal: Signal, portfolio: &Portfolio) -> Result<Signal, EngineError>;
}

/// Keeps a `WeightSignal` dollar-neutral within `tolerance`; `PairSignal`s
/// (hedge_ratio = 1.0 implies dollar-neutral by construction) always pass.
pub struct DollarNeutralConstraint {
    pub tolerance: f64,
}

impl Default for DollarNeutralConstraint {
    fn default() -> Self {
        Self { tolerance: 0.01 }
    }
}

impl Constraint for DollarNeutralConstraint {
    fn name(&self) -> &str {
        "dollar_neutral"
    }

    fn validate(&self, signal: &Signal, _portfolio: &Portfolio) -> bool {
        match signal {
            Signal::Pair(_) | Signal::None => true,
            Signal::Weight(w) => {
                let net: f64 = w.weights.iter().map(|(_, weight)| weight).sum();
                net.abs() <= self.tolerance
            }
        }
    }

    fn adjust(&self, signal: Signal, portfolio: &Portfolio) -> Result<Signal, EngineError> {
        let Signal::Weight(w) = signal else {
            return Ok(signal);
        };
        if self.validate(&Signal::Weight(w.clone()), portfolio) {
            return Ok(Signal::Weight(w));
        }

        let long_sum: f64 = w.weights.iter().map(|(_, v)| v).filter(|v| **v > 0.0).sum();
        let short_sum: f64 = w.weights.iter().map(|(_, v)| v).filter(|v| **v < 0.0).sum::<f64>().abs();

        if long_sum == 0.0 || short_sum == 0.0 {
            // Can't neutralize a one-sided book; leave unchanged.
            return Ok(Signal::Weight(w));
        }

        let target_side = (long_sum + short_sum) / 2.0;
        let long_scale = target_side / long_sum;
        let short_scale = target_side / short_sum;

        let adjusted = w
            .weights
            .into_iter()
            .map(|(sym, weight)| {
                let scaled = if weight > 0.0 {
                    weight * long_scale
                } else if weight < 0.0 {
                    weight * short_scale
                } else {
                    weight
                };
                (sym, scaled)
            })
            .collect();

        Ok(Signal::Weight(WeightSignal {
            weights: adjusted,
            ..w
        }))
    }
}

/// Caps per-symbol weight at `max_position_pct` and total gross exposure at
/// `max_gross_exposure`, scaling uniformly if clipping alone isn't enough.
pub struct PositionLimitConstraint {
    pub max_position_pct: f64,
    pub max_gross_exposure: f64,
}

impl Default for PositionLimitConstraint {
    fn default() -> Self {
        Self {
            max_position_pct: 0.10,
            max_gross_exposure: 2.0,
        }
    }
}

impl Constraint for PositionLimitConstraint {
    fn name(&self) -> &str {
        "position_limit"
    }

    fn validate(&self, signal: &Signal, _portfolio: &Portfolio) -> bool {
        match signal {
            Signal::Pair(_) | Signal::None => true,
            Signal::Weight(w) => {
                let within_per_symbol = w
                    .weights
                    .iter()
                    .all(|(_, weight)| weight.abs() <= self.max_position_pct);
                let gross: f64 = w.weights.iter().map(|(_, weight)| weight.abs()).sum();
                within_per_symbol && gross <= self.max_gross_exposure
            }
        }
    }

    fn adjust(&self, signal: Signal, portfolio: &Portfolio) -> Result<Signal, EngineError> {
        let Signal::Weight(w) = signal else {
            return Ok(signal);
        };
        if self.validate(&Signal::Weight(w.clone()), portfolio) {
            return Ok(Signal::Weight(w));
        }

        let mut clipped: Vec<(String, f64)> = w
            .weights
            .iter()
            .map(|(sym, weight)| (sym.clone(), weight.clamp(-self.max_position_pct, self.max_position_pct)))
            .collect();

        let gross: f64 = clipped.iter().map(|(_, weight)| weight.abs()).sum();
        if gross > self.max_gross_exposure && gross > 0.0 {
            let scale = self.max_gross_exposure / gross;
            for (_, weight) in clipped.iter_mut() {
                *weight *= scale;
            }
        }

        Ok(Signal::Weight(WeightSignal {
            weights: clipped,
            ..w
        }))
    }
}

/// Rejects an OPEN `PairSignal` once `max_pairs` pair positions are already
/// active; never touches `WeightSignal`s.
pub struct MaxPairsConstraint {
    pub max_pairs: usize,
}

impl Default for MaxPairsConstraint {
    fn default() -> Self {
        Self { max_pairs: 10 }
    }
}

impl Constraint for MaxPairsConstraint {
    fn name(&self) -> &str {
        "max_pairs"
    }

    fn validate(&self, signal: &Signal, portfolio: &Portfolio) -> bool {
        match signal {
            Signal::Pair(p) if p.signal_type == PairSignalType::Open => {
                portfolio.num_pair_positions() < self.max_pairs
            }
            _ => true,
        }
    }

    fn adjust(&self, signal: Signal, portfolio: &Portfolio) -> Result<Signal, EngineError> {
        if self.validate(&signal, portfolio) {
            return Ok(signal);
        }
        Err(EngineError::ConstraintViolation {
            constraint_name: self.name().to_string(),
            details: format!("already at max_pairs = {}", self.max_pairs),
        })
    }
}
