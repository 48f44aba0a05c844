use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::commission::CommissionModel;
use crate::constraints::{Constraint, DollarNeutralConstraint, MaxPairsConstraint, PositionLimitConstraint};
use crate::engine::BacktestRunner;
use crate::error::EngineError;
use crate::execution::CloseExecution;
use crate::models::{
    BacktestConfig, PairSignal, PairSignalType, Portfolio, PriceBar, PriceColumn, Signal,
    WeightSignal,
};
use crate::pair_strategy::DistancePairStrategy;
use crate::pit::PointInTime;
use crate::strategy::Strategy;
use crate::synthetic::SyntheticMarket;

fn bar(symbol: &str, date: NaiveDate, close: f64) -> PriceBar {
    let d = Decimal::try_from(close).unwrap();
    PriceBar::new(symbol.to_string(), date, d, d, d, d, d, 1_000_000).unwrap()
}

fn flat_series(symbol: &str, start: NaiveDate, days: i64, price: f64) -> Vec<PriceBar> {
    (0..days).map(|i| bar(symbol, start + chrono::Duration::days(i), price)).collect()
}

struct NoopStrategy;

impl Strategy for NoopStrategy {
    fn name(&self) -> &str {
        "noop"
    }

    fn on_bar(&mut self, _date: NaiveDate, _pit: &PointInTime) -> Result<Signal, EngineError> {
        Ok(Signal::None)
    }
}

/// Opens the pair on the first bar, closes it on the second, never touches it again.
struct OneRoundTripStrategy {
    step: u32,
}

impl Strategy for OneRoundTripStrategy {
    fn name(&self) -> &str {
        "one_round_trip"
    }

    fn on_bar(&mut self, _date: NaiveDate, _pit: &PointInTime) -> Result<Signal, EngineError> {
        self.step += 1;
        match self.step {
            1 => Ok(Signal::Pair(PairSignal {
                signal_type: PairSignalType::Open,
                long_symbol: "A".into(),
                short_symbol: "B".into(),
                hedge_ratio: 1.0,
                pair_id: Some("A_B".into()),
                metadata: Default::default(),
            })),
            2 => Ok(Signal::Pair(PairSignal {
                signal_type: PairSignalType::Close,
                long_symbol: "A".into(),
                short_symbol: "B".into(),
                hedge_ratio: 1.0,
                pair_id: Some("A_B".into()),
                metadata: Default::default(),
            })),
            _ => Ok(Signal::None),
        }
    }
}

fn config(start: NaiveDate, end: NaiveDate, initial_capital: f64, capital_per_pair: f64) -> BacktestConfig {
    BacktestConfig::try_new(
        start,
        end,
        initial_capital,
        capital_per_pair,
        PriceColumn::Close,
        0.0,
        CommissionModel::Zero,
    )
    .unwrap()
}

// S1: a strategy that never trades leaves equity untouched and produces one
// equity point per trading day.
#[test]
fn s1_flat_strategy_never_trades() {
    let start = NaiveDate::from_ymd_opt(2020, 3, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2020, 3, 10).unwrap();
    let mut bars = BTreeMap::new();
    bars.insert("A".to_string(), flat_series("A", start, 10, 100.0));

    let runner = BacktestRunner::new(config(start, end, 100_000.0, 10_000.0));
    let mut strategy = NoopStrategy;
    let result = runner.run(bars, &mut strategy).unwrap();

    assert_eq!(result.trade_log.trades.len(), 0);
    assert_eq!(result.final_equity(), 100_000.0);
    assert_eq!(result.portfolio.equity_curve.len(), 10);
}

// S2: opening and closing a flat-priced pair with zero commission nets to
// exactly zero pnl over exactly one day of holding.
#[test]
fn s2_round_trip_with_no_price_move_is_a_wash() {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    let mut bars = BTreeMap::new();
    bars.insert("A".to_string(), flat_series("A", start, 2, 100.0));
    bars.insert("B".to_string(), flat_series("B", start, 2, 100.0));

    let runner = BacktestRunner::new(config(start, end, 100_000.0, 10_000.0));
    let mut strategy = OneRoundTripStrategy { step: 0 };
    let result = runner.run(bars, &mut strategy).unwrap();

    assert_eq!(result.trade_log.trades.len(), 4);
    let closed: Vec<_> = result.round_trips.iter().filter(|rt| !rt.is_open).collect();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].pnl, 0.0);
    assert_eq!(closed[0].return_pct, 0.0);
    assert_eq!(closed[0].holding_days, 1);
}

// S3: A rises 100 -> 110 while B stays flat; the long leg alone carries the
// pnl. Mirrors the exact numbers worked through in trade_analysis's unit test.
#[test]
fn s3_profitable_long_leg() {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let day2 = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
    let mut bars = BTreeMap::new();
    bars.insert("A".to_string(), vec![bar("A", start, 100.0), bar("A", day2, 110.0)]);
    bars.insert("B".to_string(), vec![bar("B", start, 100.0), bar("B", day2, 100.0)]);

    let runner = BacktestRunner::new(config(start, day2, 100_000.0, 10_000.0));
    let mut strategy = OneRoundTripStrategy { step: 0 };
    let result = runner.run(bars, &mut strategy).unwrap();

    let closed: Vec<_> = result.round_trips.iter().filter(|rt| !rt.is_open).collect();
    assert_eq!(closed.len(), 1);
    assert!((closed[0].pnl - 500.0).abs() < 1e-6);
    assert!((closed[0].return_pct - 0.05).abs() < 1e-6);
}

// S4: a pair sized well beyond available cash is rejected before any state changes.
#[test]
fn s4_insufficient_capital_is_rejected() {
    let mut portfolio = Portfolio::new(1_000.0);
    let execution = CloseExecution::new(&CommissionModel::Zero);
    let mut prices = std::collections::HashMap::new();
    prices.insert("A".to_string(), 100.0);
    prices.insert("B".to_string(), 100.0);

    let signal = PairSignal {
        signal_type: PairSignalType::Open,
        long_symbol: "A".into(),
        short_symbol: "B".into(),
        hedge_ratio: 1.0,
        pair_id: Some("A_B".into()),
        metadata: Default::default(),
    };

    let err = execution
        .apply_pair_signal(&signal, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), &prices, &mut portfolio, 10_000.0)
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientCapital { .. }));
    assert_eq!(portfolio.cash, 1_000.0);
}

// S5: the point-in-time view refuses both a future slice bound and backward advancement.
#[test]
fn s5_look_ahead_guard() {
    let mut table = BTreeMap::new();
    table.insert(
        "A".to_string(),
        vec![
            bar("A", NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 10.0),
            bar("A", NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(), 12.0),
        ],
    );
    let pit = PointInTime::new(table, NaiveDate::from_ymd_opt(2020, 6, 15).unwrap());

    let err = pit
        .slice(
            "A",
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            Some(NaiveDate::from_ymd_opt(2020, 12, 31).unwrap()),
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::LookAhead { .. }));

    let err = pit.advance_to(NaiveDate::from_ymd_opt(2020, 6, 14).unwrap()).unwrap_err();
    assert!(matches!(err, EngineError::LookAhead { .. }));
}

// S6: on a synthetic pair with an injected divergence, the distance strategy
// should find and trade the dislocation, and every trade it opens gets
// closed within its configured time stop.
#[test]
fn s6_distance_strategy_trades_synthetic_divergence() {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let mut market = SyntheticMarket::new(7);
    let (bars_a, bars_b) = market.cointegrated_pair("A", "B", start, 252, 100.0, 0.01, 0.002, 150, 30);
    let end = bars_a.last().unwrap().date;

    let mut bars = BTreeMap::new();
    bars.insert("A".to_string(), bars_a);
    bars.insert("B".to_string(), bars_b);

    let runner = BacktestRunner::new(config(start, end, 100_000.0, 10_000.0));
    let mut strategy = DistancePairStrategy::new(vec!["A".to_string(), "B".to_string()]);
    strategy.formation_period = 120;
    strategy.lookback = 60;
    strategy.entry_threshold = 1.5;
    strategy.max_holding_days = 10;
    strategy.min_correlation = 0.5;

    let result = runner.run(bars, &mut strategy).unwrap();

    assert!(!result.trade_log.trades.is_empty(), "expected the divergence to trigger at least one trade");
    for rt in &result.round_trips {
        assert!(rt.holding_days <= 10, "time stop should cap every round trip at max_holding_days");
    }
}

// Universal invariant 1: equity-curve dates are strictly increasing.
#[test]
fn invariant_equity_curve_dates_strictly_increase() {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2020, 2, 1).unwrap();
    let days = (end - start).num_days() + 1;
    let mut bars = BTreeMap::new();
    bars.insert("A".to_string(), flat_series("A", start, days, 50.0));

    let runner = BacktestRunner::new(config(start, end, 100_000.0, 10_000.0));
    let mut strategy = NoopStrategy;
    let result = runner.run(bars, &mut strategy).unwrap();

    for w in result.portfolio.equity_curve.windows(2) {
        assert!(w[0].0 < w[1].0);
    }
}

// Universal invariant 2: a position that nets to zero shares is dropped, not kept at zero.
#[test]
fn invariant_flat_position_is_not_retained() {
    use crate::models::{Trade, TradeSide};

    let mut portfolio = Portfolio::new(100_000.0);
    portfolio
        .execute_trade(&Trade {
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            symbol: "A".into(),
            side: TradeSide::Long,
            shares: 10.0,
            price: 50.0,
            commission: 0.0,
            pair_id: None,
        })
        .unwrap();
    portfolio
        .execute_trade(&Trade {
            date: NaiveDate::from_ymd_opt(2020, 1, 2).unwrap(),
            symbol: "A".into(),
            side: TradeSide::Short,
            shares: 10.0,
            price: 55.0,
            commission: 0.0,
            pair_id: None,
        })
        .unwrap();

    assert!(!portfolio.positions.contains_key("A"));
}

// Universal invariant 3: equity always reconciles with cash plus market values.
#[test]
fn invariant_equity_reconciles_with_cash_and_positions() {
    use crate::models::{Trade, TradeSide};

    let mut portfolio = Portfolio::new(100_000.0);
    portfolio
        .execute_trade(&Trade {
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            symbol: "A".into(),
            side: TradeSide::Long,
            shares: 100.0,
            price: 50.0,
            commission: 1.0,
            pair_id: None,
        })
        .unwrap();
    portfolio.update_prices(&std::collections::HashMap::from([("A".to_string(), 52.0)]));

    let manual = portfolio.cash + portfolio.positions.values().map(|p| p.market_value()).sum::<f64>();
    assert!((portfolio.equity() - manual).abs() < 1e-6);
}

// Universal invariant 4: an opened pair position always has a positive long leg and a negative short leg.
#[test]
fn invariant_pair_position_leg_signs() {
    let mut portfolio = Portfolio::new(100_000.0);
    let execution = CloseExecution::new(&CommissionModel::Zero);
    let mut prices = std::collections::HashMap::new();
    prices.insert("A".to_string(), 100.0);
    prices.insert("B".to_string(), 50.0);

    let signal = PairSignal {
        signal_type: PairSignalType::Open,
        long_symbol: "A".into(),
        short_symbol: "B".into(),
        hedge_ratio: 1.0,
        pair_id: Some("A_B".into()),
        metadata: Default::default(),
    };
    execution
        .apply_pair_signal(&signal, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), &prices, &mut portfolio, 10_000.0)
        .unwrap();

    let pair = &portfolio.pair_positions["A_B"];
    assert!(pair.long_leg.shares > 0.0);
    assert!(pair.short_leg.shares < 0.0);
}

// Universal invariant 7 (reproducibility): the same seed and config yield byte-identical equity curves.
#[test]
fn invariant_same_seed_yields_identical_results() {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let run_once = |seed: u64| {
        let mut market = SyntheticMarket::new(seed);
        let (bars_a, bars_b) = market.cointegrated_pair("A", "B", start, 200, 100.0, 0.01, 0.002, 100, 20);
        let end = bars_a.last().unwrap().date;
        let mut bars = BTreeMap::new();
        bars.insert("A".to_string(), bars_a);
        bars.insert("B".to_string(), bars_b);
        let runner = BacktestRunner::new(config(start, end, 100_000.0, 10_000.0));
        let mut strategy = DistancePairStrategy::new(vec!["A".to_string(), "B".to_string()]);
        strategy.formation_period = 60;
        strategy.lookback = 40;
        runner.run(bars, &mut strategy).unwrap()
    };

    let first = run_once(99);
    let second = run_once(99);
    assert_eq!(first.portfolio.equity_curve, second.portfolio.equity_curve);
    assert_eq!(first.trade_log.trades, second.trade_log.trades);
}

// Universal invariant 8: a weight signal rebalancing from flat allocates
// notional proportional to target weight.
#[test]
fn invariant_weight_signal_sign_aggregation() {
    let mut portfolio = Portfolio::new(100_000.0);
    let execution = CloseExecution::new(&CommissionModel::Zero);
    let mut prices = std::collections::HashMap::new();
    prices.insert("A".to_string(), 100.0);
    prices.insert("B".to_string(), 50.0);

    let equity_before = portfolio.equity();
    let signal = WeightSignal {
        weights: vec![("A".to_string(), 0.3), ("B".to_string(), -0.2)],
        rebalance: true,
        metadata: Default::default(),
    };
    let trades = execution
        .apply_weight_signal(&signal, NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), &prices, &mut portfolio)
        .unwrap();

    let notional: f64 = trades.iter().map(|t| t.signed_shares() * t.price).sum();
    let target: f64 = equity_before * signal.weights.iter().map(|(_, w)| w).sum::<f64>();
    assert!((notional - target).abs() < 1e-6);
}

// Constraint chain smoke test: position limits clip an over-gross weight signal
// and dollar-neutral rebalances a skewed book before execution.
#[test]
fn constraints_clip_and_rebalance_before_execution() {
    let position_limit = PositionLimitConstraint::default();
    let dollar_neutral = DollarNeutralConstraint::default();
    let portfolio = Portfolio::new(100_000.0);

    let signal = Signal::Weight(WeightSignal {
        weights: vec![("A".to_string(), 1.5), ("B".to_string(), -0.1)],
        rebalance: true,
        metadata: Default::default(),
    });

    let clipped = position_limit.adjust(signal, &portfolio).unwrap();
    let Signal::Weight(w) = &clipped else { panic!("expected weight signal") };
    assert!(w.weights.iter().all(|(_, weight)| weight.abs() <= position_limit.max_position_pct + 1e-9));

    let balanced = dollar_neutral.adjust(clipped, &portfolio).unwrap();
    let Signal::Weight(w) = balanced else { panic!("expected weight signal") };
    let net: f64 = w.weights.iter().map(|(_, v)| v).sum();
    assert!(net.abs() < 1e-9);
}

// Boundary: max_pairs=0 rejects any new pair outright, independent of price data.
#[test]
fn max_pairs_constraint_blocks_new_pairs_when_full() {
    let constraint = MaxPairsConstraint { max_pairs: 0 };
    let portfolio = Portfolio::new(100_000.0);
    let signal = Signal::Pair(PairSignal {
        signal_type: PairSignalType::Open,
        long_symbol: "A".into(),
        short_symbol: "B".into(),
        hedge_ratio: 1.0,
        pair_id: None,
        metadata: Default::default(),
    });
    assert!(constraint.adjust(signal, &portfolio).is_err());
}
