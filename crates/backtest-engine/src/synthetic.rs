use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rust_decimal::Decimal;

use crate::models::PriceBar;

/// Seeded price-series generator. Every generator here is deterministic
/// given the same seed: the same seed and config always produce the same
/// bars, byte for byte, which is what the reproducibility property in
/// `SPEC_FULL.md` §8 depends on for test fixtures.
pub struct SyntheticMarket {
    rng: StdRng,
}

impl SyntheticMarket {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// A single geometric random walk starting at `start_price`, one bar
    /// per calendar day starting at `start_date`, `num_days` bars.
    pub fn random_walk(
        &mut self,
        symbol: &str,
        start_date: NaiveDate,
        num_days: usize,
        start_price: f64,
        daily_vol: f64,
    ) -> Vec<PriceBar> {
        let normal = Normal::new(0.0, daily_vol).unwrap();
        let mut price = start_price;
        let mut bars = Vec::with_capacity(num_days);
        for i in 0..num_days {
            let ret = normal.sample(&mut self.rng);
            price *= 1.0 + ret;
            let date = start_date + Duration::days(i as i64);
            bars.push(make_bar(symbol, date, price));
        }
        bars
    }

    /// Two price series that share a common shock (so they're correlated)
    /// plus independent idiosyncratic noise, with an injected divergence
    /// window and a re-convergence afterward — the construction used by
    /// scenario S6 to exercise the distance strategy's entry/exit logic
    /// end to end.
    pub fn cointegrated_pair(
        &mut self,
        symbol_a: &str,
        symbol_b: &str,
        start_date: NaiveDate,
        num_days: usize,
        start_price: f64,
        common_vol: f64,
        idiosyncratic_vol: f64,
        divergence_start: usize,
        divergence_len: usize,
    ) -> (Vec<PriceBar>, Vec<PriceBar>) {
        let common = Normal::new(0.0, common_vol).unwrap();
        let noise = Normal::new(0.0, idiosyncratic_vol).unwrap();

        let mut price_a = start_price;
        let mut price_b = start_price;
        let mut bars_a = Vec::with_capacity(num_days);
        let mut bars_b = Vec::with_capacity(num_days);

        for i in 0..num_days {
            let shock = common.sample(&mut self.rng);
            let noise_a = noise.sample(&mut self.rng);
            let noise_b = noise.sample(&mut self.rng);

            let divergence_end = divergence_start + divergence_len;
            let (drift_a, drift_b) = if i >= divergence_start && i < divergence_end {
                (0.01, -0.008)
            } else {
                (0.0, 0.0)
            };

            price_a *= 1.0 + shock + noise_a + drift_a;
            price_b *= 1.0 + shock + noise_b + drift_b;

            let date = start_date + Duration::days(i as i64);
            bars_a.push(make_bar(symbol_a, date, price_a));
            bars_b.push(make_bar(symbol_b, date, price_b));
        }

        (bars_a, bars_b)
    }

    /// Applies a split adjustment at `split_index`: prices before the index
    /// are divided by `ratio` (mirroring how an adjusted-close series looks
    /// after a forward split), testing that downstream code treats
    /// `adj_close` as already normalized.
    pub fn apply_split(&self, mut bars: Vec<PriceBar>, split_index: usize, ratio: f64) -> Vec<PriceBar> {
        for bar in bars.iter_mut().take(split_index) {
            bar.adj_close = bar.adj_close / Decimal::try_from(ratio).unwrap();
        }
        bars
    }

    /// Truncates a series early to simulate a delisting.
    pub fn apply_delisting(&self, mut bars: Vec<PriceBar>, last_trading_index: usize) -> Vec<PriceBar> {
        bars.truncate(last_trading_index + 1);
        bars
    }

    /// Drops a contiguous run of bars to simulate a data gap of
    /// `gap_days` calendar days.
    pub fn inject_gap(&self, bars: Vec<PriceBar>, gap_start_index: usize, gap_bars: usize) -> Vec<PriceBar> {
        bars.into_iter()
            .enumerate()
            .filter(|(i, _)| *i < gap_start_index || *i >= gap_start_index + gap_bars)
            .map(|(_, bar)| bar)
            .collect()
    }

    /// A trading calendar with weekends removed, useful when a generator
    /// needs realistic gap spacing instead of one bar per calendar day.
    pub fn business_days(&self, start_date: NaiveDate, num_days: usize) -> Vec<NaiveDate> {
        let mut dates = Vec::with_capacity(num_days);
        let mut d = start_date;
        while dates.len() < num_days {
            let weekday = d.format("%u").to_string().parse::<u8>().unwrap_or(1);
            if weekday < 6 {
                dates.push(d);
            }
            d += Duration::days(1);
        }
        dates
    }

    pub fn random_symbol_subset(&mut self, symbols: &[String], n: usize) -> Vec<String> {
        let mut pool = symbols.to_vec();
        let mut chosen = Vec::with_capacity(n.min(pool.len()));
        for _ in 0..n.min(pool.len()) {
            let idx = self.rng.gen_range(0..pool.len());
            chosen.push(pool.remove(idx));
        }
        chosen
    }
}

fn make_bar(symbol: &str, date: NaiveDate, price: f64) -> PriceBar {
    let close = Decimal::try_from(price).unwrap_or(Decimal::ZERO);
    PriceBar::new(symbol.to_string(), date, close, close, close, close, close, 1_000_000).unwrap()
}

/// Builds the `symbol -> sorted bars` table the `PointInTime` constructor
/// expects, from however many per-symbol `Vec<PriceBar>` a test has on hand.
pub fn into_price_table(series: Vec<(String, Vec<PriceBar>)>) -> BTreeMap<String, Vec<PriceBar>> {
    series.into_iter().collect()
}
