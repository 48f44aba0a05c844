use std::collections::HashMap;

use chrono::NaiveDate;

use crate::models::{RoundTrip, TradeLog, TradeSide, TradeStatistics};

#[derive(Default, Clone)]
struct LegState {
    shares: f64,
    /// High-water mark of `shares.abs()` reached while the position was
    /// being built. Unlike `shares`, this is never zeroed at close, so the
    /// entered share count survives for `RoundTrip::long_shares`/`short_shares`.
    entered_shares: f64,
    avg_entry_price: f64,
    entry_date: Option<NaiveDate>,
    exit_price: f64,
    exit_date: Option<NaiveDate>,
    commission: f64,
}

impl LegState {
    fn apply(&mut self, signed_shares: f64, price: f64, date: NaiveDate, commission: f64) {
        if self.entry_date.is_none() {
            self.entry_date = Some(date);
            self.avg_entry_price = price;
        } else if self.shares.signum() == signed_shares.signum() || self.shares == 0.0 {
            let new_shares = self.shares + signed_shares;
            if new_shares != 0.0 {
                self.avg_entry_price =
                    (self.shares * self.avg_entry_price + signed_shares * price) / new_shares;
            }
        }
        self.shares += signed_shares;
        self.entered_shares = self.entered_shares.max(self.shares.abs());
        self.commission += commission;
        if self.shares == 0.0 {
            self.exit_price = price;
            self.exit_date = Some(date);
        }
    }
}

/// Reconstructs `RoundTrip`s from a flat trade log by replaying each
/// pair-id's trades in date order and tracking explicit per-symbol share
/// state — never by re-summing trades filtered by side after the fact (see
/// `DESIGN.md`'s note on Open Question #1).
pub fn match_round_trips(
    log: &TradeLog,
    final_prices: Option<&HashMap<String, f64>>,
    include_open: bool,
    end_date: Option<NaiveDate>,
) -> Vec<RoundTrip> {
    let mut by_pair: HashMap<String, Vec<&crate::models::Trade>> = HashMap::new();
    for trade in &log.trades {
        if let Some(pair_id) = &trade.pair_id {
            by_pair.entry(pair_id.clone()).or_default().push(trade);
        }
    }

    let mut round_trips = Vec::new();

    for (pair_id, mut trades) in by_pair {
        trades.sort_by_key(|t| t.date);

        let mut legs: HashMap<String, LegState> = HashMap::new();
        let mut symbol_order: Vec<String> = Vec::new();
        let mut symbol_side: HashMap<String, TradeSide> = HashMap::new();

        for trade in &trades {
            if !legs.contains_key(&trade.symbol) {
                symbol_order.push(trade.symbol.clone());
                symbol_side.insert(trade.symbol.clone(), trade.side);
            }
            let leg = legs.entry(trade.symbol.clone()).or_default();
            leg.apply(trade.signed_shares(), trade.price, trade.date, trade.commission);
        }

        if symbol_order.len() != 2 {
            // Malformed/incomplete pair trade sequence; skip rather than guess.
            continue;
        }

        let long_symbol = symbol_order
            .iter()
            .find(|s| symbol_side[*s] == TradeSide::Long)
            .cloned();
        let short_symbol = symbol_order
            .iter()
            .find(|s| symbol_side[*s] == TradeSide::Short)
            .cloned();
        let (Some(long_symbol), Some(short_symbol)) = (long_symbol, short_symbol) else {
            continue;
        };

        let long_leg = &legs[&long_symbol];
        let short_leg = &legs[&short_symbol];

        let long_shares = long_leg.entered_shares;
        let short_shares = short_leg.entered_shares;

        let both_closed = long_leg.shares == 0.0 && short_leg.shares == 0.0;

        let (exit_date, long_exit_price, short_exit_price, is_open) = if both_closed {
            (long_leg.exit_date, long_leg.exit_price, short_leg.exit_price, false)
        } else if include_open {
            match (final_prices, end_date) {
                (Some(prices), Some(end)) => {
                    let lp = prices.get(&long_symbol).copied();
                    let sp = prices.get(&short_symbol).copied();
                    match (lp, sp) {
                        (Some(lp), Some(sp)) => (Some(end), lp, sp, true),
                        _ => continue,
                    }
                }
                _ => continue,
            }
        } else {
            continue;
        };

        let entry_date = long_leg.entry_date.unwrap_or(short_leg.entry_date.unwrap());
        let commission = long_leg.commission + short_leg.commission;

        let pnl = long_shares * (long_exit_price - long_leg.avg_entry_price)
            + short_shares * (short_leg.avg_entry_price - short_exit_price)
            - commission;

        let entry_notional =
            long_shares * long_leg.avg_entry_price + short_shares * short_leg.avg_entry_price;
        let return_pct = if entry_notional != 0.0 { pnl / entry_notional } else { 0.0 };

        let holding_days = exit_date.map(|d| (d - entry_date).num_days()).unwrap_or(0);

        round_trips.push(RoundTrip {
            pair_id,
            entry_date,
            exit_date,
            long_symbol,
            short_symbol,
            long_entry_price: long_leg.avg_entry_price,
            short_entry_price: short_leg.avg_entry_price,
            long_exit_price,
            short_exit_price,
            long_shares,
            short_shares,
            pnl,
            holding_days,
            return_pct,
            commission,
            is_open,
        });
    }

    round_trips.sort_by_key(|rt| rt.entry_date);
    round_trips
}

pub fn calculate_trade_statistics(round_trips: &[RoundTrip]) -> TradeStatistics {
    if round_trips.is_empty() {
        return TradeStatistics::default();
    }

    let closed: Vec<&RoundTrip> = round_trips.iter().filter(|rt| !rt.is_open).collect();
    let open: Vec<&RoundTrip> = round_trips.iter().filter(|rt| rt.is_open).collect();

    let winners: Vec<&&RoundTrip> = closed.iter().filter(|rt| rt.is_winner()).collect();
    let losers: Vec<&&RoundTrip> = closed.iter().filter(|rt| !rt.is_winner()).collect();

    let win_count = winners.len();
    let loss_count = losers.len();

    let gross_profit: f64 = winners.iter().map(|rt| rt.pnl).sum();
    let gross_loss: f64 = losers.iter().map(|rt| rt.pnl.abs()).sum();

    let win_rate = if !closed.is_empty() {
        win_count as f64 / closed.len() as f64
    } else {
        0.0
    };
    let avg_win = if win_count > 0 { gross_profit / win_count as f64 } else { 0.0 };
    let avg_loss = if loss_count > 0 { gross_loss / loss_count as f64 } else { 0.0 };
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let holding_days: Vec<i64> = closed.iter().map(|rt| rt.holding_days).collect();
    let returns: Vec<f64> = closed.iter().map(|rt| rt.return_pct).collect();

    TradeStatistics {
        total_round_trips: round_trips.len(),
        closed_round_trips: closed.len(),
        open_round_trips: open.len(),
        winning_trades: win_count,
        losing_trades: loss_count,
        win_rate,
        avg_win,
        avg_loss,
        profit_factor,
        avg_holding_days: if !holding_days.is_empty() {
            holding_days.iter().sum::<i64>() as f64 / holding_days.len() as f64
        } else {
            0.0
        },
        max_holding_days: holding_days.iter().copied().max().unwrap_or(0),
        min_holding_days: holding_days.iter().copied().min().unwrap_or(0),
        avg_return_pct: if !returns.is_empty() {
            returns.iter().sum::<f64>() / returns.len() as f64
        } else {
            0.0
        },
        best_trade_pct: returns.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        worst_trade_pct: returns.iter().copied().fold(f64::INFINITY, f64::min),
        total_pnl: round_trips.iter().map(|rt| rt.pnl).sum(),
        total_commission: round_trips.iter().map(|rt| rt.commission).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Trade;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn no_move_round_trip_has_zero_pnl() {
        let mut log = TradeLog::default();
        log.push(Trade {
            date: d("2020-01-01"),
            symbol: "A".into(),
            side: TradeSide::Long,
            shares: 100.0,
            price: 100.0,
            commission: 0.0,
            pair_id: Some("A_B".into()),
        });
        log.push(Trade {
            date: d("2020-01-01"),
            symbol: "B".into(),
            side: TradeSide::Short,
            shares: 100.0,
            price: 100.0,
            commission: 0.0,
            pair_id: Some("A_B".into()),
        });
        log.push(Trade {
            date: d("2020-01-02"),
            symbol: "A".into(),
            side: TradeSide::Short,
            shares: 100.0,
            price: 100.0,
            commission: 0.0,
            pair_id: Some("A_B".into()),
        });
        log.push(Trade {
            date: d("2020-01-02"),
            symbol: "B".into(),
            side: TradeSide::Long,
            shares: 100.0,
            price: 100.0,
            commission: 0.0,
            pair_id: Some("A_B".into()),
        });

        let trips = match_round_trips(&log, None, false, None);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].pnl, 0.0);
        assert_eq!(trips[0].holding_days, 1);
    }

    #[test]
    fn profitable_long_leg_scenario_s3() {
        // Mirrors spec scenario S3: A rises 100 -> 110, B flat at 100.
        let mut log = TradeLog::default();
        log.push(Trade {
            date: d("2020-01-01"),
            symbol: "A".into(),
            side: TradeSide::Long,
            shares: 50.0,
            price: 100.0,
            commission: 0.0,
            pair_id: Some("A_B".into()),
        });
        log.push(Trade {
            date: d("2020-01-01"),
            symbol: "B".into(),
            side: TradeSide::Short,
            shares: 50.0,
            price: 100.0,
            commission: 0.0,
            pair_id: Some("A_B".into()),
        });
        log.push(Trade {
            date: d("2020-01-02"),
            symbol: "A".into(),
            side: TradeSide::Short,
            shares: 50.0,
            price: 110.0,
            commission: 0.0,
            pair_id: Some("A_B".into()),
        });
        log.push(Trade {
            date: d("2020-01-02"),
            symbol: "B".into(),
            side: TradeSide::Long,
            shares: 50.0,
            price: 100.0,
            commission: 0.0,
            pair_id: Some("A_B".into()),
        });

        let trips = match_round_trips(&log, None, false, None);
        assert_eq!(trips.len(), 1);
        assert!((trips[0].pnl - 500.0).abs() < 1e-9);
        assert!((trips[0].return_pct - 0.05).abs() < 1e-9);
    }
}
