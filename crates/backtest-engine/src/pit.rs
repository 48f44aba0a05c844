use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::EngineError;
use crate::models::PriceBar;

/// A read-only cursor over a price table bounded by a `reference_date`.
///
/// Only rows with `date <= reference_date` are ever returned. `PIT` is a
/// value: `advance_to` returns a new instance rather than mutating this one,
/// so a caller holding an earlier `PointInTime` keeps seeing the earlier
/// (smaller) view. This is what makes the no-look-ahead guarantee a type-level
/// property instead of a runtime discipline.
#[derive(Debug, Clone)]
pub struct PointInTime {
    reference_date: NaiveDate,
    // Shared, never mutated after construction; cheap to clone on advance.
    bars: Arc<BTreeMap<String, Vec<PriceBar>>>,
}

impl PointInTime {
    /// Build a view over `bars` (assumed sorted per-symbol by date; callers
    /// constructing from raw rows should sort first) current as of
    /// `reference_date`.
    pub fn new(bars: BTreeMap<String, Vec<PriceBar>>, reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            bars: Arc::new(bars),
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.reference_date
    }

    /// Sorted unique symbol list. Set membership is timeless: a symbol that
    /// only trades in the future is still a known symbol, it simply has no
    /// visible rows yet.
    pub fn symbols(&self) -> Vec<String> {
        self.bars.keys().cloned().collect()
    }

    /// All visible rows across all symbols, in per-symbol date order.
    pub fn get_data(&self) -> Vec<&PriceBar> {
        self.bars
            .values()
            .flat_map(|rows| rows.iter().filter(|b| b.date <= self.reference_date))
            .collect()
    }

    /// Visible rows for one symbol.
    pub fn for_symbol(&self, symbol: &str) -> Vec<&PriceBar> {
        self.bars
            .get(symbol)
            .into_iter()
            .flat_map(|rows| rows.iter().filter(|b| b.date <= self.reference_date))
            .collect()
    }

    /// The last visible row, optionally restricted to one symbol.
    pub fn get_latest(&self, symbol: Option<&str>) -> Option<&PriceBar> {
        match symbol {
            Some(sym) => self.for_symbol(sym).into_iter().next_back(),
            None => self
                .bars
                .values()
                .filter_map(|rows| rows.iter().filter(|b| b.date <= self.reference_date).next_back())
                .max_by_key(|b| b.date),
        }
    }

    /// Rows for `symbol` with `start <= date <= min(end, reference_date)`.
    /// Fails if the caller asks for an `end` beyond what is currently visible.
    pub fn slice(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<Vec<&PriceBar>, EngineError> {
        if let Some(end) = end {
            if end > self.reference_date {
                return Err(EngineError::LookAhead {
                    access_date: end,
                    reference_date: self.reference_date,
                });
            }
        }
        let upper = end.unwrap_or(self.reference_date);
        Ok(self
            .bars
            .get(symbol)
            .into_iter()
            .flat_map(|rows| rows.iter().filter(|b| b.date >= start && b.date <= upper))
            .collect())
    }

    /// A new `PointInTime` current as of `new_date`. Backward movement is a
    /// structural bug in the caller, not a recoverable condition.
    pub fn advance_to(&self, new_date: NaiveDate) -> Result<Self, EngineError> {
        if new_date < self.reference_date {
            return Err(EngineError::LookAhead {
                access_date: new_date,
                reference_date: self.reference_date,
            });
        }
        Ok(Self {
            reference_date: new_date,
            bars: Arc::clone(&self.bars),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(symbol: &str, date: &str, close: f64) -> PriceBar {
        PriceBar::new(
            symbol.to_string(),
            NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            dec!(0),
            dec!(0),
            dec!(0),
            rust_decimal::Decimal::try_from(close).unwrap(),
            rust_decimal::Decimal::try_from(close).unwrap(),
            1000,
        )
        .unwrap()
    }

    fn sample_pit(reference_date: &str) -> PointInTime {
        let mut bars = BTreeMap::new();
        bars.insert(
            "A".to_string(),
            vec![
                bar("A", "2020-01-01", 10.0),
                bar("A", "2020-06-15", 11.0),
                bar("A", "2020-12-31", 12.0),
            ],
        );
        PointInTime::new(bars, NaiveDate::parse_from_str(reference_date, "%Y-%m-%d").unwrap())
    }

    #[test]
    fn hides_future_rows() {
        let pit = sample_pit("2020-06-15");
        assert_eq!(pit.get_data().len(), 2);
        assert_eq!(pit.get_latest(Some("A")).unwrap().close.to_string(), "11");
    }

    #[test]
    fn slice_rejects_future_end() {
        let pit = sample_pit("2020-06-15");
        let err = pit
            .slice(
                "A",
                NaiveDate::parse_from_str("2020-01-01", "%Y-%m-%d").unwrap(),
                Some(NaiveDate::parse_from_str("2020-12-31", "%Y-%m-%d").unwrap()),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::LookAhead { .. }));
    }

    #[test]
    fn advance_to_rejects_backward_movement() {
        let pit = sample_pit("2020-06-15");
        let err = pit
            .advance_to(NaiveDate::parse_from_str("2020-01-01", "%Y-%m-%d").unwrap())
            .unwrap_err();
        assert!(matches!(err, EngineError::LookAhead { .. }));
    }

    #[test]
    fn advance_to_self_is_noop() {
        let pit = sample_pit("2020-06-15");
        let advanced = pit.advance_to(pit.reference_date()).unwrap();
        assert_eq!(advanced.get_data().len(), pit.get_data().len());
    }
}
