use chrono::NaiveDate;

use crate::error::EngineError;
use crate::models::{Signal, Trade};
use crate::pit::PointInTime;

/// A strategy is a pure callback over a point-in-time view: given the
/// current date and everything visible so far, it returns at most one
/// signal. It may keep internal state between calls but must never reach
/// for data outside `pit` — there is no other channel to the past.
///
/// Default bodies for the lifecycle hooks make this usable as a minimal
/// trait object; a strategy that only cares about `on_bar` need not
/// override anything else.
pub trait Strategy {
    fn name(&self) -> &str;

    fn on_bar(&mut self, date: NaiveDate, pit: &PointInTime) -> Result<Signal, EngineError>;

    fn on_start(&mut self, _start: NaiveDate, _end: NaiveDate) {}

    fn on_end(&mut self) {}

    fn on_fill(&mut self, _trade: &Trade) {}
}
