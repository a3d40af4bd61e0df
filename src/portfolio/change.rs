//! # portfolio::change
//!
//! Gain / loss between two points of a value series — what the chart shows
//! while the user drags across a range.

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::ValuePoint;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeChange {
    pub start_date:     NaiveDate,
    pub start_value:    f64,
    pub end_date:       NaiveDate,
    pub end_value:      f64,
    pub absolute:       f64,
    /// `None` when the range starts at a value of 0.
    pub percent:        Option<f64>,
}

impl RangeChange {
    /// Change between two indices, accepted in either order.
    ///
    /// `None` when the series has fewer than two points, an index is out of
    /// bounds, or both indices are the same point.
    pub fn between(points: &[ValuePoint], a: usize, b: usize) -> Option<Self> {
        if points.len() < 2 || a == b {
            return None;
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let start = points.get(lo)?;
        let end = points.get(hi)?;

        let absolute = end.value - start.value;
        let percent = (start.value != 0.0).then(|| absolute * 100.0 / start.value.abs());

        Some(Self {
            start_date:  start.date,
            start_value: start.value,
            end_date:    end.date,
            end_value:   end.value,
            absolute,
            percent,
        })
    }

    /// Change from the first to the last point.
    pub fn over(points: &[ValuePoint]) -> Option<Self> {
        Self::between(points, 0, points.len().saturating_sub(1))
    }
}
