//! Year spans covered by a dataset.

use serde::{Deserialize, Serialize};

/// A span of publication years.
///
/// Bounds are kept exactly as configured: `end` is exclusive unless
/// `inclusive` is set, so `{ start = 2006, end = 2025 }` covers 2006..=2024.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
    #[serde(default)]
    pub inclusive: bool,
}

impl YearRange {
    /// Half-open range `[start, end)`.
    pub fn exclusive(start: i32, end: i32) -> Self {
        Self {
            start,
            end,
            inclusive: false,
        }
    }

    /// Closed range `[start, end]`.
    pub fn inclusive(start: i32, end: i32) -> Self {
        Self {
            start,
            end,
            inclusive: true,
        }
    }

    /// Last year covered, if any.
    pub fn last(&self) -> Option<i32> {
        let last = if self.inclusive {
            Some(self.end)
        } else {
            self.end.checked_sub(1)
        };
        last.filter(|last| *last >= self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.last().is_none()
    }

    pub fn len(&self) -> usize {
        self.last()
            .map(|last| (i64::from(last) - i64::from(self.start) + 1) as usize)
            .unwrap_or(0)
    }

    pub fn contains(&self, year: i32) -> bool {
        self.last()
            .is_some_and(|last| year >= self.start && year <= last)
    }

    /// Years in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = i32> {
        let start = self.start;
        self.last().into_iter().flat_map(move |last| start..=last)
    }

    /// Narrow the range to an inclusive `[from, to]` window.
    pub fn clip(&self, from: Option<i32>, to: Option<i32>) -> Self {
        let start = from.map_or(self.start, |f| f.max(self.start));
        match (self.last(), to) {
            (Some(last), Some(t)) => Self::inclusive(start, t.min(last)),
            (Some(last), None) => Self::inclusive(start, last),
            (None, _) => Self::exclusive(start, start),
        }
    }
}

impl std::fmt::Display for YearRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.last() {
            Some(last) => write!(f, "{}-{}", self.start, last),
            None => write!(f, "(empty)"),
        }
    }
}
