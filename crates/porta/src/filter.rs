use alloc::collections::VecDeque;
use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::value::{Value, from_bool, is_true, round_by_magnitude};

/// Maximum width of a port filter window.
pub const MAX_FILTER_WIDTH: usize = 32;

/// Filter kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    /// Samples are used as they are.
    #[default]
    None,
    /// Median of the window.
    Median,
    /// Arithmetic mean of the window.
    Average,
}

impl core::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::None => "None",
            Self::Median => "Median",
            Self::Average => "Average",
        }
        .fmt(f)
    }
}

/// A smoothing filter applied to freshly sampled values.
///
/// The filter keeps a window of the last `width` samples and produces
/// nothing until the window is full. Boolean ports use a majority vote over
/// the window, whatever the filter kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    kind: FilterKind,
    width: usize,
    window: VecDeque<f64>,
}

impl Filter {
    /// Creates a [`Filter`].
    ///
    /// The width is clamped between `1` and [`MAX_FILTER_WIDTH`].
    #[must_use]
    pub fn new(kind: FilterKind, width: usize) -> Self {
        let width = width.clamp(1, MAX_FILTER_WIDTH);
        Self {
            kind,
            width,
            window: VecDeque::with_capacity(width),
        }
    }

    /// Returns the [`FilterKind`].
    #[must_use]
    pub const fn kind(&self) -> FilterKind {
        self.kind
    }

    /// Returns the window width.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Checks whether the filter alters samples.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.kind != FilterKind::None
    }

    /// Discards the accumulated samples.
    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Pushes a sample and returns the filtered value.
    ///
    /// Returns `Undefined` while the window is still filling up. When the
    /// read transform of the port starts with a rounding function, an
    /// averaged result is rounded the same way.
    pub fn push(&mut self, sample: f64, boolean: bool, read_transform: Option<&Expr>) -> Value {
        if !self.is_active() {
            return Some(sample);
        }

        self.window.push_back(sample);
        while self.window.len() > self.width {
            let _ = self.window.pop_front();
        }
        if self.window.len() < self.width {
            return None;
        }

        if boolean {
            let high = self.window.iter().filter(|v| is_true(**v)).count();
            return Some(from_bool(high * 2 > self.width));
        }

        match self.kind {
            FilterKind::None => Some(sample),
            FilterKind::Median => {
                let mut sorted: Vec<f64> = self.window.iter().copied().collect();
                sorted.sort_by(f64::total_cmp);
                sorted.get(sorted.len() / 2).copied()
            }
            FilterKind::Average => {
                let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
                let mean = round_by_magnitude(mean);
                Some(
                    read_transform
                        .and_then(|transform| transform.round_like(mean))
                        .unwrap_or(mean),
                )
            }
        }
    }
}
