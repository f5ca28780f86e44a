use alloc::borrow::ToOwned;
use alloc::boxed::Box;
use alloc::string::{String, ToString};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::eval::Now;
use crate::expr::Expr;
use crate::filter::{Filter, FilterKind};
use crate::value::{Value, from_bool, is_true};

// Default sampling interval of input ports.
const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1000;

/// Port value kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortKind {
    /// A `0`/`1` value.
    Boolean,
    /// A numeric value.
    #[default]
    Number,
}

/// The origin of the last value change of a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChangeReason {
    /// The value was sampled or written through the API.
    #[default]
    Native,
    /// The value was produced by the port expression.
    FromExpression,
}

/// The hardware side of a port.
///
/// Drivers are called from within the scheduler tick, so they must never
/// block.
pub trait PortDriver: Send {
    /// Reads a raw sample. Returns `Undefined` when no valid sample is
    /// available.
    fn read(&mut self, now: Now) -> Value;

    /// Writes a value to an output.
    ///
    /// # Errors
    ///
    /// Returns an error when the value cannot be applied to the hardware.
    fn write(&mut self, _value: f64) -> Result<()> {
        Ok(())
    }
}

/// The persisted configuration of a port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    /// Port identifier.
    pub id: String,
    /// Value kind.
    pub kind: PortKind,
    /// Whether the port is written rather than sampled.
    pub output: bool,
    /// Whether the port exists only in memory.
    #[serde(rename = "virtual")]
    pub virtual_port: bool,
    /// Whether the port is enabled.
    pub enabled: bool,
    /// Whether the port value is persisted when it changes.
    pub persisted: bool,
    /// Sampling interval, in milliseconds.
    pub sampling_interval_ms: u64,
    /// Filter kind.
    pub filter: FilterKind,
    /// Filter window width.
    pub filter_width: usize,
    /// Lower bound of the value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound of the value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Value expression source.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub expression: String,
    /// Read transform source.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub read_transform: String,
    /// Write transform source.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub write_transform: String,
    /// Last persisted value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: PortKind::Number,
            output: false,
            virtual_port: false,
            enabled: true,
            persisted: false,
            sampling_interval_ms: DEFAULT_SAMPLING_INTERVAL_MS,
            filter: FilterKind::None,
            filter_width: 1,
            min: None,
            max: None,
            expression: String::new(),
            read_transform: String::new(),
            write_transform: String::new(),
            value: None,
        }
    }
}

impl PortConfig {
    /// Creates the [`PortConfig`] of a sampled input port.
    #[must_use]
    pub fn input(id: impl Into<String>, kind: PortKind) -> Self {
        Self {
            id: id.into(),
            kind,
            ..Self::default()
        }
    }

    /// Creates the [`PortConfig`] of a writable output port.
    #[must_use]
    pub fn output(id: impl Into<String>, kind: PortKind) -> Self {
        Self {
            id: id.into(),
            kind,
            output: true,
            ..Self::default()
        }
    }

    /// Creates the [`PortConfig`] of a virtual numeric output port.
    #[must_use]
    pub fn virtual_output(id: impl Into<String>) -> Self {
        Self {
            virtual_port: true,
            ..Self::output(id, PortKind::Number)
        }
    }

    /// Sets the value expression.
    #[must_use]
    pub fn expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = expression.into();
        self
    }

    /// Sets the read transform.
    #[must_use]
    pub fn read_transform(mut self, transform: impl Into<String>) -> Self {
        self.read_transform = transform.into();
        self
    }

    /// Sets the write transform.
    #[must_use]
    pub fn write_transform(mut self, transform: impl Into<String>) -> Self {
        self.write_transform = transform.into();
        self
    }

    /// Sets the filter.
    #[must_use]
    pub const fn filter(mut self, filter: FilterKind, width: usize) -> Self {
        self.filter = filter;
        self.filter_width = width;
        self
    }

    /// Sets the value bounds.
    #[must_use]
    pub const fn bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    /// Sets the sampling interval.
    #[must_use]
    pub const fn sampling_interval(mut self, interval_ms: u64) -> Self {
        self.sampling_interval_ms = interval_ms;
        self
    }

    /// Marks the port value as persisted.
    #[must_use]
    pub const fn persisted(mut self) -> Self {
        self.persisted = true;
        self
    }

    /// Marks the port as disabled.
    #[must_use]
    pub const fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// A port: an addressable input, output or virtual value.
pub struct Port {
    pub(crate) id: String,
    pub(crate) slot: usize,
    pub(crate) kind: PortKind,
    pub(crate) output: bool,
    pub(crate) virtual_port: bool,
    pub(crate) enabled: bool,
    pub(crate) persisted: bool,
    pub(crate) min: Option<f64>,
    pub(crate) max: Option<f64>,
    pub(crate) sampling_interval_ms: u64,
    pub(crate) last_sample_ms: Option<u64>,
    // The committed value.
    pub(crate) value: Value,
    // The value port references resolve to.
    pub(crate) last_read_value: Value,
    // The value seen by the previous change detection.
    pub(crate) tick_value: Value,
    pub(crate) filter: Filter,
    pub(crate) expression: String,
    pub(crate) value_expr: Option<Expr>,
    pub(crate) read_transform: Option<Expr>,
    pub(crate) write_transform: Option<Expr>,
    pub(crate) dep_mask: u64,
    pub(crate) change_reason: ChangeReason,
    pub(crate) dirty: bool,
    pub(crate) driver: Option<Box<dyn PortDriver>>,
}

impl core::fmt::Debug for Port {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Port")
            .field("id", &self.id)
            .field("slot", &self.slot)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

impl Port {
    // Builds a port from its configuration. Expressions are assigned
    // separately, once they have been validated.
    pub(crate) fn new(slot: usize, config: PortConfig) -> Self {
        let mut port = Self {
            id: config.id,
            slot,
            kind: config.kind,
            output: config.output,
            virtual_port: config.virtual_port,
            enabled: config.enabled,
            persisted: config.persisted,
            min: config.min,
            max: config.max,
            sampling_interval_ms: config.sampling_interval_ms,
            last_sample_ms: None,
            value: None,
            last_read_value: None,
            tick_value: None,
            filter: Filter::new(config.filter, config.filter_width),
            expression: String::new(),
            value_expr: None,
            read_transform: None,
            write_transform: None,
            dep_mask: 0,
            change_reason: ChangeReason::Native,
            dirty: false,
            driver: None,
        };
        if port.enabled && port.persisted {
            port.value = config.value.and_then(|v| port.normalize(v));
            port.last_read_value = port.value;
        }
        port
    }

    /// Returns the port identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the port slot, which is also its bit in masks.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }

    /// Returns the [`PortKind`].
    #[must_use]
    pub const fn kind(&self) -> PortKind {
        self.kind
    }

    /// Returns the committed value.
    #[must_use]
    pub const fn value(&self) -> Value {
        self.value
    }

    /// Returns the value expressions see when referencing this port.
    #[must_use]
    pub const fn last_read_value(&self) -> Value {
        self.last_read_value
    }

    /// Checks whether the port is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Checks whether the port is an output.
    #[must_use]
    pub const fn is_output(&self) -> bool {
        self.output
    }

    /// Checks whether the port is virtual.
    #[must_use]
    pub const fn is_virtual(&self) -> bool {
        self.virtual_port
    }

    /// Checks whether the port value is persisted.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        self.persisted
    }

    /// Returns the port [`Filter`].
    #[must_use]
    pub const fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Returns the value expression source, empty when there is none.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Returns the live value expression.
    #[must_use]
    pub const fn value_expr(&self) -> Option<&Expr> {
        self.value_expr.as_ref()
    }

    /// Returns the read transform.
    #[must_use]
    pub const fn read_transform(&self) -> Option<&Expr> {
        self.read_transform.as_ref()
    }

    /// Returns the write transform.
    #[must_use]
    pub const fn write_transform(&self) -> Option<&Expr> {
        self.write_transform.as_ref()
    }

    /// Returns the dependency mask of the value expression.
    #[must_use]
    pub const fn dependency_mask(&self) -> u64 {
        self.dep_mask
    }

    /// Returns the [`ChangeReason`] of the last value change.
    #[must_use]
    pub const fn change_reason(&self) -> ChangeReason {
        self.change_reason
    }

    /// Returns the [`PortConfig`] of the port.
    #[must_use]
    pub fn config(&self) -> PortConfig {
        PortConfig {
            id: self.id.clone(),
            kind: self.kind,
            output: self.output,
            virtual_port: self.virtual_port,
            enabled: self.enabled,
            persisted: self.persisted,
            sampling_interval_ms: self.sampling_interval_ms,
            filter: self.filter.kind(),
            filter_width: self.filter.width(),
            min: self.min,
            max: self.max,
            expression: self.expression.clone(),
            read_transform: self
                .read_transform
                .as_ref()
                .map(Expr::to_string)
                .unwrap_or_default(),
            write_transform: self
                .write_transform
                .as_ref()
                .map(Expr::to_string)
                .unwrap_or_default(),
            value: self.persisted.then_some(self.value).flatten(),
        }
    }

    // Fits a value to the port kind and bounds.
    pub(crate) fn normalize(&self, value: f64) -> Value {
        if !value.is_finite() {
            return None;
        }
        if self.kind == PortKind::Boolean {
            return Some(from_bool(is_true(value)));
        }
        let below = self.min.is_some_and(|min| value < min);
        let above = self.max.is_some_and(|max| value > max);
        (!below && !above).then_some(value)
    }

    pub(crate) fn assign_expression(&mut self, source: &str, expr: Option<Expr>) {
        source.trim().clone_into(&mut self.expression);
        self.value_expr = expr;
    }
}
