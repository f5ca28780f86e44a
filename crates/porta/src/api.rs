use alloc::boxed::Box;
use alloc::format;
use alloc::vec::Vec;

use log::{info, warn};

use crate::deps::{check_loops, dependency_mask, slot_bit};
use crate::error::{Error, ErrorKind, Result};
use crate::expr::Expr;
use crate::filter::{Filter, FilterKind, MAX_FILTER_WIDTH};
use crate::parser::{is_valid_port_id, parse};
use crate::port::{ChangeReason, Port, PortConfig, PortDriver};
use crate::scheduler::{Core, Notification};
use crate::value::Value;

fn not_found(id: &str) -> Error {
    Error::new(ErrorKind::PortNotFound, format!("Port `{id}` does not exist"))
}

impl Core {
    /// Registers a port.
    ///
    /// The port takes the lowest free slot. Stored expressions and transforms
    /// that no longer parse, or that would now form a loop, are dropped with
    /// a warning so that a single bad entry cannot prevent the device from
    /// starting.
    ///
    /// # Errors
    ///
    /// Fails when the identifier is invalid or already taken, or when every
    /// slot is in use.
    pub fn add_port(
        &mut self,
        mut config: PortConfig,
        driver: Option<Box<dyn PortDriver>>,
    ) -> Result<()> {
        if !is_valid_port_id(&config.id) {
            return Err(Error::new(
                ErrorKind::InvalidValue,
                format!("`{}` is not a valid port identifier", config.id),
            ));
        }
        if self.ports.find(&config.id).is_some() {
            return Err(Error::new(
                ErrorKind::PortExists,
                format!("Port `{}` already exists", config.id),
            ));
        }
        let slot = self.ports.free_slot().ok_or_else(|| {
            Error::new(ErrorKind::TooManyPorts, "Every port slot is in use")
        })?;

        let expression = core::mem::take(&mut config.expression);
        let read_transform = core::mem::take(&mut config.read_transform);
        let write_transform = core::mem::take(&mut config.write_transform);

        let mut port = Port::new(slot, config);
        port.driver = driver;
        port.read_transform = stored(transform(&port.id, &read_transform), &port.id).flatten();
        port.write_transform = stored(transform(&port.id, &write_transform), &port.id).flatten();

        if !expression.trim().is_empty() {
            if port.output {
                if let Some(expr) = stored(self.validate_expression(&port.id, &expression), &port.id)
                {
                    let live = port.enabled.then_some(expr);
                    port.assign_expression(&expression, live);
                }
            } else {
                warn!("Dropping expression of input port `{}`", port.id);
            }
        }

        info!("Port `{}` added in slot {slot}", port.id);
        self.ports.insert(port);
        self.recompute_dependencies();
        self.touch_slot(slot);
        Ok(())
    }

    /// Unregisters a virtual port.
    ///
    /// # Errors
    ///
    /// Fails when the port does not exist or is not virtual.
    pub fn unregister_port(&mut self, id: &str) -> Result<()> {
        let port = self.ports.find(id).ok_or_else(|| not_found(id))?;
        if !port.virtual_port {
            return Err(Error::new(
                ErrorKind::NotVirtual,
                format!("Port `{id}` is not virtual"),
            ));
        }
        let slot = port.slot;

        self.touch_slot(slot);
        let _ = self.ports.remove(id);
        self.recompute_dependencies();
        self.notifications
            .push_back(Notification::PortUpdate { id: id.into() });
        info!("Port `{id}` removed from slot {slot}");
        Ok(())
    }

    /// Writes a value to an output port.
    ///
    /// Boolean values are normalized to `0` or `1`. The write transform is
    /// applied before the value reaches the driver.
    ///
    /// # Errors
    ///
    /// Fails when the port is missing, disabled or not an output, when the
    /// value is out of bounds or when the driver rejects it.
    pub fn set_port_value(&mut self, id: &str, value: f64) -> Result<()> {
        let port = self.ports.find(id).ok_or_else(|| not_found(id))?;
        if !port.output {
            return Err(Error::new(
                ErrorKind::NotOutput,
                format!("Port `{id}` is not an output"),
            ));
        }
        if !port.enabled {
            return Err(Error::new(
                ErrorKind::PortDisabled,
                format!("Port `{id}` is disabled"),
            ));
        }
        let normalized = value
            .is_finite()
            .then(|| port.normalize(value))
            .flatten()
            .ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidValue,
                    format!("{value} is not a valid value for `{id}`"),
                )
            })?;

        let slot = port.slot;
        self.commit(slot, normalized, ChangeReason::Native)
    }

    /// Assigns the value expression of an output port. An empty text clears
    /// it.
    ///
    /// The previous expression stays in place when the new one is rejected.
    ///
    /// # Errors
    ///
    /// Fails when the port is missing or not an output, when the text does
    /// not parse or when the expression would loop back to the port through
    /// other ports.
    pub fn set_expression(&mut self, id: &str, source: &str) -> Result<()> {
        let port = self.ports.find(id).ok_or_else(|| not_found(id))?;
        if !port.output {
            return Err(Error::new(
                ErrorKind::NotOutput,
                format!("Only output ports can have an expression, `{id}` is an input"),
            ));
        }

        let expr = if source.trim().is_empty() {
            None
        } else {
            Some(self.validate_expression(id, source).inspect_err(|e| {
                warn!("Rejected expression of `{id}`: {e}");
            })?)
        };

        let port = self.port_mut(id)?;
        let live = expr.filter(|_| port.enabled);
        port.assign_expression(source, live);
        port.dirty = true;
        let slot = port.slot;

        self.recompute_dependencies();
        self.touch_slot(slot);
        info!("Expression of `{id}` set to `{}`", source.trim());
        Ok(())
    }

    /// Assigns the read transform of a port. An empty text clears it.
    ///
    /// # Errors
    ///
    /// Fails when the port is missing, when the text does not parse or when
    /// the transform references another port.
    pub fn set_read_transform(&mut self, id: &str, source: &str) -> Result<()> {
        let expr = transform(id, source)?;
        let port = self.port_mut(id)?;
        port.read_transform = expr;
        port.dirty = true;
        info!("Read transform of `{id}` set to `{}`", source.trim());
        Ok(())
    }

    /// Assigns the write transform of a port. An empty text clears it.
    ///
    /// # Errors
    ///
    /// Fails when the port is missing, when the text does not parse or when
    /// the transform references another port.
    pub fn set_write_transform(&mut self, id: &str, source: &str) -> Result<()> {
        let expr = transform(id, source)?;
        let port = self.port_mut(id)?;
        port.write_transform = expr;
        port.dirty = true;
        info!("Write transform of `{id}` set to `{}`", source.trim());
        Ok(())
    }

    /// Replaces the filter of a port, discarding its accumulated samples.
    ///
    /// When the kind or the width changes, the port reads as `Undefined`
    /// until the new window fills up.
    ///
    /// # Errors
    ///
    /// Fails when the port is missing or when the width is not between `1`
    /// and [`MAX_FILTER_WIDTH`].
    pub fn set_filter(&mut self, id: &str, kind: FilterKind, width: usize) -> Result<()> {
        if !(1..=MAX_FILTER_WIDTH).contains(&width) {
            return Err(Error::new(
                ErrorKind::InvalidFilter,
                format!("Filter width must be between 1 and {MAX_FILTER_WIDTH}, got {width}"),
            ));
        }
        let port = self.port_mut(id)?;
        let filter = Filter::new(kind, width);
        if port.filter.kind() == kind && port.filter.width() == filter.width() {
            port.filter.reset();
            return Ok(());
        }
        port.filter = filter;
        port.dirty = true;

        if port.value.is_some() {
            port.value = None;
            port.last_read_value = None;
            port.change_reason = ChangeReason::Native;
            let slot = port.slot;
            self.touch_slot(slot);
            self.notifications.push_back(Notification::ValueChange {
                id: id.into(),
                value: None,
            });
        }
        info!("Filter of `{id}` set to {kind} over {width} samples");
        Ok(())
    }

    /// Enables a port.
    ///
    /// The expression source is parsed again and the port, along with every
    /// port depending on it, is evaluated at the next tick.
    ///
    /// # Errors
    ///
    /// Fails when the port does not exist, or when its expression no longer
    /// parses or would now loop back to it. The port then stays disabled.
    pub fn enable(&mut self, id: &str) -> Result<()> {
        let port = self.ports.find(id).ok_or_else(|| not_found(id))?;
        if port.enabled {
            return Ok(());
        }

        let expr = if port.expression.is_empty() {
            None
        } else {
            let source = port.expression.clone();
            Some(self.validate_expression(id, &source).inspect_err(|e| {
                warn!("Port `{id}` stays disabled: {e}");
            })?)
        };

        let port = self.port_mut(id)?;
        port.enabled = true;
        port.value_expr = expr;
        port.last_sample_ms = None;
        port.dirty = true;
        let slot = port.slot;

        self.recompute_dependencies();
        self.touch_slot(slot);
        self.notifications
            .push_back(Notification::PortUpdate { id: id.into() });
        info!("Port `{id}` enabled");
        Ok(())
    }

    /// Disables a port.
    ///
    /// The value becomes `Undefined` and the live expression is released,
    /// while its source is kept.
    ///
    /// # Errors
    ///
    /// Fails when the port does not exist.
    pub fn disable(&mut self, id: &str) -> Result<()> {
        let port = self.port_mut(id)?;
        if !port.enabled {
            return Ok(());
        }
        port.enabled = false;
        port.value = None;
        port.last_read_value = None;
        port.value_expr = None;
        port.filter.reset();
        port.dirty = true;
        let slot = port.slot;

        self.touch_slot(slot);
        self.notifications
            .push_back(Notification::PortUpdate { id: id.into() });
        info!("Port `{id}` disabled");
        Ok(())
    }

    /// Requests the evaluation of a port expression, and of every expression
    /// depending on the port, at the next tick.
    ///
    /// # Errors
    ///
    /// Fails when the port does not exist.
    pub fn touch(&mut self, id: &str) -> Result<()> {
        let slot = self.ports.slot_of(id).ok_or_else(|| not_found(id))?;
        self.touch_slot(slot);
        Ok(())
    }

    /// Returns a port.
    #[must_use]
    pub fn port(&self, id: &str) -> Option<&Port> {
        self.ports.find(id)
    }

    /// Iterates over every port, in slot order.
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter()
    }

    /// Returns the configuration of a port.
    #[must_use]
    pub fn port_config(&self, id: &str) -> Option<PortConfig> {
        self.ports.find(id).map(Port::config)
    }

    /// Returns the configuration of every port.
    #[must_use]
    pub fn port_configs(&self) -> Vec<PortConfig> {
        self.ports.iter().map(Port::config).collect()
    }

    /// Returns the value of a port.
    ///
    /// # Errors
    ///
    /// Fails when the port does not exist.
    pub fn value(&self, id: &str) -> Result<Value> {
        self.ports
            .find(id)
            .map(Port::value)
            .ok_or_else(|| not_found(id))
    }

    fn port_mut(&mut self, id: &str) -> Result<&mut Port> {
        self.ports.find_mut(id).ok_or_else(|| not_found(id))
    }

    fn validate_expression(&self, id: &str, source: &str) -> Result<Expr> {
        let expr = parse(id, source)?;
        let depth = check_loops(&expr, id, &self.ports);
        if depth > 1 {
            return Err(Error::new(
                ErrorKind::Loop,
                format!("Expression of `{id}` loops back to it through {depth} ports"),
            ));
        }
        Ok(expr)
    }

    // Ids may resolve differently after any registration change, so every
    // mask is computed again.
    fn recompute_dependencies(&mut self) {
        let masks: Vec<(usize, u64)> = self
            .ports
            .iter()
            .map(|port| {
                let mask = port
                    .value_expr
                    .as_ref()
                    .map_or(0, |expr| dependency_mask(expr, &self.ports));
                (port.slot, mask)
            })
            .collect();
        for (slot, mask) in masks {
            if let Some(port) = self.ports.get_mut(slot) {
                port.dep_mask = mask;
            }
        }
    }

    pub(crate) fn touch_slot(&mut self, slot: usize) {
        let bit = slot_bit(slot);
        self.forced_mask |= self
            .ports
            .iter()
            .filter(|port| port.dep_mask & bit != 0)
            .fold(bit, |mask, port| mask | slot_bit(port.slot));
    }
}

// Parses a transform, which may only reference its own port.
fn transform(id: &str, source: &str) -> Result<Option<Expr>> {
    if source.trim().is_empty() {
        return Ok(None);
    }
    let expr = parse(id, source)?;
    if let Some(foreign) = expr.port_ids().into_iter().find(|port| *port != id) {
        return Err(Error::new(
            ErrorKind::ForeignPortReference,
            format!("Transform of `{id}` references `{foreign}`"),
        ));
    }
    Ok(Some(expr))
}

fn stored<T>(result: Result<T>, id: &str) -> Option<T> {
    result
        .inspect_err(|e| warn!("Dropping stored expression of `{id}`: {e}"))
        .ok()
}
