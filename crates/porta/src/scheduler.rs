use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::deps::{TIME_BIT, TIME_MS_BIT, slot_bit};
use crate::error::{Error, ErrorKind, Result};
use crate::eval::{Context, Now, ValueSource};
use crate::port::{ChangeReason, PortConfig, PortKind};
use crate::registry::Ports;
use crate::value::{Value, finite};

// Default interval between two flushes of persisted values.
const DEFAULT_PERSIST_INTERVAL_MS: u64 = 5000;

/// Scheduler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Minimum interval between two flushes of persisted values, in
    /// milliseconds.
    pub persist_interval_ms: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            persist_interval_ms: DEFAULT_PERSIST_INTERVAL_MS,
        }
    }
}

/// An outbound notification, queued for the host to push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    /// A port committed a new value.
    ValueChange {
        /// Port identifier.
        id: String,
        /// New value.
        value: Value,
    },
    /// A port was enabled, disabled or removed.
    PortUpdate {
        /// Port identifier.
        id: String,
    },
}

/// Counters of a single scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    /// Ports sampled through their driver.
    pub sampled: usize,
    /// Expressions evaluated.
    pub evaluated: usize,
    /// Values committed.
    pub committed: usize,
}

// Resolves references of a transform, which can only read its own port.
struct OwnValue<'a> {
    id: &'a str,
    value: f64,
}

impl ValueSource for OwnValue<'_> {
    fn value_of(&self, id: &str) -> Value {
        (id == self.id).then_some(self.value)
    }
}

/// The port scheduler.
///
/// It owns every port, runs the change-driven evaluation at each
/// [`Core::tick`] and queues the outbound work for the host.
pub struct Core {
    pub(crate) config: CoreConfig,
    pub(crate) ports: Ports,
    pub(crate) forced_mask: u64,
    pub(crate) notifications: VecDeque<Notification>,
    pub(crate) now: Now,
    last_second: Option<u64>,
    last_flush_ms: u64,
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

impl Core {
    /// Creates a [`Core`] without ports.
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            ports: Ports::new(),
            forced_mask: 0,
            notifications: VecDeque::new(),
            now: Now::default(),
            last_second: None,
            last_flush_ms: 0,
        }
    }

    /// Returns the [`CoreConfig`].
    #[must_use]
    pub const fn config(&self) -> CoreConfig {
        self.config
    }

    /// Runs one scheduler step.
    ///
    /// Ports due for sampling are read, transformed and filtered, value
    /// changes are collected into the change mask and the expressions
    /// depending on any changed bit are re-evaluated. A port whose last
    /// change came from its own expression does not re-trigger that
    /// expression through its own bit.
    pub fn tick(&mut self, now: Now) -> TickStats {
        self.now = now;
        let mut stats = TickStats::default();

        let mut mask = TIME_MS_BIT;
        let second = now.unix_ms.map(|ms| ms / 1000);
        if second != self.last_second {
            self.last_second = second;
            mask |= TIME_BIT;
        }

        self.sample(now, &mut stats);

        let (changed, self_caused) = self.detect_changes();
        mask |= changed | core::mem::take(&mut self.forced_mask);

        self.evaluate(mask, self_caused, now, &mut stats);

        if stats.committed > 0 {
            debug!(
                "Tick at {} ms: {} sampled, {} evaluated, {} committed",
                now.uptime_ms, stats.sampled, stats.evaluated, stats.committed
            );
        }
        stats
    }

    /// Drains the queued [`Notification`]s, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// Returns the configuration of every port with pending changes to
    /// persist, then clears their pending state.
    ///
    /// Nothing is returned until the persist interval has elapsed since the
    /// previous flush, unless `force` is set.
    pub fn take_dirty_configs(&mut self, now: Now, force: bool) -> Vec<PortConfig> {
        if !force
            && now.uptime_ms.saturating_sub(self.last_flush_ms) < self.config.persist_interval_ms
        {
            return Vec::new();
        }
        self.last_flush_ms = now.uptime_ms;

        self.ports
            .iter_mut()
            .filter(|port| port.dirty)
            .map(|port| {
                port.dirty = false;
                port.config()
            })
            .collect()
    }

    fn sample(&mut self, now: Now, stats: &mut TickStats) {
        for slot in 0..self.ports.slot_count() {
            let Some(port) = self.ports.get_mut(slot) else {
                continue;
            };
            if !port.enabled || port.output {
                continue;
            }
            if port
                .last_sample_ms
                .is_some_and(|last| now.uptime_ms.saturating_sub(last) < port.sampling_interval_ms)
            {
                continue;
            }
            port.last_sample_ms = Some(now.uptime_ms);

            let Some(driver) = port.driver.as_mut() else {
                continue;
            };
            stats.sampled += 1;
            let Some(raw) = driver.read(now).and_then(finite) else {
                continue;
            };

            let transformed = match port.read_transform.as_mut() {
                Some(transform) => {
                    let own = OwnValue {
                        id: &port.id,
                        value: raw,
                    };
                    transform.eval(&Context::new(&own, now))
                }
                None => Some(raw),
            };
            let Some(transformed) = transformed else {
                continue;
            };

            let boolean = port.kind == PortKind::Boolean;
            let Some(filtered) =
                port.filter
                    .push(transformed, boolean, port.read_transform.as_ref())
            else {
                debug!("Port `{}` waits for its filter to fill up", port.id);
                continue;
            };
            let Some(value) = port.normalize(filtered) else {
                continue;
            };

            port.last_read_value = Some(value);
            if port.value != Some(value) {
                port.value = Some(value);
                port.change_reason = ChangeReason::Native;
                if port.persisted {
                    port.dirty = true;
                }
                stats.committed += 1;
                self.notifications.push_back(Notification::ValueChange {
                    id: port.id.clone(),
                    value: port.value,
                });
            }
        }
    }

    // Returns the mask of changed ports along with the mask of those whose
    // change came from their own expression.
    fn detect_changes(&mut self) -> (u64, u64) {
        let mut changed = 0;
        let mut self_caused = 0;
        for port in self.ports.iter_mut().filter(|port| port.enabled) {
            if port.value == port.tick_value {
                continue;
            }
            let bit = slot_bit(port.slot);
            changed |= bit;
            if port.change_reason == ChangeReason::FromExpression {
                self_caused |= bit;
            }
            port.change_reason = ChangeReason::Native;
            port.tick_value = port.value;
        }
        (changed, self_caused)
    }

    fn evaluate(&mut self, mask: u64, self_caused: u64, now: Now, stats: &mut TickStats) {
        for slot in 0..self.ports.slot_count() {
            let own = slot_bit(slot);
            let Some(port) = self.ports.get_mut(slot) else {
                continue;
            };
            if !port.enabled || !port.output {
                continue;
            }
            if mask & own != 0 && self_caused & own != 0 && port.dep_mask & own != 0 {
                continue;
            }
            if mask & (port.dep_mask | own) == 0 {
                continue;
            }
            let Some(mut expr) = port.value_expr.take() else {
                continue;
            };

            stats.evaluated += 1;
            let result = expr.eval(&Context::new(&self.ports, now));

            let Some(port) = self.ports.get_mut(slot) else {
                continue;
            };
            port.value_expr = Some(expr);
            let Some(value) = result.and_then(|value| port.normalize(value)) else {
                continue;
            };
            if port.value == Some(value) {
                continue;
            }

            debug!("Expression of `{}` produced {value}", port.id);
            match self.commit(slot, value, ChangeReason::FromExpression) {
                Ok(()) => stats.committed += 1,
                Err(e) => warn!("Port in slot {slot} rejected {value}: {e}"),
            }
        }
    }

    // The single path through which outputs change their value: the write
    // transform is applied, the driver is written, then the value is
    // committed and announced.
    pub(crate) fn commit(&mut self, slot: usize, value: f64, reason: ChangeReason) -> Result<()> {
        let now = self.now;
        let port = self
            .ports
            .get_mut(slot)
            .ok_or_else(|| Error::new(ErrorKind::PortNotFound, format!("Empty slot {slot}")))?;

        if port.output {
            let written = match port.write_transform.as_mut() {
                Some(transform) => {
                    let own = OwnValue {
                        id: &port.id,
                        value,
                    };
                    transform.eval(&Context::new(&own, now))
                }
                None => Some(value),
            };
            let written = written.ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidValue,
                    format!("Write transform of `{}` is undefined for {value}", port.id),
                )
            })?;
            if let Some(driver) = port.driver.as_mut() {
                driver.write(written)?;
            }
        }

        port.value = Some(value);
        port.last_read_value = Some(value);
        port.change_reason = reason;
        if port.persisted {
            port.dirty = true;
        }
        self.notifications.push_back(Notification::ValueChange {
            id: port.id.clone(),
            value: Some(value),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use std::sync::{Arc, Mutex};

    use crate::filter::FilterKind;
    use crate::port::{PortConfig, PortDriver, PortKind};
    use crate::value::Value;
    use crate::{Now, serialize};

    use super::{Core, CoreConfig, Notification};

    #[derive(Clone, Default)]
    struct Sensor(Arc<Mutex<Value>>);

    impl Sensor {
        fn set(&self, value: f64) {
            *self.0.lock().unwrap() = Some(value);
        }
    }

    impl PortDriver for Sensor {
        fn read(&mut self, _now: Now) -> Value {
            *self.0.lock().unwrap()
        }
    }

    fn at(uptime_ms: u64) -> Now {
        Now::new(uptime_ms, None)
    }

    fn add_input(core: &mut Core, config: PortConfig, initial: f64) -> Sensor {
        let sensor = Sensor::default();
        sensor.set(initial);
        core.add_port(config.sampling_interval(100), Some(Box::new(sensor.clone())))
            .unwrap();
        sensor
    }

    fn value_changes(notifications: &[Notification], port: &str) -> Vec<Value> {
        notifications
            .iter()
            .filter_map(|n| match n {
                Notification::ValueChange { id, value } if id == port => Some(*value),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn change_propagates_within_the_tick() {
        let mut core = Core::default();
        let sensor = add_input(&mut core, PortConfig::input("a", PortKind::Number), 1.);
        core.add_port(PortConfig::virtual_output("b").expression("MUL($a, 2)"), None)
            .unwrap();

        let _ = core.tick(at(0));
        assert_eq!(core.value("a"), Ok(Some(1.)));
        assert_eq!(core.value("b"), Ok(Some(2.)));

        sensor.set(3.);
        let stats = core.tick(at(100));
        assert_eq!(stats.committed, 2);
        assert_eq!(core.value("b"), Ok(Some(6.)));

        let notifications = core.take_notifications();
        assert_eq!(value_changes(&notifications, "a"), [Some(1.), Some(3.)]);
        assert_eq!(value_changes(&notifications, "b"), [Some(2.), Some(6.)]);
    }

    #[test]
    fn no_evaluation_without_changes() {
        let mut core = Core::default();
        let _sensor = add_input(&mut core, PortConfig::input("a", PortKind::Number), 1.);
        core.add_port(PortConfig::virtual_output("b").expression("ADD($a, 1)"), None)
            .unwrap();

        let _ = core.tick(at(0));
        let _ = core.tick(at(100));

        let stats = core.tick(at(200));
        assert_eq!(stats.sampled, 1);
        assert_eq!(stats.evaluated, 0);
        assert_eq!(stats.committed, 0);
        assert_eq!(core.value("b"), Ok(Some(2.)));
    }

    #[test]
    fn self_reference_does_not_run_away() {
        let mut core = Core::default();
        core.add_port(
            PortConfig::virtual_output("c").expression("ADD(DEFAULT($, 0), 1)"),
            None,
        )
        .unwrap();

        let _ = core.tick(at(0));
        assert_eq!(core.value("c"), Ok(Some(1.)));
        for tick in 1..10 {
            let _ = core.tick(at(tick * 100));
        }
        assert_eq!(core.value("c"), Ok(Some(1.)));

        core.set_port_value("c", 10.).unwrap();
        let _ = core.tick(at(1000));
        assert_eq!(core.value("c"), Ok(Some(11.)));
        let _ = core.tick(at(1100));
        let _ = core.tick(at(1200));
        assert_eq!(core.value("c"), Ok(Some(11.)));
    }

    #[test]
    fn delay_releases_the_change_once() {
        let mut core = Core::default();
        let sensor = add_input(&mut core, PortConfig::input("a", PortKind::Number), 0.);
        core.add_port(PortConfig::virtual_output("b").expression("DELAY($a, 1000)"), None)
            .unwrap();

        let _ = core.tick(at(0));
        sensor.set(1.);
        for tick in 1..=10 {
            let _ = core.tick(at(tick * 100));
            assert_eq!(core.value("b"), Ok(None), "tick {tick}");
        }

        let _ = core.tick(at(1100));
        assert_eq!(core.value("b"), Ok(Some(1.)));
        for tick in 12..20 {
            let _ = core.tick(at(tick * 100));
        }

        let notifications = core.take_notifications();
        assert_eq!(value_changes(&notifications, "b"), [Some(1.)]);
    }

    #[test]
    fn time_bits() {
        let mut core = Core::default();
        core.add_port(
            PortConfig::virtual_output("clock").expression("DIV(TIMEMS(), 1000)"),
            None,
        )
        .unwrap();
        core.add_port(
            PortConfig::virtual_output("seconds").expression("TIME()"),
            None,
        )
        .unwrap();

        let _ = core.tick(Now::new(0, Some(5000)));
        assert_eq!(core.value("seconds"), Ok(Some(5.)));
        assert_eq!(core.value("clock"), Ok(Some(5.)));

        // Both values changed on the first tick, so both run once more.
        let stats = core.tick(Now::new(100, Some(5100)));
        assert_eq!(stats.evaluated, 2);
        assert_eq!(core.value("clock"), Ok(Some(5.1)));

        let stats = core.tick(Now::new(200, Some(5200)));
        assert_eq!(stats.evaluated, 1);
        assert_eq!(core.value("clock"), Ok(Some(5.2)));

        let stats = core.tick(Now::new(1000, Some(6000)));
        assert_eq!(stats.evaluated, 2);
        assert_eq!(core.value("seconds"), Ok(Some(6.)));
    }

    #[test]
    fn read_transform_and_filter() {
        let mut core = Core::default();
        let sensor = add_input(
            &mut core,
            PortConfig::input("t", PortKind::Number)
                .read_transform("MUL($, 0.1)")
                .filter(FilterKind::Average, 2),
            250.,
        );

        let _ = core.tick(at(0));
        assert_eq!(core.value("t"), Ok(None));
        sensor.set(270.);
        let _ = core.tick(at(100));
        assert_eq!(core.value("t"), Ok(Some(26.)));
    }

    #[test]
    fn out_of_bounds_samples_are_dropped() {
        let mut core = Core::default();
        let sensor = add_input(
            &mut core,
            PortConfig::input("h", PortKind::Number).bounds(Some(0.), Some(100.)),
            40.,
        );

        let _ = core.tick(at(0));
        sensor.set(140.);
        let _ = core.tick(at(100));
        assert_eq!(core.value("h"), Ok(Some(40.)));
    }

    #[test]
    fn non_finite_samples_are_undefined() {
        let mut core = Core::default();
        let _sensor = add_input(&mut core, PortConfig::input("a", PortKind::Number), f64::NAN);
        core.add_port(PortConfig::virtual_output("b").expression("DEFAULT($a, 7)"), None)
            .unwrap();

        let stats = core.tick(at(0));
        assert_eq!(stats.sampled, 1);
        assert_eq!(core.value("a"), Ok(None));
        assert_eq!(core.value("b"), Ok(Some(7.)));

        // `b` changed on the first tick and runs once more.
        let _ = core.tick(at(100));
        for tick in 2..6 {
            let stats = core.tick(at(tick * 100));
            assert_eq!((stats.evaluated, stats.committed), (0, 0), "tick {tick}");
        }
        assert_eq!(core.value("a"), Ok(None));

        let notifications = core.take_notifications();
        assert!(value_changes(&notifications, "a").is_empty());
        assert_eq!(value_changes(&notifications, "b"), [Some(7.)]);
    }

    #[test]
    fn filter_change_restarts_the_window() {
        let mut core = Core::default();
        let _sensor = add_input(
            &mut core,
            PortConfig::input("t", PortKind::Number).filter(FilterKind::Average, 2),
            5.,
        );

        let _ = core.tick(at(0));
        let _ = core.tick(at(100));
        assert_eq!(core.value("t"), Ok(Some(5.)));
        let _ = core.take_notifications();

        core.set_filter("t", FilterKind::Average, 4).unwrap();
        assert_eq!(core.value("t"), Ok(None));
        assert_eq!(core.port("t").unwrap().last_read_value(), None);
        assert_eq!(
            core.take_notifications(),
            [Notification::ValueChange {
                id: "t".into(),
                value: None,
            }]
        );

        for tick in 2..5 {
            let _ = core.tick(at(tick * 100));
            assert_eq!(core.value("t"), Ok(None), "tick {tick}");
        }
        let _ = core.tick(at(500));
        assert_eq!(core.value("t"), Ok(Some(5.)));

        // Setting the same filter again keeps the value.
        core.set_filter("t", FilterKind::Average, 4).unwrap();
        assert_eq!(core.value("t"), Ok(Some(5.)));
    }

    #[test]
    fn sampling_interval() {
        let mut core = Core::default();
        let sensor = Sensor::default();
        sensor.set(1.);
        core.add_port(
            PortConfig::input("s", PortKind::Boolean).sampling_interval(500),
            Some(Box::new(sensor.clone())),
        )
        .unwrap();

        assert_eq!(core.tick(at(0)).sampled, 1);
        assert_eq!(core.tick(at(100)).sampled, 0);
        assert_eq!(core.tick(at(499)).sampled, 0);
        assert_eq!(core.tick(at(500)).sampled, 1);
    }

    #[test]
    fn persistence_is_batched() {
        let mut core = Core::new(CoreConfig {
            persist_interval_ms: 1000,
        });
        core.add_port(PortConfig::virtual_output("v").persisted(), None)
            .unwrap();
        core.set_port_value("v", 5.).unwrap();

        assert!(core.take_dirty_configs(at(500), false).is_empty());
        let configs = core.take_dirty_configs(at(1000), false);
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].value, Some(5.));
        assert!(core.take_dirty_configs(at(1001), true).is_empty());
    }

    #[test]
    fn notification_format() {
        assert_eq!(
            serialize(Notification::ValueChange {
                id: "a".into(),
                value: Some(1.5),
            }),
            serde_json::json!({ "event": "value_change", "id": "a", "value": 1.5 })
        );
        assert_eq!(
            serialize(Notification::PortUpdate { id: "b".into() }),
            serde_json::json!({ "event": "port_update", "id": "b" })
        );
    }
}
