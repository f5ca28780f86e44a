use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::functions::Func;
use crate::value::{Value, from_bool};

/// Maximum number of entries a stateful function keeps in its history.
pub const MAX_HISTORY: usize = 32;

/// The private state of a call node.
///
/// Each call to a stateful function owns one, created by the parser and
/// released together with the node. States are never shared between nodes,
/// so two occurrences of the same function in an expression evolve
/// independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum NodeState {
    /// Stateless function.
    #[default]
    None,
    /// [`Func::Delay`] state.
    Delay(DelayState),
    /// [`Func::Sample`] state.
    Sample(SampleState),
    /// [`Func::Freeze`] state.
    Freeze(FreezeState),
    /// [`Func::Held`] state.
    Held(HeldState),
    /// [`Func::Deriv`] and [`Func::Integ`] state.
    Timed(TimedState),
    /// [`Func::FmAvg`] and [`Func::FmMedian`] state.
    Window(WindowState),
    /// [`Func::Rising`], [`Func::Falling`], [`Func::Acc`] and
    /// [`Func::AccInc`] state.
    Previous(PreviousState),
    /// [`Func::Hyst`] state.
    Hyst(HystState),
    /// [`Func::Sequence`] state.
    Sequence(SequenceState),
}

impl NodeState {
    pub(crate) fn call(&mut self, func: Func, args: &[f64], now_ms: u64) -> Value {
        match (self, func, args) {
            (Self::Delay(s), Func::Delay, [value, delay]) => s.eval(*value, *delay, now_ms),
            (Self::Sample(s), Func::Sample, [value, period]) => s.eval(*value, *period, now_ms),
            (Self::Freeze(s), Func::Freeze, [value, duration]) => {
                s.eval(*value, *duration, now_ms)
            }
            (Self::Held(s), Func::Held, [value, target, duration]) => {
                s.eval(*value, *target, *duration, now_ms)
            }
            (Self::Timed(s), Func::Deriv, [value, sampling]) => s.deriv(*value, *sampling, now_ms),
            (Self::Timed(s), Func::Integ, [value, accumulator, sampling]) => {
                s.integ(*value, *accumulator, *sampling, now_ms)
            }
            (Self::Window(s), Func::FmAvg, [value, width, sampling]) => s
                .sample(*value, *width, *sampling, now_ms)
                .then(|| s.average())
                .flatten(),
            (Self::Window(s), Func::FmMedian, [value, width, sampling]) => s
                .sample(*value, *width, *sampling, now_ms)
                .then(|| s.median())
                .flatten(),
            (Self::Previous(s), Func::Rising, [value]) => Some(from_bool(s.rising(*value))),
            (Self::Previous(s), Func::Falling, [value]) => Some(from_bool(s.falling(*value))),
            (Self::Previous(s), Func::Acc, [value, accumulator]) => {
                Some(s.accumulate(*value, *accumulator, false))
            }
            (Self::Previous(s), Func::AccInc, [value, accumulator]) => {
                Some(s.accumulate(*value, *accumulator, true))
            }
            (Self::Hyst(s), Func::Hyst, [value, low, high]) => s.eval(*value, *low, *high),
            (Self::Sequence(s), Func::Sequence, pairs) => s.eval(pairs, now_ms),
            _ => None,
        }
    }
}

fn elapsed(since: u64, now_ms: u64) -> f64 {
    now_ms.saturating_sub(since) as f64
}

/// A bounded queue of value changes waiting to be released.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DelayState {
    last: Option<f64>,
    queue: VecDeque<(f64, u64)>,
}

impl DelayState {
    fn eval(&mut self, value: f64, delay: f64, now_ms: u64) -> Value {
        match self.last {
            Some(last) if last != value => {
                if self.queue.len() == MAX_HISTORY {
                    let _ = self.queue.pop_front();
                }
                self.queue.push_back((value, now_ms));
            }
            _ => {}
        }
        self.last = Some(value);

        // The newest expired change wins, every older one is discarded.
        let expired = self
            .queue
            .iter()
            .take_while(|(_, at)| elapsed(*at, now_ms) >= delay)
            .count();
        if expired == 0 {
            return None;
        }
        self.queue.drain(..expired).last().map(|(value, _)| value)
    }
}

/// The latched value of a sampling function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleState {
    latched: Option<(f64, u64)>,
}

impl SampleState {
    fn eval(&mut self, value: f64, period: f64, now_ms: u64) -> Value {
        match self.latched {
            Some((latched, at)) if elapsed(at, now_ms) < period => Some(latched),
            _ => {
                self.latched = Some((value, now_ms));
                Some(value)
            }
        }
    }
}

/// The output of a freezing function along with its hold timer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreezeState {
    output: Option<f64>,
    frozen_at: Option<u64>,
}

impl FreezeState {
    fn eval(&mut self, value: f64, duration: f64, now_ms: u64) -> Value {
        if let Some(at) = self.frozen_at {
            if elapsed(at, now_ms) < duration {
                return self.output;
            }
            self.frozen_at = None;
        }

        if self.output != Some(value) {
            self.output = Some(value);
            self.frozen_at = Some(now_ms);
        }
        self.output
    }
}

/// The last value of a hold detector and the time it was first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeldState {
    last: Option<(f64, u64)>,
}

impl HeldState {
    fn eval(&mut self, value: f64, target: f64, duration: f64, now_ms: u64) -> Value {
        let since = match self.last {
            Some((last, since)) if last == value => since,
            _ => {
                self.last = Some((value, now_ms));
                now_ms
            }
        };
        Some(from_bool(value == target && elapsed(since, now_ms) >= duration))
    }
}

/// The previous sample of a derivative or an integral.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimedState {
    last: Option<(f64, u64)>,
}

impl TimedState {
    fn due(&self, sampling: f64, now_ms: u64) -> bool {
        self.last
            .is_none_or(|(_, at)| elapsed(at, now_ms) >= sampling)
    }

    fn deriv(&mut self, value: f64, sampling: f64, now_ms: u64) -> Value {
        if !self.due(sampling, now_ms) {
            return None;
        }
        let result = self.last.and_then(|(last, at)| {
            let seconds = elapsed(at, now_ms) / 1000.;
            (seconds > 0.).then(|| (value - last) / seconds)
        });
        self.last = Some((value, now_ms));
        result
    }

    fn integ(&mut self, value: f64, accumulator: f64, sampling: f64, now_ms: u64) -> Value {
        if !self.due(sampling, now_ms) {
            return None;
        }
        // Trapezoidal rule over the last interval.
        let area = self.last.map_or(0., |(last, at)| {
            (value + last) * elapsed(at, now_ms) / 1000. / 2.
        });
        self.last = Some((value, now_ms));
        Some(accumulator + area)
    }
}

/// A bounded moving window of sampled values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowState {
    history: VecDeque<f64>,
    sampled_at: Option<u64>,
}

impl WindowState {
    // Records a value when the sampling interval elapsed, keeping at most
    // `width` entries. Returns `false` when nothing can be computed yet.
    fn sample(&mut self, value: f64, width: f64, sampling: f64, now_ms: u64) -> bool {
        let width = (width.max(1.) as usize).min(MAX_HISTORY);
        let due = self
            .sampled_at
            .is_none_or(|at| elapsed(at, now_ms) >= sampling);
        if due {
            self.history.push_back(value);
            self.sampled_at = Some(now_ms);
        }
        while self.history.len() > width {
            let _ = self.history.pop_front();
        }
        !self.history.is_empty()
    }

    fn average(&self) -> Value {
        Some(self.history.iter().sum::<f64>() / self.history.len() as f64)
    }

    fn median(&self) -> Value {
        let mut sorted: Vec<f64> = self.history.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        sorted.get(sorted.len() / 2).copied()
    }
}

/// The previously seen input value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviousState {
    last: Option<f64>,
}

impl PreviousState {
    fn rising(&mut self, value: f64) -> bool {
        let edge = self.last.is_some_and(|last| value > last);
        self.last = Some(value);
        edge
    }

    fn falling(&mut self, value: f64) -> bool {
        let edge = self.last.is_some_and(|last| value < last);
        self.last = Some(value);
        edge
    }

    fn accumulate(&mut self, value: f64, accumulator: f64, increments_only: bool) -> f64 {
        let delta = self.last.map_or(0., |last| value - last);
        self.last = Some(value);
        if increments_only && delta < 0. {
            accumulator
        } else {
            accumulator + delta
        }
    }
}

/// The output of a hysteresis latch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HystState {
    high: bool,
}

impl HystState {
    fn eval(&mut self, value: f64, low: f64, high: f64) -> Value {
        if self.high && value < low {
            self.high = false;
        } else if !self.high && value > high {
            self.high = true;
        }
        Some(from_bool(self.high))
    }
}

/// The time a sequence started at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceState {
    anchor: Option<u64>,
}

impl SequenceState {
    fn eval(&mut self, pairs: &[f64], now_ms: u64) -> Value {
        if pairs.len() % 2 != 0 || pairs.chunks_exact(2).any(|p| p[1] < 0.) {
            return None;
        }
        let period: f64 = pairs.chunks_exact(2).map(|p| p[1]).sum();
        if period <= 0. {
            return None;
        }

        let anchor = *self.anchor.get_or_insert(now_ms);
        let offset = elapsed(anchor, now_ms) % period;

        let mut end = 0.;
        for pair in pairs.chunks_exact(2) {
            end += pair[1];
            if offset < end {
                return Some(pair[0]);
            }
        }
        pairs.chunks_exact(2).last().map(|pair| pair[0])
    }
}

#[cfg(test)]
mod tests {
    use crate::functions::Func;

    use super::{MAX_HISTORY, NodeState};

    struct Node {
        func: Func,
        state: NodeState,
    }

    impl Node {
        fn new(func: Func) -> Self {
            Self {
                func,
                state: func.initial_state(),
            }
        }

        fn at(&mut self, now_ms: u64, args: &[f64]) -> Option<f64> {
            self.state.call(self.func, args, now_ms)
        }
    }

    #[test]
    fn delay_releases_a_change_once() {
        let mut delay = Node::new(Func::Delay);
        assert_eq!(delay.at(0, &[0., 1000.]), None);
        // The value flips at t = 0.
        assert_eq!(delay.at(0, &[1., 1000.]), None);
        assert_eq!(delay.at(500, &[1., 1000.]), None);
        assert_eq!(delay.at(999, &[1., 1000.]), None);
        assert_eq!(delay.at(1000, &[1., 1000.]), Some(1.));
        assert_eq!(delay.at(1500, &[1., 1000.]), None);
        assert_eq!(delay.at(5000, &[1., 1000.]), None);
    }

    #[test]
    fn delay_keeps_the_order_of_changes() {
        let mut delay = Node::new(Func::Delay);
        assert_eq!(delay.at(0, &[0., 100.]), None);
        assert_eq!(delay.at(10, &[1., 100.]), None);
        assert_eq!(delay.at(50, &[2., 100.]), None);
        assert_eq!(delay.at(110, &[2., 100.]), Some(1.));
        assert_eq!(delay.at(120, &[2., 100.]), None);
        assert_eq!(delay.at(150, &[2., 100.]), Some(2.));
    }

    #[test]
    fn delay_queue_is_bounded() {
        let mut delay = Node::new(Func::Delay);
        for i in 0..100 {
            let _ = delay.at(i, &[i as f64, 10_000.]);
        }
        let NodeState::Delay(state) = &delay.state else {
            panic!("unexpected state");
        };
        assert_eq!(state.queue.len(), MAX_HISTORY);
    }

    #[test]
    fn sample_latches_once_per_period() {
        let mut sample = Node::new(Func::Sample);
        assert_eq!(sample.at(0, &[1., 100.]), Some(1.));
        assert_eq!(sample.at(50, &[2., 100.]), Some(1.));
        assert_eq!(sample.at(100, &[3., 100.]), Some(3.));
        assert_eq!(sample.at(150, &[4., 100.]), Some(3.));
    }

    #[test]
    fn freeze_holds_changes() {
        let mut freeze = Node::new(Func::Freeze);
        assert_eq!(freeze.at(0, &[1., 100.]), Some(1.));
        assert_eq!(freeze.at(10, &[2., 100.]), Some(1.));
        assert_eq!(freeze.at(100, &[2., 100.]), Some(2.));
        assert_eq!(freeze.at(150, &[3., 100.]), Some(2.));
        assert_eq!(freeze.at(200, &[3., 100.]), Some(3.));
    }

    #[test]
    fn held_restarts_on_change() {
        let mut held = Node::new(Func::Held);
        assert_eq!(held.at(0, &[1., 1., 100.]), Some(0.));
        assert_eq!(held.at(100, &[1., 1., 100.]), Some(1.));
        assert_eq!(held.at(110, &[0., 1., 100.]), Some(0.));
        assert_eq!(held.at(120, &[1., 1., 100.]), Some(0.));
        assert_eq!(held.at(219, &[1., 1., 100.]), Some(0.));
        assert_eq!(held.at(220, &[1., 1., 100.]), Some(1.));
    }

    #[test]
    fn derivative_is_gated() {
        let mut deriv = Node::new(Func::Deriv);
        assert_eq!(deriv.at(0, &[0., 1000.]), None);
        assert_eq!(deriv.at(500, &[5., 1000.]), None);
        assert_eq!(deriv.at(2000, &[10., 1000.]), Some(5.));
    }

    #[test]
    fn integral_accumulates() {
        let mut integ = Node::new(Func::Integ);
        assert_eq!(integ.at(0, &[2., 0., 1000.]), Some(0.));
        assert_eq!(integ.at(500, &[2., 0., 1000.]), None);
        assert_eq!(integ.at(1000, &[2., 0., 1000.]), Some(2.));
        assert_eq!(integ.at(2000, &[4., 2., 1000.]), Some(5.));
    }

    #[test]
    fn moving_average_and_median() {
        let mut avg = Node::new(Func::FmAvg);
        assert_eq!(avg.at(0, &[1., 3., 0.]), Some(1.));
        assert_eq!(avg.at(1, &[2., 3., 0.]), Some(1.5));
        assert_eq!(avg.at(2, &[6., 3., 0.]), Some(3.));
        assert_eq!(avg.at(3, &[10., 3., 0.]), Some(6.));
        // Shrinking the window drops the oldest entries.
        assert_eq!(avg.at(4, &[20., 1., 0.]), Some(20.));

        let mut median = Node::new(Func::FmMedian);
        assert_eq!(median.at(0, &[5., 3., 100.]), Some(5.));
        assert_eq!(median.at(50, &[100., 3., 100.]), Some(5.));
        assert_eq!(median.at(100, &[1., 3., 100.]), Some(5.));
        assert_eq!(median.at(200, &[3., 3., 100.]), Some(3.));
    }

    #[test]
    fn edges() {
        let mut rising = Node::new(Func::Rising);
        assert_eq!(rising.at(0, &[0.]), Some(0.));
        assert_eq!(rising.at(1, &[1.]), Some(1.));
        assert_eq!(rising.at(2, &[1.]), Some(0.));

        let mut falling = Node::new(Func::Falling);
        assert_eq!(falling.at(0, &[1.]), Some(0.));
        assert_eq!(falling.at(1, &[0.]), Some(1.));
    }

    #[test]
    fn accumulators() {
        let mut acc = Node::new(Func::Acc);
        assert_eq!(acc.at(0, &[10., 100.]), Some(100.));
        assert_eq!(acc.at(1, &[15., 100.]), Some(105.));
        assert_eq!(acc.at(2, &[12., 105.]), Some(102.));

        let mut inc = Node::new(Func::AccInc);
        assert_eq!(inc.at(0, &[10., 100.]), Some(100.));
        assert_eq!(inc.at(1, &[5., 100.]), Some(100.));
        assert_eq!(inc.at(2, &[8., 100.]), Some(103.));
    }

    #[test]
    fn hysteresis() {
        let mut hyst = Node::new(Func::Hyst);
        assert_eq!(hyst.at(0, &[15., 10., 20.]), Some(0.));
        assert_eq!(hyst.at(1, &[21., 10., 20.]), Some(1.));
        assert_eq!(hyst.at(2, &[15., 10., 20.]), Some(1.));
        assert_eq!(hyst.at(3, &[9., 10., 20.]), Some(0.));
    }

    #[test]
    fn sequence_cycles() {
        let mut sequence = Node::new(Func::Sequence);
        let args = [1., 100., 2., 50.];
        assert_eq!(sequence.at(1000, &args), Some(1.));
        assert_eq!(sequence.at(1099, &args), Some(1.));
        assert_eq!(sequence.at(1100, &args), Some(2.));
        assert_eq!(sequence.at(1149, &args), Some(2.));
        assert_eq!(sequence.at(1150, &args), Some(1.));
        assert_eq!(sequence.at(1, &[1., 100., 2.]), None);
    }
}
