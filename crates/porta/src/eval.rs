use alloc::vec::Vec;
use core::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::expr::{Call, Expr};
use crate::value::Value;

/// The time of a scheduler tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Now {
    /// Monotonic milliseconds elapsed since boot.
    pub uptime_ms: u64,
    /// Wall-clock milliseconds since the Unix epoch, when the clock is set.
    pub unix_ms: Option<u64>,
}

impl Now {
    /// Creates a [`Now`].
    #[must_use]
    pub const fn new(uptime_ms: u64, unix_ms: Option<u64>) -> Self {
        Self { uptime_ms, unix_ms }
    }
}

/// A source of port values for expressions.
pub trait ValueSource {
    /// Returns the last read value of an enabled port, or `Undefined` when
    /// the port does not exist or is disabled.
    fn value_of(&self, id: &str) -> Value;
}

/// The context an expression is evaluated in.
pub struct Context<'a> {
    source: &'a dyn ValueSource,
    now: Now,
    invocations: Cell<usize>,
}

impl<'a> Context<'a> {
    /// Creates a [`Context`].
    #[must_use]
    pub fn new(source: &'a dyn ValueSource, now: Now) -> Self {
        Self {
            source,
            now,
            invocations: Cell::new(0),
        }
    }

    /// Returns the evaluation time.
    #[must_use]
    pub const fn now(&self) -> Now {
        self.now
    }

    /// Returns how many function callbacks ran within this context.
    #[must_use]
    pub fn invocations(&self) -> usize {
        self.invocations.get()
    }
}

impl Expr {
    /// Evaluates the expression.
    ///
    /// Any `Undefined` argument short-circuits its call to `Undefined`
    /// without running the function, unless the function explicitly accepts
    /// `Undefined` arguments. Stateful functions therefore do not advance on
    /// such evaluations.
    pub fn eval(&mut self, ctx: &Context<'_>) -> Value {
        match self {
            Self::Literal(value) => Some(*value),
            Self::PortRef(id) => ctx.source.value_of(id),
            Self::Call(call) => call.eval(ctx),
        }
    }
}

impl Call {
    fn eval(&mut self, ctx: &Context<'_>) -> Value {
        let values: Vec<Value> = self.args.iter_mut().map(|arg| arg.eval(ctx)).collect();

        if self.func.accepts_undefined() {
            ctx.invocations.set(ctx.invocations.get() + 1);
            return self.func.call_tolerant(&values);
        }

        let defined: Vec<f64> = values.into_iter().collect::<Option<_>>()?;
        ctx.invocations.set(ctx.invocations.get() + 1);
        self.func.call(&defined, &mut self.state, ctx.now)
    }
}
