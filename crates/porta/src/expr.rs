use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::functions::Func;
use crate::stateful::NodeState;
use crate::value::format_number;

/// A function call node.
///
/// A call exclusively owns its arguments and the private state of its
/// function. Dropping the node releases both.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub(crate) func: Func,
    pub(crate) args: Vec<Expr>,
    pub(crate) state: NodeState,
}

impl Call {
    pub(crate) fn new(func: Func, args: Vec<Expr>) -> Self {
        Self {
            func,
            args,
            state: func.initial_state(),
        }
    }

    /// Returns the called [`Func`].
    #[must_use]
    pub const fn func(&self) -> Func {
        self.func
    }

    /// Returns the call arguments.
    #[must_use]
    pub fn args(&self) -> &[Expr] {
        &self.args
    }
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A fixed number. Booleans are stored as `0` and `1`.
    Literal(f64),
    /// A reference to a port, resolved by identifier at evaluation time.
    PortRef(String),
    /// A call to a built-in function.
    Call(Call),
}

impl core::fmt::Display for Expr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Literal(value) => f.write_str(&format_number(*value)),
            Self::PortRef(id) => write!(f, "${id}"),
            Self::Call(call) => {
                write!(f, "{}(", call.func)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    arg.fmt(f)?;
                }
                f.write_str(")")
            }
        }
    }
}

impl Expr {
    /// Visits every node of the tree, parents before children.
    pub fn visit<'a>(&'a self, visitor: &mut impl FnMut(&'a Expr)) {
        visitor(self);
        if let Self::Call(call) = self {
            for arg in &call.args {
                arg.visit(visitor);
            }
        }
    }

    /// Checks whether any node of the tree satisfies the predicate.
    #[must_use]
    pub fn any(&self, predicate: impl Fn(&Expr) -> bool) -> bool {
        let mut found = false;
        self.visit(&mut |node| found = found || predicate(node));
        found
    }

    /// Checks whether the tree calls the given [`Func`].
    #[must_use]
    pub fn calls(&self, func: Func) -> bool {
        self.any(|node| matches!(node, Self::Call(call) if call.func == func))
    }

    /// Returns the identifiers of every port the tree references.
    #[must_use]
    pub fn port_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.visit(&mut |node| {
            if let Self::PortRef(id) = node {
                ids.push(id.as_str());
            }
        });
        ids
    }

    // Applies the leading rounding function of the tree, if any, to a value.
    //
    // Only rounding calls whose extra arguments are literals qualify, since
    // they are re-run outside of any evaluation context.
    pub(crate) fn round_like(&self, value: f64) -> Option<f64> {
        let Self::Call(call) = self else {
            return None;
        };
        if !call.func.is_rounding() {
            return None;
        }

        let mut args = vec![value];
        for arg in call.args.iter().skip(1) {
            let Self::Literal(literal) = arg else {
                return None;
            };
            args.push(*literal);
        }
        call.func
            .call(&args, &mut NodeState::None, crate::eval::Now::default())
    }
}

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use crate::functions::Func;
    use crate::parser::parse;

    #[test]
    fn display_is_canonical() {
        let expr = parse("p", " add( 1 ,$a,  MUL($, 2.5) ) ").unwrap();
        assert_eq!(expr.to_string(), "ADD(1, $a, MUL($p, 2.5))");
        assert_eq!(parse("p", "true").unwrap().to_string(), "1");
        assert_eq!(parse("p", "TIME()").unwrap().to_string(), "TIME()");
    }

    #[test]
    fn display_round_trip() {
        for source in ["-3.25", "$temp.out", "IF(GT($a, 10), 1, 0)", "LUT($x, 0, 1, 10, 2)"] {
            let expr = parse("p", source).unwrap();
            assert_eq!(parse("p", &expr.to_string()).unwrap(), expr);
        }
    }

    #[test]
    fn queries() {
        let expr = parse("p", "ADD($a, DELAY($b, 100), $)").unwrap();
        assert_eq!(expr.port_ids(), ["a", "b", "p"]);
        assert!(expr.calls(Func::Delay));
        assert!(!expr.calls(Func::Time));
    }

    #[test]
    fn leading_rounding() {
        let expr = parse("p", "ROUND(DIV($, 10), 1)").unwrap();
        assert_eq!(expr.round_like(1.26), Some(1.3));
        let expr = parse("p", "FLOOR($)").unwrap();
        assert_eq!(expr.round_like(1.26), Some(1.));
        let expr = parse("p", "ROUND($, $a)").unwrap();
        assert_eq!(expr.round_like(1.26), None);
        let expr = parse("p", "MUL($, 2)").unwrap();
        assert_eq!(expr.round_like(1.26), None);
    }
}
