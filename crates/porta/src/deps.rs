use crate::expr::Expr;
use crate::parser::parse;
use crate::registry::Ports;

/// Maximum number of simultaneously live ports.
///
/// Each port owns one bit of the 64-bit masks, the two highest bits being
/// reserved for the clock.
pub const MAX_PORTS: usize = 62;

/// Change mask bit marking that the elapsed milliseconds changed.
pub const TIME_MS_BIT: u64 = 1 << 62;

/// Change mask bit marking that the wall-clock second changed.
pub const TIME_BIT: u64 = 1 << 63;

/// Returns the mask bit of a port slot.
#[inline]
#[must_use]
pub const fn slot_bit(slot: usize) -> u64 {
    1 << slot
}

/// Collects the slot bits of every port referenced by the expression.
///
/// References to ports that do not exist are ignored.
#[must_use]
pub fn port_refs(expr: &Expr, ports: &Ports) -> u64 {
    expr.port_ids()
        .into_iter()
        .filter_map(|id| ports.slot_of(id))
        .fold(0, |mask, slot| mask | slot_bit(slot))
}

/// Checks whether the expression reads the wall-clock time.
#[must_use]
pub fn is_time_dependent(expr: &Expr) -> bool {
    expr.any(|node| matches!(node, Expr::Call(call) if call.func().is_time_dependent()))
}

/// Checks whether the expression depends on the elapsed milliseconds.
#[must_use]
pub fn is_time_ms_dependent(expr: &Expr) -> bool {
    expr.any(|node| matches!(node, Expr::Call(call) if call.func().is_time_ms_dependent()))
}

/// Computes the full set of change mask bits the expression must be
/// re-evaluated on.
#[must_use]
pub fn dependency_mask(expr: &Expr, ports: &Ports) -> u64 {
    let mut mask = port_refs(expr, ports);
    if is_time_dependent(expr) {
        mask |= TIME_BIT;
    }
    if is_time_ms_dependent(expr) {
        mask |= TIME_MS_BIT;
    }
    mask
}

/// Looks for a loop through other ports leading back to `owner`.
///
/// The walk follows every port reference into the expression of the
/// referenced port, one level deeper each time. Disabled ports hold no live
/// expression, so their stored source is parsed and followed instead.
/// Returns the depth at which `owner` was met again, or `0` when there is no
/// loop. A depth of `1` means the expression reads its own port directly,
/// which is allowed.
#[must_use]
pub fn check_loops(expr: &Expr, owner: &str, ports: &Ports) -> usize {
    let mut visited = 0;
    walk(expr, owner, ports, 1, &mut visited)
}

fn walk(expr: &Expr, owner: &str, ports: &Ports, depth: usize, visited: &mut u64) -> usize {
    for id in expr.port_ids() {
        if id == owner {
            if depth > 1 {
                return depth;
            }
            continue;
        }

        let Some(port) = ports.find(id) else {
            continue;
        };
        let bit = slot_bit(port.slot());
        if *visited & bit != 0 {
            continue;
        }
        *visited |= bit;

        let stored;
        let next = match port.value_expr() {
            Some(next) => Some(next),
            None if !port.expression().is_empty() => {
                stored = parse(port.id(), port.expression()).ok();
                stored.as_ref()
            }
            None => None,
        };
        if let Some(next) = next {
            let found = walk(next, owner, ports, depth + 1, visited);
            if found > 0 {
                return found;
            }
        }
    }
    0
}
