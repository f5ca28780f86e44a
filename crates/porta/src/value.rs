use alloc::format;
use alloc::string::String;

/// A port or expression value.
///
/// `None` is the `Undefined` sentinel: no valid value is available.
/// Booleans are represented as the numbers `0` and `1`.
pub type Value = Option<f64>;

/// Converts a boolean into its numeric representation.
#[inline]
#[must_use]
pub const fn from_bool(value: bool) -> f64 {
    if value { 1. } else { 0. }
}

/// Checks whether a numeric value is considered `true`.
#[inline]
#[must_use]
pub fn is_true(value: f64) -> bool {
    value != 0.
}

/// Discards non-finite numbers, turning them into `Undefined`.
#[inline]
#[must_use]
pub fn finite(value: f64) -> Value {
    value.is_finite().then_some(value)
}

/// Rounds a value to the given number of decimals.
///
/// A negative number of decimals rounds to tens, hundreds and so on.
#[must_use]
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = libm::pow(10., f64::from(decimals.clamp(-10, 10)));
    libm::round(value * factor) / factor
}

/// Rounds a value with a precision scaled to its magnitude.
///
/// Larger values keep fewer decimals, which hides the noisy least
/// significant digits produced by averaging raw samples.
#[must_use]
pub fn round_by_magnitude(value: f64) -> f64 {
    let magnitude = libm::fabs(value);
    let decimals = if magnitude >= 1000. {
        0
    } else if magnitude >= 100. {
        1
    } else if magnitude >= 10. {
        2
    } else if magnitude >= 1. {
        3
    } else {
        4
    };
    round_to(value, decimals)
}

/// Formats a number the way it is written in expressions.
///
/// Integral values are printed without a fractional part.
#[must_use]
pub fn format_number(value: f64) -> String {
    if libm::trunc(value) == value && libm::fabs(value) < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::{finite, format_number, from_bool, is_true, round_by_magnitude, round_to};

    #[test]
    fn booleans() {
        assert_eq!(from_bool(true), 1.);
        assert_eq!(from_bool(false), 0.);
        assert!(is_true(-0.5));
        assert!(!is_true(0.));
    }

    #[test]
    fn non_finite_is_undefined() {
        assert_eq!(finite(f64::NAN), None);
        assert_eq!(finite(f64::INFINITY), None);
        assert_eq!(finite(2.5), Some(2.5));
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1250., -2), 1300.);
        assert_eq!(round_by_magnitude(1234.56), 1235.);
        assert_eq!(round_by_magnitude(123.456), 123.5);
        assert_eq!(round_by_magnitude(12.3456), 12.35);
        assert_eq!(round_by_magnitude(0.123456), 0.1235);
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(3.), "3");
        assert_eq!(format_number(-12.), "-12");
        assert_eq!(format_number(0.25), "0.25");
    }
}
