//! A recursive parser for the port expression language.
//!
//! An expression is a number, a boolean literal (`true` or `false`), a port
//! reference (`$id`, where a bare `$` refers to the port owning the
//! expression) or a function call `NAME(arg, ...)` whose arguments are
//! expressions themselves. Whitespace between tokens is insignificant.
//!
//! The parser works on byte ranges of the original source, so every error
//! position is an absolute offset into it, whatever the nesting depth.

use alloc::borrow::Cow;
use alloc::string::String;
use alloc::vec::Vec;

use crate::expr::{Call, Expr};
use crate::functions::Func;

/// The reason an expression was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorReason {
    /// The expression, or one of its sub-expressions, is empty.
    Empty,
    /// A literal or an identifier contains an invalid character.
    InvalidToken,
    /// A character is not expected at its position.
    UnexpectedCharacter,
    /// No function is registered with the given name.
    UnknownFunction,
    /// A function is called with a wrong number of arguments.
    InvalidArgumentCount,
    /// A function argument is empty.
    EmptyArgument,
    /// Parentheses are not balanced or not terminated.
    UnbalancedParentheses,
    /// Function calls are nested deeper than [`MAX_NESTING`].
    TooDeep,
}

/// Maximum nesting depth of function calls.
pub const MAX_NESTING: usize = 32;

impl ParseErrorReason {
    const fn description(self) -> &'static str {
        match self {
            Self::Empty => "empty expression",
            Self::InvalidToken => "invalid token",
            Self::UnexpectedCharacter => "unexpected character",
            Self::UnknownFunction => "unknown function",
            Self::InvalidArgumentCount => "invalid number of arguments",
            Self::EmptyArgument => "empty argument",
            Self::UnbalancedParentheses => "unbalanced parentheses",
            Self::TooDeep => "too deeply nested call",
        }
    }
}

impl core::fmt::Display for ParseErrorReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.description().fmt(f)
    }
}

/// A structured expression parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Why the expression was rejected.
    pub reason: ParseErrorReason,
    /// The offending token, if any.
    pub token: Option<String>,
    /// Absolute byte offset of the error in the source.
    pub position: usize,
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match &self.token {
            Some(token) => write!(
                f,
                "{} `{token}` at position {}",
                self.reason, self.position
            ),
            None => write!(f, "{} at position {}", self.reason, self.position),
        }
    }
}

impl core::error::Error for ParseError {}

impl ParseError {
    fn new(reason: ParseErrorReason, position: usize) -> Self {
        Self {
            reason,
            token: None,
            position,
        }
    }

    fn with_token(
        reason: ParseErrorReason,
        token: impl Into<Cow<'static, str>>,
        position: usize,
    ) -> Self {
        Self {
            reason,
            token: Some(token.into().into_owned()),
            position,
        }
    }
}

/// Parses an expression owned by the port `owner_port_id`.
///
/// # Errors
///
/// Parsing stops at the first error, which is reported along with the
/// offending token and its absolute position in `source`.
pub fn parse(owner_port_id: &str, source: &str) -> Result<Expr, ParseError> {
    let parser = Parser {
        owner: owner_port_id,
        source,
        bytes: source.as_bytes(),
    };
    parser.expr(0, source.len(), 0)
}

/// Checks whether an identifier is a valid port identifier.
///
/// Identifiers start with a letter or an underscore and contain only
/// letters, digits, `_`, `-` and `.`.
#[must_use]
pub fn is_valid_port_id(id: &str) -> bool {
    invalid_port_id_char(id).is_none() && !id.is_empty()
}

// Returns the offset of the first character not allowed in a port id.
fn invalid_port_id_char(id: &str) -> Option<usize> {
    id.bytes().enumerate().position(|(i, b)| {
        let valid_first = b.is_ascii_alphabetic() || b == b'_';
        if i == 0 {
            !valid_first
        } else {
            !(valid_first || b.is_ascii_digit() || b == b'-' || b == b'.')
        }
    })
}

struct Parser<'a> {
    owner: &'a str,
    source: &'a str,
    bytes: &'a [u8],
}

impl Parser<'_> {
    fn expr(&self, start: usize, end: usize, nesting: usize) -> Result<Expr, ParseError> {
        let (start, end) = self.trim(start, end);
        if start == end {
            return Err(ParseError::new(ParseErrorReason::Empty, start));
        }

        if self.bytes[start] == b'$' {
            return self.port_ref(start + 1, end);
        }

        if let Some(open) = self.find(start, end, |b| b == b'(') {
            return self.call(start, open, end, nesting);
        }

        if let Some(pos) = self.find(start, end, |b| b == b')' || b == b',') {
            let reason = if self.bytes[pos] == b')' {
                ParseErrorReason::UnbalancedParentheses
            } else {
                ParseErrorReason::UnexpectedCharacter
            };
            return Err(ParseError::with_token(reason, self.token(pos, pos + 1), pos));
        }

        self.literal(start, end)
    }

    fn port_ref(&self, start: usize, end: usize) -> Result<Expr, ParseError> {
        let id = &self.source[start..end];
        if id.is_empty() {
            return Ok(Expr::PortRef(self.owner.into()));
        }

        match invalid_port_id_char(id) {
            Some(offset) => Err(ParseError::with_token(
                ParseErrorReason::InvalidToken,
                self.token(start - 1, end),
                start + offset,
            )),
            None => Ok(Expr::PortRef(id.into())),
        }
    }

    fn call(
        &self,
        start: usize,
        open: usize,
        end: usize,
        nesting: usize,
    ) -> Result<Expr, ParseError> {
        let (_, name_end) = self.trim(start, open);
        if start == name_end {
            return Err(ParseError::with_token(
                ParseErrorReason::UnexpectedCharacter,
                "(",
                open,
            ));
        }

        let name = &self.source[start..name_end];
        if let Some(offset) = name
            .bytes()
            .position(|b| !(b.is_ascii_alphanumeric() || b == b'_'))
        {
            return Err(ParseError::with_token(
                ParseErrorReason::InvalidToken,
                self.token(start, name_end),
                start + offset,
            ));
        }

        let func = Func::from_name(name).ok_or_else(|| {
            ParseError::with_token(
                ParseErrorReason::UnknownFunction,
                self.token(start, name_end),
                start,
            )
        })?;
        if nesting >= MAX_NESTING {
            return Err(ParseError::with_token(
                ParseErrorReason::TooDeep,
                self.token(start, name_end),
                start,
            ));
        }

        // Split the arguments at the commas found at nesting depth 1.
        let mut depth = 1;
        let mut close = None;
        let mut ranges = Vec::new();
        let mut arg_start = open + 1;
        for pos in open + 1..end {
            match self.bytes[pos] {
                b'(' => depth += 1,
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        close = Some(pos);
                        break;
                    }
                }
                b',' if depth == 1 => {
                    ranges.push((arg_start, pos));
                    arg_start = pos + 1;
                }
                _ => {}
            }
        }

        let Some(close) = close else {
            return Err(ParseError::with_token(
                ParseErrorReason::UnbalancedParentheses,
                "(",
                open,
            ));
        };

        // The closing parenthesis must end the (already trimmed) range.
        if close + 1 < end {
            return Err(ParseError::with_token(
                ParseErrorReason::UnexpectedCharacter,
                self.token(close + 1, close + 2),
                close + 1,
            ));
        }

        ranges.push((arg_start, close));
        if let [(arg_start, arg_end)] = ranges[..] {
            if self.trim(arg_start, arg_end).0 == arg_end {
                ranges.clear();
            }
        }

        let mut args = Vec::with_capacity(ranges.len());
        for (arg_start, arg_end) in ranges {
            let (arg_start, arg_end) = self.trim(arg_start, arg_end);
            if arg_start == arg_end {
                return Err(ParseError::new(ParseErrorReason::EmptyArgument, arg_start));
            }
            args.push(self.expr(arg_start, arg_end, nesting + 1)?);
        }

        if !func.arity().accepts(args.len()) {
            return Err(ParseError::with_token(
                ParseErrorReason::InvalidArgumentCount,
                self.token(start, name_end),
                start,
            ));
        }

        Ok(Expr::Call(Call::new(func, args)))
    }

    fn literal(&self, start: usize, end: usize) -> Result<Expr, ParseError> {
        let text = &self.source[start..end];
        match text {
            "true" => return Ok(Expr::Literal(1.)),
            "false" => return Ok(Expr::Literal(0.)),
            _ => {}
        }

        let invalid = |pos| {
            ParseError::with_token(ParseErrorReason::InvalidToken, self.token(start, end), pos)
        };

        let mut digits = 0;
        let mut dot = false;
        for (i, b) in text.bytes().enumerate() {
            match b {
                b'+' | b'-' if i == 0 => {}
                b'.' if !dot => dot = true,
                b'0'..=b'9' => digits += 1,
                _ => return Err(invalid(start + i)),
            }
        }
        if digits == 0 {
            return Err(invalid(start));
        }

        text.parse::<f64>()
            .ok()
            .filter(|value| value.is_finite())
            .map(Expr::Literal)
            .ok_or_else(|| invalid(start))
    }

    fn trim(&self, mut start: usize, mut end: usize) -> (usize, usize) {
        while start < end && self.bytes[start].is_ascii_whitespace() {
            start += 1;
        }
        while end > start && self.bytes[end - 1].is_ascii_whitespace() {
            end -= 1;
        }
        (start, end)
    }

    fn find(&self, start: usize, end: usize, predicate: impl Fn(u8) -> bool) -> Option<usize> {
        self.bytes[start..end]
            .iter()
            .position(|b| predicate(*b))
            .map(|offset| start + offset)
    }

    fn token(&self, start: usize, end: usize) -> String {
        String::from_utf8_lossy(&self.bytes[start..end.min(self.bytes.len())]).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::String;

    use crate::expr::Expr;
    use crate::functions::Func;

    use super::{MAX_NESTING, ParseErrorReason, is_valid_port_id, parse};

    fn error(source: &str) -> (ParseErrorReason, Option<String>, usize) {
        let e = parse("owner", source).unwrap_err();
        (e.reason, e.token, e.position)
    }

    #[test]
    fn literals() {
        assert_eq!(parse("p", "42").unwrap(), Expr::Literal(42.));
        assert_eq!(parse("p", " -1.5 ").unwrap(), Expr::Literal(-1.5));
        assert_eq!(parse("p", "+.5").unwrap(), Expr::Literal(0.5));
        assert_eq!(parse("p", "true").unwrap(), Expr::Literal(1.));
        assert_eq!(parse("p", "false").unwrap(), Expr::Literal(0.));
    }

    #[test]
    fn port_references() {
        assert_eq!(parse("p", "$a_1.x-y").unwrap(), Expr::PortRef("a_1.x-y".into()));
        assert_eq!(parse("p", "  $ ").unwrap(), Expr::PortRef("p".into()));
    }

    #[test]
    fn nested_calls() {
        let expr = parse("p", "ADD(1, MUL($a, 2), IF(GT($b, 1), 3, 4))").unwrap();
        let Expr::Call(call) = expr else {
            panic!("expected a call");
        };
        assert_eq!(call.func(), Func::Add);
        assert_eq!(call.args().len(), 3);
        assert!(matches!(&call.args()[2], Expr::Call(c) if c.func() == Func::If));
    }

    #[test]
    fn zero_arguments() {
        let expr = parse("p", "TIME( )").unwrap();
        assert!(matches!(expr, Expr::Call(c) if c.func() == Func::Time && c.args().is_empty()));
    }

    #[test]
    fn arity_errors() {
        assert_eq!(
            error("ADD(1)"),
            (ParseErrorReason::InvalidArgumentCount, Some("ADD".into()), 0)
        );
        assert_eq!(
            error("  SUB(1, 2, 3)").0,
            ParseErrorReason::InvalidArgumentCount
        );
        assert_eq!(error("  SUB(1, 2, 3)").2, 2);
        assert_eq!(error("TIME(1)").0, ParseErrorReason::InvalidArgumentCount);
        assert_eq!(
            error("ROUND(1, 2, 99)"),
            (ParseErrorReason::InvalidArgumentCount, Some("ROUND".into()), 0)
        );
        assert!(parse("p", "ROUND(1.25, 1)").is_ok());
    }

    #[test]
    fn nesting_limit() {
        let nested = |depth: usize| format!("{}1{}", "ABS(".repeat(depth), ")".repeat(depth));
        assert!(parse("p", &nested(MAX_NESTING)).is_ok());
        assert_eq!(
            error(&nested(MAX_NESTING + 1)),
            (ParseErrorReason::TooDeep, Some("ABS".into()), MAX_NESTING * 4)
        );
        assert_eq!(error(&nested(10_000)).0, ParseErrorReason::TooDeep);
    }

    #[test]
    fn unknown_function() {
        assert_eq!(
            error("FOO(1,2)"),
            (ParseErrorReason::UnknownFunction, Some("FOO".into()), 0)
        );
        assert_eq!(error("ADD(1, BAR(2))").2, 7);
    }

    #[test]
    fn empty_arguments() {
        assert_eq!(error("ADD(1,)"), (ParseErrorReason::EmptyArgument, None, 6));
        assert_eq!(error("ADD(,1)"), (ParseErrorReason::EmptyArgument, None, 4));
        assert_eq!(error("ADD(1, 2,  )").2, 11);
        assert_eq!(error("MUL(2, ADD(1,))").2, 13);
    }

    #[test]
    fn unbalanced_parentheses() {
        assert_eq!(
            error("ADD(1, 2"),
            (ParseErrorReason::UnbalancedParentheses, Some("(".into()), 3)
        );
        assert_eq!(error("ADD((1, 2)").0, ParseErrorReason::UnbalancedParentheses);
        assert_eq!(error("1)").0, ParseErrorReason::UnbalancedParentheses);
        assert_eq!(error("1)").2, 1);
    }

    #[test]
    fn trailing_characters() {
        assert_eq!(
            error("ADD(1, 2) 3"),
            (ParseErrorReason::UnexpectedCharacter, Some(" ".into()), 9)
        );
        assert_eq!(error("(1)").0, ParseErrorReason::UnexpectedCharacter);
        assert_eq!(error("1, 2").2, 1);
    }

    #[test]
    fn invalid_literals() {
        assert_eq!(
            error("12a4"),
            (ParseErrorReason::InvalidToken, Some("12a4".into()), 2)
        );
        assert_eq!(error("ADD(1, 2.3.4)").2, 10);
        assert_eq!(error("-").0, ParseErrorReason::InvalidToken);
        assert_eq!(error(" 1 2").2, 2);
        assert_eq!(error(&"9".repeat(400)).0, ParseErrorReason::InvalidToken);
    }

    #[test]
    fn invalid_identifiers() {
        assert_eq!(error("$1abc"), (ParseErrorReason::InvalidToken, Some("$1abc".into()), 1));
        assert_eq!(error("ADD($a b, 1)").2, 6);
        assert_eq!(error("AD D(1, 2)").0, ParseErrorReason::InvalidToken);
    }

    #[test]
    fn empty_expression() {
        assert_eq!(error("   "), (ParseErrorReason::Empty, None, 3));
    }

    #[test]
    fn port_id_validation() {
        assert!(is_valid_port_id("gpio_4"));
        assert!(is_valid_port_id("_virtual.x-1"));
        assert!(!is_valid_port_id("4gpio"));
        assert!(!is_valid_port_id(""));
        assert!(!is_valid_port_id("a b"));
    }
}
