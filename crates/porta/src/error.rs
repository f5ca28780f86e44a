use alloc::borrow::Cow;
use alloc::format;
use alloc::string::{String, ToString};

use crate::parser::ParseError;

/// All possible error kinds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An expression could not be parsed.
    Parse,
    /// An expression would form a loop through other ports.
    Loop,
    /// A transform references a port other than its owner.
    ForeignPortReference,
    /// The requested port does not exist.
    PortNotFound,
    /// A port with the same identifier already exists.
    PortExists,
    /// All port slots are in use.
    TooManyPorts,
    /// The operation requires an output port.
    NotOutput,
    /// The operation requires a virtual port.
    NotVirtual,
    /// The operation requires an enabled port.
    PortDisabled,
    /// A value is malformed or outside of the port bounds.
    InvalidValue,
    /// A filter configuration is invalid.
    InvalidFilter,
    /// A port driver failed.
    Driver,
}

impl ErrorKind {
    pub(crate) const fn description(self) -> &'static str {
        match self {
            Self::Parse => "Parse",
            Self::Loop => "Loop",
            Self::ForeignPortReference => "Foreign Port Reference",
            Self::PortNotFound => "Port Not Found",
            Self::PortExists => "Port Exists",
            Self::TooManyPorts => "Too Many Ports",
            Self::NotOutput => "Not Output",
            Self::NotVirtual => "Not Virtual",
            Self::PortDisabled => "Port Disabled",
            Self::InvalidValue => "Invalid Value",
            Self::InvalidFilter => "Invalid Filter",
            Self::Driver => "Driver",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.description().fmt(f)
    }
}

/// A port operation error.
#[derive(PartialEq)]
pub struct Error {
    kind: ErrorKind,
    description: Cow<'static, str>,
    parse: Option<ParseError>,
}

impl core::fmt::Debug for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.error().fmt(f)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        self.error().fmt(f)
    }
}

impl core::error::Error for Error {}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Self {
            kind: ErrorKind::Parse,
            description: e.to_string().into(),
            parse: Some(e),
        }
    }
}

impl Error {
    /// Creates an [`Error`] from an [`ErrorKind`] and a description.
    #[must_use]
    pub fn new(kind: ErrorKind, description: impl Into<Cow<'static, str>>) -> Self {
        Self {
            kind,
            description: description.into(),
            parse: None,
        }
    }

    /// Returns the [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the structured [`ParseError`], if the error comes from
    /// the parser.
    #[must_use]
    pub const fn parse_error(&self) -> Option<&ParseError> {
        self.parse.as_ref()
    }

    fn error(&self) -> String {
        format!("{}: {}", self.kind, self.description)
    }
}

/// A specialized [`Result`] type for [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use alloc::string::ToString;

    use crate::parser::parse;

    use super::{Error, ErrorKind};

    #[test]
    fn display() {
        let error = Error::new(ErrorKind::PortNotFound, "No port `a`");
        assert_eq!(error.to_string(), "Port Not Found: No port `a`");
        assert!(error.parse_error().is_none());
    }

    #[test]
    fn from_parse_error() {
        let error: Error = parse("p", "FOO(1, 2)").unwrap_err().into();
        assert_eq!(error.kind(), ErrorKind::Parse);
        assert_eq!(error.parse_error().map(|e| e.position), Some(0));
    }
}
