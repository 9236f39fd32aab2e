//! Parse errors for the string-backed identifier types

use smol_str::SmolStr;

/// Parsing error for identifier strings.
///
/// `spec` is the final path segment on atproto.com/specs describing the format,
/// `input` is the offending string, `kind` says what went wrong.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
#[error("invalid {spec} `{input}`: {kind}")]
#[diagnostic(url("https://atproto.com/specs/{spec}"))]
pub struct ParseError {
    /// Which identifier format was being parsed
    pub spec: SmolStr,
    /// The rejected input
    #[source_code]
    pub input: String,
    /// What went wrong
    #[source]
    #[diagnostic_source]
    pub kind: ParseErrorKind,
}

/// Kinds of identifier parse failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum ParseErrorKind {
    /// Input longer than allowed
    #[error("too long: {actual} > {max}")]
    TooLong {
        /// Maximum length
        max: usize,
        /// Actual length
        actual: usize,
    },
    /// Input shorter than allowed
    #[error("too short: {actual} < {min}")]
    TooShort {
        /// Minimum length
        min: usize,
        /// Actual length
        actual: usize,
    },
    /// Input did not match the format
    #[error("{0}")]
    Format(SmolStr),
}

impl ParseError {
    /// Build an error for the given format and input
    pub fn new(spec: &'static str, input: impl Into<String>, kind: ParseErrorKind) -> Self {
        Self {
            spec: SmolStr::new_static(spec),
            input: input.into(),
            kind,
        }
    }

    /// Input exceeded the maximum length
    pub fn too_long(spec: &'static str, input: &str, max: usize) -> Self {
        Self::new(
            spec,
            input,
            ParseErrorKind::TooLong {
                max,
                actual: input.len(),
            },
        )
    }

    /// Input was below the minimum length
    pub fn too_short(spec: &'static str, input: &str, min: usize) -> Self {
        Self::new(
            spec,
            input,
            ParseErrorKind::TooShort {
                min,
                actual: input.len(),
            },
        )
    }

    /// Input failed format validation
    pub fn format(spec: &'static str, input: &str, message: &'static str) -> Self {
        Self::new(
            spec,
            input,
            ParseErrorKind::Format(SmolStr::new_static(message)),
        )
    }
}
