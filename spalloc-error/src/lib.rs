//! Shared error type for the spalloc v1 compatibility front-end.
//!
//! Mirrors the error-kind taxonomy of §7 of the spec: every fallible
//! operation in the workspace returns `Result<T, Error>`, and `Error`
//! carries enough information for the session task to decide whether to
//! log it and how to render it as an `ExceptionResponse`.

use std::fmt;

/// Coarse classification of an error, used both for logging severity and
/// for choosing how a failure is surfaced to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// Malformed input: bad JSON framing, missing/negative argument, wrong
    /// arity, unknown command, mutually exclusive kwargs.
    InvalidArgument,
    /// No such job, machine or board.
    NotFound,
    /// Capability check rejected the request.
    PermissionDenied,
    /// Transient allocator/storage failure.
    Unavailable,
    /// A cancellation/shutdown is in progress.
    Cancelled,
    /// Anything else; logged at `warn` with the offending command name.
    Internal,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Code::InvalidArgument => "invalid_argument",
            Code::NotFound => "not_found",
            Code::PermissionDenied => "permission_denied",
            Code::Unavailable => "unavailable",
            Code::Cancelled => "cancelled",
            Code::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// An error with a `Code` and a stack of human-readable context messages.
///
/// `messages` is ordered innermost-first: `err_tip` pushes new context onto
/// the back as the error propagates up the call stack, so rendering joins
/// them back-to-front to read most-general-first.
#[derive(Debug, Clone)]
pub struct Error {
    pub code: Code,
    pub messages: Vec<String>,
}

impl Error {
    pub fn new(code: Code, msg: impl Into<String>) -> Self {
        Error {
            code,
            messages: vec![msg.into()],
        }
    }

    /// Whether this error should be logged as unexpected (`Code::Internal`)
    /// or as a routine transient condition (`Code::Unavailable`). Everything
    /// else is expected client-facing behaviour and is not logged as a
    /// warning per §7.
    pub fn should_log_as_warning(&self) -> bool {
        matches!(self.code, Code::Internal | Code::Unavailable)
    }

    /// Render the text that goes into `ExceptionResponse.exception`.
    pub fn as_exception_text(&self) -> String {
        self.messages.join(" : ")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {}", self.code, self.as_exception_text())
    }
}

impl std::error::Error for Error {}

/// Attach context to a `Result`'s error branch without changing its `Code`.
pub trait ResultExt<T> {
    fn err_tip<F, D>(self, tip_fn: F) -> Result<T, Error>
    where
        F: FnOnce() -> D,
        D: Into<String>;

    /// Like `err_tip`, but also overrides the error's `Code`.
    fn err_tip_with_code<F, D>(self, code_fn: F) -> Result<T, Error>
    where
        F: FnOnce(&Error) -> (Code, D),
        D: Into<String>;
}

impl<T, E: Into<Error>> ResultExt<T> for Result<T, E> {
    fn err_tip<F, D>(self, tip_fn: F) -> Result<T, Error>
    where
        F: FnOnce() -> D,
        D: Into<String>,
    {
        self.map_err(|e| {
            let mut e = e.into();
            e.messages.push(tip_fn().into());
            e
        })
    }

    fn err_tip_with_code<F, D>(self, code_fn: F) -> Result<T, Error>
    where
        F: FnOnce(&Error) -> (Code, D),
        D: Into<String>,
    {
        self.map_err(|e| {
            let mut e = e.into();
            let (code, msg) = code_fn(&e);
            e.code = code;
            e.messages.push(msg.into());
            e
        })
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(Code::Internal, e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::new(Code::InvalidArgument, e.to_string())
    }
}

/// Build an `Error` with an explicit `Code` from a format string.
#[macro_export]
macro_rules! make_err {
    ($code:expr, $($arg:tt)*) => {
        $crate::Error::new($code, format!($($arg)*))
    };
}

/// Build an `Error` with `Code::InvalidArgument` — the common case for bad
/// client input (§7 "Bad input" / "Framing error" / "Unknown command").
#[macro_export]
macro_rules! make_input_err {
    ($($arg:tt)*) => {
        $crate::Error::new($crate::Code::InvalidArgument, format!($($arg)*))
    };
}

/// Build an `Error` with `Code::NotFound`.
#[macro_export]
macro_rules! make_not_found_err {
    ($($arg:tt)*) => {
        $crate::Error::new($crate::Code::NotFound, format!($($arg)*))
    };
}

/// Early-return an invalid-argument error if `cond` holds.
#[macro_export]
macro_rules! error_if {
    ($cond:expr, $($arg:tt)*) => {
        if $cond {
            return Err($crate::make_input_err!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn err_tip_pushes_context_and_preserves_code() {
        let result: Result<(), Error> = Err(make_not_found_err!("no such job"));
        let tipped = result.err_tip(|| "in get_job_state");
        let err = tipped.unwrap_err();
        assert_eq!(err.code, Code::NotFound);
        assert_eq!(err.messages, vec!["no such job", "in get_job_state"]);
    }

    #[test]
    fn should_log_as_warning_splits_expected_from_unexpected() {
        assert!(!make_not_found_err!("x").should_log_as_warning());
        assert!(!make_input_err!("x").should_log_as_warning());
        assert!(make_err!(Code::Unavailable, "x").should_log_as_warning());
        assert!(make_err!(Code::Internal, "x").should_log_as_warning());
    }
}
