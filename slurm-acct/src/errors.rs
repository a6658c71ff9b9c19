// Copyright 2018 Peter Williams <peter@newton.cx> and collaborators
// Licensed under the MIT License

/*! Errors that can arise while gathering accounting data.

Everything here is fatal to a balance query: we never want to print a
balance computed from output we only half understood. Functions in this crate
return `failure::Error`, so callers that need to tell these cases apart
should use `Error::downcast_ref::<AcctError>()`.

*/

use std::fmt;
use std::io;


/// The ways the accounting backend can let us down.
#[derive(Debug, Fail)]
pub enum AcctError {
    /// The external command couldn't even be started.
    #[fail(display = "failed to launch `{}`", command)]
    CommandLaunch {
        command: String,
        #[fail(cause)] cause: io::Error,
    },

    /// The external command ran but reported failure.
    #[fail(display = "`{}` failed ({}): {}", command, code, stderr)]
    CommandFailed {
        command: String,
        code: ExitCode,
        stderr: String,
    },

    /// A line of command output didn't have the shape we asked for.
    #[fail(display = "malformed {} record at line {}: {}", source, line, reason)]
    MalformedRecord {
        source: &'static str,
        line: usize,
        reason: String,
    },

    /// A single field didn't parse.
    #[fail(display = "cannot parse {} value \"{}\": {}", field, value, reason)]
    MalformedField {
        field: String,
        value: String,
        reason: String,
    },
}


/// How an external command finished, for error messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExitCode {
    Code(i32),
    Signal,
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ExitCode::Code(c) => write!(f, "exit code {}", c),
            ExitCode::Signal => write!(f, "killed by signal"),
        }
    }
}


impl AcctError {
    pub fn malformed_field<F, V, R>(field: F, value: V, reason: R) -> Self
        where F: Into<String>, V: Into<String>, R: fmt::Display
    {
        AcctError::MalformedField {
            field: field.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed_record<R: fmt::Display>(source: &'static str, line: usize, reason: R) -> Self {
        AcctError::MalformedRecord {
            source,
            line,
            reason: reason.to_string(),
        }
    }

    /// Whether this error means the command output violated its format.
    pub fn is_malformed(&self) -> bool {
        match *self {
            AcctError::MalformedRecord { .. } | AcctError::MalformedField { .. } => true,
            _ => false,
        }
    }
}
