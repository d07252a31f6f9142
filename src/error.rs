//! Public error type for the yieldify API.
//!
//! Engine errors are converted to this type at the API boundary, where the
//! name of the unit being processed is known.

use miette::Diagnostic;
use thiserror::Error;
use yieldify_core::{ExecutionError, InstrumentError};

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// The unit handed in is structurally invalid or already suspends.
    #[error("cannot instrument `{unit}`")]
    #[diagnostic(
        code(yieldify::malformed),
        help("the unit must be a well-formed, non-suspending unit of the target machine")
    )]
    Malformed {
        unit: String,
        #[source]
        source: InstrumentError,
    },

    /// The engine produced something it cannot encode.
    #[error("internal error while instrumenting `{unit}`")]
    #[diagnostic(
        code(yieldify::internal),
        help("this is a bug in the instrumenter; please report it with the unit's disassembly")
    )]
    Internal {
        unit: String,
        #[source]
        source: InstrumentError,
    },

    /// The unit's own failure, or a misuse of the generator protocol.
    #[error(transparent)]
    #[diagnostic(code(yieldify::execution))]
    Execution(#[from] ExecutionError),
}

impl Error {
    /// Classify an engine error raised while instrumenting `unit`.
    pub fn instrument(unit: &str, source: InstrumentError) -> Self {
        let unit = unit.to_string();
        if source.is_internal() {
            Error::Internal { unit, source }
        } else {
            Error::Malformed { unit, source }
        }
    }

    /// The underlying instrumentation error, if any.
    pub fn instrument_error(&self) -> Option<&InstrumentError> {
        match self {
            Error::Malformed { source, .. } | Error::Internal { source, .. } => Some(source),
            Error::Execution(_) => None,
        }
    }
}
