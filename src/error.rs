use std::io;
use std::path::PathBuf;

/// Failure reported by a simulation engine. Carried upward without retry.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("simulation engine failed: {0}")]
pub struct EngineError(pub String);

/// Errors raised while handling a control event. None of these leave the
/// controller in a half-updated state.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ControlError {
    /// Unknown parameter name, or a parameter locked by crystal symmetry.
    #[error("parameter {0:?} is unknown or locked by symmetry")]
    InvalidParameter(String),
    /// Every parameter is disabled; there is nothing for the cursor to select.
    #[error("no adjustable parameter is enabled")]
    NoSelectableParameter,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ControlError {
    /// Recoverable errors are logged and ignored; engine failures are surfaced.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ControlError::Engine(_))
    }
}

/// Fatal at startup: the controller is never built from a partial structure.
#[derive(Debug, thiserror::Error)]
pub enum StructureLoadError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} has no CRYST1 record", path.display())]
    MissingCryst1 { path: PathBuf },
    #[error("malformed CRYST1 {field}: {text:?}")]
    Malformed { field: &'static str, text: String },
}
