//! Control flow out of a body invocation.
//!
//! Suspension is an ordinary return value: dispatch answers `Err(Halt::Suspended)`
//! and the body forwards it with `?` up to the launch boundary, which turns it
//! into `ChainStatus::Suspended`.

use crate::error::DriverError;

/// Why a body invocation stopped before reaching its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// An async step is in flight (or this invocation was superseded).
    Suspended,

    /// The chain failed; reported to whoever triggered this invocation.
    Failed(DriverError),
}

impl Halt {
    pub fn is_suspended(&self) -> bool {
        matches!(self, Halt::Suspended)
    }

    pub fn error(&self) -> Option<&DriverError> {
        match self {
            Halt::Suspended => None,
            Halt::Failed(err) => Some(err),
        }
    }
}

impl From<DriverError> for Halt {
    fn from(err: DriverError) -> Self {
        Halt::Failed(err)
    }
}

/// Return type of every dispatch and of `DriverBody::run`.
pub type Step<T> = Result<T, Halt>;
