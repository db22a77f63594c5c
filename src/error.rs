//! Errors from the library.

use core::{error, fmt};

/// Errors returned by this library.
#[derive(Clone, Debug)]
pub enum HandleError {
    /// No memory could be allocated for the control block.
    MemoryExhausted,
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        write!(f, "{:?}", self)
    }
}

impl error::Error for HandleError {}
