use std::alloc::LayoutError;
use std::collections::TryReserveError;

use thiserror::Error;

/// Errors produced while building or operating a [`Cpudl`](crate::cpudl::Cpudl).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {field} {reason}")]
    InvalidConfig {
        field: &'static str,
        reason: &'static str,
    },
    #[error("allocation failed: {0}")]
    Allocation(#[from] TryReserveError),
    #[error("invalid node arena layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },
    #[error("processor {cpu} is out of range (tracking {processors} processors)")]
    UnknownProcessor { cpu: usize, processors: usize },
    #[error("skip list corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, Error>;
