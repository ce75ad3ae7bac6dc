//! Command-class adapters and dispatch
//!
//! This module handles:
//! - Routing inbound command-class payloads to the owning adapter
//! - The capability interface each protocol adapter implements
//! - The wake/sleep lifecycle adapter for sleeping nodes

mod adapter;
mod dispatcher;
mod wake_up;

pub use adapter::{CommandAdapter, StateQuery};
pub use dispatcher::CommandDispatcher;
pub use wake_up::WakeUp;

use crate::values::ValueIndex;
use thiserror::Error;
use wakehub_shared::codec::CodecError;

/// Errors surfaced by command-class adapters.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("multi-instance addressing is not supported (instance {0})")]
    MultiInstance(u8),

    #[error("wake interval {value}s outside supported range {min}..={max}s")]
    IntervalOutOfRange { value: u32, min: u32, max: u32 },

    #[error("no value at index {0}")]
    UnknownValueIndex(ValueIndex),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transport rejected command: {0}")]
    Transport(#[source] anyhow::Error),
}
