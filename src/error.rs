//! Error types for netlens.
//!
//! This module provides structured error types for all engine operations:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`CaptureError`] - Errors from the capture device
//! - [`BpfError`] - Invalid capture filter expressions (recoverable)
//! - [`DissectorError`] - Per-packet dissection failures (non-fatal)
//! - [`StreamError`] - Stream reassembly failures (non-fatal)
//! - [`FilterCompileError`] / [`FilterEvalError`] - Filter script failures
//!
//! All errors implement `std::error::Error` and can be converted to
//! `anyhow::Error`. Non-fatal errors are normally turned into log records
//! and coalesced through the host bridge rather than propagated.

use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error opening or reading from the capture device
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Invalid capture filter expression
    #[error("BPF error: {0}")]
    Bpf(#[from] BpfError),

    /// Error during packet dissection
    #[error("dissector error: {0}")]
    Dissector(#[from] DissectorError),

    /// Error during stream reassembly
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Filter expression rejected at compile time
    #[error("filter compile error: {0}")]
    FilterCompile(#[from] FilterCompileError),

    /// Filter expression failed at evaluation time
    #[error("filter eval error: {0}")]
    FilterEval(#[from] FilterEvalError),

    /// The pipeline has been shut down
    #[error("pipeline closed")]
    Closed,

    /// Internal invariant violation; aborts the session
    #[error("internal error: {0}")]
    Bug(String),
}

/// The pipeline has been closed; produced by queue operations after
/// [`close`](crate::queue::PacketQueue::close) and drain.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("pipeline closed")]
pub struct Closed;

impl From<Closed> for Error {
    fn from(_: Closed) -> Self {
        Error::Closed
    }
}

/// Errors related to the capture device.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// No capture device available
    #[error("no capture device available")]
    NoDevice,

    /// Failed to open the device
    #[error("failed to open device {device}: {reason}")]
    DeviceOpen { device: String, reason: String },

    /// Read failure on an active capture
    #[error("capture read failed: {reason}")]
    Read { reason: String },
}

/// Invalid capture filter expression. Returned synchronously from
/// `set_bpf` so the caller can reject the input.
#[derive(Error, Debug)]
pub enum BpfError {
    /// The expression did not compile
    #[error("invalid filter expression {expr:?}: {reason}")]
    Invalid { expr: String, reason: String },
}

/// Per-packet dissection failures. Never fatal: the packet is stored
/// with whatever layers were produced before the failure.
#[derive(Error, Debug)]
pub enum DissectorError {
    /// A dissector reported a failure for one layer
    #[error("{dissector}: {reason}")]
    Failed { dissector: String, reason: String },

    /// The re-invocation fixed point was not reached within the cap
    #[error("dissection did not converge within {cap} passes")]
    DepthExceeded { cap: u32 },
}

/// Stream reassembly failures. Non-fatal; surfaced as warn logs.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The per-flow reorder window overflowed and chunks were evicted
    #[error("flow window overflow: dropped {dropped} buffered chunk(s)")]
    WindowOverflow { dropped: usize },

    /// A stream dissector reported a failure
    #[error("{dissector}: {reason}")]
    Failed { dissector: String, reason: String },
}

/// Filter expression rejected at compile time. Rejects the filter
/// creation; the previous pool (if any) is left untouched.
#[derive(Error, Debug)]
pub enum FilterCompileError {
    /// Lexical or syntactic error
    #[error("parse error at offset {offset}: {reason}")]
    Parse { offset: usize, reason: String },

    /// Reference to a name neither built in nor bound by the prelude
    #[error("unknown identifier: {name}")]
    UnknownIdent { name: String },

    /// Call to an unknown function
    #[error("unknown function: {name}")]
    UnknownFunction { name: String },

    /// Wrong number or type of arguments to a builtin
    #[error("{function}: {reason}")]
    BadCall { function: String, reason: String },
}

/// Filter expression failed for one packet. The packet is treated as
/// non-matching and the error is logged.
#[derive(Error, Debug)]
pub enum FilterEvalError {
    /// Operands of incompatible types
    #[error("type error: {reason}")]
    Type { reason: String },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
