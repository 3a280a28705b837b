//! Packet dissection.
//!
//! This module provides:
//! - The [`Dissector`] trait that pluggable dissectors implement
//! - [`DissectorRegistry`] holding the session's fixed dissector set
//! - The worker pool that turns raw packets into layered packets
//! - Built-in dissectors for common protocols (Ethernet, IPv4, UDP, TCP)

mod dissector;
mod registry;
mod worker;

pub mod builtin;

pub use dissector::{DissectOutput, Dissector};
pub use registry::DissectorRegistry;
pub use worker::{DissectorContext, DissectorWorker, MAX_DISSECTION_PASSES};
