//! Named packet filters.
//!
//! This module provides:
//! - The [`FilterCompiler`] / [`FilterPredicate`] boundary traits that a
//!   script environment implements
//! - [`ExprCompiler`], the default expression engine
//! - [`FilterView`], the ordered seq index a filter pool maintains
//! - The worker pool that scans the store and keeps the view current

mod expr;
mod view;
mod worker;

pub use expr::{ExprCompiler, ExprPredicate, Value};
pub use view::{FilterView, ViewHandler};
pub use worker::{FilterContext, FilterWorker};

use std::sync::Arc;

use crate::error::{FilterCompileError, FilterEvalError};
use crate::packet::Packet;

/// A compiled filter predicate, evaluated once per stored packet.
/// Evaluation failures are logged and count as non-matching.
pub trait FilterPredicate: Send + Sync {
    fn eval(&self, pkt: &Packet) -> Result<bool, FilterEvalError>;
}

/// Compiles a script prelude plus a per-filter expression into a callable
/// predicate. The session holds one compiler for all its filters.
pub trait FilterCompiler: Send + Sync {
    fn compile(
        &self,
        prelude: &str,
        expr: &str,
    ) -> Result<Arc<dyn FilterPredicate>, FilterCompileError>;
}
