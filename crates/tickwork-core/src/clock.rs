//! Logical clock for the tickwork simulation.
//!
//! The clock is the single source of truth for the current tick. Ticks are
//! logical: nothing here relates them to wall-clock time. Whether another
//! tick should run is decided by the continuation process, evaluated once
//! per tick after that tick reached quiescence.
//!
//! # Design Principles
//!
//! - The tick counter uses checked arithmetic (no silent overflow).
//! - The continuation result is interpreted strictly: `true` (or a non-zero
//!   integer) means keep simulating. Any other kind is a type error.
//! - The clock is reset at the start of every run so the same scheduler can
//!   drive repeated episodes.

use std::sync::Arc;

use tickwork_types::ValueKind;

use crate::context::Context;
use crate::process::{ExecutionError, ProcessRef, execute_guarded};

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Tick counter would overflow.
    #[error("tick counter overflow: cannot advance beyond u64::MAX")]
    TickOverflow,
}

/// Tick counter plus continuation predicate.
#[derive(Debug, Clone)]
pub struct Clock {
    /// Current tick number (0-indexed).
    tick: u64,

    /// Process deciding whether to run another tick.
    continuation: ProcessRef,
}

impl Clock {
    /// Create a clock at tick 0 driven by `continuation`.
    pub const fn new(continuation: ProcessRef) -> Self {
        Self {
            tick: 0,
            continuation,
        }
    }

    /// Advance the clock by one tick. Returns the new tick number.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TickOverflow`] if the tick counter would exceed
    /// `u64::MAX`.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        self.tick = self.tick.checked_add(1).ok_or(ClockError::TickOverflow)?;
        Ok(self.tick)
    }

    /// Return the current tick number.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Rewind to tick 0.
    pub const fn reset(&mut self) {
        self.tick = 0;
    }

    /// The continuation process.
    pub const fn continuation(&self) -> &ProcessRef {
        &self.continuation
    }

    /// Replace the continuation process.
    pub fn set_continuation(&mut self, continuation: ProcessRef) {
        self.continuation = continuation;
    }

    /// Evaluate the continuation against `ctx`.
    ///
    /// Returns `true` when the simulation should run another tick.
    ///
    /// # Errors
    ///
    /// Propagates the continuation's own error (a panic becomes
    /// [`ExecutionError::Panicked`]), or returns
    /// [`ExecutionError::TypeMismatch`] if it yields neither a boolean nor
    /// an integer.
    pub fn should_continue(&self, ctx: &mut Context<'_>) -> Result<bool, ExecutionError> {
        let process = Arc::clone(&self.continuation);
        let value = execute_guarded(&*process, ctx)?;
        value.truthy().ok_or_else(|| ExecutionError::TypeMismatch {
            what: format!("continuation `{}`", process.label()),
            expected: ValueKind::Bool,
            found: value.kind(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use tickwork_types::{Individual, Value};

    use super::*;
    use crate::context::Subject;
    use crate::process::{FnProcess, ProcessRegistry};

    fn below(limit: u64) -> ProcessRef {
        FnProcess::shared("below", move |ctx| Ok(Value::Bool(ctx.tick() < limit)))
    }

    #[test]
    fn clock_starts_at_tick_zero() {
        let clock = Clock::new(below(3));
        assert_eq!(clock.tick(), 0);
    }

    #[test]
    fn clock_advances() {
        let mut clock = Clock::new(below(3));
        assert_eq!(clock.advance().unwrap(), 1);
        assert_eq!(clock.advance().unwrap(), 2);
        assert_eq!(clock.tick(), 2);
    }

    #[test]
    fn reset_rewinds_to_zero() {
        let mut clock = Clock::new(below(3));
        let _ = clock.advance();
        let _ = clock.advance();
        clock.reset();
        assert_eq!(clock.tick(), 0);
    }

    #[test]
    fn true_means_keep_simulating() {
        let registry = ProcessRegistry::new();
        let clock = Clock::new(below(2));
        let mut env = Individual::new("environment");

        let mut ctx = Context::new(1, Subject::Environment, &mut env, &registry);
        assert!(clock.should_continue(&mut ctx).unwrap());

        let mut ctx = Context::new(2, Subject::Environment, &mut env, &registry);
        assert!(!clock.should_continue(&mut ctx).unwrap());
    }

    #[test]
    fn integer_results_are_accepted() {
        let registry = ProcessRegistry::new();
        let clock = Clock::new(FnProcess::shared("zero", |_| Ok(Value::Int(0))));
        let mut env = Individual::new("environment");
        let mut ctx = Context::new(0, Subject::Environment, &mut env, &registry);
        assert!(!clock.should_continue(&mut ctx).unwrap());
    }

    #[test]
    fn non_boolean_result_is_a_type_error() {
        let registry = ProcessRegistry::new();
        let clock = Clock::new(FnProcess::shared("text", |_| Ok(Value::from("go"))));
        let mut env = Individual::new("environment");
        let mut ctx = Context::new(0, Subject::Environment, &mut env, &registry);
        assert!(matches!(
            clock.should_continue(&mut ctx),
            Err(ExecutionError::TypeMismatch {
                found: ValueKind::Text,
                ..
            })
        ));
    }

    #[test]
    fn panicking_continuation_is_an_error() {
        let registry = ProcessRegistry::new();
        let clock = Clock::new(FnProcess::shared("halt", |_| panic!("no more ticks")));
        let mut env = Individual::new("environment");
        let mut ctx = Context::new(0, Subject::Environment, &mut env, &registry);
        assert_eq!(
            clock.should_continue(&mut ctx),
            Err(ExecutionError::Panicked {
                message: "no more ticks".to_owned()
            })
        );
    }

    #[test]
    fn overflow_is_reported() {
        let mut clock = Clock::new(below(0));
        clock.tick = u64::MAX;
        assert!(matches!(clock.advance(), Err(ClockError::TickOverflow)));
    }
}
