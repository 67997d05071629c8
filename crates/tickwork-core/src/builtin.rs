//! Stock processes registered by the engine binary and used in tests.
//!
//! | Label             | Effect                                             |
//! |-------------------|----------------------------------------------------|
//! | `tick_limit`      | true while `tick + 1 < max_ticks`                  |
//! | `forever`         | always true                                        |
//! | `noop`            | returns `Nil`                                      |
//! | `count`           | increments the integer variable `count`            |
//! | `greet`           | sets `greeted`, increments `greetings`             |
//! | `broadcast_greet` | pushes `greet` to every individual, this tick      |

use std::sync::Arc;

use tickwork_types::Value;

use crate::context::{Context, TargetScope};
use crate::process::{ExecutionError, FnProcess, Process, ProcessRegistry};

/// Label of [`TickLimit`].
pub const TICK_LIMIT: &str = "tick_limit";

/// Continuation that runs exactly `max_ticks` ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickLimit {
    max_ticks: u64,
}

impl TickLimit {
    /// Run ticks `0..max_ticks`. A limit of 0 still runs tick 0.
    pub const fn new(max_ticks: u64) -> Self {
        Self { max_ticks }
    }

    /// The configured limit.
    pub const fn max_ticks(&self) -> u64 {
        self.max_ticks
    }
}

impl Process for TickLimit {
    fn label(&self) -> &str {
        TICK_LIMIT
    }

    fn execute(&self, ctx: &mut Context<'_>) -> Result<Value, ExecutionError> {
        Ok(Value::Bool(ctx.tick().saturating_add(1) < self.max_ticks))
    }
}

fn increment(ctx: &mut Context<'_>, key: &str) -> Result<i64, ExecutionError> {
    let next = match ctx.get_int(key) {
        Ok(n) => n.saturating_add(1),
        Err(ExecutionError::MissingVariable { .. }) => 1,
        Err(err) => return Err(err),
    };
    ctx.set(key, next);
    Ok(next)
}

/// Register every stock process. `tick_limit` stops after `max_ticks`.
pub fn register_builtins(registry: &mut ProcessRegistry, max_ticks: u64) {
    registry.register(Arc::new(TickLimit::new(max_ticks)));
    registry.register(FnProcess::shared("forever", |_| Ok(Value::Bool(true))));
    registry.register(FnProcess::shared("noop", |_| Ok(Value::Nil)));
    registry.register(FnProcess::shared("count", |ctx| {
        increment(ctx, "count").map(Value::Int)
    }));
    registry.register(FnProcess::shared("greet", |ctx| {
        ctx.set("greeted", true);
        increment(ctx, "greetings").map(Value::Int)
    }));
    registry.register(FnProcess::shared("broadcast_greet", |ctx| {
        ctx.push_label(ctx.tick(), TargetScope::AllIndividuals, "greet")?;
        Ok(Value::Nil)
    }));
}
