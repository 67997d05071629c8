//! Executable behaviors and the label registry.
//!
//! The engine treats a process as opaque: something with a label that can
//! be executed against a [`Context`] and yields a [`Value`]. How a process
//! computes its result (an interpreted expression tree, a compiled closure,
//! a learned policy) is the business of whoever registers it.
//!
//! Processes are immutable once registered and are shared between worker
//! threads through [`ProcessRef`].

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tickwork_types::{Value, ValueKind};

use crate::context::Context;

/// Shared handle to a registered process.
pub type ProcessRef = Arc<dyn Process>;

/// Errors raised while a process executes.
///
/// None of these are retried or isolated: the first one aborts the run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// A label could not be resolved in the registry.
    #[error("unknown process `{label}`")]
    UnknownProcess {
        /// The label that was looked up.
        label: String,
    },

    /// A state variable was read before it was ever set.
    #[error("missing variable `{key}`")]
    MissingVariable {
        /// The variable name.
        key: String,
    },

    /// A value had the wrong kind for the operation.
    #[error("type mismatch for {what}: expected {expected}, found {found}")]
    TypeMismatch {
        /// What was being read (a variable name, a process result, ...).
        what: String,
        /// The kind the operation needed.
        expected: ValueKind,
        /// The kind that was actually present.
        found: ValueKind,
    },

    /// A list or population index was out of range.
    #[error("index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// The offending index.
        index: usize,
        /// The length of the indexed collection.
        len: usize,
    },

    /// A push targeted a tick whose work has already been scheduled.
    #[error("push of `{label}` targets tick {target_tick}, earliest allowed is {earliest}")]
    PushIntoPast {
        /// Label of the pushed process.
        label: String,
        /// The requested tick.
        target_tick: u64,
        /// The earliest tick the context accepts.
        earliest: u64,
    },

    /// Nested [`Context::call`] recursion went too deep.
    #[error("call depth limit of {limit} exceeded while calling `{label}`")]
    CallDepthExceeded {
        /// Label of the call that hit the limit.
        label: String,
        /// The configured limit.
        limit: usize,
    },

    /// A process panicked while executing.
    #[error("process panicked: {message}")]
    Panicked {
        /// The panic payload, if it was a string.
        message: String,
    },

    /// A process reported a failure of its own.
    #[error("process `{label}` failed: {message}")]
    Failed {
        /// Label of the failing process.
        label: String,
        /// Description of the failure.
        message: String,
    },
}

/// An opaque executable behavior.
pub trait Process: Send + Sync + fmt::Debug {
    /// The label this process is registered under.
    fn label(&self) -> &str;

    /// Execute the process against `ctx`.
    ///
    /// Side effects happen through the context: state mutation of the
    /// subject entity and push requests for future work.
    fn execute(&self, ctx: &mut Context<'_>) -> Result<Value, ExecutionError>;
}

/// Signature of the closures wrapped by [`FnProcess`].
type ProcessFn = dyn Fn(&mut Context<'_>) -> Result<Value, ExecutionError> + Send + Sync;

/// A process backed by a closure.
pub struct FnProcess {
    label: String,
    body: Box<ProcessFn>,
}

impl FnProcess {
    /// Wrap a closure as a process.
    pub fn new<F>(label: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut Context<'_>) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            body: Box::new(body),
        }
    }

    /// Wrap a closure and return it as a shared [`ProcessRef`].
    pub fn shared<F>(label: impl Into<String>, body: F) -> ProcessRef
    where
        F: Fn(&mut Context<'_>) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        Arc::new(Self::new(label, body))
    }
}

impl fmt::Debug for FnProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnProcess")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl Process for FnProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn execute(&self, ctx: &mut Context<'_>) -> Result<Value, ExecutionError> {
        (self.body)(ctx)
    }
}

/// Execute `process` against `ctx`, reporting a panic as
/// [`ExecutionError::Panicked`].
///
/// Every top-level execution goes through here, whether it runs on a worker
/// or on the scheduler thread, so a panicking process fails the same way
/// wherever it runs.
///
/// # Errors
///
/// Propagates the process's own error, or [`ExecutionError::Panicked`].
pub fn execute_guarded(process: &dyn Process, ctx: &mut Context<'_>) -> Result<Value, ExecutionError> {
    panic::catch_unwind(AssertUnwindSafe(|| process.execute(ctx))).unwrap_or_else(|payload| {
        Err(ExecutionError::Panicked {
            message: panic_message(payload.as_ref()),
        })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("process panicked"))
}

/// Label-addressed collection of processes.
///
/// Filled once before a run; shared read-only by the scheduler and every
/// worker afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    processes: BTreeMap<String, ProcessRef>,
}

impl ProcessRegistry {
    /// Create an empty registry.
    pub const fn new() -> Self {
        Self {
            processes: BTreeMap::new(),
        }
    }

    /// Register a process under its own label, replacing any previous one.
    ///
    /// Returns the replaced process, if any.
    pub fn register(&mut self, process: ProcessRef) -> Option<ProcessRef> {
        let label = process.label().to_owned();
        self.processes.insert(label, process)
    }

    /// Register a closure under `label`.
    pub fn register_fn<F>(&mut self, label: &str, body: F) -> Option<ProcessRef>
    where
        F: Fn(&mut Context<'_>) -> Result<Value, ExecutionError> + Send + Sync + 'static,
    {
        self.register(FnProcess::shared(label, body))
    }

    /// Look up a process by label.
    pub fn get(&self, label: &str) -> Option<&ProcessRef> {
        self.processes.get(label)
    }

    /// Look up a process by label, cloning the shared handle.
    pub fn resolve(&self, label: &str) -> Result<ProcessRef, ExecutionError> {
        self.processes
            .get(label)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownProcess {
                label: label.to_owned(),
            })
    }

    /// Return `true` if a process is registered under `label`.
    pub fn contains(&self, label: &str) -> bool {
        self.processes.contains_key(label)
    }

    /// Iterate over registered labels in order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.processes.keys().map(String::as_str)
    }

    /// Number of registered processes.
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Return `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }
}
