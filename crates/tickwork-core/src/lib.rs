//! Scheduling and event-propagation engine for the tickwork simulation.
//!
//! A clock advances in integer ticks. Every tick the environment runs its
//! due work on the scheduler thread, then a fixed pool of worker threads
//! runs the due work of every individual in parallel. Work produced during
//! the parallel phase is parked in a [`PushBuffer`] and merged into the
//! [`WaitingQueues`] on the scheduler thread, and the individual phase is
//! repeated until the tick is quiescent.
//!
//! # Modules
//!
//! - [`builtin`] -- Stock processes (`tick_limit`, `noop`, `greet`, ...).
//! - [`callback`] -- Per-tick observation hooks and run summaries.
//! - [`clock`] -- Tick counter and continuation predicate.
//! - [`config`] -- Configuration loading from `tickwork.yaml`.
//! - [`context`] -- The execution context handed to a running process.
//! - [`error`] -- Setup (configuration-time) errors.
//! - [`growth`] -- [`PopulationManager`] trait and stock growth strategies.
//! - [`observer`] -- Periodic observers and their trigger rule.
//! - [`partition`] -- Stable assignment of individual indices to workers.
//! - [`population`] -- Environment and the append-only population.
//! - [`process`] -- [`Process`] trait and the label registry.
//! - [`push_buffer`] -- Mutex-guarded buffer of pushes from the parallel phase.
//! - [`queues`] -- Per-entity, per-tick FIFO queues of deferred work.
//! - [`scenario`] -- Entry behaviors selected by label at run start.
//! - [`scheduler`] -- The tick and sub-step loop.
//! - [`worker`] -- Long-lived worker threads and the phase barrier.
//!
//! [`PushBuffer`]: push_buffer::PushBuffer
//! [`WaitingQueues`]: queues::WaitingQueues
//! [`PopulationManager`]: growth::PopulationManager
//! [`Process`]: process::Process

pub mod builtin;
pub mod callback;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod growth;
pub mod observer;
pub mod partition;
pub mod population;
pub mod process;
pub mod push_buffer;
pub mod queues;
pub mod scenario;
pub mod scheduler;
pub mod worker;
