//! # Tasker Scheduler
//!
//! Task execution engine: decides *when* a task runs, tracks its lifecycle
//! and rehydrates pending work after a restart.
//!
//! ## Design Principles
//! - Tasks report their own lifecycle on an in-process event bus
//! - Strategies only decide timing; they never touch history or storage
//! - Tokio timers only, owned by one registry, cancellable by task id
//! - Durable records (JSON file or SQLite) so scheduled work survives restarts
//!
//! ## Architecture
//! ```text
//! TaskRunner::run(request)
//!   ├── resolve: builder fields | template + overrides → Task
//!   ├── StrategySelector → Immediate | Scheduled | Conditional
//!   │                         └── TimerRegistry (arm / disarm / cancel)
//!   ├── RecordStore ← armed scheduled/conditional work
//!   └── background: strategy.apply(task) → ResultNotifier
//!
//! Task::execute → EventBus ─→ TaskRunner::handle_event
//!                              ├── pending list
//!                              ├── TaskLog (dedup, purge, audit)
//!                              ├── RecordStore (terminal outcome)
//!                              └── clean completed → cleanup_history
//!
//! TaskRunner::recover (startup)
//!   ├── scheduled, past due → execute now
//!   ├── scheduled, future   → re-arm
//!   └── waiting             → re-arm conditional (default condition fallback)
//! ```

pub mod builder;
pub mod bus;
pub mod conditions;
pub mod handlers;
pub mod log;
pub mod notify;
pub mod persistence;
pub mod recovery;
pub mod runner;
pub mod store;
pub mod strategy;
pub mod task;
pub mod templates;
pub mod timers;

pub use builder::TaskRequestBuilder;
pub use bus::{EventBus, SubscriptionId, TaskEvent, TaskEventKind};
pub use conditions::PredicateRegistry;
pub use log::{AuditEntry, CleanMode, PurgeOptions, TaskLog};
pub use notify::{ResultNotifier, TaskNotification};
pub use persistence::SqliteStore;
pub use recovery::RecoveryReport;
pub use runner::{PendingTask, TaskRunner, TaskRunnerBuilder, TemplateSummary};
pub use store::{JsonFileStore, MemoryStore, RecordStore};
pub use strategy::{ExecutionStrategy, StrategySelector};
pub use task::{Task, TaskFactory, TaskHandler};
pub use templates::{TaskTemplate, TemplateRegistry};
pub use timers::TimerRegistry;
