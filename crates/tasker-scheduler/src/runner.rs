//! Task runner: the orchestrator.
//!
//! Binds tasks to strategies, launches them in the background and keeps
//! the pending list, the history and the record store in step with the
//! lifecycle events tasks emit. One runner per process context; clones
//! share the same state.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tasker_core::config::SchedulerConfig;
use tasker_core::types::parse_timestamp;
use tasker_core::{
    ExecutionStrategyConfig, RecordPatch, RecordResult, Result, StrategyType, TaskLogEntry,
    TaskRecord, TaskRequest, TaskResponse, TaskResult, TaskSource, TaskStatus, TaskType,
    TaskerConfig, TaskerError,
};
use tokio::sync::broadcast;

use crate::bus::{EventBus, SubscriptionId, TaskEvent, TaskEventKind};
use crate::conditions::PredicateRegistry;
use crate::handlers::clean::{clean_mode, clean_scope};
use crate::handlers::default_factory;
use crate::log::{AuditEntry, CleanMode, PurgeOptions, TaskLog};
use crate::notify::{ResultNotifier, TaskNotification};
use crate::store::RecordStore;
use crate::strategy::{ExecutionStrategy, StrategySelector};
use crate::task::{Task, TaskFactory, TaskHandler, new_task_id};
use crate::templates::{TaskTemplate, TemplateRegistry};
use crate::timers::TimerRegistry;

/// A staged or live unit of work, as listed by `get_pending_tasks`.
#[derive(Debug, Clone, Serialize)]
pub struct PendingTask {
    /// Id returned by `register_task`; the task id for live scheduled work.
    pub pending_id: String,
    /// Template key, or `type:name` for builder requests.
    pub key: String,
    pub task_name: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Task instance started for this entry, once bound.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_for: Option<DateTime<Utc>>,
    /// The staged request (absent for live scheduled work).
    #[serde(skip)]
    pub request: Option<TaskRequest>,
    /// Template resolved when the entry was staged.
    #[serde(skip)]
    pub template: Option<TaskTemplate>,
}

/// Entry of `list_templates`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSummary {
    pub key: String,
    pub name: String,
    pub task_type: TaskType,
}

#[derive(Default)]
struct RunnerState {
    pending: Vec<PendingTask>,
    active_conditional: HashMap<String, Arc<dyn ExecutionStrategy>>,
}

pub(crate) struct RunnerShared {
    pub(crate) templates: Arc<TemplateRegistry>,
    pub(crate) log: Arc<TaskLog>,
    pub(crate) factory: TaskFactory,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) timers: Arc<TimerRegistry>,
    pub(crate) predicates: PredicateRegistry,
    pub(crate) selector: StrategySelector,
    pub(crate) notifier: Arc<ResultNotifier>,
    pub(crate) store: Option<Arc<dyn RecordStore>>,
    pub(crate) settings: SchedulerConfig,
    state: Mutex<RunnerState>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl Drop for RunnerShared {
    fn drop(&mut self) {
        let id = self
            .subscription
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.bus.off(id);
        }
    }
}

/// Builds a `TaskRunner` and wires its collaborators.
pub struct TaskRunnerBuilder {
    config: TaskerConfig,
    templates: Option<TemplateRegistry>,
    store: Option<Arc<dyn RecordStore>>,
    predicates: PredicateRegistry,
    handlers: Vec<Arc<dyn TaskHandler>>,
}

impl TaskRunnerBuilder {
    pub fn new(config: TaskerConfig) -> Self {
        Self {
            config,
            templates: None,
            store: None,
            predicates: PredicateRegistry::new(),
            handlers: Vec::new(),
        }
    }

    /// Replace the built-in templates.
    pub fn templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Named predicates available to conditional tasks.
    pub fn predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.predicates = predicates;
        self
    }

    /// Register a handler, replacing the built-in one for its type.
    pub fn handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> TaskRunner {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(TaskLog::with_dedup_window(std::time::Duration::from_millis(
            self.config.history.dedup_window_ms,
        )));
        let mut factory = default_factory(bus.clone(), log.clone(), &self.config.tasks);
        for handler in self.handlers {
            factory.register(handler);
        }
        let timers = Arc::new(TimerRegistry::new());
        let selector = StrategySelector::new(
            timers.clone(),
            self.predicates.clone(),
            self.config.scheduler.clone(),
        );

        let shared = Arc::new(RunnerShared {
            templates: Arc::new(self.templates.unwrap_or_else(TemplateRegistry::with_defaults)),
            log,
            factory,
            bus: bus.clone(),
            timers,
            predicates: self.predicates,
            selector,
            notifier: Arc::new(ResultNotifier::new()),
            store: self.store,
            settings: self.config.scheduler,
            state: Mutex::new(RunnerState::default()),
            subscription: Mutex::new(None),
        });

        let weak: Weak<RunnerShared> = Arc::downgrade(&shared);
        let id = bus.on_any(move |event| {
            if let Some(shared) = weak.upgrade() {
                TaskRunner { shared }.handle_event(event);
            }
            Ok(())
        });
        *shared
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(id);

        TaskRunner { shared }
    }
}

/// The orchestrator.
#[derive(Clone)]
pub struct TaskRunner {
    pub(crate) shared: Arc<RunnerShared>,
}

impl TaskRunner {
    /// Runner with the built-in handlers and templates and no store.
    pub fn new(config: TaskerConfig) -> Self {
        TaskRunnerBuilder::new(config).build()
    }

    pub fn builder(config: TaskerConfig) -> TaskRunnerBuilder {
        TaskRunnerBuilder::new(config)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Running ──────────────────────────────────────────────

    /// Resolve, validate and launch a request. Returns as soon as the task
    /// is started; its outcome is reported through events, the history
    /// and the result notifier. Must be called inside a tokio runtime.
    pub fn run(&self, request: TaskRequest) -> TaskResponse {
        match self.try_run(request) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("⚠️ Task request rejected: {e}");
                TaskResponse::rejected(e.to_string())
            }
        }
    }

    fn try_run(&self, request: TaskRequest) -> Result<TaskResponse> {
        let (task, config) = self.resolve(&request)?;
        validate_task(&task)?;
        validate_strategy(&config)?;
        self.launch(task, config, request.pending_id.as_deref())
    }

    /// Re-run a staged request, bound to its pending entry.
    pub fn run_pending(&self, pending_id: &str) -> TaskResponse {
        let request = self
            .state()
            .pending
            .iter()
            .find(|p| p.pending_id == pending_id)
            .and_then(|p| p.request.clone());
        match request {
            Some(request) => self.run(request.bound_to(pending_id)),
            None => TaskResponse::rejected(format!("no pending task '{pending_id}'")),
        }
    }

    fn resolve(&self, request: &TaskRequest) -> Result<(Task, ExecutionStrategyConfig)> {
        match &request.source {
            TaskSource::Builder {
                name,
                task_type,
                payload,
                strategy,
            } => {
                let task = self
                    .shared
                    .factory
                    .create(name, *task_type, payload.clone(), None)?;
                Ok((task, strategy.clone().unwrap_or_default()))
            }
            TaskSource::Template { key, overrides } => {
                let task = self
                    .shared
                    .templates
                    .instantiate(key, overrides, &self.shared.factory)?;
                let config = task.strategy().cloned().unwrap_or_default();
                Ok((task, config))
            }
        }
    }

    /// Select the strategy, bind it and start execution in the background.
    pub(crate) fn launch(
        &self,
        mut task: Task,
        config: ExecutionStrategyConfig,
        pending_id: Option<&str>,
    ) -> Result<TaskResponse> {
        let strategy = self.shared.selector.select(&config)?;
        let strategy_type = strategy.strategy_type();
        task.set_strategy(config.clone());
        let task_id = task.id.clone();
        let task_name = task.name.clone();
        let task_type = task.task_type;

        {
            let mut state = self.state();
            if strategy_type == StrategyType::Conditional {
                state
                    .active_conditional
                    .insert(task_id.clone(), strategy.clone());
            }
            if let Some(pid) = pending_id {
                match state.pending.iter_mut().find(|p| p.pending_id == pid) {
                    Some(entry) => entry.instance_id = Some(task_id.clone()),
                    None => tracing::warn!("⚠️ No pending entry '{pid}' to bind task {task_id} to"),
                }
            }
        }
        self.persist_armed(&task, &config);

        // Synchronous half: binds the strategy, announces waiting, arms timers.
        let execution = strategy.apply(task);
        let handle = tokio::spawn(execution);

        let runner = self.clone();
        let (id, name) = (task_id.clone(), task_name.clone());
        tokio::spawn(async move {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!("💥 Task '{name}' aborted: {e}");
                    let error = format!("task aborted: {e}");
                    runner.shared.log.log(TaskLogEntry {
                        timestamp: Utc::now(),
                        task_id: id.clone(),
                        task_name: name.clone(),
                        task_type,
                        strategy: strategy_type,
                        status: TaskStatus::Failed,
                        message: error.clone(),
                        is_audit: false,
                    });
                    runner.settle(&id, TaskStatus::Failed, RecordResult::failed(error.as_str()));
                    TaskResult::failed(error)
                }
            };
            runner.finish(&id, &name, result);
        });

        let initial_status = match strategy_type {
            StrategyType::Immediate => TaskStatus::Running,
            _ => TaskStatus::Waiting,
        };
        tracing::info!("🚀 Task '{task_name}' launched ({strategy_type}, {initial_status})");
        Ok(TaskResponse::accepted(
            &task_id,
            &task_name,
            strategy_type,
            initial_status,
        ))
    }

    /// Background completion of one `apply`.
    fn finish(&self, task_id: &str, task_name: &str, result: TaskResult) {
        if result.status == TaskStatus::Waiting {
            // Retired by a re-arm of the same id; the newer run reports.
            tracing::debug!("⏱️ Task {task_id} superseded by a newer arm");
            return;
        }
        self.state().active_conditional.remove(task_id);
        self.shared
            .notifier
            .publish(TaskNotification::new(task_id, task_name, result));
    }

    /// Record the armed state of scheduled/conditional work.
    fn persist_armed(&self, task: &Task, config: &ExecutionStrategyConfig) {
        let Some(store) = &self.shared.store else {
            return;
        };
        let result = match config {
            ExecutionStrategyConfig::Immediate => return,
            ExecutionStrategyConfig::Scheduled { target_date } => match parse_timestamp(target_date)
            {
                Some(at) => RecordResult::scheduled(at),
                None => return,
            },
            ExecutionStrategyConfig::Conditional {
                condition,
                interval_ms,
                max_attempts,
            } => RecordResult::waiting(
                condition.clone(),
                interval_ms.unwrap_or(self.shared.settings.conditional_interval_ms),
                max_attempts.unwrap_or(self.shared.settings.conditional_max_attempts),
            ),
        };
        let record = TaskRecord {
            id: task.id.clone(),
            task_type: task.task_type,
            name: task.name.clone(),
            payload: task.payload.clone(),
            executed_at: None,
            result,
        };
        if let Err(e) = store.add(record) {
            tracing::warn!("⚠️ Failed to persist task {}: {e}", task.id);
        }
    }

    /// Apply a terminal status to the pending list and the stored record.
    fn settle(&self, task_id: &str, status: TaskStatus, result: RecordResult) {
        self.update_pending_status(task_id, status);
        let Some(store) = &self.shared.store else {
            return;
        };
        match store.find_by_id(task_id) {
            Ok(Some(_)) => {
                if let Err(e) = store.update_by_id(task_id, RecordPatch::finished(result)) {
                    tracing::warn!("⚠️ Failed to update record {task_id}: {e}");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("⚠️ Failed to read record {task_id}: {e}"),
        }
    }

    // ─── Event handling ───────────────────────────────────────

    fn handle_event(&self, event: &TaskEvent) {
        if event.kind == TaskEventKind::Completed && event.task_type == TaskType::Clean {
            let mode = clean_mode(&event.payload).unwrap_or_default();
            let scope = clean_scope(&event.payload).ok().flatten();
            self.cleanup_history(mode, Utc::now(), scope);
        }

        self.update_pending_status(&event.task_id, event.status);
        self.shared.log.log(TaskLogEntry {
            timestamp: event.timestamp,
            task_id: event.task_id.clone(),
            task_name: event.task_name.clone(),
            task_type: event.task_type,
            strategy: event.strategy,
            status: event.status,
            message: event.message.clone(),
            is_audit: false,
        });

        if !event.status.is_terminal() {
            return;
        }
        self.state().active_conditional.remove(&event.task_id);
        if event.strategy != StrategyType::Immediate {
            let record = match event.status {
                TaskStatus::Failed => RecordResult::failed(event.message.as_str()),
                status => RecordResult::status(status),
            };
            self.settle(&event.task_id, event.status, record);
        }
        if event.strategy == StrategyType::Scheduled {
            let result = match event.status {
                TaskStatus::Failed => TaskResult::failed(event.message.as_str()),
                status => TaskResult::with_status(status),
            };
            self.shared.notifier.publish(TaskNotification::new(
                &event.task_id,
                &event.task_name,
                result,
            ));
        }
    }

    fn update_pending_status(&self, instance_id: &str, status: TaskStatus) {
        let mut state = self.state();
        if let Some(i) = state
            .pending
            .iter()
            .position(|p| p.instance_id.as_deref() == Some(instance_id))
        {
            state.pending[i].status = status;
            if status.is_terminal() {
                state.pending.remove(i);
            }
        }
    }

    /// Purge history before `cutoff` (soft keeps terminal entries), record
    /// an audit entry, and on `hard` drop every pending entry.
    pub fn cleanup_history(&self, mode: CleanMode, cutoff: DateTime<Utc>, scope: Option<TaskType>) -> usize {
        let removed = self
            .shared
            .log
            .purge_before(cutoff, PurgeOptions::for_mode(mode, scope));
        let scope_text = scope.map_or_else(|| "global".to_string(), |s| s.to_string());
        self.shared.log.add_audit_entry(AuditEntry::system(
            TaskType::Clean,
            format!(
                "AUDIT: {mode} clean applied (scope={scope_text}) cutoff={}",
                cutoff.to_rfc3339()
            ),
        ));
        if mode == CleanMode::Hard {
            let dropped = std::mem::take(&mut self.state().pending).len();
            tracing::info!("🧹 Hard clean dropped {dropped} pending task(s)");
        }
        removed
    }

    // ─── Pending tasks ────────────────────────────────────────

    /// Stage a request without running it. Returns the pending id.
    pub fn register_task(&self, request: TaskRequest) -> Result<String> {
        let (task_name, task_type, template) = match &request.source {
            TaskSource::Builder {
                name, task_type, ..
            } => (name.clone(), *task_type, None),
            TaskSource::Template { key, overrides } => {
                let template = self
                    .shared
                    .templates
                    .get(key)
                    .ok_or_else(|| TaskerError::TemplateNotFound(key.clone()))?;
                let name = overrides.name.clone().unwrap_or_else(|| template.name.clone());
                (name, template.task_type, Some(template))
            }
        };
        let strategy = request
            .requested_strategy()
            .or_else(|| template.as_ref().and_then(|t| t.strategy.as_ref()))
            .map(|s| s.strategy_type())
            .unwrap_or(StrategyType::Immediate);
        let pending_id = new_task_id();
        let entry = PendingTask {
            pending_id: pending_id.clone(),
            key: request.key(),
            task_name: task_name.clone(),
            task_type,
            status: TaskStatus::Waiting,
            instance_id: None,
            scheduled_for: None,
            request: Some(request),
            template,
        };
        self.state().pending.push(entry);

        self.shared.bus.emit(&TaskEvent {
            kind: TaskEventKind::Waiting,
            task_id: pending_id.clone(),
            task_name,
            task_type,
            strategy,
            status: TaskStatus::Waiting,
            message: "Pending task created".into(),
            payload: Default::default(),
            timestamp: Utc::now(),
        });
        Ok(pending_id)
    }

    /// Staged entries plus live scheduled timers not bound to one.
    pub fn get_pending_tasks(&self) -> Vec<PendingTask> {
        let scheduled = self.shared.timers.scheduled();
        let mut out = self.state().pending.clone();
        for entry in out.iter_mut() {
            if let Some(info) = scheduled
                .iter()
                .find(|i| Some(&i.task_id) == entry.instance_id.as_ref())
            {
                entry.scheduled_for = info.scheduled_for;
            }
        }
        for info in scheduled {
            if out
                .iter()
                .any(|p| p.instance_id.as_deref() == Some(info.task_id.as_str()))
            {
                continue;
            }
            out.push(PendingTask {
                pending_id: info.task_id.clone(),
                key: info.task_type.to_string(),
                task_name: info.task_name,
                task_type: info.task_type,
                status: TaskStatus::Scheduled,
                instance_id: Some(info.task_id),
                scheduled_for: info.scheduled_for,
                request: None,
                template: None,
            });
        }
        out
    }

    /// Drop a staged entry, or cancel live scheduled work with that task id.
    pub fn remove_pending_task(&self, id: &str) -> bool {
        {
            let mut state = self.state();
            let before = state.pending.len();
            state.pending.retain(|p| p.pending_id != id);
            if state.pending.len() < before {
                return true;
            }
        }
        match self.shared.timers.info(id) {
            Some(info) if info.strategy == StrategyType::Scheduled => self.cancel_task(id),
            _ => false,
        }
    }

    /// Cancel scheduled or conditional work that has not started yet.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.shared.timers.cancel(task_id)
    }

    // ─── History & templates ──────────────────────────────────

    pub fn list_templates(&self) -> Vec<TemplateSummary> {
        self.shared
            .templates
            .list()
            .into_iter()
            .map(|(key, t)| TemplateSummary {
                key,
                name: t.name,
                task_type: t.task_type,
            })
            .collect()
    }

    pub fn get_history(&self) -> Vec<TaskLogEntry> {
        self.shared.log.list()
    }

    pub fn clear_history(&self) {
        self.shared.log.clear();
    }

    /// Drop pending entries and history of every task whose latest
    /// history entry is `completed`. Returns the compacted task ids count.
    pub fn clear_completed_tasks_and_logs(&self) -> usize {
        let completed = self.shared.log.compact_completed();
        let mut state = self.state();
        state.pending.retain(|p| {
            p.status != TaskStatus::Completed
                && !p
                    .instance_id
                    .as_ref()
                    .is_some_and(|id| completed.contains(id))
        });
        completed.len()
    }

    /// Cancel every active conditional strategy. Never fails.
    pub fn shutdown(&self) -> usize {
        let active = std::mem::take(&mut self.state().active_conditional);
        let mut cancelled = 0;
        for (task_id, strategy) in active {
            match catch_unwind(AssertUnwindSafe(|| strategy.cancel(&task_id))) {
                Ok(true) => cancelled += 1,
                Ok(false) => {}
                Err(_) => tracing::warn!("⚠️ Cancelling task {task_id} panicked during shutdown"),
            }
        }
        tracing::info!("🛑 Task runner shut down, {cancelled} conditional task(s) cancelled");
        cancelled
    }

    // ─── Accessors ────────────────────────────────────────────

    pub fn subscribe_results(&self) -> broadcast::Receiver<TaskNotification> {
        self.shared.notifier.subscribe()
    }

    pub fn notifier(&self) -> &ResultNotifier {
        &self.shared.notifier
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.shared.bus
    }

    pub fn log(&self) -> &Arc<TaskLog> {
        &self.shared.log
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.shared.templates
    }

    pub fn predicates(&self) -> &PredicateRegistry {
        &self.shared.predicates
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.shared.timers
    }

    pub fn store(&self) -> Option<&Arc<dyn RecordStore>> {
        self.shared.store.as_ref()
    }

    pub fn active_conditional_count(&self) -> usize {
        self.state().active_conditional.len()
    }
}

fn validate_task(task: &Task) -> Result<()> {
    if task.name.trim().is_empty() {
        return Err(TaskerError::Validation("task name is required".into()));
    }
    Ok(())
}

fn validate_strategy(config: &ExecutionStrategyConfig) -> Result<()> {
    if let ExecutionStrategyConfig::Scheduled { target_date } = config {
        if target_date.trim().is_empty() {
            return Err(TaskerError::Validation(
                "scheduled strategy requires target_date".into(),
            ));
        }
        let at = parse_timestamp(target_date).ok_or_else(|| {
            TaskerError::Validation(format!("invalid target date '{target_date}'"))
        })?;
        if at <= Utc::now() {
            return Err(TaskerError::Validation(
                "scheduled strategy requires a future date".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::testing::CountingHandler;
    use serde_json::json;
    use std::time::Duration;
    use tasker_core::{Condition, TaskPayload};

    fn config() -> TaskerConfig {
        let mut config = TaskerConfig::default();
        config.tasks.simulated_latency_ms = 0;
        config
    }

    fn payload(v: serde_json::Value) -> TaskPayload {
        v.as_object().cloned().unwrap_or_default()
    }

    async fn next_result(
        rx: &mut broadcast::Receiver<TaskNotification>,
        task_id: &str,
    ) -> TaskResult {
        loop {
            let n = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for result")
                .unwrap();
            if n.task_id == task_id {
                return n.result;
            }
        }
    }

    #[tokio::test]
    async fn test_validation_errors_start_nothing() {
        let runner = TaskRunner::new(config());

        let resp = runner.run(TaskRequest::builder("  ", TaskType::Email, TaskPayload::new()));
        assert!(!resp.ok);
        assert!(resp.error.unwrap().contains("name"));

        let past = TaskRequest::builder("late", TaskType::Email, TaskPayload::new())
            .with_strategy(ExecutionStrategyConfig::Scheduled {
                target_date: "2001-01-01T00:00:00Z".into(),
            });
        assert!(!runner.run(past).ok);

        let garbage = TaskRequest::builder("x", TaskType::Email, TaskPayload::new())
            .with_strategy(ExecutionStrategyConfig::Scheduled {
                target_date: "whenever".into(),
            });
        assert!(!runner.run(garbage).ok);

        assert!(!runner.run(TaskRequest::template("missing")).ok);
        assert!(runner.get_history().is_empty());
        assert!(runner.timers().is_empty());
    }

    #[tokio::test]
    async fn test_immediate_run_reports_through_notifier_and_history() {
        let runner = TaskRunner::new(config());
        let mut rx = runner.subscribe_results();
        let resp = runner.run(TaskRequest::template("socialPostBase"));
        assert!(resp.ok);
        assert_eq!(resp.initial_status, Some(TaskStatus::Running));
        assert_eq!(resp.strategy, Some(StrategyType::Immediate));

        let id = resp.task_id.unwrap();
        let result = next_result(&mut rx, &id).await;
        assert_eq!(result.status, TaskStatus::Completed);

        let statuses: Vec<_> = runner
            .get_history()
            .into_iter()
            .filter(|e| e.task_id == id)
            .map(|e| e.status)
            .collect();
        assert_eq!(statuses, vec![TaskStatus::Running, TaskStatus::Completed]);
    }

    #[tokio::test]
    async fn test_register_and_run_pending() {
        let runner = TaskRunner::new(config());
        let mut rx = runner.subscribe_results();
        let pid = runner
            .register_task(TaskRequest::template("emailBase"))
            .unwrap();
        let pending = runner.get_pending_tasks();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, TaskStatus::Waiting);
        assert_eq!(pending[0].key, "emailBase");

        let resp = runner.run_pending(&pid);
        assert!(resp.ok);
        next_result(&mut rx, resp.task_id.as_deref().unwrap()).await;
        // Bound entry is removed once its instance is terminal.
        assert!(runner.get_pending_tasks().is_empty());

        assert!(!runner.run_pending("nope").ok);
        assert!(runner.register_task(TaskRequest::template("nope")).is_err());
    }

    #[tokio::test]
    async fn test_remove_pending_and_scheduled() {
        let runner = TaskRunner::new(config());
        let pid = runner
            .register_task(TaskRequest::template("cleanBasic"))
            .unwrap();
        assert!(runner.remove_pending_task(&pid));
        assert!(!runner.remove_pending_task(&pid));

        let target = Utc::now() + chrono::Duration::minutes(5);
        let resp = runner.run(
            TaskRequest::template("emailBase")
                .with_strategy(ExecutionStrategyConfig::scheduled_at(target)),
        );
        assert_eq!(resp.initial_status, Some(TaskStatus::Waiting));
        let id = resp.task_id.unwrap();
        let pending = runner.get_pending_tasks();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, TaskStatus::Scheduled);
        assert_eq!(pending[0].pending_id, id);

        assert!(runner.remove_pending_task(&id));
        assert!(runner.get_pending_tasks().is_empty());
        assert!(!runner.cancel_task(&id));
    }

    #[tokio::test]
    async fn test_soft_clean_cascade_keeps_outcomes() {
        let runner = TaskRunner::new(config());
        let mut rx = runner.subscribe_results();
        let resp = runner.run(TaskRequest::template("emailBase"));
        next_result(&mut rx, resp.task_id.as_deref().unwrap()).await;

        let clean = runner.run(TaskRequest::template("cleanBasic"));
        next_result(&mut rx, clean.task_id.as_deref().unwrap()).await;

        let history = runner.get_history();
        // Running entries before the cutoff are gone, outcomes remain.
        assert!(
            history
                .iter()
                .filter(|e| !e.is_audit && e.timestamp < history.last().unwrap().timestamp)
                .all(|e| e.status.is_terminal())
        );
        assert!(history.iter().any(|e| e.is_audit && e.message.contains("soft clean")));
    }

    #[tokio::test]
    async fn test_clear_completed_tasks_and_logs() {
        let runner = TaskRunner::builder(config())
            .handler(Arc::new(CountingHandler::new(TaskType::Email)))
            .build();
        let mut rx = runner.subscribe_results();
        let ok = runner.run(TaskRequest::builder("ok", TaskType::Email, TaskPayload::new()));
        next_result(&mut rx, ok.task_id.as_deref().unwrap()).await;
        let bad = runner.run(TaskRequest::builder(
            "bad",
            TaskType::Email,
            payload(json!({"fail": true})),
        ));
        let bad_id = bad.task_id.unwrap();
        next_result(&mut rx, &bad_id).await;

        assert_eq!(runner.clear_completed_tasks_and_logs(), 1);
        assert!(runner.get_history().iter().all(|e| e.task_id == bad_id));
    }

    #[tokio::test]
    async fn test_clear_completed_keeps_clean_audit() {
        let runner = TaskRunner::new(config());
        let mut rx = runner.subscribe_results();
        let mail = runner.run(TaskRequest::template("emailBase"));
        next_result(&mut rx, mail.task_id.as_deref().unwrap()).await;
        let clean = runner.run(TaskRequest::template("cleanBasic"));
        next_result(&mut rx, clean.task_id.as_deref().unwrap()).await;

        assert_eq!(runner.clear_completed_tasks_and_logs(), 2);
        let history = runner.get_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_audit);
        assert!(history[0].message.contains("soft clean"));
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_immediate_run() {
        let runner = TaskRunner::builder(config())
            .handler(Arc::new(CountingHandler::new(TaskType::Email)))
            .build();
        let mut rx = runner.subscribe_results();
        let resp = runner.run(TaskRequest::builder(
            "explodes",
            TaskType::Email,
            payload(json!({"panic": true})),
        ));
        let id = resp.task_id.unwrap();

        let result = next_result(&mut rx, &id).await;
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("panicked"));
        assert!(
            runner
                .get_history()
                .iter()
                .any(|e| e.task_id == id && e.status == TaskStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_conditional_work() {
        let predicates = PredicateRegistry::new();
        predicates.register("never", || Ok(false));
        let runner = TaskRunner::builder(config()).predicates(predicates).build();
        let mut rx = runner.subscribe_results();

        let resp = runner.run(TaskRequest::template("cleanBasic").with_strategy(
            ExecutionStrategyConfig::Conditional {
                condition: Condition::from("never"),
                interval_ms: Some(10_000),
                max_attempts: Some(5),
            },
        ));
        assert_eq!(resp.initial_status, Some(TaskStatus::Waiting));
        assert_eq!(runner.active_conditional_count(), 1);

        assert_eq!(runner.shutdown(), 1);
        assert_eq!(runner.active_conditional_count(), 0);
        let result = next_result(&mut rx, resp.task_id.as_deref().unwrap()).await;
        assert_eq!(result.status, TaskStatus::Canceled);
        // Second shutdown has nothing left to do.
        assert_eq!(runner.shutdown(), 0);
    }

    #[tokio::test]
    async fn test_unknown_condition_is_rejected() {
        let runner = TaskRunner::new(config());
        let resp = runner.run(
            TaskRequest::template("cleanBasic")
                .with_strategy(ExecutionStrategyConfig::conditional("full-moon")),
        );
        assert!(!resp.ok);
        assert_eq!(runner.active_conditional_count(), 0);
    }

    #[test]
    fn test_list_templates() {
        let runner = TaskRunner::new(config());
        let templates = runner.list_templates();
        assert_eq!(templates.len(), 5);
        assert_eq!(templates[0].key, "reminderBase");
        assert_eq!(templates[0].task_type, TaskType::Calendar);
    }
}
