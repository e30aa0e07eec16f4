//! Recording test doubles for the engine's collaborator ports
//!
//! These keep every call in shared state so tests can assert on what the
//! scheduler did after the fact.

use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::{ComputeResourceType, Task, TaskStatus};
use scheduler_domain::events::{ExperimentStateChange, TaskStateChange, WorkerStateChange};
use scheduler_domain::ports::{
    DataMover, ExperimentOrchestrator, ExperimentStateChangeHook, SpawnContext,
    TaskStateChangeHook, WorkerSpawner, WorkerStateChangeHook,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Hook that records every event it receives
#[derive(Debug, Clone, Default)]
pub struct RecordingHook {
    task_events: Arc<Mutex<Vec<TaskStateChange>>>,
    worker_events: Arc<Mutex<Vec<WorkerStateChange>>>,
    experiment_events: Arc<Mutex<Vec<ExperimentStateChange>>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_events(&self) -> Vec<TaskStateChange> {
        self.task_events.lock().unwrap().clone()
    }

    pub fn worker_events(&self) -> Vec<WorkerStateChange> {
        self.worker_events.lock().unwrap().clone()
    }

    pub fn experiment_events(&self) -> Vec<ExperimentStateChange> {
        self.experiment_events.lock().unwrap().clone()
    }

    /// All (from, to) pairs seen for one task, in delivery order
    pub fn task_transitions(&self, task_id: &str) -> Vec<(TaskStatus, TaskStatus)> {
        self.task_events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| (e.from, e.to))
            .collect()
    }

    pub fn clear(&self) {
        self.task_events.lock().unwrap().clear();
        self.worker_events.lock().unwrap().clear();
        self.experiment_events.lock().unwrap().clear();
    }
}

#[async_trait]
impl TaskStateChangeHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_task_state_change(&self, event: &TaskStateChange) -> SchedulerResult<()> {
        self.task_events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl WorkerStateChangeHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_worker_state_change(&self, event: &WorkerStateChange) -> SchedulerResult<()> {
        self.worker_events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl ExperimentStateChangeHook for RecordingHook {
    fn name(&self) -> &str {
        "recording"
    }

    async fn on_experiment_state_change(
        &self,
        event: &ExperimentStateChange,
    ) -> SchedulerResult<()> {
        self.experiment_events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// Hook that always fails, counting how often it was invoked
#[derive(Debug, Clone, Default)]
pub struct FailingHook {
    calls: Arc<AtomicUsize>,
}

impl FailingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail(&self) -> SchedulerResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(SchedulerError::Internal("hook failure".to_string()))
    }
}

#[async_trait]
impl TaskStateChangeHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_task_state_change(&self, _event: &TaskStateChange) -> SchedulerResult<()> {
        self.fail()
    }
}

#[async_trait]
impl WorkerStateChangeHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_worker_state_change(&self, _event: &WorkerStateChange) -> SchedulerResult<()> {
        self.fail()
    }
}

#[async_trait]
impl ExperimentStateChangeHook for FailingHook {
    fn name(&self) -> &str {
        "failing"
    }

    async fn on_experiment_state_change(
        &self,
        _event: &ExperimentStateChange,
    ) -> SchedulerResult<()> {
        self.fail()
    }
}

/// Spawner that records submissions instead of launching anything
#[derive(Debug, Clone)]
pub struct RecordingSpawner {
    resource_type: ComputeResourceType,
    submitted: Arc<Mutex<Vec<(String, String)>>>,
    canceled: Arc<Mutex<Vec<String>>>,
    fail_submit: Arc<AtomicBool>,
}

impl RecordingSpawner {
    pub fn new(resource_type: ComputeResourceType) -> Self {
        Self {
            resource_type,
            submitted: Arc::new(Mutex::new(Vec::new())),
            canceled: Arc::new(Mutex::new(Vec::new())),
            fail_submit: Arc::new(AtomicBool::new(false)),
        }
    }

    /// (worker id, script) for every accepted submission
    pub fn submitted(&self) -> Vec<(String, String)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.canceled.lock().unwrap().clone()
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn job_id_for(worker_id: &str) -> String {
        format!("job-{worker_id}")
    }
}

#[async_trait]
impl WorkerSpawner for RecordingSpawner {
    fn resource_type(&self) -> ComputeResourceType {
        self.resource_type
    }

    fn generate_worker_spawn_script(&self, ctx: &SpawnContext) -> SchedulerResult<String> {
        Ok(format!(
            "#!/bin/sh\n{} --worker-id {} --experiment-id {} --server {}\n",
            ctx.worker_binary, ctx.worker_id, ctx.experiment_id, ctx.server_address
        ))
    }

    async fn submit(&self, ctx: &SpawnContext, script: &str) -> SchedulerResult<String> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(SchedulerError::SpawnFailed(format!(
                "submission rejected for {}",
                ctx.worker_id
            )));
        }
        self.submitted
            .lock()
            .unwrap()
            .push((ctx.worker_id.clone(), script.to_string()));
        Ok(Self::job_id_for(&ctx.worker_id))
    }

    async fn cancel(&self, job_id: &str) -> SchedulerResult<()> {
        self.canceled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

/// Data mover that records staging requests
#[derive(Debug, Clone, Default)]
pub struct RecordingDataMover {
    inputs: Arc<Mutex<Vec<(String, String)>>>,
    outputs: Arc<Mutex<Vec<(String, String)>>>,
    fail_inputs: Arc<AtomicBool>,
    fail_outputs: Arc<AtomicBool>,
}

impl RecordingDataMover {
    pub fn new() -> Self {
        Self::default()
    }

    /// (task id, worker id) pairs staged to workers
    pub fn inputs(&self) -> Vec<(String, String)> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn outputs(&self) -> Vec<(String, String)> {
        self.outputs.lock().unwrap().clone()
    }

    pub fn set_fail_inputs(&self, fail: bool) {
        self.fail_inputs.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_outputs(&self, fail: bool) {
        self.fail_outputs.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DataMover for RecordingDataMover {
    async fn stage_input_to_worker(
        &self,
        task: &Task,
        worker_id: &str,
        _user_id: &str,
    ) -> SchedulerResult<()> {
        if self.fail_inputs.load(Ordering::SeqCst) {
            return Err(SchedulerError::Staging(format!("input staging failed for {}", task.id)));
        }
        self.inputs
            .lock()
            .unwrap()
            .push((task.id.clone(), worker_id.to_string()));
        Ok(())
    }

    async fn stage_output_from_worker(
        &self,
        task: &Task,
        worker_id: &str,
        _user_id: &str,
    ) -> SchedulerResult<()> {
        if self.fail_outputs.load(Ordering::SeqCst) {
            return Err(SchedulerError::Staging(format!("output staging failed for {}", task.id)));
        }
        self.outputs
            .lock()
            .unwrap()
            .push((task.id.clone(), worker_id.to_string()));
        Ok(())
    }
}

/// Orchestrator that expands an experiment into a fixed list of commands
#[derive(Debug, Clone)]
pub struct StaticOrchestrator {
    commands: Vec<String>,
    max_retries: u32,
}

impl StaticOrchestrator {
    pub fn new(commands: Vec<String>, max_retries: u32) -> Self {
        Self {
            commands,
            max_retries,
        }
    }

    pub fn with_task_count(count: usize, max_retries: u32) -> Self {
        Self::new((0..count).map(|i| format!("echo {i}")).collect(), max_retries)
    }
}

#[async_trait]
impl ExperimentOrchestrator for StaticOrchestrator {
    async fn generate_tasks(&self, experiment_id: &str) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .commands
            .iter()
            .map(|command| Task::new(experiment_id, command.as_str(), self.max_retries))
            .collect())
    }
}
