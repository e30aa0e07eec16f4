//! Test data builders for creating test entities
//!
//! Every builder starts from a valid entity so tests only spell out the
//! fields they care about.

use chrono::{DateTime, Utc};
use scheduler_domain::entities::{
    ComputeResource, ComputeResourceType, ConnectionState, Experiment, ExperimentStatus,
    ResourceStatus, Task, TaskStatus, Worker, WorkerStatus,
};
use scheduler_domain::value_objects::{ExperimentConstraints, FileMetadata};
use std::time::Duration;

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::new("exp-1", "echo test", 3),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.task.id = id.to_string();
        self
    }

    pub fn with_experiment(mut self, experiment_id: &str) -> Self {
        self.task.experiment_id = experiment_id.to_string();
        self
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.task.command = command.to_string();
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn queued(self) -> Self {
        self.with_status(TaskStatus::Queued)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.task.max_retries = max_retries;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.task.retry_count = retry_count;
        self
    }

    pub fn with_input_file(mut self, path: &str) -> Self {
        self.task.input_files.push(FileMetadata::new(path, 1024));
        self
    }

    pub fn with_output_file(mut self, path: &str) -> Self {
        self.task.output_files.push(FileMetadata::new(path, 0));
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.task.dependencies = dependencies;
        self
    }

    /// Pre-bind the task to a compute resource without assigning a worker
    pub fn on_resource(mut self, resource_id: &str) -> Self {
        self.task.compute_resource_id = Some(resource_id.to_string());
        self
    }

    pub fn assigned_to(mut self, worker_id: &str, resource_id: &str) -> Self {
        self.task.worker_id = Some(worker_id.to_string());
        self.task.compute_resource_id = Some(resource_id.to_string());
        self.task.started_at = Some(Utc::now());
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self.task.updated_at = created_at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Worker entities
pub struct WorkerBuilder {
    worker: Worker,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        let mut worker = Worker::new(
            "worker-1",
            "exp-1",
            "resource-1",
            "user-1",
            Duration::from_secs(3600),
        );
        worker.connection_state = ConnectionState::Connected;
        Self { worker }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.worker.id = id.to_string();
        self
    }

    pub fn with_experiment(mut self, experiment_id: &str) -> Self {
        self.worker.experiment_id = experiment_id.to_string();
        self
    }

    pub fn with_resource(mut self, resource_id: &str) -> Self {
        self.worker.compute_resource_id = resource_id.to_string();
        self
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.worker.user_id = user_id.to_string();
        self
    }

    pub fn with_walltime(mut self, walltime: Duration) -> Self {
        self.worker.walltime = walltime;
        self.worker.walltime_remaining = walltime;
        self
    }

    pub fn busy_with(mut self, task_id: &str) -> Self {
        self.worker.status = WorkerStatus::Busy;
        self.worker.current_task_id = Some(task_id.to_string());
        self
    }

    pub fn with_connection_state(mut self, state: ConnectionState) -> Self {
        self.worker.connection_state = state;
        self
    }

    pub fn registered_at(mut self, registered_at: DateTime<Utc>) -> Self {
        self.worker.registered_at = registered_at;
        self
    }

    pub fn with_last_heartbeat(mut self, heartbeat: DateTime<Utc>) -> Self {
        self.worker.last_heartbeat = Some(heartbeat);
        self
    }

    pub fn terminated(mut self) -> Self {
        self.worker.connection_state = ConnectionState::Terminated;
        self.worker.terminated_at = Some(Utc::now());
        self.worker.walltime_remaining = Duration::ZERO;
        self
    }

    pub fn build(self) -> Worker {
        self.worker
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test Experiment entities
pub struct ExperimentBuilder {
    experiment: Experiment,
}

impl ExperimentBuilder {
    pub fn new() -> Self {
        let mut experiment = Experiment::new("test_experiment", "user-1", "echo {}");
        experiment.id = "exp-1".to_string();
        Self { experiment }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.experiment.id = id.to_string();
        self
    }

    pub fn with_owner(mut self, owner_id: &str) -> Self {
        self.experiment.owner_id = owner_id.to_string();
        self
    }

    pub fn with_status(mut self, status: ExperimentStatus) -> Self {
        self.experiment.status = status;
        self
    }

    pub fn executing(mut self) -> Self {
        self.experiment.status = ExperimentStatus::Executing;
        self.experiment.started_at = Some(Utc::now());
        self
    }

    pub fn with_constraints(mut self, constraints: ExperimentConstraints) -> Self {
        self.experiment.constraints = constraints;
        self
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.experiment.constraints.max_cost = Some(max_cost);
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.experiment.constraints.deadline = Some(deadline);
        self
    }

    pub fn with_task_duration(mut self, duration: Duration) -> Self {
        self.experiment.requirements.estimated_task_duration = Some(duration);
        self
    }

    pub fn with_walltime(mut self, walltime: Duration) -> Self {
        self.experiment.requirements.walltime = Some(walltime);
        self
    }

    pub fn build(self) -> Experiment {
        self.experiment
    }
}

impl Default for ExperimentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test ComputeResource entities
pub struct ComputeResourceBuilder {
    resource: ComputeResource,
}

impl ComputeResourceBuilder {
    pub fn new(id: &str) -> Self {
        let mut resource = ComputeResource::new(id, ComputeResourceType::Slurm, 1.0, 10);
        resource.reliability = 0.95;
        Self { resource }
    }

    pub fn with_type(mut self, resource_type: ComputeResourceType) -> Self {
        self.resource.resource_type = resource_type;
        self
    }

    pub fn with_cost(mut self, cost_per_hour: f64) -> Self {
        self.resource.cost_per_hour = cost_per_hour;
        self
    }

    pub fn with_max_workers(mut self, max_workers: u32) -> Self {
        self.resource.max_workers = max_workers;
        self
    }

    pub fn with_current_workers(mut self, current_workers: u32) -> Self {
        self.resource.current_workers = current_workers;
        self
    }

    pub fn with_reliability(mut self, reliability: f64) -> Self {
        self.resource.reliability = reliability;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.resource.status = ResourceStatus::Inactive;
        self
    }

    pub fn build(self) -> ComputeResource {
        self.resource
    }
}
