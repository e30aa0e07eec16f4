pub mod app_config;
pub mod database;
pub mod engine;
pub mod observability;
pub mod resources;

pub use app_config::AppConfig;
pub use database::{DatabaseBackend, DatabaseConfig};
pub use engine::{LifecycleConfig, OptimizerConfig, SchedulerConfig};
pub use observability::ObservabilityConfig;
pub use resources::ComputeResourceSeed;
