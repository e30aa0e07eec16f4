use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::entities::Experiment;
use scheduler_domain::repositories::ExperimentRepository;
use scheduler_domain::value_objects::{ExperimentConstraints, ResourceRequirements};
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use tracing::instrument;

use super::version_miss;

const EXPERIMENT_COLUMNS: &str = "id, name, description, project_id, owner_id, status, \
    command_template, requirements, constraints, created_at, updated_at, started_at, \
    completed_at, metadata, version";

pub struct PostgresExperimentRepository {
    pool: PgPool,
}

impl PostgresExperimentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_experiment(row: &PgRow) -> SchedulerResult<Experiment> {
        let requirements: Json<ResourceRequirements> = row.try_get("requirements")?;
        let constraints: Json<ExperimentConstraints> = row.try_get("constraints")?;

        Ok(Experiment {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            project_id: row.try_get("project_id")?,
            owner_id: row.try_get("owner_id")?,
            status: row.try_get("status")?,
            command_template: row.try_get("command_template")?,
            requirements: requirements.0,
            constraints: constraints.0,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            metadata: row.try_get("metadata")?,
            version: row.try_get("version")?,
        })
    }
}

#[async_trait]
impl ExperimentRepository for PostgresExperimentRepository {
    #[instrument(skip(self, experiment), fields(experiment_id = %experiment.id))]
    async fn create(&self, experiment: &Experiment) -> SchedulerResult<Experiment> {
        let query = format!(
            "INSERT INTO experiments ({EXPERIMENT_COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
             RETURNING {EXPERIMENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&experiment.id)
            .bind(&experiment.name)
            .bind(&experiment.description)
            .bind(&experiment.project_id)
            .bind(&experiment.owner_id)
            .bind(experiment.status)
            .bind(&experiment.command_template)
            .bind(Json(&experiment.requirements))
            .bind(Json(&experiment.constraints))
            .bind(experiment.created_at)
            .bind(experiment.updated_at)
            .bind(experiment.started_at)
            .bind(experiment.completed_at)
            .bind(&experiment.metadata)
            .bind(experiment.version)
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_experiment(&row)
    }

    async fn get_by_id(&self, id: &str) -> SchedulerResult<Option<Experiment>> {
        let query = format!("SELECT {EXPERIMENT_COLUMNS} FROM experiments WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_experiment).transpose()
    }

    #[instrument(skip(self, experiment), fields(experiment_id = %experiment.id))]
    async fn update(&self, experiment: &Experiment) -> SchedulerResult<Experiment> {
        let query = format!(
            "UPDATE experiments SET name = $3, description = $4, status = $5, \
             requirements = $6, constraints = $7, updated_at = $8, started_at = $9, \
             completed_at = $10, metadata = $11, version = version + 1 \
             WHERE id = $1 AND version = $2 RETURNING {EXPERIMENT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(&experiment.id)
            .bind(experiment.version)
            .bind(&experiment.name)
            .bind(&experiment.description)
            .bind(experiment.status)
            .bind(Json(&experiment.requirements))
            .bind(Json(&experiment.constraints))
            .bind(experiment.updated_at)
            .bind(experiment.started_at)
            .bind(experiment.completed_at)
            .bind(&experiment.metadata)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_experiment(&row),
            None => Err(version_miss(
                &self.pool,
                "experiments",
                "实验",
                &experiment.id,
                |id| SchedulerError::experiment_not_found(id),
            )
            .await),
        }
    }
}
