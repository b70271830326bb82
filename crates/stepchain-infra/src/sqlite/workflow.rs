//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `stepchain-core` using sqlx with split
//! read/write pools. Definitions are stored as JSON blobs; `name` is kept as
//! a real column for lookup by name.

use chrono::Utc;
use sqlx::Row;
use stepchain_core::repository::workflow::WorkflowRepository;
use stepchain_types::error::RepositoryError;
use stepchain_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn decode_definition(row: &sqlx::sqlite::SqliteRow) -> Result<WorkflowDefinition, RepositoryError> {
    let definition: String = row
        .try_get("definition")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&definition)
        .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))
}

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = serde_json::to_string(def)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"INSERT INTO workflows (id, name, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(def.id.to_string())
        .bind(&def.name)
        .bind(&definition_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("workflow name '{}' already exists", def.name))
            }
            other => RepositoryError::Query(other.to_string()),
        })?;

        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode_definition).transpose()
    }

    async fn get_definition_by_name(
        &self,
        name: &str,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflows WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(decode_definition).transpose()
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query("SELECT definition FROM workflows ORDER BY name ASC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(decode_definition).collect()
    }

    async fn delete_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepchain_types::workflow::{ContextMode, Criteria, StepDefinition};

    async fn test_pool() -> (tempfile::TempDir, DatabasePool) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, pool)
    }

    fn sample_workflow(name: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: None,
            steps: vec![StepDefinition {
                id: Uuid::now_v7(),
                order: 1,
                name: "only".to_string(),
                model: "kimi-k2p5".to_string(),
                prompt: "hello".to_string(),
                criteria: Criteria::AlwaysPass,
                max_retries: 0,
                context_mode: ContextMode::Full,
            }],
        }
    }

    #[tokio::test]
    async fn save_and_get_roundtrip() {
        let (_dir, pool) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let wf = sample_workflow("alpha");

        repo.save_definition(&wf).await.unwrap();
        let fetched = repo.get_definition(&wf.id).await.unwrap().unwrap();
        assert_eq!(fetched.name, "alpha");
        assert_eq!(fetched.steps.len(), 1);
        assert_eq!(fetched.steps[0].criteria, Criteria::AlwaysPass);
    }

    #[tokio::test]
    async fn get_by_name() {
        let (_dir, pool) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let wf = sample_workflow("beta");
        repo.save_definition(&wf).await.unwrap();

        let fetched = repo.get_definition_by_name("beta").await.unwrap().unwrap();
        assert_eq!(fetched.id, wf.id);
        assert!(repo.get_definition_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_definition() {
        let (_dir, pool) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let mut wf = sample_workflow("gamma");
        repo.save_definition(&wf).await.unwrap();

        wf.steps[0].prompt = "edited".to_string();
        repo.save_definition(&wf).await.unwrap();

        let fetched = repo.get_definition(&wf.id).await.unwrap().unwrap();
        assert_eq!(fetched.steps[0].prompt, "edited");
        assert_eq!(repo.list_definitions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let (_dir, pool) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        repo.save_definition(&sample_workflow("dup")).await.unwrap();

        let err = repo.save_definition(&sample_workflow("dup")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn list_sorted_by_name() {
        let (_dir, pool) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        repo.save_definition(&sample_workflow("zeta")).await.unwrap();
        repo.save_definition(&sample_workflow("alpha")).await.unwrap();

        let names: Vec<String> = repo
            .list_definitions()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let (_dir, pool) = test_pool().await;
        let repo = SqliteWorkflowRepository::new(pool);
        let wf = sample_workflow("doomed");
        repo.save_definition(&wf).await.unwrap();

        assert!(repo.delete_definition(&wf.id).await.unwrap());
        assert!(!repo.delete_definition(&wf.id).await.unwrap());
        assert!(repo.get_definition(&wf.id).await.unwrap().is_none());
    }
}
