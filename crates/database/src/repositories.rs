//! Record store access for invocation logs.

use std::sync::Mutex;

use anyhow::Context;
use invocation_structs::{InvocationRecord, function_log_key};
use sqlx::PgPool;
use tracing::debug;

use crate::models::{FUNCTION_LOG_COLUMNS, FunctionLogRow};

/// Append-only log of invocation records, queried per project and function.
pub trait LogStore: Send + Sync {
    /// Most recent invocations of one function, newest first, at most `limit` rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn recent_invocations(
        &self,
        project_id: &str,
        function_name: &str,
        limit: usize,
    ) -> impl Future<Output = anyhow::Result<Vec<InvocationRecord>>> + Send;

    /// Every invocation of a project, ordered by function then time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    fn project_invocations(
        &self,
        project_id: &str,
    ) -> impl Future<Output = anyhow::Result<Vec<InvocationRecord>>> + Send;

    /// Appends records under `project_id`, returning how many were stored.
    ///
    /// # Errors
    ///
    /// Returns an error if a record key cannot be decoded or the write fails.
    fn append(
        &self,
        project_id: &str,
        records: &[InvocationRecord],
    ) -> impl Future<Output = anyhow::Result<u64>> + Send;
}

/// Record store backed by the `project_function_logs` table.
#[derive(Debug, Clone)]
pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl LogStore for PgLogStore {
    async fn recent_invocations(
        &self,
        project_id: &str,
        function_name: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<InvocationRecord>> {
        let key = function_log_key(project_id, function_name);
        let query = format!(
            "SELECT {FUNCTION_LOG_COLUMNS} FROM project_function_logs \
             WHERE project_id_function_name = $1 \
             ORDER BY invoked_at_ms DESC \
             LIMIT $2"
        );

        let rows = sqlx::query_as::<_, FunctionLogRow>(&query)
            .bind(&key)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query recent invocations of {key}"))?;

        debug!(key = %key, rows = rows.len(), "Fetched recent invocations");
        Ok(rows.into_iter().map(InvocationRecord::from).collect())
    }

    async fn project_invocations(&self, project_id: &str) -> anyhow::Result<Vec<InvocationRecord>> {
        let query = format!(
            "SELECT {FUNCTION_LOG_COLUMNS} FROM project_function_logs \
             WHERE project_id = $1 \
             ORDER BY function_name, invoked_at_ms"
        );

        let rows = sqlx::query_as::<_, FunctionLogRow>(&query)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to query invocations of project {project_id}"))?;

        Ok(rows.into_iter().map(InvocationRecord::from).collect())
    }

    async fn append(&self, project_id: &str, records: &[InvocationRecord]) -> anyhow::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            let invoked_at_ms = record.invoked_at_ms()?;
            let key = record
                .project_id_function_name
                .clone()
                .unwrap_or_else(|| function_log_key(project_id, &record.function_name));

            let result = sqlx::query(
                r"
                INSERT INTO project_function_logs (
                    id, project_id, function_name, project_id_function_name, last_invoked_at,
                    invoked_at_ms, init_duration, duration, max_memory_used, memory_size,
                    request_id, stream_name, function_arn, billed_duration, start_up_time
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                ON CONFLICT (project_id_function_name, last_invoked_at) DO NOTHING
                ",
            )
            .bind(&record.id)
            .bind(project_id)
            .bind(&record.function_name)
            .bind(&key)
            .bind(&record.last_invoked_at)
            .bind(invoked_at_ms)
            .bind(record.init_duration)
            .bind(record.duration)
            .bind(record.max_memory_used)
            .bind(record.memory_size)
            .bind(&record.request_id)
            .bind(&record.stream_name)
            .bind(&record.function_arn)
            .bind(record.billed_duration)
            .bind(record.start_up_time)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert invocation {}", record.last_invoked_at))?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

/// In-process record store.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    rows: Mutex<Vec<StoredRecord>>,
}

#[derive(Debug, Clone)]
struct StoredRecord {
    project_id: String,
    invoked_at_ms: i64,
    record: InvocationRecord,
}

impl MemoryLogStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> anyhow::Result<Vec<StoredRecord>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| anyhow::anyhow!("Log store lock poisoned"))?;
        Ok(rows.clone())
    }
}

impl LogStore for MemoryLogStore {
    async fn recent_invocations(
        &self,
        project_id: &str,
        function_name: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<InvocationRecord>> {
        let mut rows: Vec<StoredRecord> = self
            .snapshot()?
            .into_iter()
            .filter(|row| row.project_id == project_id && row.record.function_name == function_name)
            .collect();

        rows.sort_by(|a, b| b.invoked_at_ms.cmp(&a.invoked_at_ms));
        Ok(rows.into_iter().take(limit).map(|row| row.record).collect())
    }

    async fn project_invocations(&self, project_id: &str) -> anyhow::Result<Vec<InvocationRecord>> {
        let mut rows: Vec<StoredRecord> = self
            .snapshot()?
            .into_iter()
            .filter(|row| row.project_id == project_id)
            .collect();

        rows.sort_by(|a, b| {
            a.record
                .function_name
                .cmp(&b.record.function_name)
                .then(a.invoked_at_ms.cmp(&b.invoked_at_ms))
        });
        Ok(rows.into_iter().map(|row| row.record).collect())
    }

    async fn append(&self, project_id: &str, records: &[InvocationRecord]) -> anyhow::Result<u64> {
        let decoded = records
            .iter()
            .map(|record| {
                Ok(StoredRecord {
                    project_id: project_id.to_string(),
                    invoked_at_ms: record.invoked_at_ms()?,
                    record: record.clone(),
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let mut rows = self
            .rows
            .lock()
            .map_err(|_| anyhow::anyhow!("Log store lock poisoned"))?;
        let count = decoded.len() as u64;
        rows.extend(decoded);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(function_name: &str, millis: i64) -> InvocationRecord {
        InvocationRecord {
            function_name: function_name.to_string(),
            last_invoked_at: format!("log#{millis}"),
            init_duration: None,
            duration: 10.0,
            max_memory_used: 60.0,
            memory_size: 128.0,
            id: None,
            project_id: None,
            project_id_function_name: None,
            request_id: None,
            stream_name: None,
            function_arn: None,
            billed_duration: None,
            start_up_time: None,
        }
    }

    #[tokio::test]
    async fn test_recent_invocations_newest_first() {
        let store = MemoryLogStore::new();
        let records: Vec<_> = (0..5).map(|i| record("resize", i * 1000)).collect();
        assert_eq!(store.append("p1", &records).await.expect("append"), 5);
        store
            .append("p1", &[record("other", 10_000)])
            .await
            .expect("append");
        store
            .append("p2", &[record("resize", 20_000)])
            .await
            .expect("append");

        let recent = store
            .recent_invocations("p1", "resize", 3)
            .await
            .expect("query");
        let keys: Vec<&str> = recent.iter().map(|r| r.last_invoked_at.as_str()).collect();
        assert_eq!(keys, vec!["log#4000", "log#3000", "log#2000"]);
    }

    #[tokio::test]
    async fn test_project_invocations_ordered() {
        let store = MemoryLogStore::new();
        store
            .append(
                "p1",
                &[record("b", 2000), record("a", 3000), record("b", 1000)],
            )
            .await
            .expect("append");

        let all = store.project_invocations("p1").await.expect("query");
        let order: Vec<(&str, &str)> = all
            .iter()
            .map(|r| (r.function_name.as_str(), r.last_invoked_at.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![("a", "log#3000"), ("b", "log#1000"), ("b", "log#2000")]
        );

        assert!(store.project_invocations("missing").await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn test_append_rejects_undecodable_key() {
        let store = MemoryLogStore::new();
        let mut bad = record("a", 0);
        bad.last_invoked_at = String::from("no-timestamp");

        assert!(store.append("p1", &[record("a", 1), bad]).await.is_err());
        assert!(store.project_invocations("p1").await.expect("query").is_empty());
    }
}
