//! Database model types.

use invocation_structs::InvocationRecord;

/// One row of `project_function_logs`.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FunctionLogRow {
    pub id: Option<String>,
    pub project_id: String,
    pub function_name: String,
    pub project_id_function_name: String,
    pub last_invoked_at: String,
    pub invoked_at_ms: i64,
    pub init_duration: Option<f64>,
    pub duration: f64,
    pub max_memory_used: f64,
    pub memory_size: f64,
    pub request_id: Option<String>,
    pub stream_name: Option<String>,
    pub function_arn: Option<String>,
    pub billed_duration: Option<f64>,
    pub start_up_time: Option<i64>,
}

impl From<FunctionLogRow> for InvocationRecord {
    fn from(row: FunctionLogRow) -> Self {
        Self {
            function_name: row.function_name,
            last_invoked_at: row.last_invoked_at,
            init_duration: row.init_duration,
            duration: row.duration,
            max_memory_used: row.max_memory_used,
            memory_size: row.memory_size,
            id: row.id,
            project_id: Some(row.project_id),
            project_id_function_name: Some(row.project_id_function_name),
            request_id: row.request_id,
            stream_name: row.stream_name,
            function_arn: row.function_arn,
            billed_duration: row.billed_duration,
            start_up_time: row.start_up_time,
        }
    }
}

/// Column list shared by every `SELECT` on `project_function_logs`.
pub(crate) const FUNCTION_LOG_COLUMNS: &str = "id, project_id, function_name, \
    project_id_function_name, last_invoked_at, invoked_at_ms, init_duration, duration, \
    max_memory_used, memory_size, request_id, stream_name, function_arn, billed_duration, \
    start_up_time";
