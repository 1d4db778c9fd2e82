use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ForecastError;

/// Separator between the parts of composite log keys.
pub const KEY_DELIMITER: char = '#';

/// One observed execution of a serverless function.
///
/// Field names follow the invocation log export (`camelCase`). Only the
/// function name, the invocation key and the four resource measurements feed
/// the model; everything else is bookkeeping carried through from the log.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRecord {
    pub function_name: String,

    /// Composite sort key whose last `#`-separated part is the epoch-ms invocation time.
    pub last_invoked_at: String,

    /// Init phase duration; absent on warm starts.
    #[serde(default)]
    pub init_duration: Option<f64>,

    pub duration: f64,

    pub max_memory_used: f64,

    pub memory_size: f64,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default, rename = "projectIdfunctionName")]
    pub project_id_function_name: Option<String>,

    #[serde(default)]
    pub request_id: Option<String>,

    #[serde(default)]
    pub stream_name: Option<String>,

    #[serde(default)]
    pub function_arn: Option<String>,

    #[serde(default)]
    pub billed_duration: Option<f64>,

    #[serde(default)]
    pub start_up_time: Option<i64>,
}

impl InvocationRecord {
    /// Decodes the invocation time (epoch milliseconds) from the composite key.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the key has no numeric suffix.
    pub fn invoked_at_ms(&self) -> Result<i64, ForecastError> {
        decode_invoked_at_ms(&self.last_invoked_at)
    }

    /// Decodes the invocation time as a UTC timestamp.
    ///
    /// # Errors
    ///
    /// Returns a schema error if the key cannot be decoded or is out of range.
    pub fn invoked_at(&self) -> Result<DateTime<Utc>, ForecastError> {
        let millis = self.invoked_at_ms()?;
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            ForecastError::schema(format!(
                "invocation time {millis} of `{}` is out of range",
                self.function_name
            ))
        })
    }
}

/// Decodes the numeric epoch-ms suffix of a composite `...#<millis>` key.
///
/// # Errors
///
/// Returns a schema error if the suffix is missing or not an integer.
pub fn decode_invoked_at_ms(key: &str) -> Result<i64, ForecastError> {
    let suffix = key.rsplit(KEY_DELIMITER).next().unwrap_or_default().trim();

    suffix.parse::<i64>().map_err(|_| {
        ForecastError::schema(format!(
            "invocation key `{key}` has no numeric timestamp suffix"
        ))
    })
}

/// Builds the `projectId#functionName` key of the log store's function index.
#[must_use]
pub fn function_log_key(project_id: &str, function_name: &str) -> String {
    format!("{project_id}{KEY_DELIMITER}{function_name}")
}
