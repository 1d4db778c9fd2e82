use core::fmt;

use serde::{Deserialize, Serialize};

/// Project identifier as received from callers, which send either a string or a number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ProjectId {
    Number(i64),
    Text(String),
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for ProjectId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// Input of the inference entry point.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRequest {
    pub project_id: ProjectId,
    pub function_name: String,
}

/// JSON body of a prediction response.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PredictionBody {
    /// Predicted seconds until the next invocation, one per input window.
    pub data: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Output of the inference entry point.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResponse {
    pub status_code: u16,
    /// Serialized [`PredictionBody`].
    pub body: String,
}

impl PredictionResponse {
    /// Builds a response, serializing `body` to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be serialized (non-finite numbers serialize as null,
    /// so this only fails on allocator-level problems).
    pub fn new(status_code: u16, body: &PredictionBody) -> Result<Self, serde_json::Error> {
        Ok(Self {
            status_code,
            body: serde_json::to_string(body)?,
        })
    }

    /// Parses the JSON body back into a [`PredictionBody`].
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn parse_body(&self) -> Result<PredictionBody, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Estimated time of a function's next invocation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextInvocation {
    pub function_name: String,
    /// Epoch milliseconds, or `0` when no estimate is available.
    pub time_ms: i64,
}
