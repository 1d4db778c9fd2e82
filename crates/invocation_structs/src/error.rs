use thiserror::Error;

/// Failure kinds of the forecasting pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForecastError {
    /// No trained bundle exists under the project's model prefix.
    #[error("no model artifact found under `{prefix}`")]
    ArtifactNotFound { prefix: String },

    /// An input record or stored artifact does not have the expected shape.
    #[error("schema error: {0}")]
    Schema(String),

    /// A function has too few usable records to form a single window.
    #[error(
        "insufficient history for `{function_name}`: {available} usable records, {required} required"
    )]
    InsufficientHistory {
        function_name: String,
        available: usize,
        required: usize,
    },

    /// The model bundle carries no function encoding.
    #[error("model bundle has no function encoding")]
    EncodingMissing,
}

impl ForecastError {
    /// Convenience constructor for schema errors.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ForecastError::ArtifactNotFound {
            prefix: String::from("7/model"),
        };
        assert_eq!(err.to_string(), "no model artifact found under `7/model`");

        let err = ForecastError::InsufficientHistory {
            function_name: String::from("resize"),
            available: 5,
            required: 11,
        };
        assert!(err.to_string().contains("5 usable records, 11 required"));

        assert_eq!(
            ForecastError::schema("missing duration").to_string(),
            "schema error: missing duration"
        );
    }
}
