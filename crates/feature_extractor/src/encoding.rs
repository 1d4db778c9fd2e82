//! One-hot encoding of function identity.

use serde::{Deserialize, Serialize};

/// Prefix of the one-hot column names.
pub const FUNCTION_COLUMN_PREFIX: &str = "function_";

/// The set and order of function columns seen at training time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct FunctionEncoding {
    /// Function names, sorted and unique.
    pub functions: Vec<String>,
}

impl FunctionEncoding {
    /// Fits the encoding on the given function names.
    pub fn fit<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut functions: Vec<String> = names.into_iter().map(str::to_string).collect();
        functions.sort_unstable();
        functions.dedup();
        Self { functions }
    }

    /// Number of one-hot columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.functions.len()
    }

    /// Column position of `function_name`, if it was seen at training time.
    #[must_use]
    pub fn index_of(&self, function_name: &str) -> Option<usize> {
        self.functions
            .binary_search_by(|known| known.as_str().cmp(function_name))
            .ok()
    }

    /// One-hot vector for `function_name`; all zeros for unseen functions.
    #[must_use]
    pub fn encode(&self, function_name: &str) -> Vec<f32> {
        let mut encoded = vec![0.0; self.width()];
        if let Some(index) = self.index_of(function_name) {
            encoded[index] = 1.0;
        }
        encoded
    }

    /// Names of the one-hot columns, in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.functions
            .iter()
            .map(|name| format!("{FUNCTION_COLUMN_PREFIX}{name}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_sorts_and_dedups() {
        let encoding = FunctionEncoding::fit(["resize", "auth", "resize", "billing"]);
        assert_eq!(encoding.functions, vec!["auth", "billing", "resize"]);
        assert_eq!(
            encoding.column_names(),
            vec!["function_auth", "function_billing", "function_resize"]
        );
    }

    #[test]
    fn test_encode_known_function() {
        let encoding = FunctionEncoding::fit(["resize", "auth"]);
        assert_eq!(encoding.encode("resize"), vec![0.0, 1.0]);
        assert_eq!(encoding.encode("auth"), vec![1.0, 0.0]);
    }

    #[test]
    fn test_unseen_function_is_all_zero() {
        let encoding = FunctionEncoding::fit(["resize", "auth"]);
        assert_eq!(encoding.encode("new-function"), vec![0.0, 0.0]);
        assert_eq!(encoding.index_of("new-function"), None);
    }
}
