// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// Public error body. The message is the only field ever serialized; the
/// underlying cause stays in the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal() -> Self {
        Self::new("internal server error")
    }

    #[must_use]
    pub fn upstream_timeout() -> Self {
        Self::new("upstream timed out")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_body_serializes_to_message_only() {
        let json = serde_json::to_value(ApiError::internal()).expect("serialize");
        assert_eq!(json, serde_json::json!({"message": "internal server error"}));
    }
}
