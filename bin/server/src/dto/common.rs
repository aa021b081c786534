use serde::{Deserialize, Serialize};

/// Generic API acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResult {
    pub message: String,
    pub success: bool,
}

impl ApiResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
        }
    }
}
