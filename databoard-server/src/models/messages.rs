//! Acknowledgement responses

use serde::{Deserialize, Serialize};

/// Plain acknowledgement, also used by the root and health routes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
