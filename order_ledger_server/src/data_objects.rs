use serde::{Deserialize, Serialize};

/// The uniform body returned to webhook callers. Gateways retry anything
/// outside the 200 range, so even rejected payloads get a 200 with
/// `success: false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Into<String>>(message: S) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failure<S: Into<String>>(message: S) -> Self {
        Self { success: false, message: message.into() }
    }
}
