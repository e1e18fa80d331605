use serde::Serialize;

use crate::error::{DispatchError, FailureKind};
use crate::transaction::Assignment;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureBody {
    pub kind: String,
    pub message: String,
}

/// Boundary shape of one dispatch attempt:
/// `{ "success": true, "data": {...} }` or
/// `{ "success": false, "error": { "kind": ..., "message": ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Assignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureBody>,
    #[serde(skip)]
    status: u16,
}

impl DispatchResponse {
    pub fn ok(assignment: Assignment) -> Self {
        Self {
            success: true,
            data: Some(assignment),
            error: None,
            status: 200,
        }
    }

    pub fn failed(err: &DispatchError) -> Self {
        let kind = err.kind();
        // Internal details stay in the logs.
        let message = match kind {
            FailureKind::InternalError => "internal error".to_string(),
            _ => err.to_string(),
        };
        Self {
            success: false,
            data: None,
            error: Some(FailureBody {
                kind: kind.as_str().to_string(),
                message,
            }),
            status: kind.status_code(),
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl From<Result<Assignment, DispatchError>> for DispatchResponse {
    fn from(res: Result<Assignment, DispatchError>) -> Self {
        match res {
            Ok(a) => DispatchResponse::ok(a),
            Err(e) => DispatchResponse::failed(&e),
        }
    }
}
