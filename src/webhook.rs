use crate::errors::EncodeError;
use apis::Status;

pub mod apis;
pub mod codec;
pub mod server;

#[derive(Debug, Clone)]
pub struct Rejection(pub apis::Status);

enum Choice {
    Allow { patch: Option<json_patch::Patch> },
    Reject(Rejection),
}

/// High-level builder for webhook decisions
pub struct Decision(Choice, Vec<String>);

impl Decision {
    fn from_choice(choice: Choice) -> Self {
        Decision(choice, vec![])
    }

    pub fn allow() -> Self {
        Decision::from_choice(Choice::Allow { patch: None })
    }

    pub fn allow_with_patch(patch: json_patch::Patch) -> Self {
        Decision::from_choice(Choice::Allow { patch: Some(patch) })
    }

    pub fn reject_with_message(message: &str) -> Decision {
        Decision::from_choice(Choice::Reject(Rejection(Status {
            code: Some(400),
            message: Some(message.to_string()),
        })))
    }

    pub fn reject_with_status(status: Status) -> Decision {
        Decision::from_choice(Choice::Reject(Rejection(status)))
    }

    pub fn add_warning(&mut self, warn: &str) -> &mut Self {
        self.1.push(warn.to_string());
        self
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.0, Choice::Allow { .. })
    }

    /// Produces the response. Its uid is left unset; the dispatcher fills
    /// it from the request.
    pub fn into_response(self) -> Result<apis::Response, EncodeError> {
        let response = match self.0 {
            Choice::Allow { patch } => {
                let patch = patch
                    .map(|patch| apis::Patch::json_patch(&patch))
                    .transpose()
                    .map_err(EncodeError::Patch)?;
                apis::Response {
                    uid: None,
                    allowed: true,
                    status: None,
                    patch,
                    warnings: self.1,
                }
            }
            Choice::Reject(Rejection(status)) => apis::Response {
                uid: None,
                allowed: false,
                status: if status.is_empty() {
                    None
                } else {
                    Some(status)
                },
                patch: None,
                warnings: self.1,
            },
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use json_patch::{AddOperation, Patch, PatchOperation};
    use serde_json::json;

    #[test]
    fn allow_carries_base64_json_patch() {
        let patch = Patch(vec![PatchOperation::Add(AddOperation {
            path: "/metadata/annotations".to_string(),
            value: json!({"a": "b"}),
        })]);
        let response = Decision::allow_with_patch(patch).into_response().unwrap();
        assert!(response.allowed);
        let encoded = response.patch.unwrap();
        assert_eq!(encoded.patch_type, apis::PatchType::JsonPatch);
        let decoded: serde_json::Value =
            serde_json::from_slice(&base64::decode(&encoded.patch).unwrap()).unwrap();
        assert_eq!(
            decoded,
            json!([{"op": "add", "path": "/metadata/annotations", "value": {"a": "b"}}])
        );
    }

    #[test]
    fn rejection_keeps_message_and_warnings() {
        let mut decision = Decision::reject_with_message("nope");
        decision.add_warning("careful");
        assert!(!decision.is_allowed());
        let response = decision.into_response().unwrap();
        assert!(!response.allowed);
        assert!(response.patch.is_none());
        assert_eq!(response.status.unwrap().message.as_deref(), Some("nope"));
        assert_eq!(response.warnings, vec!["careful".to_string()]);
    }

    #[test]
    fn empty_status_is_dropped() {
        let response = Decision::reject_with_status(Status::default())
            .into_response()
            .unwrap();
        assert!(response.status.is_none());
    }

    #[test]
    fn plain_allow_serializes_minimally() {
        let response = Decision::allow().into_response().unwrap();
        assert_eq!(serde_json::to_value(&response).unwrap(), json!({"allowed": true}));
    }
}
