//! Low-level types

use crate::scheme::TypeMeta;

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Status {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Status {
    pub fn is_empty(&self) -> bool {
        self.code.is_none() && self.message.is_none()
    }
}

/// Envelope exchanged with the API server.
///
/// Inbound reviews carry a `request`, outbound ones a `response`.
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default)]
pub struct AdmissionReview {
    #[serde(flatten)]
    pub types: TypeMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<Request>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
}

impl GroupVersionKind {
    pub fn to_type_meta(&self) -> TypeMeta {
        let api_version = if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        };
        TypeMeta {
            api_version,
            kind: self.kind.clone(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default)]
pub struct Request {
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<GroupVersionKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default)]
    pub object: serde_json::Value,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default)]
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(flatten)]
    pub patch: Option<Patch>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, PartialEq)]
pub struct Patch {
    #[serde(rename = "patchType")]
    pub patch_type: PatchType,
    /// base64-encoded JSON patch
    pub patch: String,
}

impl Patch {
    pub fn json_patch(patch: &json_patch::Patch) -> Result<Self, serde_json::Error> {
        let patch = serde_json::to_string(patch)?;
        Ok(Patch {
            patch_type: PatchType::JsonPatch,
            patch: base64::encode(&patch),
        })
    }
}

#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    #[serde(rename = "JSONPatch")]
    JsonPatch,
}
