//! Registry of object kinds the webhook knows how to decode

use crate::errors::{DecodeError, SchemeError};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeSet;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_API_VERSION_V1BETA1: &str = "admission.k8s.io/v1beta1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";

/// apiVersion + kind pair, as found in every serialized object
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeMeta {
    #[serde(rename = "apiVersion", default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
}

impl TypeMeta {
    pub fn new(api_version: &str, kind: &str) -> Self {
        TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }
    }

    pub fn of<K: k8s_openapi::Resource>() -> Self {
        TypeMeta::new(K::API_VERSION, K::KIND)
    }

    pub fn admission_review() -> Self {
        TypeMeta::new(ADMISSION_API_VERSION, ADMISSION_REVIEW_KIND)
    }

    /// Whether every field set on `self` agrees with `other`.
    /// Empty fields match anything.
    pub fn conforms_to(&self, other: &TypeMeta) -> bool {
        (self.api_version.is_empty() || self.api_version == other.api_version)
            && (self.kind.is_empty() || self.kind == other.kind)
    }

    /// Reads apiVersion and kind of a raw object without decoding the rest
    pub fn peek(value: &serde_json::Value) -> Self {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        TypeMeta {
            api_version: field("apiVersion"),
            kind: field("kind"),
        }
    }
}

impl std::fmt::Display for TypeMeta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// Immutable set of recognized kinds.
///
/// Built once at startup through [`SchemeBuilder`]; shared read-only by all
/// request handlers afterwards.
#[derive(Debug, Clone)]
pub struct Scheme {
    kinds: BTreeSet<TypeMeta>,
}

impl Scheme {
    /// Returns a builder that can be used to register kinds
    pub fn builder() -> SchemeBuilder {
        SchemeBuilder(Scheme {
            kinds: BTreeSet::new(),
        })
    }

    /// Scheme with every kind the webhook serves: pods and both admission
    /// review versions.
    pub fn with_defaults() -> Result<Scheme, SchemeError> {
        let mut builder = Scheme::builder();
        builder
            .register::<Pod>()?
            .register_kind(ADMISSION_API_VERSION, ADMISSION_REVIEW_KIND)?
            .register_kind(ADMISSION_API_VERSION_V1BETA1, ADMISSION_REVIEW_KIND)?;
        Ok(builder.build())
    }

    pub fn recognizes(&self, types: &TypeMeta) -> bool {
        self.kinds.contains(types)
    }

    #[cfg(test)]
    fn kinds(&self) -> impl Iterator<Item = &TypeMeta> {
        self.kinds.iter()
    }

    /// Decodes an embedded object as `K`.
    ///
    /// `K` must be registered. Whatever part of apiVersion/kind the object
    /// names must match `K`; objects without type information are accepted.
    pub fn decode<K>(&self, value: &serde_json::Value) -> Result<K, DecodeError>
    where
        K: k8s_openapi::Resource + serde::de::DeserializeOwned,
    {
        let expected = TypeMeta::of::<K>();
        if !self.recognizes(&expected) {
            return Err(DecodeError::Unregistered {
                api_version: expected.api_version,
                kind: expected.kind,
            });
        }
        let found = TypeMeta::peek(value);
        if !found.conforms_to(&expected) {
            return Err(DecodeError::KindMismatch {
                expected: expected.to_string(),
                found: found.to_string(),
            });
        }
        serde_json::from_value(value.clone()).map_err(|source| DecodeError::Object {
            kind: expected.kind,
            source,
        })
    }
}

pub struct SchemeBuilder(Scheme);

impl SchemeBuilder {
    /// Registers a kind modelled by k8s-openapi
    pub fn register<K: k8s_openapi::Resource>(&mut self) -> Result<&mut Self, SchemeError> {
        self.register_kind(K::API_VERSION, K::KIND)
    }

    /// Registers a kind by name.
    /// Registering the same kind twice is a no-op.
    pub fn register_kind(&mut self, api_version: &str, kind: &str) -> Result<&mut Self, SchemeError> {
        let invalid = |reason| SchemeError::InvalidKind {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            reason,
        };
        if kind.is_empty() {
            return Err(invalid("kind is empty"));
        }
        let mut segments = api_version.split('/');
        let well_formed = match (segments.next(), segments.next(), segments.next()) {
            (Some(version), None, None) => !version.is_empty(),
            (Some(group), Some(version), None) => !group.is_empty() && !version.is_empty(),
            _ => false,
        };
        if !well_formed {
            return Err(invalid("apiVersion must look like `version` or `group/version`"));
        }
        if self.0.kinds.insert(TypeMeta::new(api_version, kind)) {
            tracing::debug!(api_version, kind, "registered kind");
        }
        Ok(self)
    }

    /// Finishes construction, returning the read-only scheme
    pub fn build(self) -> Scheme {
        self.0
    }
}
