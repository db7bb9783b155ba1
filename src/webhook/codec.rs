//! Bytes <-> [`AdmissionReview`] conversion

use super::apis::AdmissionReview;
use crate::{
    errors::{DecodeError, EncodeError},
    scheme::{Scheme, TypeMeta},
};

/// Longest excerpt of an offending document quoted in error messages
const EXCERPT_CHARS: usize = 256;

fn excerpt(raw: &serde_json::Value) -> String {
    let text = raw.to_string();
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text,
    }
}

/// Decodes an inbound review.
///
/// The envelope must name a kind registered in `scheme` and carry a request.
pub fn decode_review(scheme: &Scheme, body: &[u8]) -> Result<AdmissionReview, DecodeError> {
    let raw: serde_json::Value = serde_json::from_slice(body).map_err(DecodeError::Syntax)?;
    let types = TypeMeta::peek(&raw);
    if types.kind.is_empty() || types.api_version.is_empty() {
        return Err(DecodeError::MissingKind(excerpt(&raw)));
    }
    if !scheme.recognizes(&types) {
        return Err(DecodeError::Unregistered {
            api_version: types.api_version,
            kind: types.kind,
        });
    }
    let review: AdmissionReview = serde_json::from_value(raw).map_err(|source| DecodeError::Object {
        kind: types.kind,
        source,
    })?;
    if review.request.is_none() {
        return Err(DecodeError::MissingRequest);
    }
    Ok(review)
}

pub fn encode_review(review: &AdmissionReview) -> Result<Vec<u8>, EncodeError> {
    serde_json::to_vec(review).map_err(EncodeError::Review)
}
