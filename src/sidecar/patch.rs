use super::SidecarConfig;
use crate::policy::{ANNOTATION_STATUS_KEY, STATUS_INJECTED};
use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use k8s_openapi::api::core::v1::Pod;
use serde::Serialize;
use std::collections::BTreeMap;

/// Escapes one reference token of a JSON pointer (RFC 6901)
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn add(path: String, value: serde_json::Value) -> PatchOperation {
    PatchOperation::Add(AddOperation { path, value })
}

/// Appends `items` to the list at `path`, which currently holds `existing`
/// elements. An absent or empty list is created by the first operation.
fn append<T: Serialize>(
    ops: &mut Vec<PatchOperation>,
    path: &str,
    existing: usize,
    items: &[&T],
) -> Result<(), serde_json::Error> {
    let mut first = existing == 0;
    for item in items {
        let value = serde_json::to_value(item)?;
        if first {
            first = false;
            ops.push(add(path.to_string(), serde_json::Value::Array(vec![value])));
        } else {
            ops.push(add(format!("{}/-", path), value));
        }
    }
    Ok(())
}

/// Builds the JSON patch injecting `config` into `pod` and marking it as
/// injected.
///
/// Items already present (containers and volumes by name, mounts by mount
/// path) are not added twice. The result only depends on the arguments.
pub fn build_patch(pod: &Pod, config: &SidecarConfig) -> Result<Patch, serde_json::Error> {
    let mut ops = Vec::new();
    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();
    let volumes = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_deref())
        .unwrap_or_default();

    let sidecars = config
        .containers
        .iter()
        .filter(|c| !containers.iter().any(|existing| existing.name == c.name))
        .collect::<Vec<_>>();
    append(&mut ops, "/spec/containers", containers.len(), &sidecars)?;

    for (idx, container) in containers.iter().enumerate() {
        let mounts = container.volume_mounts.as_deref().unwrap_or_default();
        let missing = config
            .volume_mounts
            .iter()
            .filter(|m| {
                let present = mounts.iter().any(|existing| existing.mount_path == m.mount_path);
                if present {
                    tracing::debug!(
                        container = container.name.as_str(),
                        mount_path = m.mount_path.as_str(),
                        "mount path already in use, not mounting"
                    );
                }
                !present
            })
            .collect::<Vec<_>>();
        let path = format!("/spec/containers/{}/volumeMounts", idx);
        append(&mut ops, &path, mounts.len(), &missing)?;
    }

    let new_volumes = config
        .volumes
        .iter()
        .filter(|v| !volumes.iter().any(|existing| existing.name == v.name))
        .collect::<Vec<_>>();
    append(&mut ops, "/spec/volumes", volumes.len(), &new_volumes)?;

    match pod.metadata.annotations.as_ref() {
        Some(annotations) if !annotations.is_empty() => {
            let path = format!(
                "/metadata/annotations/{}",
                escape_pointer_token(ANNOTATION_STATUS_KEY)
            );
            let value = serde_json::Value::String(STATUS_INJECTED.to_string());
            if annotations.contains_key(ANNOTATION_STATUS_KEY) {
                ops.push(PatchOperation::Replace(ReplaceOperation { path, value }));
            } else {
                ops.push(add(path, value));
            }
        }
        _ => {
            let mut annotations = BTreeMap::new();
            annotations.insert(ANNOTATION_STATUS_KEY, STATUS_INJECTED);
            ops.push(add(
                "/metadata/annotations".to_string(),
                serde_json::to_value(&annotations)?,
            ));
        }
    }

    Ok(Patch(ops))
}
