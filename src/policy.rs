//! Decides whether a resource should get the lxcfs sidecar

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Set on pods that already went through injection
pub const ANNOTATION_STATUS_KEY: &str = "lxcfs-webhook.deepexi.com/status";
/// Opt-in switch set by users
pub const ANNOTATION_INJECT_KEY: &str = "lxcfs-webhook.deepexi.com/inject";
pub const STATUS_INJECTED: &str = "injected";

/// Namespaces that are never mutated
pub const IGNORED_NAMESPACES: [&str; 2] = ["kube-system", "kube-public"];

/// Why a resource is left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum SkipReason {
    IgnoredNamespace,
    AlreadyInjected,
    NotRequested,
}

/// Outcome of the mutation policy for one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationPolicy {
    Required,
    Skip(SkipReason),
}

impl MutationPolicy {
    pub fn is_required(self) -> bool {
        self == MutationPolicy::Required
    }
}

fn annotation<'a>(meta: &'a ObjectMeta, key: &str) -> &'a str {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
        .unwrap_or_default()
}

/// Whether the status annotation says the sidecar is already there
pub fn is_injected(meta: &ObjectMeta) -> bool {
    annotation(meta, ANNOTATION_STATUS_KEY).eq_ignore_ascii_case(STATUS_INJECTED)
}

fn wants_injection(meta: &ObjectMeta) -> bool {
    match annotation(meta, ANNOTATION_INJECT_KEY)
        .to_ascii_lowercase()
        .as_str()
    {
        "y" | "yes" | "true" | "on" => true,
        _ => false,
    }
}

/// Evaluates the policy.
///
/// Namespace exclusion wins over annotations; a pod marked as injected is
/// never mutated again; otherwise the inject annotation decides.
pub fn evaluate<S: AsRef<str>>(ignored_namespaces: &[S], meta: &ObjectMeta) -> MutationPolicy {
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let name = meta
        .name
        .as_deref()
        .or_else(|| meta.generate_name.as_deref())
        .unwrap_or_default();

    if ignored_namespaces.iter().any(|ns| ns.as_ref() == namespace) {
        tracing::info!(
            resource = name,
            namespace,
            "skipping mutation for resource in special namespace"
        );
        return MutationPolicy::Skip(SkipReason::IgnoredNamespace);
    }

    let policy = if is_injected(meta) {
        MutationPolicy::Skip(SkipReason::AlreadyInjected)
    } else if wants_injection(meta) {
        MutationPolicy::Required
    } else {
        MutationPolicy::Skip(SkipReason::NotRequested)
    };
    let reason: &'static str = match policy {
        MutationPolicy::Required => "",
        MutationPolicy::Skip(reason) => reason.into(),
    };
    tracing::info!(
        resource = name,
        namespace,
        required = policy.is_required(),
        reason,
        "mutation policy evaluated"
    );
    policy
}

/// Boolean form of [`evaluate`]
pub fn mutation_required<S: AsRef<str>>(ignored_namespaces: &[S], meta: &ObjectMeta) -> bool {
    evaluate(ignored_namespaces, meta).is_required()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn meta(namespace: &str, annotations: &[(&str, &str)]) -> ObjectMeta {
        ObjectMeta {
            name: Some("web".to_string()),
            namespace: Some(namespace.to_string()),
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                )
            },
            ..Default::default()
        }
    }

    #[test]
    fn ignored_namespaces_win_over_annotations() {
        for ns in &IGNORED_NAMESPACES {
            for inject in &["true", "yes", "on", "y", "no", ""] {
                let m = meta(ns, &[(ANNOTATION_INJECT_KEY, *inject)]);
                assert_eq!(
                    evaluate(&IGNORED_NAMESPACES, &m),
                    MutationPolicy::Skip(SkipReason::IgnoredNamespace)
                );
            }
        }
    }

    #[test]
    fn injected_status_blocks_mutation_in_any_case() {
        for status in &["injected", "Injected", "INJECTED", "inJeCted"] {
            let m = meta(
                "default",
                &[(ANNOTATION_STATUS_KEY, *status), (ANNOTATION_INJECT_KEY, "true")],
            );
            assert_eq!(
                evaluate(&IGNORED_NAMESPACES, &m),
                MutationPolicy::Skip(SkipReason::AlreadyInjected)
            );
        }
    }

    #[test]
    fn inject_annotation_accepts_truthy_values() {
        for value in &["y", "Y", "yes", "YES", "true", "True", "on", "ON"] {
            let m = meta("default", &[(ANNOTATION_INJECT_KEY, *value)]);
            assert!(mutation_required(&IGNORED_NAMESPACES, &m), "{}", value);
        }
        for value in &["", "n", "no", "false", "off", "1", "enabled", " true"] {
            let m = meta("default", &[(ANNOTATION_INJECT_KEY, *value)]);
            assert!(!mutation_required(&IGNORED_NAMESPACES, &m), "{:?}", value);
        }
    }

    #[test]
    fn other_status_values_fall_through_to_inject_annotation() {
        let m = meta(
            "default",
            &[(ANNOTATION_STATUS_KEY, "pending"), (ANNOTATION_INJECT_KEY, "on")],
        );
        assert!(mutation_required(&IGNORED_NAMESPACES, &m));
    }

    #[test]
    fn missing_annotations_mean_not_required() {
        let m = meta("default", &[]);
        assert_eq!(
            evaluate(&IGNORED_NAMESPACES, &m),
            MutationPolicy::Skip(SkipReason::NotRequested)
        );
        assert!(!mutation_required(&IGNORED_NAMESPACES, &ObjectMeta::default()));
    }

    #[test]
    fn custom_ignore_list_is_honored() {
        let ignored = vec!["monitoring".to_string()];
        let m = meta("monitoring", &[(ANNOTATION_INJECT_KEY, "true")]);
        assert!(!mutation_required(&ignored, &m));
        let m = meta("kube-system", &[(ANNOTATION_INJECT_KEY, "true")]);
        assert!(mutation_required(&ignored, &m));
    }

    #[test]
    fn skip_reasons_render_for_logs() {
        let reason: &'static str = SkipReason::AlreadyInjected.into();
        assert_eq!(reason, "already-injected");
    }
}
