use hyper::StatusCode;
use lxcfs_webhook::{
    policy::{ANNOTATION_INJECT_KEY, ANNOTATION_STATUS_KEY},
    scheme::Scheme,
    sidecar::SidecarConfig,
    webhook::server::{Server, JSON_CONTENT_TYPE},
};
use serde_json::{json, Value};
use std::{path::Path, sync::Arc};

fn server() -> Server {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/sidecarconfig.yaml");
    let mut builder = Server::builder(Scheme::with_defaults().unwrap());
    builder.sidecar(SidecarConfig::load(&path).unwrap());
    builder.build()
}

fn pod(namespace: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": "web",
            "namespace": namespace,
            "annotations": {ANNOTATION_INJECT_KEY: "true"},
        },
        "spec": {
            "containers": [
                {"name": "app", "image": "nginx"},
                {"name": "metrics", "image": "exporter", "volumeMounts": [{"name": "tmp", "mountPath": "/tmp"}]},
            ],
            "volumes": [{"name": "tmp", "emptyDir": {}}],
        },
    })
}

fn review(uid: &str, object: &Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": uid,
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "namespace": object["metadata"]["namespace"],
            "operation": "CREATE",
            "object": object,
        },
    }))
    .unwrap()
}

fn admit(server: &Server, path: &str, body: &[u8]) -> Value {
    let reply = server.handle(path, Some(JSON_CONTENT_TYPE), body);
    assert_eq!(reply.status, StatusCode::OK);
    let review: Value = serde_json::from_slice(&reply.body).unwrap();
    review["response"].clone()
}

fn patch_of(response: &Value) -> Option<json_patch::Patch> {
    let encoded = response.get("patch")?.as_str()?;
    Some(serde_json::from_slice(&base64::decode(encoded).unwrap()).unwrap())
}

#[test]
fn injection_applies_and_second_admission_short_circuits() {
    let server = server();
    let uid = uuid::Uuid::new_v4().to_string();
    let original = pod("default");

    let response = admit(&server, "/mutate", &review(&uid, &original));
    assert_eq!(response["uid"], uid.as_str());
    assert_eq!(response["allowed"], true);
    let patch = patch_of(&response).expect("opted-in pod must be patched");

    let mut patched = original.clone();
    json_patch::patch(&mut patched, &patch).unwrap();
    assert_eq!(patched["metadata"]["annotations"][ANNOTATION_STATUS_KEY], "injected");
    assert_eq!(patched["metadata"]["annotations"][ANNOTATION_INJECT_KEY], "true");
    for container in patched["spec"]["containers"].as_array().unwrap() {
        let mounts = container["volumeMounts"].as_array().unwrap();
        assert!(mounts.iter().any(|m| m["mountPath"] == "/proc/meminfo"));
    }
    // seven lxcfs volumes next to the pod's own
    assert_eq!(patched["spec"]["volumes"].as_array().unwrap().len(), 8);

    let again = admit(&server, "/mutate", &review("second", &patched));
    assert_eq!(again["uid"], "second");
    assert_eq!(again["allowed"], true);
    assert!(patch_of(&again).is_none());

    let validated = admit(&server, "/validate", &review("third", &patched));
    assert_eq!(validated["allowed"], true);
    assert!(patch_of(&validated).is_none());
}

#[test]
fn patches_are_identical_across_retries() {
    let server = server();
    let object = pod("default");
    let first = admit(&server, "/mutate", &review("retry", &object));
    let second = admit(&server, "/mutate", &review("retry", &object));
    assert_eq!(first["patch"], second["patch"]);
}

#[test]
fn tampered_pod_fails_validation() {
    let server = server();
    let mut object = pod("default");
    object["metadata"]["annotations"][ANNOTATION_STATUS_KEY] = json!("Injected");
    let response = admit(&server, "/validate", &review("tampered", &object));
    assert_eq!(response["allowed"], false);
    assert!(response["status"]["message"]
        .as_str()
        .unwrap()
        .contains("lxcfs-proc-cpuinfo"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_keep_their_uids() {
    let server = Arc::new(server());
    let mut handles = Vec::new();
    for i in 0..32 {
        let server = server.clone();
        handles.push(tokio::spawn(async move {
            let uid = uuid::Uuid::new_v4().to_string();
            let namespace = if i % 2 == 0 { "default" } else { "kube-system" };
            let response = admit(&server, "/mutate", &review(&uid, &pod(namespace)));
            (uid, namespace, response)
        }));
    }
    for handle in handles {
        let (uid, namespace, response) = handle.await.unwrap();
        assert_eq!(response["uid"], uid.as_str());
        assert_eq!(patch_of(&response).is_some(), namespace == "default");
    }
}
