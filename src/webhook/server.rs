use crate::{
    errors::DecodeError,
    policy::{self, MutationPolicy, SkipReason},
    scheme::{Scheme, TypeMeta},
    sidecar::{build_patch, SidecarConfig},
    webhook::{
        apis::{AdmissionReview, Request, Response, Status},
        codec, Decision,
    },
};
use hyper::StatusCode;
use k8s_openapi::api::core::v1::Pod;
use std::str::FromStr;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Admission endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::IntoStaticStr)]
pub enum Route {
    #[strum(serialize = "/mutate")]
    Mutate,
    #[strum(serialize = "/validate")]
    Validate,
}

/// Transport-independent HTTP answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json(body: Vec<u8>) -> Self {
        Reply {
            status: StatusCode::OK,
            content_type: JSON_CONTENT_TYPE,
            body,
        }
    }

    pub fn error(status: StatusCode, message: &str) -> Self {
        Reply {
            status,
            content_type: TEXT_CONTENT_TYPE,
            body: message.as_bytes().to_vec(),
        }
    }
}

/// Admission workflow: request framing, routing and response assembly
pub struct Server {
    scheme: Scheme,
    sidecar: SidecarConfig,
    ignored_namespaces: Vec<String>,
}

impl Server {
    /// Returns a builder that can be used to configure the server
    pub fn builder(scheme: Scheme) -> ServerBuilder {
        ServerBuilder(Self {
            scheme,
            sidecar: SidecarConfig::default(),
            ignored_namespaces: policy::IGNORED_NAMESPACES
                .iter()
                .map(ToString::to_string)
                .collect(),
        })
    }

    /// Entrypoint for every inbound HTTP request.
    ///
    /// Transport preconditions are checked first; once the body decodes (or
    /// fails to) an admission review envelope is always returned.
    #[tracing::instrument(skip(self, content_type, body), fields(len = body.len()))]
    pub fn handle(&self, path: &str, content_type: Option<&str>, body: &[u8]) -> Reply {
        if body.is_empty() {
            tracing::error!("empty body");
            return Reply::error(StatusCode::BAD_REQUEST, "empty body");
        }

        let content_type = content_type.unwrap_or_default();
        if content_type != JSON_CONTENT_TYPE {
            tracing::error!(content_type, "unexpected Content-Type, expect application/json");
            return Reply::error(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "invalid Content-Type, expect `application/json`",
            );
        }

        let review = self.review(path, body);
        match codec::encode_review(&review) {
            Ok(bytes) => {
                tracing::info!("ready to write response");
                Reply::json(bytes)
            }
            Err(err) => {
                tracing::error!("can't encode response: {}", err);
                Reply::error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &format!("could not encode response: {}", err),
                )
            }
        }
    }

    /// Decodes the review, decides on it and assembles the outbound envelope
    pub fn review(&self, path: &str, body: &[u8]) -> AdmissionReview {
        let inbound = codec::decode_review(&self.scheme, body);
        let response = match &inbound {
            Err(err) => {
                tracing::error!("can't decode body: {}", err);
                Some(Response {
                    status: Some(Status {
                        code: None,
                        message: Some(err.to_string()),
                    }),
                    ..Default::default()
                })
            }
            Ok(review) => match (&review.request, Route::from_str(path)) {
                (Some(request), Ok(route)) => self.decide(route, request),
                (Some(_), Err(_)) => {
                    tracing::warn!(path, "no admission endpoint at path");
                    None
                }
                // decode_review guarantees a request
                (None, _) => None,
            },
        };

        let mut outbound = AdmissionReview {
            types: TypeMeta::admission_review(),
            request: None,
            response: None,
        };
        if let Ok(review) = &inbound {
            outbound.types = review.types.clone();
        }
        if let Some(mut response) = response {
            if let Ok(AdmissionReview {
                request: Some(request),
                ..
            }) = &inbound
            {
                response.uid = Some(request.uid.clone());
            }
            outbound.response = Some(response);
        }
        outbound
    }

    fn decide(&self, route: Route, request: &Request) -> Option<Response> {
        let route_name: &'static str = route.into();
        tracing::info!(
            route = route_name,
            uid = request.uid.as_str(),
            operation = request.operation.as_deref().unwrap_or_default(),
            "admission request"
        );
        let decision = match route {
            Route::Mutate => self.mutation(request),
            Route::Validate => self.validation(request),
        };
        match decision.into_response() {
            Ok(response) => Some(response),
            Err(err) => {
                tracing::error!("can't encode decision: {}", err);
                Some(Response {
                    status: Some(Status {
                        code: Some(500),
                        message: Some(err.to_string()),
                    }),
                    ..Default::default()
                })
            }
        }
    }

    /// Decodes the pod under review.
    ///
    /// `Ok(None)` means the object is of a kind this webhook does not handle.
    fn pod(&self, request: &Request) -> Result<Option<Pod>, DecodeError> {
        let types = match &request.kind {
            Some(gvk) => gvk.to_type_meta(),
            None => TypeMeta::peek(&request.object),
        };
        if !types.conforms_to(&TypeMeta::of::<Pod>()) {
            return Ok(None);
        }
        let mut pod: Pod = self.scheme.decode(&request.object)?;
        // objects under creation may not carry their namespace yet
        if pod.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
            pod.metadata.namespace = request.namespace.clone();
        }
        Ok(Some(pod))
    }

    fn unhandled(request: &Request) -> Decision {
        let kind = request
            .kind
            .as_ref()
            .map(|gvk| gvk.to_type_meta())
            .unwrap_or_else(|| TypeMeta::peek(&request.object));
        tracing::warn!(kind = %kind, "object kind is not handled, allowing unchanged");
        let mut decision = Decision::allow();
        decision.add_warning(&format!("lxcfs-webhook does not handle {}", kind));
        decision
    }

    /// Entrypoint for mutation requests
    pub fn mutation(&self, request: &Request) -> Decision {
        let pod = match self.pod(request) {
            Ok(Some(pod)) => pod,
            Ok(None) => return Self::unhandled(request),
            Err(err) => {
                tracing::error!("could not decode pod: {}", err);
                return Decision::reject_with_message(&err.to_string());
            }
        };

        if !policy::mutation_required(&self.ignored_namespaces, &pod.metadata) {
            return Decision::allow();
        }

        match build_patch(&pod, &self.sidecar) {
            Ok(patch) => {
                tracing::info!(operations = patch.0.len(), "injecting lxcfs sidecar");
                Decision::allow_with_patch(patch)
            }
            Err(err) => {
                tracing::error!("could not build patch: {}", err);
                Decision::reject_with_message(&format!("could not build patch: {}", err))
            }
        }
    }

    /// Entrypoint for validation requests.
    ///
    /// Pods claiming to be injected must actually carry the configured
    /// sidecar containers and volumes.
    pub fn validation(&self, request: &Request) -> Decision {
        let pod = match self.pod(request) {
            Ok(Some(pod)) => pod,
            Ok(None) => return Self::unhandled(request),
            Err(err) => {
                tracing::error!("could not decode pod: {}", err);
                return Decision::reject_with_message(&err.to_string());
            }
        };

        match policy::evaluate(&self.ignored_namespaces, &pod.metadata) {
            MutationPolicy::Skip(SkipReason::AlreadyInjected) => {}
            _ => return Decision::allow(),
        }

        let spec = pod.spec.as_ref();
        let containers = spec.map(|s| s.containers.as_slice()).unwrap_or_default();
        let volumes = spec.and_then(|s| s.volumes.as_deref()).unwrap_or_default();
        for sidecar in &self.sidecar.containers {
            if !containers.iter().any(|c| c.name == sidecar.name) {
                return Decision::reject_with_message(&format!(
                    "pod is annotated as injected but container {} is missing",
                    sidecar.name
                ));
            }
        }
        for volume in &self.sidecar.volumes {
            if !volumes.iter().any(|v| v.name == volume.name) {
                return Decision::reject_with_message(&format!(
                    "pod is annotated as injected but volume {} is missing",
                    volume.name
                ));
            }
        }
        Decision::allow()
    }
}

pub struct ServerBuilder(Server);

impl ServerBuilder {
    /// Sets what gets injected into eligible pods
    pub fn sidecar(&mut self, config: SidecarConfig) -> &mut Self {
        self.0.sidecar = config;
        self
    }

    /// Replaces the list of namespaces that are never mutated
    pub fn ignored_namespaces<I, S>(&mut self, namespaces: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.ignored_namespaces = namespaces.into_iter().map(Into::into).collect();
        self
    }

    /// Finishes construction, returning built Server instance.
    pub fn build(self) -> Server {
        self.0
    }
}
