//! Mutating/validating admission webhook injecting lxcfs into pods
//!
//! Pods annotated with `lxcfs-webhook.deepexi.com/inject: "true"` receive the
//! volumes, mounts and containers from the sidecar configuration, and are
//! marked with `lxcfs-webhook.deepexi.com/status: injected`.

pub mod cli;
pub mod errors;
pub mod policy;
pub mod scheme;
pub mod serve;
pub mod sidecar;
pub mod webhook;
