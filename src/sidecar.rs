//! Sidecar configuration: what gets injected into eligible pods

mod patch;

pub use self::patch::{build_patch, escape_pointer_token};

use anyhow::Context as _;
use k8s_openapi::api::core::v1::{Container, Volume, VolumeMount};
use std::path::Path;

/// Content of the sidecar configuration file.
///
/// ```yaml
/// containers: []        # appended to the pod
/// volumeMounts:         # mounted into every container already in the pod
///   - name: lxcfs-proc-meminfo
///     mountPath: /proc/meminfo
/// volumes:              # appended to the pod
///   - name: lxcfs-proc-meminfo
///     hostPath:
///       path: /var/lib/lxcfs/proc/meminfo
/// ```
#[derive(serde::Serialize, serde::Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SidecarConfig {
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl SidecarConfig {
    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        let config: SidecarConfig =
            serde_yaml::from_str(data).context("sidecar configuration is malformed")?;
        config.check()?;
        Ok(config)
    }

    /// Reads configuration from a file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = Self::from_yaml(&data)
            .with_context(|| format!("failed to load sidecar configuration from {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            containers = config.containers.len(),
            volume_mounts = config.volume_mounts.len(),
            volumes = config.volumes.len(),
            "loaded sidecar configuration"
        );
        if config.is_empty() {
            tracing::warn!(path = %path.display(), "sidecar configuration is empty, pods will only be annotated");
        }
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        for mount in &self.volume_mounts {
            if !self.volumes.iter().any(|v| v.name == mount.name) {
                anyhow::bail!(
                    "volumeMount {} at {} refers to an undeclared volume",
                    mount.name,
                    mount.mount_path
                );
            }
        }
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.containers.is_empty() && self.volume_mounts.is_empty() && self.volumes.is_empty()
    }
}
