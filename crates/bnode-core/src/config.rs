use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::Deserialize;

use bnode_model::{BackendKind, RetryPolicy, TimeoutMs};

use crate::error::ConfigError;

/// Runtime configuration of a build node.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Stable node identity; the host name (or a random id) when unset.
    pub node_id: Option<String>,
    /// Root of environments, scratch files and task logs.
    pub work_dir: PathBuf,
    pub max_concurrent_builds: usize,

    pub poll_interval_ms: TimeoutMs,
    /// Upper bound of the random delay added to each idle poll.
    pub poll_jitter_ms: TimeoutMs,
    pub ping_interval_ms: TimeoutMs,

    pub timeouts: StageTimeouts,

    pub claim_retry: RetryPolicy,
    pub upload_retry: RetryPolicy,
    pub report_retry: RetryPolicy,
    pub upload_concurrency: usize,

    pub shutdown_grace_ms: TimeoutMs,
    pub force_grace_ms: TimeoutMs,

    /// While this file exists no new tasks are claimed.
    pub maintenance_file: Option<PathBuf>,
    /// Advertise the `src` pseudo-arch.
    pub build_src: bool,

    pub scheduler: EndpointConfig,
    pub artifact_store: EndpointConfig,
    pub environments: EnvSettings,

    pub toolchains: Vec<ToolchainSpec>,
    pub limits: ProcessLimits,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            work_dir: PathBuf::from("/var/lib/bnode"),
            max_concurrent_builds: 4,
            poll_interval_ms: 10_000,
            poll_jitter_ms: 2_000,
            ping_interval_ms: 30_000,
            timeouts: StageTimeouts::default(),
            claim_retry: RetryPolicy::default(),
            upload_retry: RetryPolicy::default(),
            report_retry: RetryPolicy::default(),
            upload_concurrency: 4,
            shutdown_grace_ms: 600_000,
            force_grace_ms: 30_000,
            maintenance_file: None,
            build_src: true,
            scheduler: EndpointConfig::default(),
            artifact_store: EndpointConfig::default(),
            environments: EnvSettings::default(),
            toolchains: vec![ToolchainSpec::rpm(), ToolchainSpec::deb()],
            limits: ProcessLimits::default(),
        }
    }
}

impl NodeConfig {
    /// Rejects configurations the pool cannot start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_builds == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.upload_concurrency == 0 {
            return Err(ConfigError::ZeroUploadConcurrency);
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(ConfigError::EmptyWorkDir);
        }
        if self.scheduler.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint("scheduler"));
        }
        if self.artifact_store.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint("artifact_store"));
        }
        if self.environments.max_environments < self.max_concurrent_builds {
            return Err(ConfigError::TooFewEnvironments {
                envs: self.environments.max_environments,
                builds: self.max_concurrent_builds,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[inline]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    #[inline]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    #[inline]
    pub fn force_grace(&self) -> Duration {
        Duration::from_millis(self.force_grace_ms)
    }

    /// Directory holding the build environments.
    pub fn env_root(&self) -> PathBuf {
        self.work_dir.join("envs")
    }
}

/// Maximum duration of each pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    pub provision_ms: TimeoutMs,
    pub source_prep_ms: TimeoutMs,
    /// Default compile limit; a task may override it.
    pub compile_ms: TimeoutMs,
    /// SIGTERM to SIGKILL escalation delay for a build process group.
    pub kill_grace_ms: TimeoutMs,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            provision_ms: 30 * 60_000,
            source_prep_ms: 30 * 60_000,
            compile_ms: 6 * 60 * 60_000,
            kill_grace_ms: 10_000,
        }
    }
}

impl StageTimeouts {
    #[inline]
    pub fn provision(&self) -> Duration {
        Duration::from_millis(self.provision_ms)
    }
    #[inline]
    pub fn source_prep(&self) -> Duration {
        Duration::from_millis(self.source_prep_ms)
    }
    #[inline]
    pub fn compile(&self) -> Duration {
        Duration::from_millis(self.compile_ms)
    }
    #[inline]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// Base url, credentials and per-request timeout of a remote service.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub timeout_ms: TimeoutMs,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            timeout_ms: 60_000,
        }
    }
}

impl EndpointConfig {
    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Build environment pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnvSettings {
    /// Upper bound of environments alive at once, idle ones included.
    pub max_environments: usize,
    /// Idle environments older than this are destroyed.
    pub idle_ttl_ms: TimeoutMs,
    /// Per-distro directory copied into each fresh environment root.
    pub base_images: HashMap<String, PathBuf>,
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self {
            max_environments: 16,
            idle_ttl_ms: 7_200_000,
            base_images: HashMap::new(),
        }
    }
}

impl EnvSettings {
    #[inline]
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }
}

/// External packaging tool used for one backend.
///
/// `args` may reference `{root}`, `{source}`, `{output}`, `{distro}` and
/// `{arch}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolchainSpec {
    pub backend: BackendKind,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Patterns required in the output directory when a task lists none.
    #[serde(default)]
    pub expected_artifacts: Vec<String>,
}

impl ToolchainSpec {
    pub fn rpm() -> Self {
        Self {
            backend: BackendKind::Rpm,
            program: "mock".into(),
            args: [
                "--root",
                "{distro}-{arch}",
                "--rootdir",
                "{root}/chroot",
                "--resultdir",
                "{output}",
                "--rebuild",
                "{source}",
            ]
            .map(String::from)
            .to_vec(),
            env: HashMap::new(),
            expected_artifacts: vec!["*.rpm".into()],
        }
    }

    pub fn deb() -> Self {
        Self {
            backend: BackendKind::Deb,
            program: "pdebuild".into(),
            args: ["--buildresult", "{output}", "--", "--basetgz", "{root}/base.tgz"]
                .map(String::from)
                .to_vec(),
            env: HashMap::new(),
            expected_artifacts: vec!["*.deb".into()],
        }
    }
}

/// rlimits applied to every build subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProcessLimits {
    pub max_open_files: Option<u64>,
    pub max_file_size_bytes: Option<u64>,
    pub disable_core_dumps: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> NodeConfig {
        let mut cfg = NodeConfig::default();
        cfg.scheduler.base_url = "https://build.example.org/api/v1/build_node".into();
        cfg.artifact_store.base_url = "https://artifacts.example.org".into();
        cfg
    }

    #[test]
    fn defaults_match_reference_node() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.max_concurrent_builds, 4);
        assert_eq!(cfg.upload_concurrency, 4);
        assert_eq!(cfg.claim_retry.max_attempts, 5);
        assert_eq!(cfg.scheduler.timeout_ms, 60_000);
        assert_eq!(cfg.toolchains.len(), 2);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(valid().validate().is_ok());

        let mut cfg = valid();
        cfg.max_concurrent_builds = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroConcurrency));

        let mut cfg = valid();
        cfg.scheduler.base_url = "  ".into();
        assert_eq!(cfg.validate(), Err(ConfigError::EmptyEndpoint("scheduler")));

        let mut cfg = valid();
        cfg.environments.max_environments = 2;
        assert!(matches!(cfg.validate(), Err(ConfigError::TooFewEnvironments { .. })));
    }

    #[test]
    fn parses_partial_toml() {
        let cfg: NodeConfig = toml::from_str(
            r#"
            max_concurrent_builds = 2
            maintenance_file = "/etc/bnode/maintenance"

            [scheduler]
            base_url = "https://sched"
            token = "secret"

            [claim_retry]
            max_attempts = 3
            backoff = { first_ms = 500, max_ms = 4000, factor = 2.0, jitter = "full" }

            [environments.base_images]
            el8 = "/srv/images/el8"

            [[toolchains]]
            backend = "rpm"
            program = "/usr/bin/mock"
            args = ["--rebuild", "{source}"]
            "#,
        )
        .unwrap();

        assert_eq!(cfg.max_concurrent_builds, 2);
        assert_eq!(cfg.scheduler.token.as_deref(), Some("secret"));
        assert_eq!(cfg.claim_retry.max_attempts, 3);
        assert_eq!(cfg.claim_retry.backoff.first_ms, 500);
        assert_eq!(cfg.upload_retry.max_attempts, 5);
        assert_eq!(cfg.toolchains.len(), 1);
        assert!(cfg.toolchains[0].expected_artifacts.is_empty());
        assert_eq!(
            cfg.environments.base_images.get("el8"),
            Some(&PathBuf::from("/srv/images/el8"))
        );
    }
}
