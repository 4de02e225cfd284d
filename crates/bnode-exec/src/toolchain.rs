//! Toolchains that drive an external packaging tool (mock, pdebuild, ...).

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, instrument};

use bnode_core::{
    CompileOutcome, PreparedSource, ProcessLimits, StageCtx, StageError, Toolchain, ToolchainRouter, ToolchainSpec,
    env::fs::copy_tree,
};
use bnode_model::{SourceRef, Task};

use crate::{
    fetch::Fetcher,
    limits::RlimitConfig,
    proc::{self, ProcConfig},
};

/// Runs the configured program for one backend.
///
/// Sources are materialized under the environment's `src/`: git checkouts
/// into `src/<repo>`, source packages downloaded as-is, blobs copied.
pub struct CommandToolchain {
    spec: ToolchainSpec,
    limits: RlimitConfig,
    fetcher: Fetcher,
    git: String,
}

impl CommandToolchain {
    pub fn new(spec: ToolchainSpec, limits: RlimitConfig, fetcher: Fetcher) -> Self {
        Self {
            spec,
            limits,
            fetcher,
            git: "git".into(),
        }
    }

    /// Overrides the git executable used for `git` sources.
    pub fn with_git(mut self, program: impl Into<String>) -> Self {
        self.git = program.into();
        self
    }

    fn build_command(&self, ctx: &StageCtx, source: &PreparedSource) -> ProcConfig {
        let vars = [
            ("root", ctx.env.root().display().to_string()),
            ("source", source.path.display().to_string()),
            ("output", ctx.env.out_dir().display().to_string()),
            ("distro", ctx.task.platform.distro.clone()),
            ("arch", ctx.task.platform.arch.clone()),
        ];
        let cwd = if source.path.is_dir() {
            source.path.clone()
        } else {
            ctx.env.src_dir()
        };

        let mut env: Vec<(String, String)> = self
            .spec
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand(v, &vars)))
            .collect();
        env.sort();

        ProcConfig {
            program: expand(&self.spec.program, &vars),
            args: self.spec.args.iter().map(|a| expand(a, &vars)).collect(),
            env,
            cwd: Some(cwd),
            limits: self.limits.clone(),
        }
    }

    async fn checkout(&self, ctx: &StageCtx, url: &str, git_ref: &str) -> Result<PreparedSource, StageError> {
        if git_ref.starts_with('-') {
            return Err(StageError::Source(format!("invalid git ref {git_ref:?}")));
        }
        let dir = ctx.env.src_dir().join(repo_name(url));
        let target = dir.display().to_string();

        // `--` keeps a url starting with `-` from being read as an option
        let clone = ProcConfig::new(&self.git)
            .args(["clone", "--quiet", "--", url, target.as_str()])
            .limits(self.limits.clone());
        proc::run_checked(&clone, &ctx.cancel, ctx.kill_grace, &ctx.log).await?;

        let checkout = ProcConfig::new(&self.git)
            .args(["-c", "advice.detachedHead=false", "checkout", "--quiet", git_ref])
            .cwd(&dir)
            .limits(self.limits.clone());
        proc::run_checked(&checkout, &ctx.cancel, ctx.kill_grace, &ctx.log).await?;

        Ok(PreparedSource { path: dir })
    }

    async fn copy_blob(&self, ctx: &StageCtx, path: &Path) -> Result<PreparedSource, StageError> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(StageError::Source(format!("{} does not exist", path.display())));
        }
        let name = path
            .file_name()
            .ok_or_else(|| StageError::Source(format!("{} has no file name", path.display())))?;
        let dest = ctx.env.src_dir().join(name);

        let (from, to) = (path.to_path_buf(), dest.clone());
        tokio::task::spawn_blocking(move || {
            if from.is_dir() {
                copy_tree(&from, &to)
            } else {
                std::fs::copy(&from, &to).map(|_| ())
            }
        })
        .await
        .map_err(|e| StageError::Io(e.to_string()))??;

        Ok(PreparedSource { path: dest })
    }
}

#[async_trait]
impl Toolchain for CommandToolchain {
    fn name(&self) -> &'static str {
        self.spec.backend.as_str()
    }

    fn supports(&self, task: &Task) -> bool {
        task.backend == self.spec.backend
    }

    #[instrument(level = "debug", skip_all, fields(task = %ctx.task.id, source = ctx.task.source.kind()))]
    async fn prepare_source(&self, ctx: &StageCtx) -> Result<PreparedSource, StageError> {
        let prepared = match &ctx.task.source {
            SourceRef::Git { url, git_ref } => self.checkout(ctx, url, git_ref).await?,
            SourceRef::SrcPackage { url } => PreparedSource {
                path: self.fetcher.download(url, &ctx.env.src_dir(), &ctx.cancel).await?,
            },
            SourceRef::Blob { path } => self.copy_blob(ctx, path).await?,
        };
        ctx.log
            .line(format!("source ready at {}", prepared.path.display()))
            .await;
        Ok(prepared)
    }

    #[instrument(level = "debug", skip_all, fields(task = %ctx.task.id, program = %self.spec.program))]
    async fn compile(&self, ctx: &StageCtx, source: &PreparedSource) -> Result<CompileOutcome, StageError> {
        let cmd = self.build_command(ctx, source);
        let outcome = proc::run(&cmd, &ctx.cancel, ctx.kill_grace, &ctx.log).await?;
        debug!(?outcome, "builder finished");
        Ok(outcome)
    }

    fn expected_artifacts(&self, _task: &Task) -> Vec<String> {
        self.spec.expected_artifacts.clone()
    }
}

/// Router with one [`CommandToolchain`] per configured backend.
pub fn router(specs: &[ToolchainSpec], limits: &ProcessLimits, fetcher: &Fetcher) -> ToolchainRouter {
    let limits = RlimitConfig::from(limits);
    specs.iter().fold(ToolchainRouter::new(), |router, spec| {
        router.with(Arc::new(CommandToolchain::new(
            spec.clone(),
            limits.clone(),
            fetcher.clone(),
        )))
    })
}

/// Substitutes `{name}` placeholders; unknown ones are left untouched.
pub fn expand(template: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

fn repo_name(url: &str) -> String {
    let last = url.trim_end_matches('/').rsplit(['/', ':']).next().unwrap_or_default();
    let name = last.strip_suffix(".git").unwrap_or(last);
    if name.is_empty() {
        "checkout".into()
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bnode_core::{EnvPool, TaskLog};
    use bnode_model::{BackendKind, Platform, TaskId};
    use std::{collections::HashMap, time::{Duration, SystemTime}};
    use tokio_util::sync::CancellationToken;

    fn task(source: SourceRef, backend: BackendKind) -> Arc<Task> {
        Arc::new(Task {
            id: TaskId::from("42"),
            platform: Platform::new("el9", "aarch64"),
            source,
            expected_artifacts: Vec::new(),
            backend,
            timeout_ms: None,
            created_at: SystemTime::UNIX_EPOCH,
        })
    }

    fn toolchain(spec: ToolchainSpec) -> CommandToolchain {
        CommandToolchain::new(spec, RlimitConfig::default(), Fetcher::new(Duration::from_secs(5)).unwrap())
    }

    async fn with_ctx<F, Fut>(task: Arc<Task>, f: F)
    where
        F: FnOnce(StageCtx) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let dir = tempfile::tempdir().unwrap();
        let pool = EnvPool::open(dir.path(), Default::default()).await.unwrap();
        let lease = pool.acquire(&task.platform).await.unwrap();
        let ctx = StageCtx {
            task,
            env: lease.env().clone(),
            cancel: CancellationToken::new(),
            log: TaskLog::disabled(),
            kill_grace: Duration::from_millis(100),
        };
        f(ctx).await;
    }

    #[test]
    fn placeholders_are_expanded() {
        let vars = [("root", "/envs/b-1".to_string()), ("arch", "x86_64".to_string())];
        assert_eq!(expand("{root}/chroot", &vars), "/envs/b-1/chroot");
        assert_eq!(expand("el8-{arch}-{arch}", &vars), "el8-x86_64-x86_64");
        assert_eq!(expand("{unknown}", &vars), "{unknown}");
    }

    #[test]
    fn repo_names() {
        assert_eq!(repo_name("https://git.example.org/rpms/bash.git"), "bash");
        assert_eq!(repo_name("git@git.example.org:rpms/bash"), "bash");
        assert_eq!(repo_name("https://git.example.org/"), "git.example.org");
        assert_eq!(repo_name(""), "checkout");
    }

    #[test]
    fn routes_by_backend() {
        let fetcher = Fetcher::new(Duration::from_secs(1)).unwrap();
        let router = router(&[ToolchainSpec::rpm(), ToolchainSpec::deb()], &ProcessLimits::default(), &fetcher);
        let deb = task(SourceRef::SrcPackage { url: "https://x/a.dsc".into() }, BackendKind::Deb);
        assert_eq!(router.pick(&deb).map(|t| t.name()), Some("deb"));
    }

    #[tokio::test]
    async fn blob_directory_is_copied_into_src() {
        let blob = tempfile::tempdir().unwrap();
        let pkg = blob.path().join("hello");
        std::fs::create_dir_all(pkg.join("debian")).unwrap();
        std::fs::write(pkg.join("debian/control"), "Source: hello\n").unwrap();

        let t = task(SourceRef::Blob { path: pkg }, BackendKind::Deb);
        with_ctx(t, |ctx| async move {
            let tc = toolchain(ToolchainSpec::deb());
            let prepared = tc.prepare_source(&ctx).await.unwrap();
            assert_eq!(prepared.path, ctx.env.src_dir().join("hello"));
            assert!(prepared.path.join("debian/control").is_file());
        })
        .await;
    }

    #[tokio::test]
    async fn missing_blob_is_a_source_error() {
        let t = task(SourceRef::Blob { path: "/nonexistent/bash.src.rpm".into() }, BackendKind::Rpm);
        with_ctx(t, |ctx| async move {
            let err = toolchain(ToolchainSpec::rpm()).prepare_source(&ctx).await.unwrap_err();
            assert!(matches!(err, StageError::Source(_)));
        })
        .await;
    }

    /// Stand-in for git that records its arguments and creates the clone target.
    #[cfg(unix)]
    fn fake_git(dir: &Path) -> (String, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let calls = dir.join("calls");
        let script = dir.join("git");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nprintf '%s\\n' \"$*\" >> {calls}\nif [ \"$1\" = clone ]; then for last; do :; done; mkdir -p \"$last\"; fi\n",
                calls = calls.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script.display().to_string(), calls)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn git_url_is_never_read_as_an_option() {
        let bin = tempfile::tempdir().unwrap();
        let (git, calls) = fake_git(bin.path());

        let source = SourceRef::Git {
            url: "--upload-pack=touch /tmp/pwned".into(),
            git_ref: "c0ffee".into(),
        };
        with_ctx(task(source, BackendKind::Rpm), |ctx| async move {
            let tc = toolchain(ToolchainSpec::rpm()).with_git(git);
            let prepared = tc.prepare_source(&ctx).await.unwrap();
            assert!(prepared.path.starts_with(ctx.env.src_dir()));

            let calls = std::fs::read_to_string(&calls).unwrap();
            let clone = calls.lines().next().unwrap();
            assert!(clone.starts_with("clone --quiet -- --upload-pack=touch /tmp/pwned "), "{clone}");
            assert_eq!(calls.lines().nth(1), Some("-c advice.detachedHead=false checkout --quiet c0ffee"));
        })
        .await;
    }

    #[tokio::test]
    async fn git_ref_starting_with_dash_is_rejected() {
        let source = SourceRef::Git {
            url: "https://git.example.org/rpms/bash.git".into(),
            git_ref: "--orphan=x".into(),
        };
        with_ctx(task(source, BackendKind::Rpm), |ctx| async move {
            let tc = toolchain(ToolchainSpec::rpm()).with_git("/nonexistent/git");
            let err = tc.prepare_source(&ctx).await.unwrap_err();
            assert!(matches!(err, StageError::Source(_)));
        })
        .await;
    }

    #[tokio::test]
    async fn compile_runs_with_expanded_arguments() {
        let blob = tempfile::tempdir().unwrap();
        let srpm = blob.path().join("bash-5.1-1.src.rpm");
        std::fs::write(&srpm, "srpm").unwrap();

        let spec = ToolchainSpec {
            backend: BackendKind::Rpm,
            program: "sh".into(),
            args: vec![
                "-c".into(),
                "test -f \"$1\" && echo \"$BUILD_TARGET\" > {output}/target.txt".into(),
                "sh".into(),
                "{source}".into(),
            ],
            env: HashMap::from([("BUILD_TARGET".to_string(), "{distro}-{arch}".to_string())]),
            expected_artifacts: vec!["*.rpm".into()],
        };

        let t = task(SourceRef::Blob { path: srpm }, BackendKind::Rpm);
        with_ctx(t, |ctx| async move {
            let tc = toolchain(spec);
            let source = tc.prepare_source(&ctx).await.unwrap();
            let outcome = tc.compile(&ctx, &source).await.unwrap();

            assert_eq!(outcome, CompileOutcome::Exited(0));
            let target = std::fs::read_to_string(ctx.env.out_dir().join("target.txt")).unwrap();
            assert_eq!(target.trim(), "el9-aarch64");
            assert_eq!(tc.expected_artifacts(&ctx.task), vec!["*.rpm".to_string()]);
        })
        .await;
    }
}
