//! Build environment provisioning.
//!
//! Environments are directories under the pool root, one per
//! `(distro, arch)` instance. An idle environment for the requested key is
//! reused; otherwise a new one is created, evicting the oldest idle
//! environment of another key when the pool is at its cap. Every acquire
//! resets the root, so nothing written by a previous task survives.

pub mod fs;

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use tracing::{debug, info, trace, warn};

use bnode_model::{EnvKey, Platform};

use crate::{config::EnvSettings, error::EnvError};

const DIR_PREFIX: &str = "builder-";

/// One provisioned build environment.
#[derive(Debug, Clone)]
pub struct BuildEnv {
    key: EnvKey,
    root: PathBuf,
    index: u32,
    generation: u64,
}

impl BuildEnv {
    #[inline]
    pub fn key(&self) -> &EnvKey {
        &self.key
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Pool-wide instance number, part of the directory name.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Number of times this environment has been handed out.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Where the source is materialized.
    pub fn src_dir(&self) -> PathBuf {
        self.root.join("src")
    }

    /// Where the toolchain writes its results.
    pub fn out_dir(&self) -> PathBuf {
        self.root.join("out")
    }

    /// Task and toolchain logs.
    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }
}

/// Counters of the environment pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvStats {
    pub live: usize,
    pub in_use: usize,
    pub idle: usize,
}

struct IdleEnv {
    env: BuildEnv,
    since: Instant,
}

#[derive(Default)]
struct Slots {
    idle: HashMap<EnvKey, Vec<IdleEnv>>,
    live: usize,
    in_use: usize,
    next_index: u32,
}

struct Shared {
    root: PathBuf,
    settings: EnvSettings,
    slots: Mutex<Slots>,
}

impl Shared {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn give_back(&self, env: BuildEnv) {
        trace!(env = %env.root.display(), generation = env.generation, "environment released");
        let mut slots = self.slots();
        slots.in_use = slots.in_use.saturating_sub(1);
        slots.idle.entry(env.key.clone()).or_default().push(IdleEnv {
            env,
            since: Instant::now(),
        });
    }

    fn forget(&self) {
        let mut slots = self.slots();
        slots.in_use = slots.in_use.saturating_sub(1);
        slots.live = slots.live.saturating_sub(1);
    }
}

enum Reservation {
    Reuse(BuildEnv),
    Fresh {
        env: BuildEnv,
        evicted: Option<BuildEnv>,
    },
}

/// Pool of build environments keyed by `(distro, arch)`.
#[derive(Clone)]
pub struct EnvPool {
    inner: Arc<Shared>,
}

impl EnvPool {
    /// Opens the pool under `root`, removing environments left behind by a
    /// previous run.
    pub async fn open(root: impl Into<PathBuf>, settings: EnvSettings) -> Result<Self, EnvError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| EnvError::io(&root, e))?;

        let removed = remove_stale(&root).await?;
        if removed > 0 {
            info!(root = %root.display(), removed, "removed stale build environments");
        }

        Ok(Self {
            inner: Arc::new(Shared {
                root,
                settings,
                slots: Mutex::new(Slots::default()),
            }),
        })
    }

    /// Hands out a clean environment for `platform`.
    pub async fn acquire(&self, platform: &Platform) -> Result<EnvLease, EnvError> {
        let key = platform.env_key();
        let image = self.inner.settings.base_images.get(&platform.distro).cloned();
        if let Some(image) = &image
            && !tokio::fs::try_exists(image).await.unwrap_or(false)
        {
            return Err(EnvError::MissingBaseImage(image.clone()));
        }

        // The lease exists before the first await so a dropped caller still
        // returns the slot.
        let (mut env, evicted) = match self.reserve(&key)? {
            Reservation::Reuse(env) => (env, None),
            Reservation::Fresh { env, evicted } => (env, evicted),
        };
        env.generation += 1;
        let lease = EnvLease {
            env: Some(env),
            pool: Arc::clone(&self.inner),
        };

        if let Some(old) = evicted {
            debug!(env = %old.root.display(), "evicting idle environment");
            remove_detached(old.root).await;
        }
        if let Err(e) = reset(lease.env(), image).await {
            lease.discard().await;
            return Err(e);
        }
        debug!(env = %lease.env().root.display(), generation = lease.env().generation, "environment acquired");
        Ok(lease)
    }

    /// Returns the environment to the idle set. Same as dropping the lease.
    pub fn release(&self, lease: EnvLease) {
        drop(lease);
    }

    /// Destroys idle environments unused for longer than the idle ttl.
    pub async fn prune_idle(&self) -> usize {
        let ttl = self.inner.settings.idle_ttl();
        let expired: Vec<BuildEnv> = {
            let mut slots = self.inner.slots();
            let mut expired = Vec::new();
            for list in slots.idle.values_mut() {
                let (old, keep): (Vec<IdleEnv>, Vec<IdleEnv>) =
                    list.drain(..).partition(|i| i.since.elapsed() >= ttl);
                *list = keep;
                expired.extend(old.into_iter().map(|i| i.env));
            }
            slots.idle.retain(|_, list| !list.is_empty());
            slots.live = slots.live.saturating_sub(expired.len());
            expired
        };

        for env in &expired {
            remove_dir(&env.root).await;
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "pruned idle environments");
        }
        expired.len()
    }

    pub fn stats(&self) -> EnvStats {
        let slots = self.inner.slots();
        EnvStats {
            live: slots.live,
            in_use: slots.in_use,
            idle: slots.idle.values().map(Vec::len).sum(),
        }
    }

    fn reserve(&self, key: &EnvKey) -> Result<Reservation, EnvError> {
        let mut slots = self.inner.slots();

        if let Some(idle) = slots.idle.get_mut(key).and_then(Vec::pop) {
            slots.in_use += 1;
            return Ok(Reservation::Reuse(idle.env));
        }

        let evicted = if slots.live < self.inner.settings.max_environments {
            slots.live += 1;
            None
        } else {
            match take_oldest_idle(&mut slots) {
                Some(old) => Some(old),
                None => return Err(EnvError::Exhausted(slots.live)),
            }
        };

        slots.in_use += 1;
        let index = slots.next_index;
        slots.next_index += 1;
        let root = self
            .inner
            .root
            .join(format!("{DIR_PREFIX}{}-{index}", key.dir_name()));

        Ok(Reservation::Fresh {
            env: BuildEnv {
                key: key.clone(),
                root,
                index,
                generation: 0,
            },
            evicted,
        })
    }
}

fn take_oldest_idle(slots: &mut Slots) -> Option<BuildEnv> {
    let (key, pos) = slots
        .idle
        .iter()
        .flat_map(|(k, list)| list.iter().enumerate().map(move |(i, e)| (k, i, e.since)))
        .min_by_key(|(_, _, since)| *since)
        .map(|(k, i, _)| (k.clone(), i))?;

    let list = slots.idle.get_mut(&key)?;
    let old = list.remove(pos);
    if list.is_empty() {
        slots.idle.remove(&key);
    }
    Some(old.env)
}

/// Exclusive use of one environment; returned to the pool on drop.
pub struct EnvLease {
    env: Option<BuildEnv>,
    pool: Arc<Shared>,
}

impl EnvLease {
    pub fn env(&self) -> &BuildEnv {
        // `env` is only taken by `discard` and `drop`, both consuming the lease.
        self.env.as_ref().unwrap_or_else(|| unreachable!("lease without environment"))
    }

    /// Destroys the environment instead of returning it to the pool.
    pub async fn discard(mut self) {
        if let Some(env) = self.env.take() {
            self.pool.forget();
            remove_detached(env.root).await;
        }
    }
}

impl Drop for EnvLease {
    fn drop(&mut self) {
        if let Some(env) = self.env.take() {
            self.pool.give_back(env);
        }
    }
}

async fn reset(env: &BuildEnv, image: Option<PathBuf>) -> Result<(), EnvError> {
    let root = env.root.clone();
    let dirs = [env.src_dir(), env.out_dir(), env.log_dir()];
    tokio::task::spawn_blocking(move || {
        if root.exists() {
            fs::clear_dir(&root).map_err(|e| EnvError::io(&root, e))?;
        } else {
            std::fs::create_dir_all(&root).map_err(|e| EnvError::io(&root, e))?;
        }
        if let Some(image) = image {
            fs::copy_tree(&image, &root).map_err(|e| EnvError::io(&image, e))?;
        }
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(|e| EnvError::io(&dir, e))?;
        }
        Ok(())
    })
    .await
    .map_err(|e| EnvError::Io {
        path: env.root.clone(),
        reason: format!("reset task failed: {e}"),
    })?
}

async fn remove_stale(root: &Path) -> Result<usize, EnvError> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(|e| EnvError::io(root, e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| EnvError::io(root, e))?
    {
        if entry.file_name().to_string_lossy().starts_with(DIR_PREFIX) {
            remove_dir(&entry.path()).await;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Removes `path` on a separate task that finishes even if the caller is
/// dropped.
async fn remove_detached(path: PathBuf) {
    let task = tokio::spawn(async move { remove_dir(&path).await });
    if let Err(e) = task.await {
        warn!(error = %e, "environment removal task failed");
    }
}

async fn remove_dir(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "failed to remove environment directory");
    }
}
