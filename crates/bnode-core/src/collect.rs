//! Artifact collection from a build environment.

use std::{
    collections::HashSet,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use walkdir::WalkDir;

use bnode_model::ArtifactDescriptor;

use crate::env::BuildEnv;

/// Gathers every file under the output and log directories of `env`.
///
/// Runs whatever the build outcome was. Names are paths relative to their
/// directory; a log whose name clashes with an output file gets a `logs/`
/// prefix, then a numeric suffix if that is taken too. Unreadable files are
/// skipped with a warning.
pub async fn collect(env: &BuildEnv) -> Vec<ArtifactDescriptor> {
    let out_dir = env.out_dir();
    let log_dir = env.log_dir();

    let res = tokio::task::spawn_blocking(move || {
        let mut taken = HashSet::new();
        let mut artifacts = Vec::new();
        for (dir, prefix) in [(out_dir, ""), (log_dir, "logs/")] {
            for path in walk_files(&dir) {
                let name = unique_name(&taken, prefix, relative_name(&dir, &path));
                match describe(&path, &name) {
                    Ok(d) => {
                        taken.insert(name);
                        artifacts.push(d);
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable artifact"),
                }
            }
        }
        artifacts.sort_by(|a, b| a.name.cmp(&b.name));
        artifacts
    })
    .await;

    match res {
        Ok(artifacts) => {
            debug!(count = artifacts.len(), "artifacts collected");
            artifacts
        }
        Err(e) => {
            warn!(error = %e, "artifact collection task failed");
            Vec::new()
        }
    }
}

/// Patterns (relative to `out_dir`) that match no regular file.
pub fn missing_patterns(out_dir: &Path, patterns: &[String]) -> Vec<String> {
    let base = glob::Pattern::escape(&out_dir.to_string_lossy());
    patterns
        .iter()
        .filter(|pattern| {
            let full = format!("{base}/{}", pattern.trim_start_matches('/'));
            match glob::glob(&full) {
                Ok(mut entries) => !entries.any(|e| e.map(|p| p.is_file()).unwrap_or(false)),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "invalid expected artifact pattern");
                    true
                }
            }
        })
        .cloned()
        .collect()
}

fn describe(path: &Path, name: &str) -> io::Result<ArtifactDescriptor> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok(ArtifactDescriptor::new(
        path,
        name,
        size,
        hex::encode(hasher.finalize()),
    ))
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!(error = %e, "skipping unreadable path");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect()
}

/// `rel` if free, else `prefix` + `rel`, else the prefixed name with `.1`,
/// `.2`, ... inserted before the extension.
fn unique_name(taken: &HashSet<String>, prefix: &str, rel: String) -> String {
    if !taken.contains(&rel) {
        return rel;
    }
    let prefixed = format!("{prefix}{rel}");
    if !taken.contains(&prefixed) {
        return prefixed;
    }
    let (stem, ext) = match prefixed.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !stem.ends_with('/') && !ext.contains('/') => {
            (stem, Some(ext))
        }
        _ => (prefixed.as_str(), None),
    };
    let mut n = 1;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem}.{n}.{ext}"),
            None => format!("{stem}.{n}"),
        };
        if !taken.contains(&name) {
            return name;
        }
        n += 1;
    }
}

fn relative_name(dir: &Path, path: &Path) -> String {
    path.strip_prefix(dir)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use bnode_model::ArtifactKind;

    #[test]
    fn missing_patterns_reports_unmatched_globs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bash-5.1-1.el8.x86_64.rpm"), "rpm").unwrap();
        fs::create_dir(dir.path().join("bash-doc-dir.rpm")).unwrap();

        let missing = missing_patterns(
            dir.path(),
            &[
                "bash-*.x86_64.rpm".to_string(),
                "bash-doc-*.rpm".to_string(),
                "*.src.rpm".to_string(),
            ],
        );
        assert_eq!(missing, vec!["bash-doc-*.rpm", "*.src.rpm"]);
    }

    #[test]
    fn sha256_of_known_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        fs::write(&path, "hello").unwrap();

        let d = describe(&path, "hello.txt").unwrap();
        assert_eq!(d.size, 5);
        assert_eq!(
            d.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(d.kind, ArtifactKind::Log);
    }

    #[tokio::test]
    async fn collects_outputs_and_logs() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::env::EnvPool::open(dir.path(), Default::default())
            .await
            .unwrap();
        let lease = pool
            .acquire(&bnode_model::Platform::new("el8", "x86_64"))
            .await
            .unwrap();
        let env = lease.env();
        fs::create_dir_all(env.out_dir().join("sub")).unwrap();
        fs::write(env.out_dir().join("a.rpm"), "a").unwrap();
        fs::write(env.out_dir().join("sub/b.rpm"), "b").unwrap();
        fs::write(env.out_dir().join("build.log"), "out log").unwrap();
        fs::write(env.log_dir().join("build.log"), "task log").unwrap();

        let artifacts = collect(env).await;
        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a.rpm", "build.log", "logs/build.log", "sub/b.rpm"]);
        assert_eq!(artifacts[0].kind, ArtifactKind::Package);
        assert!(artifacts.iter().all(|a| a.sha256.len() == 64));
    }

    #[tokio::test]
    async fn clashing_log_names_stay_unique() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::env::EnvPool::open(dir.path(), Default::default())
            .await
            .unwrap();
        let lease = pool
            .acquire(&bnode_model::Platform::new("el8", "x86_64"))
            .await
            .unwrap();
        let env = lease.env();
        fs::create_dir_all(env.out_dir().join("logs")).unwrap();
        fs::write(env.out_dir().join("x.log"), "out").unwrap();
        fs::write(env.out_dir().join("logs/x.log"), "nested out").unwrap();
        fs::write(env.log_dir().join("x.log"), "task log").unwrap();

        let artifacts = collect(env).await;
        let names: Vec<&str> = artifacts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["logs/x.1.log", "logs/x.log", "x.log"]);
        let renamed = artifacts.iter().find(|a| a.name == "logs/x.1.log").unwrap();
        assert_eq!(renamed.size, "task log".len() as u64);
    }

    #[test]
    fn unique_name_without_extension() {
        let taken: HashSet<String> = ["build", "logs/build"].iter().map(|s| s.to_string()).collect();
        assert_eq!(unique_name(&taken, "logs/", "build".into()), "logs/build.1");
        assert_eq!(unique_name(&taken, "logs/", "other".into()), "other");
    }

    #[test]
    fn relative_names_use_forward_slashes() {
        let base = Path::new("/env/out");
        assert_eq!(relative_name(base, Path::new("/env/out/x86_64/a.rpm")), "x86_64/a.rpm");
    }
}
