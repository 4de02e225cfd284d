use std::{fs, path::Path};

/// Architecture of the running host.
#[inline]
pub fn arch() -> &'static str {
    std::env::consts::ARCH
}

/// Architectures this node can build for.
///
/// The base architecture, `i686` on `x86_64` hosts, and `src` when source
/// package builds are enabled.
pub fn supported_arches(base: &str, build_src: bool) -> Vec<String> {
    let mut arches = vec![base.to_string()];
    if base == "x86_64" {
        arches.push("i686".to_string());
    }
    if build_src {
        arches.push("src".to_string());
    }
    arches
}

/// Resolves the node identity.
///
/// An explicit id wins, then the host name, then a persisted random id kept
/// under `work_dir`.
pub fn node_id(configured: Option<&str>, work_dir: &Path) -> String {
    if let Some(id) = configured.map(str::trim).filter(|s| !s.is_empty()) {
        return id.to_string();
    }
    if let Ok(name) = hostname::get()
        && let Some(name) = name.to_str()
        && !name.is_empty()
    {
        return name.to_string();
    }
    load_or_generate_id(work_dir)
}

fn load_or_generate_id(work_dir: &Path) -> String {
    let path = work_dir.join("node-id");
    if let Ok(id) = fs::read_to_string(&path) {
        let id = id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let _ = fs::create_dir_all(work_dir).and_then(|_| fs::write(&path, &id));
    id
}

/// OS distribution name from `/etc/os-release`, best effort.
pub fn os_info() -> String {
    #[cfg(target_os = "linux")]
    {
        if let Ok(content) = fs::read_to_string("/etc/os-release") {
            for line in content.lines() {
                if let Some(name) = line.strip_prefix("PRETTY_NAME=") {
                    return name.trim_matches('"').to_string();
                }
            }
        }
    }

    std::env::consts::OS.to_string()
}
