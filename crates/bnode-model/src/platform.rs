use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

/// Build target: distribution plus architecture (e.g. `el8` / `x86_64`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    pub distro: String,
    pub arch: String,
}

impl Platform {
    pub fn new(distro: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            distro: distro.into(),
            arch: arch.into(),
        }
    }

    /// Key of the build environment pool this platform maps to.
    #[inline]
    pub fn env_key(&self) -> EnvKey {
        EnvKey(self.clone())
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.distro, self.arch)
    }
}

impl FromStr for Platform {
    type Err = ModelError;

    /// Parses `distro/arch`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (distro, arch) = s
            .split_once('/')
            .ok_or_else(|| ModelError::InvalidPlatform(s.to_string()))?;
        let (distro, arch) = (distro.trim(), arch.trim());
        if distro.is_empty() || arch.is_empty() || arch.contains('/') {
            return Err(ModelError::InvalidPlatform(s.to_string()));
        }
        Ok(Platform::new(distro, arch))
    }
}

/// Identity of a reusable build environment.
///
/// Two tasks with equal keys may run (one after the other) in the same environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnvKey(Platform);

impl EnvKey {
    #[inline]
    pub fn platform(&self) -> &Platform {
        &self.0
    }

    /// Filesystem-safe form used for environment directory names.
    pub fn dir_name(&self) -> String {
        let clean = |s: &str| -> String {
            s.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        format!("{}-{}", clean(&self.0.distro), clean(&self.0.arch))
    }
}

impl fmt::Display for EnvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_platform() {
        let p: Platform = "el8/x86_64".parse().unwrap();
        assert_eq!(p, Platform::new("el8", "x86_64"));
        assert!("el8".parse::<Platform>().is_err());
        assert!("/x86_64".parse::<Platform>().is_err());
        assert!("a/b/c".parse::<Platform>().is_err());
    }

    #[test]
    fn env_key_dir_name_is_path_safe() {
        let key = Platform::new("debian bookworm", "arm/v7").env_key();
        assert_eq!(key.dir_name(), "debian_bookworm-arm_v7");
        assert_eq!(
            Platform::new("el8", "x86_64").env_key().dir_name(),
            "el8-x86_64"
        );
    }
}
