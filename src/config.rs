//! `minz.toml` project configuration (SPEC_FULL.md §10.1).
//!
//! Modeled on the teacher's `NeurlangConfig`/`ConfigError` split in
//! `config.rs`: a plain serde-derived struct for the on-disk shape, a
//! `thiserror` enum for the ways loading it can fail, and a
//! `find_and_load` helper that walks up from the current directory
//! looking for the project file, matching the teacher's own search for
//! `neurlang.toml`. Unlike the teacher, this crate's library entry point
//! (`compile()` in `lib.rs`) never reads a file itself — only
//! `Config::load`/`find_and_load`, which the `minzc` binary calls, touch
//! the filesystem.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("no minz.toml found in {0} or any parent directory")]
    NotFound(PathBuf),
}

/// Which optimizer passes run (§4.3). `purity` and `regpressure` are not
/// configurable here since the rest of the pipeline and the backend both
/// depend on their output unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationFlags {
    pub constant_folding: bool,
    pub ctie: bool,
    pub peephole: bool,
    pub djnz: bool,
    pub dead_code_elimination: bool,
}

impl Default for OptimizationFlags {
    fn default() -> Self {
        OptimizationFlags::all()
    }
}

impl OptimizationFlags {
    pub fn all() -> Self {
        OptimizationFlags {
            constant_folding: true,
            ctie: true,
            peephole: true,
            djnz: true,
            dead_code_elimination: true,
        }
    }

    pub fn none() -> Self {
        OptimizationFlags {
            constant_folding: false,
            ctie: false,
            peephole: false,
            djnz: false,
            dead_code_elimination: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    pub name: String,
    pub version: String,
}

impl Default for PackageConfig {
    fn default() -> Self {
        PackageConfig {
            name: "unnamed".to_string(),
            version: "0.1.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Name registered with the `Backend` trait implementors (§4.5).
    /// `"z80"` is the only backend this crate ships a full implementation
    /// for; other names are a valid driver-level choice this crate does
    /// not itself implement (spec.md §1's "other backends" out-of-scope
    /// note).
    pub target: String,
    pub output_dir: PathBuf,
    pub optimization: OptimizationFlags,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            target: "z80".to_string(),
            output_dir: PathBuf::from("build"),
            optimization: OptimizationFlags::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub package: PackageConfig,
    pub build: BuildConfig,
}

impl CompilerConfig {
    pub fn from_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Walks up from `start` looking for `minz.toml`, matching the
    /// teacher's `find_and_load` search for `neurlang.toml`.
    pub fn find_and_load(start: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut dir = start.as_ref().to_path_buf();
        loop {
            let candidate = dir.join("minz.toml");
            if candidate.is_file() {
                return Self::load(&candidate);
            }
            if !dir.pop() {
                return Err(ConfigError::NotFound(start.as_ref().to_path_buf()));
            }
        }
    }
}
