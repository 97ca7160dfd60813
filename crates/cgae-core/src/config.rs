//! Path configuration.
//!
//! Resolves where datasets are read from and where run records are written:
//! 1. CLI arguments (highest priority)
//! 2. Environment variables (`CGAE_DATA_DIR`, `CGAE_OUTPUT_DIR`, `CGAE_BASE_DIR`)
//! 3. Default system directories
//!
//! # Example
//!
//! ```
//! use cgae_core::config::PathConfig;
//!
//! let config = PathConfig::builder()
//!     .base_dir("/tmp/cgae")
//!     .build();
//! assert!(config.output_dir().ends_with("output"));
//! ```

use clap::Args;
use directories::ProjectDirs;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// CLI arguments for path configuration, meant to be flattened into a parser.
#[derive(Args, Debug, Clone, Default)]
pub struct PathArgs {
    /// Data directory for datasets and pretrained checkpoints
    #[arg(long, env = "CGAE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Output directory for run records and decoder parameters
    #[arg(long, env = "CGAE_OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    /// Base directory for all files (overrides individual defaults)
    #[arg(long, env = "CGAE_BASE_DIR")]
    pub base_dir: Option<PathBuf>,
}

/// Resolved directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathConfig {
    data_dir: PathBuf,
    output_dir: PathBuf,
}

impl PathConfig {
    /// Resolve from parsed arguments: CLI > env > base dir > defaults.
    pub fn from_path_args(args: PathArgs) -> Self {
        let base_dir = args
            .base_dir
            .or_else(|| env::var("CGAE_BASE_DIR").ok().map(PathBuf::from));
        let (data_default, output_default) = Self::default_dirs();

        let data_dir = args
            .data_dir
            .or_else(|| base_dir.as_ref().map(|b| b.join("data")))
            .unwrap_or(data_default);
        let output_dir = args
            .output_dir
            .or_else(|| base_dir.as_ref().map(|b| b.join("output")))
            .unwrap_or(output_default);

        PathConfig {
            data_dir,
            output_dir,
        }
    }

    pub fn builder() -> PathConfigBuilder {
        PathConfigBuilder::default()
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Resolve a possibly relative data file against the data directory.
    pub fn data_file(&self, path: &Path) -> PathBuf {
        if path.is_absolute() || path.exists() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }

    /// Location of the JSON run record for `run_name`.
    pub fn run_record(&self, run_name: &str) -> PathBuf {
        self.output_dir.join(format!("{run_name}.json"))
    }

    /// Location of the saved decoder parameters for `run_name` (the recorder
    /// appends its own extension).
    pub fn decoder_state(&self, run_name: &str) -> PathBuf {
        self.output_dir.join(format!("{run_name}-decoder"))
    }

    /// Ensure all directories exist, creating them if necessary
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir)?;
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    fn default_dirs() -> (PathBuf, PathBuf) {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "cgae") {
            (
                proj_dirs.data_dir().to_path_buf(),
                proj_dirs.data_dir().join("output"),
            )
        } else {
            let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            (cwd.join(".cgae/data"), cwd.join("output"))
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let (data_dir, output_dir) = Self::default_dirs();
        PathConfig {
            data_dir,
            output_dir,
        }
    }
}

/// Builder for PathConfig
#[derive(Debug, Clone, Default)]
pub struct PathConfigBuilder {
    data_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    base_dir: Option<PathBuf>,
}

impl PathConfigBuilder {
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn output_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Set base directory (data/ and output/ subdirectories)
    pub fn base_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base_dir = Some(path.into());
        self
    }

    pub fn build(self) -> PathConfig {
        let (data_default, output_default) = match &self.base_dir {
            Some(base) => (base.join("data"), base.join("output")),
            None => PathConfig::default_dirs(),
        };
        PathConfig {
            data_dir: self.data_dir.unwrap_or(data_default),
            output_dir: self.output_dir.unwrap_or(output_default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PathConfig::default();
        assert!(!config.data_dir().as_os_str().is_empty());
        assert!(!config.output_dir().as_os_str().is_empty());
    }

    #[test]
    fn test_builder_base_dir() {
        let config = PathConfig::builder().base_dir("/tmp/cgae-test").build();
        assert_eq!(config.data_dir(), Path::new("/tmp/cgae-test/data"));
        assert_eq!(config.output_dir(), Path::new("/tmp/cgae-test/output"));
        assert_eq!(
            config.run_record("otp"),
            Path::new("/tmp/cgae-test/output/otp.json")
        );
    }

    #[test]
    fn test_explicit_dir_beats_base_dir() {
        let args = PathArgs {
            data_dir: None,
            output_dir: Some(PathBuf::from("/tmp/explicit")),
            base_dir: Some(PathBuf::from("/tmp/base")),
        };
        let config = PathConfig::from_path_args(args);
        assert_eq!(config.output_dir(), Path::new("/tmp/explicit"));
        assert_eq!(config.data_dir(), Path::new("/tmp/base/data"));
    }
}
