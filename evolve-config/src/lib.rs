//! Configuration for the `evolve` command line tool.
#![warn(missing_docs)]

mod file;

pub use file::ConfigFile;

use anyhow::{bail, Result};
use camino::{Utf8Path, Utf8PathBuf};

/// Environment variable naming the repository to operate on, consulted when
/// no `--repo` flag is given.
pub const REPO_ENV_VAR: &str = "EVOLVE_REPO";

/// Resolved runtime configuration.
pub struct Config {
    repository: Utf8PathBuf,
}

impl Config {
    /// Resolves the repository location from the command line flag, the
    /// `EVOLVE_REPO` environment variable, or the config file, in that
    /// order of precedence. A missing config file is treated as empty.
    pub fn resolve(flag: Option<Utf8PathBuf>, config_file: &Utf8Path) -> Result<Config> {
        let file = if config_file.exists() {
            ConfigFile::load(config_file)?
        } else {
            ConfigFile::default()
        };
        let env = std::env::var(REPO_ENV_VAR).ok().map(Utf8PathBuf::from);
        let Some(repository) = flag.or(env).or(file.repository) else {
            bail!(
                "an evolve repository is required (use --repo, {REPO_ENV_VAR}, or the config file)"
            );
        };
        Ok(Config { repository })
    }

    /// The repository root to operate on.
    pub fn repository(&self) -> &Utf8Path {
        &self.repository
    }
}
