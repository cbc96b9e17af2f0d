//! Environment configuration for Parley: provider API keys and runtime knobs can come
//! from the process environment, a project `.env`, or
//! `$XDG_CONFIG_HOME/parley/config.toml`.
//!
//! [`load_and_apply`] folds the file layers into the process environment once at
//! startup. Precedence, highest first: existing environment, then `.env`, then the XDG
//! `[env]` table — an `OPENAI_API_KEY` exported in the shell always beats the files.

mod dotenv;
mod xdg_toml;

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Applies file-based config to the process environment.
///
/// The XDG layer for `app_name` is read first, then a project `.env` (from
/// `override_dir` or the current directory) is overlaid on top of it. The merged keys
/// are exported, skipping any variable the process already has. Missing files are not
/// errors; unreadable or unparseable ones are.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let mut layered = xdg_toml::load_env_map(app_name)?;
    let dotenv_path = override_dir
        .map(|dir| dir.join(".env"))
        .unwrap_or_else(|| PathBuf::from(".env"));
    layered.extend(
        dotenv::load_env_map(override_dir).map_err(|source| LoadError::Read {
            path: dotenv_path,
            source,
        })?,
    );

    for (key, value) in layered {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    /// Restores one env var to its pre-test state on drop.
    struct EnvGuard {
        key: &'static str,
        prev: Option<String>,
    }

    impl EnvGuard {
        fn capture(key: &'static str) -> Self {
            Self {
                key,
                prev: env::var(key).ok(),
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.prev {
                Some(v) => env::set_var(self.key, v),
                None => env::remove_var(self.key),
            }
        }
    }

    fn xdg_home_with(app: &str, body: &str) -> tempfile::TempDir {
        let home = tempfile::tempdir().unwrap();
        let app_dir = home.path().join(app);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), body).unwrap();
        home
    }

    #[test]
    fn missing_sources_are_fine() {
        let empty = tempfile::tempdir().unwrap();
        load_and_apply("config-crate-no-such-app", Some(empty.path())).unwrap();
    }

    #[test]
    fn process_env_always_wins() {
        let _guard = EnvGuard::capture("PARLEY_CFG_SHELL_WINS");
        env::set_var("PARLEY_CFG_SHELL_WINS", "from-shell");
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "PARLEY_CFG_SHELL_WINS=from-file\n").unwrap();

        load_and_apply("config-crate-no-such-app", Some(dir.path())).unwrap();
        assert_eq!(
            env::var("PARLEY_CFG_SHELL_WINS").as_deref(),
            Ok("from-shell")
        );
    }

    #[test]
    fn dotenv_overlays_xdg() {
        let _key = EnvGuard::capture("PARLEY_CFG_LAYERED");
        env::remove_var("PARLEY_CFG_LAYERED");
        let _home = EnvGuard::capture("XDG_CONFIG_HOME");
        let home = xdg_home_with("parley", "[env]\nPARLEY_CFG_LAYERED = \"from-xdg\"\n");
        env::set_var("XDG_CONFIG_HOME", home.path());

        let dotenv_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dotenv_dir.path().join(".env"),
            "PARLEY_CFG_LAYERED=from-dotenv\n",
        )
        .unwrap();

        load_and_apply("parley", Some(dotenv_dir.path())).unwrap();
        assert_eq!(env::var("PARLEY_CFG_LAYERED").as_deref(), Ok("from-dotenv"));
    }

    #[test]
    fn xdg_layer_applies_when_dotenv_silent() {
        let _key = EnvGuard::capture("PARLEY_CFG_XDG_ONLY");
        env::remove_var("PARLEY_CFG_XDG_ONLY");
        let _home = EnvGuard::capture("XDG_CONFIG_HOME");
        let home = xdg_home_with("parley", "[env]\nPARLEY_CFG_XDG_ONLY = \"from-xdg\"\n");
        env::set_var("XDG_CONFIG_HOME", home.path());

        let empty = tempfile::tempdir().unwrap();
        load_and_apply("parley", Some(empty.path())).unwrap();
        assert_eq!(env::var("PARLEY_CFG_XDG_ONLY").as_deref(), Ok("from-xdg"));
    }
}
