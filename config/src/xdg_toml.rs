//! The XDG layer: the `[env]` table of `$XDG_CONFIG_HOME/<app>/config.toml`.

use std::collections::HashMap;

use crate::LoadError;

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns env pairs from the `[env]` section. A platform without a config directory,
/// a missing file, or an absent section all yield an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(HashMap::new());
    };
    let path = config_dir.join(app_name).join("config.toml");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path).map_err(|source| LoadError::Read {
        path: path.clone(),
        source,
    })?;
    let config: ConfigFile =
        toml::from_str(&content).map_err(|source| LoadError::Parse { path, source })?;
    Ok(config.env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_xdg_home<T>(home: &std::path::Path, run: impl FnOnce() -> T) -> T {
        let prev = env::var("XDG_CONFIG_HOME").ok();
        env::set_var("XDG_CONFIG_HOME", home);
        let out = run();
        match prev {
            Some(p) => env::set_var("XDG_CONFIG_HOME", p),
            None => env::remove_var("XDG_CONFIG_HOME"),
        }
        out
    }

    #[test]
    fn missing_config_yields_empty_map() {
        let map = load_env_map("config-crate-test-nonexistent-12345").unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn reads_env_table() {
        let home = tempfile::tempdir().unwrap();
        let app_dir = home.path().join("testapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(
            app_dir.join("config.toml"),
            "[env]\nFOO = \"from_toml\"\nBAR = \"baz\"\n",
        )
        .unwrap();

        let map = with_xdg_home(home.path(), || load_env_map("testapp")).unwrap();
        assert_eq!(map.get("FOO").map(String::as_str), Some("from_toml"));
        assert_eq!(map.get("BAR").map(String::as_str), Some("baz"));
    }

    #[test]
    fn config_without_env_table_yields_empty_map() {
        let home = tempfile::tempdir().unwrap();
        let app_dir = home.path().join("noenv");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "[other]\nkey = \"ignored\"\n").unwrap();

        let map = with_xdg_home(home.path(), || load_env_map("noenv")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn broken_toml_is_a_parse_error() {
        let home = tempfile::tempdir().unwrap();
        let app_dir = home.path().join("badapp");
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), "not valid toml [[[\n").unwrap();

        let result = with_xdg_home(home.path(), || load_env_map("badapp"));
        assert!(matches!(result, Err(LoadError::Parse { .. })));
    }
}
