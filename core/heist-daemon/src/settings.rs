//! Loads the daemon's engine settings from `~/.heist/daemon/heist.toml`.

use heist_core::EngineSettings;
use std::path::PathBuf;

const DEFAULT_SETTINGS_RELATIVE_PATH: &str = ".heist/daemon/heist.toml";

pub fn default_settings_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(DEFAULT_SETTINGS_RELATIVE_PATH))
}

/// Missing file means defaults. Any section or field may be omitted.
pub fn load_settings(path: Option<PathBuf>) -> Result<EngineSettings, String> {
    let settings_path = match path {
        Some(path) => path,
        None => default_settings_path()?,
    };

    if !settings_path.exists() {
        return Ok(EngineSettings::default());
    }

    let content = fs_err::read_to_string(&settings_path).map_err(|err| {
        format!(
            "Failed to read heist settings {}: {}",
            settings_path.display(),
            err
        )
    })?;
    toml::from_str::<EngineSettings>(&content).map_err(|err| {
        format!(
            "Failed to parse heist settings {}: {}",
            settings_path.display(),
            err
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_settings_defaults_when_file_missing() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("missing.toml");
        let settings = load_settings(Some(path)).expect("load settings");
        assert_eq!(settings, EngineSettings::default());
    }

    #[test]
    fn load_settings_parses_partial_sections() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("heist.toml");
        fs_err::write(
            &path,
            r#"
[vault]
tick_secs = 30

[outcome]
rng_seed = 11

[defaults]
opening_balance = 5000
"#,
        )
        .expect("write settings");

        let settings = load_settings(Some(path)).expect("load settings");
        assert_eq!(settings.vault.tick_secs, 30);
        assert_eq!(settings.vault.recovery_factor, 1.04);
        assert_eq!(settings.outcome.rng_seed, Some(11));
        assert_eq!(settings.defaults.opening_balance, 5000);
        assert_eq!(settings.defaults.theme, "heist");
        assert_eq!(settings.session.poll_interval_ms, 5_000);
    }

    #[test]
    fn load_settings_rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("heist.toml");
        fs_err::write(&path, "[vault\ntick_secs = ").expect("write settings");
        let err = load_settings(Some(path)).expect_err("malformed");
        assert!(err.contains("Failed to parse heist settings"));
    }
}
