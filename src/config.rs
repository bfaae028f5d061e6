#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::Url;

use crate::assembler::{AssemblerSettings, DEFAULT_POSTER_WIDTH};
use crate::platform::{DEFAULT_DELIVERY_BASE_URL, DEFAULT_TIMEOUT};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const ENV_PATH_VAR: &str = "CATALOGUE_ENV_PATH";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_LEGACY_BASE_URL: &str = "https://sms.cam.ac.uk/";
pub const DEFAULT_CONTENT_BASE_URL: &str = "https://content.jwplatform.com/";

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub catalogue_db: PathBuf,
    pub host: String,
    pub port: u16,
    pub legacy_base_url: Url,
    /// Unset disables embed URLs.
    pub embed_player_key: Option<String>,
    pub content_base_url: Url,
    pub delivery_base_url: Url,
    pub platform_timeout: Duration,
}

impl RuntimeSettings {
    pub fn assembler_settings(&self) -> AssemblerSettings {
        AssemblerSettings {
            legacy_base_url: self.legacy_base_url.clone(),
            embed_player_key: self.embed_player_key.clone(),
            content_base_url: self.content_base_url.clone(),
            poster_width: DEFAULT_POSTER_WIDTH,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub catalogue_db: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub env_path: Option<PathBuf>,
}

/// Layers CLI overrides over the process environment over the `.env` file.
pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .or_else(|| env_var_string(ENV_PATH_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_runtime_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeSettings> {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let catalogue_db = overrides
        .catalogue_db
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup_value("CATALOGUE_DB", file_vars, &env_lookup))
        .ok_or_else(|| anyhow!("CATALOGUE_DB not set"))?;
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("CATALOGUE_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("CATALOGUE_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());

    let legacy_base_url = base_url_value(
        "LEGACY_SMS_BASE_URL",
        DEFAULT_LEGACY_BASE_URL,
        file_vars,
        &env_lookup,
    )?;
    let content_base_url = base_url_value(
        "JWPLATFORM_CONTENT_BASE_URL",
        DEFAULT_CONTENT_BASE_URL,
        file_vars,
        &env_lookup,
    )?;
    let delivery_base_url = base_url_value(
        "JWPLATFORM_DELIVERY_BASE_URL",
        DEFAULT_DELIVERY_BASE_URL,
        file_vars,
        &env_lookup,
    )?;
    let embed_player_key = lookup_value("JWPLATFORM_EMBED_PLAYER_KEY", file_vars, &env_lookup)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let platform_timeout = lookup_value("JWPLATFORM_TIMEOUT_SECS", file_vars, &env_lookup)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    Ok(RuntimeSettings {
        catalogue_db: PathBuf::from(catalogue_db),
        host,
        port,
        legacy_base_url,
        embed_player_key,
        content_base_url,
        delivery_base_url,
        platform_timeout,
    })
}

fn base_url_value(
    key: &str,
    default: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Url> {
    let raw = lookup_value(key, file_vars, env_lookup).unwrap_or_else(|| default.to_string());
    parse_base_url(&raw).with_context(|| format!("{key} is not a valid URL"))
}

/// Parses a base URL and makes sure it ends with `/` so relative joins append
/// to it instead of replacing its last segment.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw.trim())?;
    if url.cannot_be_a_base() {
        return Err(anyhow!("{raw} cannot be used as a base URL"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned())
}

/// Reads `KEY=value` pairs, tolerating `export`, quotes, comments and blank
/// lines. A missing file yields no values.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> RuntimeSettings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_settings(&vars, |_| None).unwrap()
    }

    #[test]
    fn defaults_fill_everything_but_the_database() {
        let settings = settings_from("CATALOGUE_DB=\"/srv/catalogue.db\"\n");
        assert_eq!(settings.catalogue_db, PathBuf::from("/srv/catalogue.db"));
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.host, DEFAULT_HOST);
        assert_eq!(settings.legacy_base_url.as_str(), DEFAULT_LEGACY_BASE_URL);
        assert_eq!(settings.content_base_url.as_str(), DEFAULT_CONTENT_BASE_URL);
        assert_eq!(settings.delivery_base_url.as_str(), DEFAULT_DELIVERY_BASE_URL);
        assert_eq!(settings.platform_timeout, DEFAULT_TIMEOUT);
        assert!(settings.embed_player_key.is_none());
    }

    #[test]
    fn missing_database_is_an_error() {
        let err = build_runtime_settings(&HashMap::new(), |_| None).unwrap_err();
        assert!(err.to_string().contains("CATALOGUE_DB"));
    }

    #[test]
    fn reads_platform_settings() {
        let settings = settings_from(
            "CATALOGUE_DB=/db\n\
             JWPLATFORM_EMBED_PLAYER_KEY=abcd1234\n\
             JWPLATFORM_TIMEOUT_SECS=3\n\
             LEGACY_SMS_BASE_URL=https://legacy.example/sms\n",
        );
        assert_eq!(settings.embed_player_key.as_deref(), Some("abcd1234"));
        assert_eq!(settings.platform_timeout, Duration::from_secs(3));
        assert_eq!(settings.legacy_base_url.as_str(), "https://legacy.example/sms/");
    }

    #[test]
    fn blank_player_key_disables_embed() {
        let settings = settings_from("CATALOGUE_DB=/db\nJWPLATFORM_EMBED_PLAYER_KEY=\"  \"\n");
        assert!(settings.embed_player_key.is_none());
    }

    #[test]
    fn invalid_url_is_rejected() {
        let cfg = make_config("CATALOGUE_DB=/db\nLEGACY_SMS_BASE_URL=not a url\n");
        let vars = read_env_file(cfg.path()).unwrap();
        let err = build_runtime_settings(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("LEGACY_SMS_BASE_URL"));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let settings = settings_from(
            "CATALOGUE_DB=/db\nCATALOGUE_PORT=nope\nJWPLATFORM_TIMEOUT_SECS=0\n",
        );
        assert_eq!(settings.port, DEFAULT_PORT);
        assert_eq!(settings.platform_timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config("CATALOGUE_DB=\"/file\"\n").path()).unwrap();
        let settings = build_runtime_settings(&vars, |key| {
            if key == "CATALOGUE_DB" {
                Some("/env".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(settings.catalogue_db, PathBuf::from("/env"));
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("CATALOGUE_DB".to_string(), "/file.db".to_string());
        vars.insert("CATALOGUE_HOST".to_string(), "file-host".to_string());
        vars.insert("CATALOGUE_PORT".to_string(), "7000".to_string());

        let overrides = RuntimeOverrides {
            catalogue_db: Some(PathBuf::from("/override.db")),
            host: Some("override-host".into()),
            port: None,
            env_path: None,
        };

        let settings = build_runtime_settings_with_overrides(
            &vars,
            |key| (key == "CATALOGUE_PORT").then(|| "8000".to_string()),
            overrides,
        )
        .unwrap();

        assert_eq!(settings.catalogue_db, PathBuf::from("/override.db"));
        assert_eq!(settings.host, "override-host");
        assert_eq!(settings.port, 8000);
    }

    #[test]
    fn blank_host_override_is_ignored() {
        let settings = build_runtime_settings_with_overrides(
            &HashMap::from([("CATALOGUE_DB".to_string(), "/db".to_string())]),
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(settings.host, DEFAULT_HOST);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export CATALOGUE_DB="/srv/db"
            CATALOGUE_HOST='0.0.0.0'
            CATALOGUE_PORT =  "9090"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("CATALOGUE_DB").unwrap(), "/srv/db");
        assert_eq!(vars.get("CATALOGUE_HOST").unwrap(), "0.0.0.0");
        assert_eq!(vars.get("CATALOGUE_PORT").unwrap(), "9090");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn parse_base_url_appends_trailing_slash() {
        let url = parse_base_url("https://legacy.example/sms").unwrap();
        assert_eq!(url.join("media/1/statistics").unwrap().as_str(), "https://legacy.example/sms/media/1/statistics");
        assert!(parse_base_url("mailto:someone@example.com").is_err());
    }

    #[test]
    fn assembler_settings_carry_configured_urls() {
        let settings = settings_from("CATALOGUE_DB=/db\nJWPLATFORM_EMBED_PLAYER_KEY=p\n");
        let assembler = settings.assembler_settings();
        assert_eq!(assembler.embed_player_key.as_deref(), Some("p"));
        assert_eq!(assembler.poster_width, DEFAULT_POSTER_WIDTH);
        assert_eq!(assembler.legacy_base_url, settings.legacy_base_url);
    }
}
