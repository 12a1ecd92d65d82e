#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Each value is resolved from, in order: explicit overrides (CLI flags), the
//! process environment, a `.env` style file, then the built-in default.

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 10000;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_YTDLP: &str = "yt-dlp";

/// Media files live here, relative to the media root.
pub const STORAGE_DIR_NAME: &str = "downloads";
/// The JSON index, relative to the media root.
pub const METADATA_FILE_NAME: &str = "videos.json";

const MEDIA_ROOT_KEY: &str = "CLIPVAULT_MEDIA_ROOT";
const WWW_ROOT_KEY: &str = "CLIPVAULT_WWW_ROOT";
const PORT_KEY: &str = "CLIPVAULT_PORT";
const HOST_KEY: &str = "CLIPVAULT_HOST";
const COOKIES_DIR_KEY: &str = "CLIPVAULT_COOKIES_DIR";
const YTDLP_KEY: &str = "CLIPVAULT_YTDLP";
const TIMEOUT_KEY: &str = "CLIPVAULT_ACQUIRE_TIMEOUT_SECS";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub media_root: PathBuf,
    pub www_root: PathBuf,
    pub port: u16,
    pub host: String,
    pub cookies_dir: PathBuf,
    pub ytdlp_program: String,
    /// `None` lets an acquisition run as long as the tool needs.
    pub acquire_timeout: Option<Duration>,
}

impl RuntimeConfig {
    pub fn storage_dir(&self) -> PathBuf {
        self.media_root.join(STORAGE_DIR_NAME)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.media_root.join(METADATA_FILE_NAME)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub media_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub port: Option<u16>,
    pub host: Option<String>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_config(overrides: RuntimeOverrides) -> Result<RuntimeConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_config(&file_vars, env_var_string, overrides)
}

fn build_runtime_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let media_root = overrides
        .media_root
        .or_else(|| lookup(MEDIA_ROOT_KEY).map(PathBuf::from))
        .ok_or_else(|| anyhow!("{MEDIA_ROOT_KEY} not set"))?;
    let www_root = overrides
        .www_root
        .or_else(|| lookup(WWW_ROOT_KEY).map(PathBuf::from))
        .ok_or_else(|| anyhow!("{WWW_ROOT_KEY} not set"))?;
    let port = overrides
        .port
        .or_else(|| lookup(PORT_KEY).and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_PORT);
    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup(HOST_KEY))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let cookies_dir = lookup(COOKIES_DIR_KEY)
        .map(PathBuf::from)
        .unwrap_or_else(|| media_root.clone());
    let ytdlp_program = lookup(YTDLP_KEY).unwrap_or_else(|| DEFAULT_YTDLP.to_string());
    let acquire_timeout = lookup(TIMEOUT_KEY)
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    Ok(RuntimeConfig {
        media_root,
        www_root,
        port,
        host,
        cookies_dir,
        ytdlp_program,
        acquire_timeout,
    })
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Parses `KEY=value` lines. A missing file yields no values.
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
        let value = unquote(value_raw.trim());
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|quote| {
            value
                .strip_prefix(*quote)
                .and_then(|inner| inner.strip_suffix(*quote))
        })
        .unwrap_or(value)
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

    fn config_from(contents: &str) -> RuntimeConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_runtime_config(&vars, |_| None, RuntimeOverrides::default()).unwrap()
    }

    const ROOTS: &str = "CLIPVAULT_MEDIA_ROOT=\"/m\"\nCLIPVAULT_WWW_ROOT=\"/w\"\n";

    #[test]
    fn defaults_fill_optional_values() {
        let config = config_from(ROOTS);
        assert_eq!(config.media_root, PathBuf::from("/m"));
        assert_eq!(config.www_root, PathBuf::from("/w"));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.cookies_dir, PathBuf::from("/m"));
        assert_eq!(config.ytdlp_program, DEFAULT_YTDLP);
        assert!(config.acquire_timeout.is_none());
        assert_eq!(config.storage_dir(), PathBuf::from("/m/downloads"));
        assert_eq!(config.metadata_path(), PathBuf::from("/m/videos.json"));
    }

    #[test]
    fn reads_optional_values_from_file() {
        let config = config_from(&format!(
            "{ROOTS}CLIPVAULT_PORT=4242\nCLIPVAULT_HOST=0.0.0.0\n\
             CLIPVAULT_COOKIES_DIR=/secrets\nCLIPVAULT_YTDLP=/opt/yt-dlp\n\
             CLIPVAULT_ACQUIRE_TIMEOUT_SECS=600\n"
        ));
        assert_eq!(config.port, 4242);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.cookies_dir, PathBuf::from("/secrets"));
        assert_eq!(config.ytdlp_program, "/opt/yt-dlp");
        assert_eq!(config.acquire_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&format!(
            "{ROOTS}CLIPVAULT_PORT=nope\nCLIPVAULT_ACQUIRE_TIMEOUT_SECS=soon\n"
        ));
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.acquire_timeout.is_none());
    }

    #[test]
    fn zero_timeout_means_unlimited() {
        let config = config_from(&format!("{ROOTS}CLIPVAULT_ACQUIRE_TIMEOUT_SECS=0\n"));
        assert!(config.acquire_timeout.is_none());
    }

    #[test]
    fn missing_media_root_is_an_error() {
        let err = build_runtime_config(&HashMap::new(), |_| None, RuntimeOverrides::default())
            .unwrap_err();
        assert!(err.to_string().contains(MEDIA_ROOT_KEY));
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(make_config(ROOTS).path()).unwrap();
        let config = build_runtime_config(
            &vars,
            |key| (key == MEDIA_ROOT_KEY).then(|| "/env".to_string()),
            RuntimeOverrides::default(),
        )
        .unwrap();
        assert_eq!(config.media_root, PathBuf::from("/env"));
        assert_eq!(config.www_root, PathBuf::from("/w"));
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert(MEDIA_ROOT_KEY.to_string(), "/file-media".to_string());
        vars.insert(WWW_ROOT_KEY.to_string(), "/file-www".to_string());
        vars.insert(HOST_KEY.to_string(), "file-host".to_string());
        vars.insert(PORT_KEY.to_string(), "7000".to_string());

        let overrides = RuntimeOverrides {
            media_root: Some(PathBuf::from("/override-media")),
            www_root: None,
            port: Some(9000),
            host: Some("override-host".into()),
            env_path: None,
        };
        let config = build_runtime_config(
            &vars,
            |key| match key {
                WWW_ROOT_KEY => Some("/env-www".to_string()),
                PORT_KEY => Some("8000".to_string()),
                _ => None,
            },
            overrides,
        )
        .unwrap();

        assert_eq!(config.media_root, PathBuf::from("/override-media"));
        assert_eq!(config.www_root, PathBuf::from("/env-www"));
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "override-host");
        assert_eq!(config.cookies_dir, PathBuf::from("/override-media"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let vars = read_env_file(
            make_config(&format!("{ROOTS}CLIPVAULT_YTDLP=\"  \"\n")).path(),
        )
        .unwrap();
        let config = build_runtime_config(
            &vars,
            |_| None,
            RuntimeOverrides {
                host: Some("   ".into()),
                ..RuntimeOverrides::default()
            },
        )
        .unwrap();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.ytdlp_program, DEFAULT_YTDLP);
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export CLIPVAULT_MEDIA_ROOT="/media"
            CLIPVAULT_WWW_ROOT='/www'
            CLIPVAULT_HOST =  "0.0.0.0"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get(MEDIA_ROOT_KEY).unwrap(), "/media");
        assert_eq!(vars.get(WWW_ROOT_KEY).unwrap(), "/www");
        assert_eq!(vars.get(HOST_KEY).unwrap(), "0.0.0.0");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }

    #[test]
    fn resolve_reads_explicit_env_file() {
        let cfg = make_config("CLIPVAULT_MEDIA_ROOT=/from-file\nCLIPVAULT_WWW_ROOT=/w\n");
        let config = resolve_runtime_config(RuntimeOverrides {
            media_root: Some(PathBuf::from("/cli")),
            env_path: Some(cfg.path().to_path_buf()),
            ..RuntimeOverrides::default()
        })
        .unwrap();
        assert_eq!(config.media_root, PathBuf::from("/cli"));
    }
}
