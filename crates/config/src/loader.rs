use std::{
    path::{Path, PathBuf},
    str::FromStr,
};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::NexzaConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["nexza.toml", "nexza.yaml", "nexza.yml", "nexza.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<NexzaConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./nexza.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/nexza/nexza.{toml,yaml,yml,json}` (user-global)
///
/// Returns `NexzaConfig::default()` if no config file is found or the file
/// fails to parse. Environment overrides are not applied here.
pub fn discover_and_load() -> NexzaConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    NexzaConfig::default()
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/nexza/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "nexza").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> Result<NexzaConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => toml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| Error::parse(path, e)),
        "json" => serde_json::from_str(raw).map_err(|e| Error::parse(path, e)),
        _ => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

// ── Environment overrides ───────────────────────────────────────────────────

const ENV_API_KEY: &str = "NEXZA_API_KEY";
const ENV_TWILIO_AUTH_TOKEN: &str = "TWILIO_AUTH_TOKEN";
const ENV_PUBLIC_URL: &str = "NEXZA_PUBLIC_URL";
const ENV_AI_URL: &str = "NEXZA_AI_URL";
const ENV_AI_URL_LEGACY: &str = "LM_STUDIO_URL";
const ENV_AI_MODEL: &str = "NEXZA_AI_MODEL";
const ENV_AI_API_KEY: &str = "NEXZA_AI_API_KEY";
const ENV_MAX_TURNS: &str = "NEXZA_MAX_TURNS";
const ENV_IDLE_TIMEOUT: &str = "NEXZA_IDLE_TIMEOUT_SECS";
const ENV_RATE_CAPACITY: &str = "NEXZA_RATE_CAPACITY";
const ENV_RATE_REFILL: &str = "NEXZA_RATE_REFILL_PER_SEC";

/// Apply `NEXZA_*` (and provider-conventional) environment variables on top
/// of a loaded config.
pub fn apply_env_overrides(config: &mut NexzaConfig) -> Result<()> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

pub(crate) fn apply_env_overrides_with(
    config: &mut NexzaConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let get = |name: &str| {
        lookup(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(key) = get(ENV_API_KEY) {
        config.channels.chat_platform.api_key = Some(Secret::new(key));
    }
    if let Some(token) = get(ENV_TWILIO_AUTH_TOKEN) {
        config.channels.telephony.auth_token = Some(Secret::new(token));
    }
    if let Some(url) = get(ENV_PUBLIC_URL) {
        config.channels.telephony.public_url = Some(url);
    }
    if let Some(url) = get(ENV_AI_URL).or_else(|| get(ENV_AI_URL_LEGACY)) {
        config.ai.base_url = normalize_ai_base_url(&url);
    }
    if let Some(model) = get(ENV_AI_MODEL) {
        config.ai.model = model;
    }
    if let Some(key) = get(ENV_AI_API_KEY) {
        config.ai.api_key = Some(Secret::new(key));
    }
    if let Some(raw) = get(ENV_MAX_TURNS) {
        config.sessions.max_turns = parse_env(ENV_MAX_TURNS, &raw)?;
    }
    if let Some(raw) = get(ENV_IDLE_TIMEOUT) {
        config.sessions.idle_timeout_secs = parse_env(ENV_IDLE_TIMEOUT, &raw)?;
    }
    if let Some(raw) = get(ENV_RATE_CAPACITY) {
        config.rate_limit.capacity = parse_env(ENV_RATE_CAPACITY, &raw)?;
    }
    if let Some(raw) = get(ENV_RATE_REFILL) {
        config.rate_limit.refill_per_sec = parse_env(ENV_RATE_REFILL, &raw)?;
    }
    Ok(())
}

fn parse_env<T>(var: &'static str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| Error::invalid_env(var, e))
}

/// Accept either a base URL or a full `/chat/completions` endpoint, since
/// local inference servers usually document the latter.
fn normalize_ai_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    trimmed
        .strip_suffix("/chat/completions")
        .unwrap_or(trimmed)
        .to_string()
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret, std::collections::HashMap};

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn loads_toml_with_env_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexza.toml");
        std::fs::write(
            &path,
            "[server]\nport = 8099\n[ai]\nmodel = \"${NEXZA_LOADER_UNSET:-qwen}\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.server.port, 8099);
        assert_eq!(cfg.ai.model, "qwen");
    }

    #[test]
    fn loads_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("nexza.yaml");
        std::fs::write(&yaml, "sessions:\n  max_turns: 12\n").unwrap();
        assert_eq!(load_config(&yaml).unwrap().sessions.max_turns, 12);

        let json = dir.path().join("nexza.json");
        std::fs::write(&json, r#"{"rate_limit":{"capacity":3}}"#).unwrap();
        assert_eq!(load_config(&json).unwrap().rate_limit.capacity, 3);
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nexza.ini");
        std::fs::write(&path, "x=1").unwrap();
        assert!(matches!(
            load_config(&path),
            Err(Error::UnsupportedFormat(ext)) if ext == "ini"
        ));
    }

    #[test]
    fn env_overrides_secrets_and_limits() {
        let mut cfg = NexzaConfig::default();
        apply_env_overrides_with(
            &mut cfg,
            env(&[
                ("NEXZA_API_KEY", "chat-key"),
                ("TWILIO_AUTH_TOKEN", " twilio-token "),
                ("NEXZA_MAX_TURNS", "6"),
                ("NEXZA_RATE_REFILL_PER_SEC", "1.5"),
            ]),
        )
        .unwrap();
        assert_eq!(
            cfg.channels
                .chat_platform
                .api_key
                .as_ref()
                .unwrap()
                .expose_secret(),
            "chat-key"
        );
        assert_eq!(
            cfg.channels
                .telephony
                .auth_token
                .as_ref()
                .unwrap()
                .expose_secret(),
            "twilio-token"
        );
        assert_eq!(cfg.sessions.max_turns, 6);
        assert!((cfg.rate_limit.refill_per_sec - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn legacy_ai_url_accepts_full_endpoint() {
        let mut cfg = NexzaConfig::default();
        apply_env_overrides_with(
            &mut cfg,
            env(&[(
                "LM_STUDIO_URL",
                "http://10.0.0.5:1234/v1/chat/completions",
            )]),
        )
        .unwrap();
        assert_eq!(cfg.ai.base_url, "http://10.0.0.5:1234/v1");
    }

    #[test]
    fn bad_numeric_override_is_an_error() {
        let mut cfg = NexzaConfig::default();
        let err =
            apply_env_overrides_with(&mut cfg, env(&[("NEXZA_MAX_TURNS", "lots")])).unwrap_err();
        assert!(matches!(err, Error::InvalidEnv { var, .. } if var == "NEXZA_MAX_TURNS"));
    }
}
