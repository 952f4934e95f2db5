use crate::domain::models::ResolvePolicy;
use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const POLICIES_JSON: &str = "policies.json";
pub const DEFAULT_API_BASE_URL: &str = "https://focus.ruidoc.cn/dev-api";
const DEFAULT_PLATFORM: &str = "ios";
const ENV_API_BASE_URL: &str = "FOCUSONE_API_BASE_URL";
const ENV_ACCESS_TOKEN: &str = "FOCUSONE_ACCESS_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_platform")]
    pub platform: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiPolicy {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u8,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for ApiPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PolicyConfig {
    #[serde(default)]
    pub resolution: ResolvePolicy,
    #[serde(default)]
    pub api: ApiPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBundle {
    pub app: AppConfig,
    pub policies: PolicyConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub base_url: String,
    pub platform: String,
    pub timeout_ms: u64,
    pub max_retries: u8,
    pub base_delay_ms: u64,
    pub access_token: Option<String>,
}

fn default_app_name() -> String {
    "FocusOne".to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

fn default_timeout_ms() -> u64 {
    6_000
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "FocusOne",
                "timezone": null,
                "apiBaseUrl": DEFAULT_API_BASE_URL,
                "platform": DEFAULT_PLATFORM
            }),
        ),
        (
            POLICIES_JSON,
            serde_json::json!({
                "schema": 1,
                "resolution": {
                    "tieBreak": "recurring_first",
                    "respectWeekdays": false
                },
                "api": {
                    "timeoutMs": 6000,
                    "maxRetries": 0,
                    "baseDelayMs": 500
                }
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_configs(config_dir: &Path) -> Result<ConfigBundle, InfraError> {
    let app_path = config_dir.join(APP_JSON);
    let policies_path = config_dir.join(POLICIES_JSON);
    let app: AppConfig = serde_json::from_value(read_config(&app_path)?).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", app_path.display()))
    })?;
    let policies: PolicyConfig = serde_json::from_value(read_config(&policies_path)?).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", policies_path.display()))
    })?;
    Ok(ConfigBundle { app, policies })
}

pub fn parse_timezone(name: Option<&str>) -> Result<Option<Tz>, InfraError> {
    let Some(name) = name.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    name.parse::<Tz>()
        .map(Some)
        .map_err(|error| InfraError::InvalidConfig(format!("unknown timezone '{name}': {error}")))
}

pub fn load_api_settings_from_env(bundle: &ConfigBundle) -> Result<ApiSettings, InfraError> {
    load_api_settings_from_lookup(bundle, |key| std::env::var(key).ok())
}

pub fn load_api_settings_from_lookup<F>(bundle: &ConfigBundle, lookup: F) -> Result<ApiSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let base_url = optional_lookup_value(&lookup, ENV_API_BASE_URL)
        .unwrap_or_else(|| bundle.app.api_base_url.trim().to_string());
    if base_url.is_empty() {
        return Err(InfraError::InvalidConfig("api base url must not be empty".to_string()));
    }
    url::Url::parse(&base_url)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid api base url '{base_url}': {error}")))?;

    Ok(ApiSettings {
        base_url,
        platform: bundle.app.platform.trim().to_string(),
        timeout_ms: bundle.policies.api.timeout_ms,
        max_retries: bundle.policies.api.max_retries,
        base_delay_ms: bundle.policies.api.base_delay_ms,
        access_token: optional_lookup_value(&lookup, ENV_ACCESS_TOKEN),
    })
}

fn optional_lookup_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TieBreak;

    struct TempConfigDir {
        path: std::path::PathBuf,
    }

    impl TempConfigDir {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "focusone-config-tests-{}-{name}",
                std::process::id()
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            Self { path }
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn default_configs_load_with_expected_values() {
        let dir = TempConfigDir::new("defaults");
        ensure_default_configs(&dir.path).expect("write defaults");
        let bundle = load_configs(&dir.path).expect("load configs");

        assert_eq!(bundle.app.app_name, "FocusOne");
        assert_eq!(bundle.app.timezone, None);
        assert_eq!(bundle.app.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(bundle.policies.resolution.tie_break, TieBreak::RecurringFirst);
        assert_eq!(bundle.policies.api, ApiPolicy::default());
    }

    #[test]
    fn ensure_default_configs_keeps_existing_files() {
        let dir = TempConfigDir::new("existing");
        fs::write(
            dir.path.join(POLICIES_JSON),
            r#"{"schema": 1, "resolution": {"tieBreak": "once_first", "respectWeekdays": true}}"#,
        )
        .expect("seed policies");
        ensure_default_configs(&dir.path).expect("write defaults");

        let bundle = load_configs(&dir.path).expect("load configs");
        assert_eq!(bundle.policies.resolution.tie_break, TieBreak::OnceFirst);
        assert!(bundle.policies.resolution.respect_weekdays);
        assert_eq!(bundle.policies.api.timeout_ms, 6_000);
    }

    #[test]
    fn unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new("schema");
        ensure_default_configs(&dir.path).expect("write defaults");
        fs::write(dir.path.join(APP_JSON), r#"{"schema": 2}"#).expect("overwrite app config");

        match load_configs(&dir.path) {
            Err(InfraError::InvalidConfig(message)) => assert!(message.contains("unsupported schema")),
            other => panic!("expected invalid config error, got {other:?}"),
        }
    }

    #[test]
    fn timezone_names_are_validated() {
        assert_eq!(parse_timezone(None).expect("none"), None);
        assert_eq!(parse_timezone(Some("  ")).expect("blank"), None);
        assert_eq!(
            parse_timezone(Some("Asia/Shanghai")).expect("valid"),
            Some(chrono_tz::Asia::Shanghai)
        );
        assert!(parse_timezone(Some("Mars/Olympus")).is_err());
    }

    #[test]
    fn environment_overrides_base_url_and_token() {
        let bundle = ConfigBundle {
            app: serde_json::from_value(serde_json::json!({})).expect("default app config"),
            policies: PolicyConfig::default(),
        };
        let settings = load_api_settings_from_lookup(&bundle, |key| match key {
            "FOCUSONE_API_BASE_URL" => Some(" http://127.0.0.1:8849 ".to_string()),
            "FOCUSONE_ACCESS_TOKEN" => Some("token-1".to_string()),
            _ => None,
        })
        .expect("api settings");

        assert_eq!(settings.base_url, "http://127.0.0.1:8849");
        assert_eq!(settings.access_token.as_deref(), Some("token-1"));
        assert_eq!(settings.max_retries, 0);
    }

    #[test]
    fn invalid_base_url_is_reported() {
        let bundle = ConfigBundle {
            app: serde_json::from_value(serde_json::json!({})).expect("default app config"),
            policies: PolicyConfig::default(),
        };
        let result = load_api_settings_from_lookup(&bundle, |key| match key {
            "FOCUSONE_API_BASE_URL" => Some("not a url".to_string()),
            _ => None,
        });
        assert!(matches!(result, Err(InfraError::InvalidConfig(_))));
    }
}
