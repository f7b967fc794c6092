use std::path::Path;
use std::sync::OnceLock;

use anyhow::{anyhow, Context, Result};
use regex::Regex;
use tracing::{debug, error};

use crate::config::settings::{ClientConfig, LoggingConfig};
use crate::config::validator::validate_client_config;

/// Load, expand, default and validate a YAML config file.
pub async fn file_to_config(path: &Path) -> Result<ClientConfig> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&expand_env_vars(&content))
        .map_err(|e| anyhow!("Invalid config format in {}: {}", path.display(), e))
}

pub fn parse_config(content: &str) -> Result<ClientConfig> {
    let mut config: ClientConfig = serde_yaml::from_str(content).inspect_err(|e| {
        error!("parse config error: {}", e);
    })?;

    // Apply defaults
    if config.logging.is_none() {
        config.logging = Some(LoggingConfig::default());
    }

    debug!("validation config ...");
    validate_client_config(&config).map_err(|errors| {
        for e in &errors {
            error!("config: {}", e);
        }
        anyhow!("{} problem(s): {}", errors.len(), errors.join("; "))
    })?;

    Ok(config)
}

/// Replace `${VAR}` and `${VAR:default}` with environment values.
pub fn expand_env_vars(input: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"\$\{(\w+)(?::([^\}]*))?\}").expect("env var pattern is valid")
    });
    re.replace_all(input, |caps: &regex::Captures| {
        let var = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::LogFormat;
    use serial_test::serial;

    const CONFIG: &str = r#"
endpoints:
  primary: ${CARE_TEST_API_URL:http://localhost:5000/api}
  fallbacks:
    - http://192.168.1.50:5000/api
  aliases:
    enabled: true
    lan_host: ${CARE_TEST_LAN_HOST:}
timeouts:
  request_ms: 20000
auth:
  public_paths: [/auth/login, /auth/register, /auth/otp]
storage:
  path: /tmp/care-api-client/credentials.json
"#;

    #[test]
    #[serial]
    fn env_values_and_defaults() {
        std::env::remove_var("CARE_TEST_API_URL");
        std::env::set_var("CARE_TEST_LAN_HOST", "192.168.1.77");

        let cfg = parse_config(&expand_env_vars(CONFIG)).unwrap();
        assert_eq!(cfg.endpoints.primary, "http://localhost:5000/api");
        assert_eq!(
            cfg.endpoints.fallback_urls(),
            vec![
                "http://192.168.1.50:5000/api".to_owned(),
                "http://10.0.2.2:5000/api".to_owned(),
                "http://192.168.1.77:5000/api".to_owned(),
            ]
        );
        assert_eq!(cfg.timeouts.request_ms, 20_000);
        assert_eq!(cfg.timeouts.probe_ms, 3_000);
        assert_eq!(cfg.auth.refresh_lead_seconds, 300);
        assert_eq!(cfg.auth.public_paths.len(), 3);
        assert_eq!(cfg.logging.unwrap().format, LogFormat::Compact);

        std::env::remove_var("CARE_TEST_LAN_HOST");
    }

    #[test]
    #[serial]
    fn env_overrides_primary() {
        std::env::set_var("CARE_TEST_API_URL", "https://api.care.example/api");
        let cfg = parse_config(&expand_env_vars(CONFIG)).unwrap();
        assert_eq!(cfg.endpoints.primary_url(), "https://api.care.example/api");
        std::env::remove_var("CARE_TEST_API_URL");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = parse_config("endpoints:\n  primary: nope\ntimeouts:\n  request_ms: 0\n").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("endpoints.primary"), "{}", msg);
        assert!(msg.contains("request_ms"), "{}", msg);
    }

    #[tokio::test]
    async fn missing_file_has_context() {
        let err = file_to_config(Path::new("/nonexistent/care-api-client.yaml")).await.unwrap_err();
        assert!(err.to_string().contains("failed to read config"));
    }
}
