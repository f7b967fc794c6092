//! Configuration validation with aggregated errors.
//! Every problem is collected so a broken file is fixed in one pass.

use regex::Regex;
use reqwest::Url;

use crate::config::settings::{AuthConfig, ClientConfig, EndpointsConfig, TimeoutsConfig};

/// Returns Ok(()) or Err(Vec<String>) containing all issues.
pub fn validate_client_config(cfg: &ClientConfig) -> Result<(), Vec<String>> {
    let mut errors: Vec<String> = Vec::new();

    validate_endpoints(&cfg.endpoints, &mut errors);
    validate_timeouts(&cfg.timeouts, &mut errors);
    validate_auth(&cfg.auth, &mut errors);

    if let Some(logging) = &cfg.logging {
        let allowed = ["trace", "debug", "info", "warn", "error"];
        if !allowed.contains(&logging.level.to_lowercase().as_str()) {
            errors.push(format!(
                "logging.level '{}' invalid; allowed: {:?}",
                logging.level, allowed
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_endpoints(endpoints: &EndpointsConfig, errors: &mut Vec<String>) {
    validate_base_url("endpoints.primary", &endpoints.primary, errors);
    for (i, url) in endpoints.fallbacks.iter().enumerate() {
        validate_base_url(&format!("endpoints.fallbacks[{}]", i), url, errors);
    }
    if let Some(aliases) = &endpoints.aliases {
        if aliases.port == Some(0) {
            errors.push("endpoints.aliases.port must be > 0".to_owned());
        }
        if let Some(path) = &aliases.path {
            if !path.is_empty() && !path.starts_with('/') {
                errors.push(format!("endpoints.aliases.path '{}' must start with '/'", path));
            }
        }
    }
}

fn validate_base_url(field: &str, url: &str, errors: &mut Vec<String>) {
    match Url::parse(url.trim()) {
        Ok(parsed) => {
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                errors.push(format!("{} '{}' must use http or https", field, url));
            }
            if parsed.host_str().is_none() {
                errors.push(format!("{} '{}' has no host", field, url));
            }
            if parsed.query().is_some() || parsed.fragment().is_some() {
                errors.push(format!("{} '{}' must not carry a query or fragment", field, url));
            }
        }
        Err(e) => errors.push(format!("{} '{}' is not a valid URL: {}", field, url, e)),
    }
}

fn validate_timeouts(timeouts: &TimeoutsConfig, errors: &mut Vec<String>) {
    if timeouts.request_ms == 0 {
        errors.push("timeouts.request_ms must be > 0".to_owned());
    }
    if timeouts.probe_ms == 0 {
        errors.push("timeouts.probe_ms must be > 0".to_owned());
    }
    if timeouts.probe_ms > timeouts.request_ms {
        errors.push(format!(
            "timeouts.probe_ms ({}) must not exceed timeouts.request_ms ({})",
            timeouts.probe_ms, timeouts.request_ms
        ));
    }
}

fn validate_auth(auth: &AuthConfig, errors: &mut Vec<String>) {
    if auth.refresh_lead_seconds < 0 {
        errors.push("auth.refresh_lead_seconds must be >= 0".to_owned());
    }
    if auth.legacy_ttl_seconds <= 0 {
        errors.push("auth.legacy_ttl_seconds must be > 0".to_owned());
    }
    for path in &auth.public_paths {
        if !path.starts_with('/') {
            errors.push(format!("auth.public_paths entry '{}' must start with '/'", path));
        }
    }
    if let Err(e) = Regex::new(&auth.session_error_pattern) {
        errors.push(format!("auth.session_error_pattern does not compile: {}", e));
    }
}
