use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration, fix these settings: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

/// Process configuration, resolved and validated once at startup. Every
/// problem is collected and reported together; nothing falls back to an
/// empty-string placeholder at runtime.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_address: String,
    pub bind_port: u16,
    pub max_db_connections: u32,
    pub storage_root: PathBuf,
    pub extractor_endpoint: String,
    pub analyzer_endpoint: String,
    pub allow_migration_failure: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut problems = Vec::new();

        let mut required = |key: &str| match get(key).map(|v| v.trim().to_string()) {
            Some(value) if !value.is_empty() => value,
            _ => {
                problems.push(format!("{key} (missing)"));
                String::new()
            }
        };

        let database_url = required("DATABASE_URL");
        let extractor_endpoint = required("EXTRACTOR_ENDPOINT");
        let analyzer_endpoint = required("ANALYZER_ENDPOINT");

        let bind_address = get("BIND_ADDRESS")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let bind_port = parse_or_default(&get, "BIND_PORT", 3000u16, &mut problems);
        let max_db_connections =
            parse_or_default(&get, "MAX_DB_CONNECTIONS", 5u32, &mut problems);

        let storage_root = get("STORAGE_ROOT")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("storage"));

        let allow_migration_failure = get("ALLOW_MIGRATION_FAILURE")
            .map(|value| {
                let normalized = value.trim().to_ascii_lowercase();
                matches!(normalized.as_str(), "1" | "true" | "yes")
            })
            .unwrap_or(false);

        if !problems.is_empty() {
            return Err(ConfigError::Invalid(problems));
        }

        Ok(Self {
            database_url,
            bind_address,
            bind_port,
            max_db_connections,
            storage_root,
            extractor_endpoint,
            analyzer_endpoint,
            allow_migration_failure,
        })
    }
}

fn parse_or_default<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    problems: &mut Vec<String>,
) -> T {
    match get(key) {
        None => default,
        Some(raw) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return default;
            }
            match trimmed.parse::<T>() {
                Ok(value) => value,
                Err(_) => {
                    problems.push(format!("{key} (unparseable: {trimmed:?})"));
                    default
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn minimal_configuration_resolves_with_defaults() {
        let config = AppConfig::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/docpilot"),
            ("EXTRACTOR_ENDPOINT", "http://extractor.internal/v1"),
            ("ANALYZER_ENDPOINT", "http://analyzer.internal/v1"),
        ]))
        .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.bind_port, 3000);
        assert_eq!(config.max_db_connections, 5);
        assert_eq!(config.storage_root, PathBuf::from("storage"));
        assert!(!config.allow_migration_failure);
    }

    #[test]
    fn every_missing_setting_is_enumerated() {
        let err = AppConfig::from_lookup(env(&[])).unwrap_err();
        let ConfigError::Invalid(problems) = err;
        assert_eq!(problems.len(), 3);
        assert!(problems.iter().any(|p| p.contains("DATABASE_URL")));
        assert!(problems.iter().any(|p| p.contains("EXTRACTOR_ENDPOINT")));
        assert!(problems.iter().any(|p| p.contains("ANALYZER_ENDPOINT")));
    }

    #[test]
    fn unparseable_port_is_an_error_not_a_fallback() {
        let err = AppConfig::from_lookup(env(&[
            ("DATABASE_URL", "postgres://localhost/docpilot"),
            ("EXTRACTOR_ENDPOINT", "http://extractor.internal/v1"),
            ("ANALYZER_ENDPOINT", "http://analyzer.internal/v1"),
            ("BIND_PORT", "eighty"),
        ]))
        .unwrap_err();
        let ConfigError::Invalid(problems) = err;
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("BIND_PORT"));
    }

    #[test]
    fn truthy_migration_escape_hatch() {
        for raw in ["1", "true", "YES"] {
            let config = AppConfig::from_lookup(env(&[
                ("DATABASE_URL", "postgres://localhost/docpilot"),
                ("EXTRACTOR_ENDPOINT", "http://extractor.internal/v1"),
                ("ANALYZER_ENDPOINT", "http://analyzer.internal/v1"),
                ("ALLOW_MIGRATION_FAILURE", raw),
            ]))
            .unwrap();
            assert!(config.allow_migration_failure, "{raw} should be truthy");
        }
    }
}
