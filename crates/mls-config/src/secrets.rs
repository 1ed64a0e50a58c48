//! Runtime secret resolution.
//!
//! The YAML stores env var NAMES only (`database.url_env: MLS_DATABASE_URL`).
//! Binaries call [`resolve_secrets`] once at startup and pass the result to
//! constructors. `Debug` redacts every value, and errors name the variable,
//! never its contents.

use anyhow::{Context, Result};
use serde_json::Value;

/// Env var holding the Postgres URL when the config does not name one.
pub const DEFAULT_DATABASE_URL_ENV: &str = "MLS_DATABASE_URL";

#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Name of the env var the URL was read from.
    pub database_url_env: String,
    /// `None` when that env var is unset or blank.
    pub database_url: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url_env", &self.database_url_env)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

impl ResolvedSecrets {
    /// The database URL, or an error naming the missing variable.
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url.as_deref().with_context(|| {
            format!(
                "SECRETS_MISSING: required env var '{}' (database url) is not set or empty",
                self.database_url_env
            )
        })
    }
}

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve all secrets named by `config_json` from the process environment.
/// Absence is not an error here; callers that need a value use the
/// `require_*` accessors.
pub fn resolve_secrets(config_json: &Value) -> ResolvedSecrets {
    let database_url_env = read_str_at(config_json, "/database/url_env")
        .unwrap_or_else(|| DEFAULT_DATABASE_URL_ENV.to_string());
    let database_url = resolve_env(&database_url_env);
    ResolvedSecrets {
        database_url_env,
        database_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_the_url() {
        let s = ResolvedSecrets {
            database_url_env: "X_DB".to_string(),
            database_url: Some("postgres://user:hunter2@db/mls".to_string()),
        };
        let dbg = format!("{s:?}");
        assert!(dbg.contains("<REDACTED>"));
        assert!(!dbg.contains("hunter2"));
    }

    #[test]
    fn missing_url_error_names_the_variable() {
        let s = ResolvedSecrets {
            database_url_env: "MLS_TEST_UNSET_DB_URL".to_string(),
            database_url: None,
        };
        let err = s.require_database_url().unwrap_err().to_string();
        assert!(err.contains("MLS_TEST_UNSET_DB_URL"), "{err}");
    }

    #[test]
    fn env_name_defaults_when_config_is_silent() {
        let s = resolve_secrets(&serde_json::json!({}));
        assert_eq!(s.database_url_env, DEFAULT_DATABASE_URL_ENV);
    }
}
