// [library] Secrecy crate - keeps the database URL out of Debug output and logs
use secrecy::{ExposeSecret, Secret};

use crate::{
    auth::AuthDefaults, ca::MAX_VALIDITY_DAYS, enroll::OrchestratorSettings, oauth::TokenPolicy,
};
use serde_json::{Map, Value};
use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};
use time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // [business] Network binding configuration
    pub app_host: IpAddr,
    pub app_port: u16,

    // [security] Postgres connection string; absent means in-memory stores
    pub database_url: Option<Secret<String>>,
    pub database_max_connections: u32,

    // [business] JSON array of realm records for the in-memory realm store
    pub realms_file: Option<PathBuf>,

    // [business] Realm whose identity provider guesses the realm for realm-less requests
    pub base_realm: Option<String>,

    // [business] Auth backend defaults; each realm's `auth` object overrides them key by key
    pub auth_service: Option<String>,
    pub auth_params: Map<String, Value>,

    // [business] Credential lifetimes
    pub auth_code_ttl_secs: i64,
    pub access_token_ttl_secs: i64,

    // [business] Certificate policy
    pub certificate_scope: String,
    pub max_certificate_validity_days: u32,

    // [business] Client the in-browser credentials flow acts as
    pub browser_client_id: String,
    pub browser_redirect_uri: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            app_port: 8080,
            database_url: None,
            database_max_connections: 10,
            realms_file: None,
            base_realm: None,
            auth_service: None,
            auth_params: Map::new(),
            auth_code_ttl_secs: 300,
            access_token_ttl_secs: 3600,
            certificate_scope: "eap-metadata".to_string(),
            max_certificate_validity_days: 365,
            browser_client_id: "browser".to_string(),
            browser_redirect_uri: "urn:ietf:wg:oauth:2.0:oob".to_string(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// [rust] Parse with fallback - a malformed value is reported but never fatal
fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match non_empty_var(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(variable = name, value = %raw, "Ignoring unparsable configuration value");
            default
        }),
    }
}

impl Config {
    // [business] Factory method - creates Config from environment variables
    pub fn from_env() -> Result<Self, anyhow::Error> {
        // [library] Load .env file if present - useful for development environments
        dotenvy::dotenv().ok();

        let defaults = Config::default();
        let auth_params = match non_empty_var("AUTH_PARAMS") {
            None => Map::new(),
            Some(raw) => serde_json::from_str::<Map<String, Value>>(&raw)
                .map_err(|e| anyhow::anyhow!("AUTH_PARAMS must be a JSON object: {}", e))?,
        };
        let config = Config {
            app_host: parsed_var("APP_HOST", defaults.app_host),
            app_port: parsed_var("APP_PORT", defaults.app_port),
            database_url: non_empty_var("DATABASE_URL").map(Secret::new),
            database_max_connections: parsed_var(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            realms_file: non_empty_var("REALMS_FILE").map(PathBuf::from),
            base_realm: non_empty_var("BASE_REALM"),
            auth_service: non_empty_var("AUTH_SERVICE"),
            auth_params,
            auth_code_ttl_secs: parsed_var("AUTH_CODE_TTL_SECS", defaults.auth_code_ttl_secs),
            access_token_ttl_secs: parsed_var(
                "ACCESS_TOKEN_TTL_SECS",
                defaults.access_token_ttl_secs,
            ),
            certificate_scope: non_empty_var("CERTIFICATE_SCOPE")
                .unwrap_or(defaults.certificate_scope),
            // [security] Configuration may lower the hard maximum, never raise it
            max_certificate_validity_days: parsed_var(
                "MAX_CERTIFICATE_VALIDITY_DAYS",
                defaults.max_certificate_validity_days,
            )
            .min(MAX_VALIDITY_DAYS),
            browser_client_id: non_empty_var("BROWSER_CLIENT_ID")
                .unwrap_or(defaults.browser_client_id),
            browser_redirect_uri: non_empty_var("BROWSER_REDIRECT_URI")
                .unwrap_or(defaults.browser_redirect_uri),
        };

        if config.auth_code_ttl_secs <= 0 || config.access_token_ttl_secs <= 0 {
            anyhow::bail!("AUTH_CODE_TTL_SECS and ACCESS_TOKEN_TTL_SECS must be positive");
        }
        if config.database_url.is_none() && config.realms_file.is_none() {
            anyhow::bail!("either DATABASE_URL or REALMS_FILE must be set");
        }

        // [library] Startup summary, secrets excluded
        tracing::info!(
            bind = %config.bind_address(),
            storage = if config.database_url.is_some() { "postgres" } else { "memory" },
            base_realm = ?config.base_realm,
            auth_service = ?config.auth_service,
            certificate_scope = %config.certificate_scope,
            max_validity_days = config.max_certificate_validity_days,
            "Config loaded"
        );

        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.app_host, self.app_port)
    }

    // [security] Controlled access to the database URL
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_ref().map(|url| url.expose_secret().as_str())
    }

    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            code_ttl: Duration::seconds(self.auth_code_ttl_secs),
            access_ttl: Duration::seconds(self.access_token_ttl_secs),
        }
    }

    pub fn auth_defaults(&self) -> AuthDefaults {
        AuthDefaults::new(self.auth_service.as_deref(), self.auth_params.clone())
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            base_realm: self.base_realm.clone(),
            browser_client_id: self.browser_client_id.clone(),
            browser_redirect_uri: self.browser_redirect_uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.bind_address(), "0.0.0.0:8080");
        assert_eq!(config.database_url(), None);
        assert_eq!(config.token_policy().code_ttl, Duration::minutes(5));
        assert_eq!(config.token_policy().access_ttl, Duration::hours(1));
        assert_eq!(config.orchestrator_settings().browser_client_id, "browser");
    }

    #[test]
    fn test_auth_defaults() {
        let mut config = Config::default();
        config.auth_service = Some("saml".into());
        config.auth_params = serde_json::json!({"login_url": "https://login.example.org/"})
            .as_object()
            .unwrap()
            .clone();

        let merged = config
            .auth_defaults()
            .merge(&serde_json::json!({"user_id_attribute": "uid"}))
            .unwrap();
        assert_eq!(
            merged,
            serde_json::json!({
                "service": "saml",
                "login_url": "https://login.example.org/",
                "user_id_attribute": "uid"
            })
        );
    }

    #[test]
    fn test_parsed_var_fallback() {
        std::env::set_var("EDUROAM_ENROLL_TEST_PORT", "not-a-port");
        assert_eq!(parsed_var("EDUROAM_ENROLL_TEST_PORT", 8080u16), 8080);
        std::env::set_var("EDUROAM_ENROLL_TEST_PORT", " 9090 ");
        assert_eq!(parsed_var("EDUROAM_ENROLL_TEST_PORT", 8080u16), 9090);
        std::env::remove_var("EDUROAM_ENROLL_TEST_PORT");
        assert_eq!(parsed_var("EDUROAM_ENROLL_TEST_PORT", 8080u16), 8080);
    }
}
