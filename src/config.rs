// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! This module defines environment variable names, default values and the
//! [`AppConfig`] value built from them at startup. The config is constructed
//! once and handed to the components that need it; nothing reads the
//! environment after startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `DATA_DIR` | Directory holding the embedded database | `./data` |
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `SESSION_SECRET` | HS256 signing secret for session tokens | development value (warned) |
//! | `SUPER_ADMIN_EMAIL` | Reserved super-admin account | none |
//! | `CODE_TTL_MINUTES` | Verification code lifetime | `10` |
//! | `CODE_MAX_ATTEMPTS` | Failed submissions before lockout | `3` |
//! | `SESSION_TTL_HOURS` | Session token lifetime | `24` |
//! | `WEBSOCKET_TOKEN_TTL_MINUTES` | WebSocket handoff token lifetime | `60` |
//! | `COOKIE_SECURE` | Mark the session cookie `Secure` | `false` |
//! | `SMTP_HOST` / `SMTP_PORT` | SMTP relay (implicit TLS) | console mailer / `465` |
//! | `SMTP_USERNAME` / `SMTP_PASSWORD` | SMTP credentials | - |
//! | `SMTP_FROM_EMAIL` | Sender address | - |
//! | `MAIL_TIMEOUT_SECONDS` | Upper bound on one delivery | `15` |
//! | `APP_NAME` | Product name used in emails | `Access Portal` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files; HTTPS when both set | plain HTTP |
//! | `HASH_MEMORY_KIB` / `HASH_ITERATIONS` | Argon2id cost parameters | argon2 defaults |
//! | `TRUSTED_PROXIES` | Comma-separated proxy IPs whose forwarding headers are honoured | none |
//! | `RATE_LIMIT_CAPACITY` | Tracked (operation, address) keys | `100000` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |

use std::{env, net::IpAddr, path::PathBuf, str::FromStr, time::Duration};

/// Environment variable name for the data directory path.
pub const DATA_DIR_ENV: &str = "DATA_DIR";
pub const HOST_ENV: &str = "HOST";
pub const PORT_ENV: &str = "PORT";
/// Signing secret for every issued token. Rotating it ends all sessions.
pub const SESSION_SECRET_ENV: &str = "SESSION_SECRET";
pub const SUPER_ADMIN_EMAIL_ENV: &str = "SUPER_ADMIN_EMAIL";
pub const CODE_TTL_MINUTES_ENV: &str = "CODE_TTL_MINUTES";
pub const CODE_MAX_ATTEMPTS_ENV: &str = "CODE_MAX_ATTEMPTS";
pub const SESSION_TTL_HOURS_ENV: &str = "SESSION_TTL_HOURS";
pub const WEBSOCKET_TOKEN_TTL_MINUTES_ENV: &str = "WEBSOCKET_TOKEN_TTL_MINUTES";
pub const COOKIE_SECURE_ENV: &str = "COOKIE_SECURE";
pub const SMTP_HOST_ENV: &str = "SMTP_HOST";
pub const SMTP_PORT_ENV: &str = "SMTP_PORT";
pub const SMTP_USERNAME_ENV: &str = "SMTP_USERNAME";
pub const SMTP_PASSWORD_ENV: &str = "SMTP_PASSWORD";
pub const SMTP_FROM_EMAIL_ENV: &str = "SMTP_FROM_EMAIL";
pub const MAIL_TIMEOUT_SECONDS_ENV: &str = "MAIL_TIMEOUT_SECONDS";
pub const APP_NAME_ENV: &str = "APP_NAME";
pub const TLS_CERT_PATH_ENV: &str = "TLS_CERT_PATH";
pub const TLS_KEY_PATH_ENV: &str = "TLS_KEY_PATH";
pub const HASH_MEMORY_KIB_ENV: &str = "HASH_MEMORY_KIB";
pub const HASH_ITERATIONS_ENV: &str = "HASH_ITERATIONS";
pub const RATE_LIMIT_CAPACITY_ENV: &str = "RATE_LIMIT_CAPACITY";
/// Peers allowed to report the client address via `X-Forwarded-For`.
pub const TRUSTED_PROXIES_ENV: &str = "TRUSTED_PROXIES";
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Fallback signing secret used when `SESSION_SECRET` is unset.
///
/// Anyone who knows this value can mint sessions. It exists for local
/// development only and startup logs a warning whenever it is in effect.
pub const DEVELOPMENT_SESSION_SECRET: &str = "access-gate-development-signing-key";

/// Name of the database file inside `DATA_DIR`.
pub const DATABASE_FILE: &str = "access-gate.redb";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasherConfig {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
        }
    }
}

/// SMTP relay settings. Absent when any required variable is missing.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("from_email", &self.from_email)
            .finish()
    }
}

/// Paths for serving HTTPS directly.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Session and verification-code policy.
#[derive(Clone)]
pub struct AuthSettings {
    /// HS256 key material.
    pub session_secret: String,
    /// True when the development fallback secret is in use.
    pub using_development_secret: bool,
    /// Lowercased super-admin address, if any.
    pub super_admin_email: Option<String>,
    pub code_ttl: Duration,
    pub code_max_attempts: u32,
    pub session_ttl: Duration,
    pub websocket_token_ttl: Duration,
    /// Adds `Secure` to the session cookie. Off unless configured.
    pub cookie_secure: bool,
}

impl std::fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSettings")
            .field("session_secret", &"<redacted>")
            .field("using_development_secret", &self.using_development_secret)
            .field("super_admin_email", &self.super_admin_email)
            .field("code_ttl", &self.code_ttl)
            .field("code_max_attempts", &self.code_max_attempts)
            .field("session_ttl", &self.session_ttl)
            .field("websocket_token_ttl", &self.websocket_token_ttl)
            .field("cookie_secure", &self.cookie_secure)
            .finish()
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            session_secret: DEVELOPMENT_SESSION_SECRET.to_string(),
            using_development_secret: true,
            super_admin_email: None,
            code_ttl: Duration::from_secs(10 * 60),
            code_max_attempts: 3,
            session_ttl: Duration::from_secs(24 * 60 * 60),
            websocket_token_ttl: Duration::from_secs(60 * 60),
            cookie_secure: false,
        }
    }
}

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub app_name: String,
    pub auth: AuthSettings,
    pub hasher: HasherConfig,
    pub smtp: Option<SmtpConfig>,
    pub mail_timeout: Duration,
    pub tls: Option<TlsConfig>,
    pub rate_limit_capacity: usize,
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: PathBuf::from("./data"),
            app_name: "Access Portal".to_string(),
            auth: AuthSettings::default(),
            hasher: HasherConfig::default(),
            smtp: None,
            mail_timeout: Duration::from_secs(15),
            tls: None,
            rate_limit_capacity: 100_000,
            trusted_proxies: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let session_secret = get(SESSION_SECRET_ENV);
        let using_development_secret = session_secret.is_none();

        let auth = AuthSettings {
            session_secret: session_secret
                .unwrap_or_else(|| DEVELOPMENT_SESSION_SECRET.to_string()),
            using_development_secret,
            super_admin_email: get(SUPER_ADMIN_EMAIL_ENV).map(|e| e.to_lowercase()),
            code_ttl: Duration::from_secs(
                60 * positive::<u64, _>(&get, CODE_TTL_MINUTES_ENV, 10)?,
            ),
            code_max_attempts: positive(&get, CODE_MAX_ATTEMPTS_ENV, 3)?,
            session_ttl: Duration::from_secs(
                3600 * positive::<u64, _>(&get, SESSION_TTL_HOURS_ENV, 24)?,
            ),
            websocket_token_ttl: Duration::from_secs(
                60 * positive::<u64, _>(&get, WEBSOCKET_TOKEN_TTL_MINUTES_ENV, 60)?,
            ),
            cookie_secure: parse(&get, COOKIE_SECURE_ENV, false)?,
        };

        let hasher = HasherConfig {
            memory_kib: positive(&get, HASH_MEMORY_KIB_ENV, defaults.hasher.memory_kib)?,
            iterations: positive(&get, HASH_ITERATIONS_ENV, defaults.hasher.iterations)?,
        };

        let smtp = match (
            get(SMTP_HOST_ENV),
            get(SMTP_USERNAME_ENV),
            get(SMTP_PASSWORD_ENV),
            get(SMTP_FROM_EMAIL_ENV),
        ) {
            (Some(host), Some(username), Some(password), Some(from_email)) => Some(SmtpConfig {
                host,
                port: parse(&get, SMTP_PORT_ENV, 465)?,
                username,
                password,
                from_email,
            }),
            _ => None,
        };

        let tls = match (get(TLS_CERT_PATH_ENV), get(TLS_KEY_PATH_ENV)) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: PathBuf::from(cert),
                key_path: PathBuf::from(key),
            }),
            _ => None,
        };

        Ok(Self {
            host: get(HOST_ENV).unwrap_or(defaults.host),
            port: parse(&get, PORT_ENV, defaults.port)?,
            data_dir: get(DATA_DIR_ENV).map(PathBuf::from).unwrap_or(defaults.data_dir),
            app_name: get(APP_NAME_ENV).unwrap_or(defaults.app_name),
            auth,
            hasher,
            smtp,
            mail_timeout: Duration::from_secs(positive(
                &get,
                MAIL_TIMEOUT_SECONDS_ENV,
                15,
            )?),
            tls,
            rate_limit_capacity: positive(
                &get,
                RATE_LIMIT_CAPACITY_ENV,
                defaults.rate_limit_capacity,
            )?,
            trusted_proxies: ip_list(&get, TRUSTED_PROXIES_ENV)?,
        })
    }

    /// Path of the database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

fn parse<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

fn ip_list<G>(get: &G, name: &'static str) -> Result<Vec<IpAddr>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let Some(value) = get(name) else {
        return Ok(Vec::new());
    };
    value
        .split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| {
            ip.parse().map_err(|_| ConfigError::InvalidValue {
                name,
                value: ip.to_string(),
            })
        })
        .collect()
}

fn positive<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
    G: Fn(&str) -> Option<String>,
{
    let value = parse(get, name, default)?;
    if value <= T::default() {
        return Err(ConfigError::Zero(name));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = load(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.auth.code_ttl, Duration::from_secs(600));
        assert_eq!(config.auth.code_max_attempts, 3);
        assert_eq!(config.auth.session_ttl, Duration::from_secs(86_400));
        assert!(config.auth.using_development_secret);
        assert_eq!(config.auth.session_secret, DEVELOPMENT_SESSION_SECRET);
        assert!(!config.auth.cookie_secure);
        assert!(config.smtp.is_none());
        assert!(config.tls.is_none());
        assert!(config.trusted_proxies.is_empty());
    }

    #[test]
    fn durations_scale_from_their_units() {
        let config = load(&[
            (CODE_TTL_MINUTES_ENV, "5"),
            (SESSION_TTL_HOURS_ENV, "2"),
            (WEBSOCKET_TOKEN_TTL_MINUTES_ENV, "30"),
        ])
        .unwrap();
        assert_eq!(config.auth.code_ttl, Duration::from_secs(300));
        assert_eq!(config.auth.session_ttl, Duration::from_secs(7200));
        assert_eq!(config.auth.websocket_token_ttl, Duration::from_secs(1800));
    }

    #[test]
    fn trusted_proxies_parse_as_addresses() {
        let config = load(&[(TRUSTED_PROXIES_ENV, "10.0.0.1, ::1")]).unwrap();
        assert_eq!(
            config.trusted_proxies,
            vec![
                "10.0.0.1".parse::<IpAddr>().unwrap(),
                "::1".parse::<IpAddr>().unwrap()
            ]
        );
        assert!(matches!(
            load(&[(TRUSTED_PROXIES_ENV, "10.0.0.1,proxy.local")]),
            Err(ConfigError::InvalidValue { name: TRUSTED_PROXIES_ENV, .. })
        ));
    }

    #[test]
    fn explicit_secret_disables_development_flag() {
        let config = load(&[(SESSION_SECRET_ENV, "s3cr3t")]).unwrap();
        assert!(!config.auth.using_development_secret);
        assert_eq!(config.auth.session_secret, "s3cr3t");
    }

    #[test]
    fn super_admin_email_is_lowercased() {
        let config = load(&[(SUPER_ADMIN_EMAIL_ENV, " Root@Example.COM ")]).unwrap();
        assert_eq!(config.auth.super_admin_email.as_deref(), Some("root@example.com"));
    }

    #[test]
    fn smtp_requires_all_fields() {
        let partial = load(&[(SMTP_HOST_ENV, "smtp.example.com")]).unwrap();
        assert!(partial.smtp.is_none());

        let full = load(&[
            (SMTP_HOST_ENV, "smtp.example.com"),
            (SMTP_USERNAME_ENV, "mailer"),
            (SMTP_PASSWORD_ENV, "pw"),
            (SMTP_FROM_EMAIL_ENV, "security@example.com"),
        ])
        .unwrap();
        let smtp = full.smtp.unwrap();
        assert_eq!(smtp.port, 465);
        assert!(!format!("{smtp:?}").contains("pw"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            load(&[(PORT_ENV, "eighty")]),
            Err(ConfigError::InvalidValue { name: PORT_ENV, .. })
        ));
        assert!(matches!(
            load(&[(CODE_MAX_ATTEMPTS_ENV, "0")]),
            Err(ConfigError::Zero(CODE_MAX_ATTEMPTS_ENV))
        ));
    }
}
