use std::collections::HashMap;
use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

/// How outbound email leaves the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailTransportKind {
    Smtp,
    Resend,
    /// Log the message instead of sending it (development only)
    Log,
}

impl MailTransportKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "smtp" => Some(Self::Smtp),
            "resend" => Some(Self::Resend),
            "log" | "mock" => Some(Self::Log),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub webhook_secret: String,
    pub shop_domain: Option<String>,
    pub admin_api_key: Option<String>,
    pub product_category_map: HashMap<String, String>,
    pub mail_transport: MailTransportKind,
    pub smtp: Option<SmtpConfig>,
    pub resend_api_key: Option<String>,
    pub from_email: String,
    pub email_retry: RetryPolicy,
    pub failed_email_log: String,
    pub supabase: Option<SupabaseConfig>,
}

fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match non_empty(name) {
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}

/// Parse `PRODUCT_CATEGORY_MAP` (a JSON object of product id -> category).
///
/// An unparseable value is not fatal: every product then falls back to the
/// suffix rule in [`crate::category::CategoryResolver`].
pub fn parse_category_map(raw: Option<&str>) -> HashMap<String, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return HashMap::new();
    };
    match serde_json::from_str::<HashMap<String, String>>(raw) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(error = %e, "PRODUCT_CATEGORY_MAP is not a JSON object of strings, ignoring it");
            HashMap::new()
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = parse_or("PORT", 8000)?;

        let webhook_secret =
            non_empty("SHOPIFY_WEBHOOK_SECRET").ok_or(ConfigError::Missing("SHOPIFY_WEBHOOK_SECRET"))?;

        let mail_transport = match non_empty("MAIL_TRANSPORT") {
            Some(v) => MailTransportKind::parse(&v).ok_or(ConfigError::Invalid {
                name: "MAIL_TRANSPORT",
                value: v,
            })?,
            None => MailTransportKind::Smtp,
        };

        let smtp = match non_empty("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", 465)?,
                username: non_empty("SMTP_USERNAME").ok_or(ConfigError::Missing("SMTP_USERNAME"))?,
                password: non_empty("SMTP_PASSWORD").ok_or(ConfigError::Missing("SMTP_PASSWORD"))?,
            }),
            None => None,
        };
        if mail_transport == MailTransportKind::Smtp && smtp.is_none() {
            return Err(ConfigError::Missing("SMTP_HOST"));
        }

        let resend_api_key = non_empty("RESEND_API_KEY");
        if mail_transport == MailTransportKind::Resend && resend_api_key.is_none() {
            return Err(ConfigError::Missing("RESEND_API_KEY"));
        }

        let from_email = match non_empty("SMTP_FROM_EMAIL") {
            Some(from) => from,
            None if mail_transport == MailTransportKind::Log => "licenses@localhost".to_string(),
            None => return Err(ConfigError::Missing("SMTP_FROM_EMAIL")),
        };

        let max_attempts: u32 = parse_or("EMAIL_MAX_ATTEMPTS", 3)?;
        if max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "EMAIL_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let base_ms: u64 = parse_or("EMAIL_RETRY_BASE_MS", 1000)?;

        let supabase = match (non_empty("SUPABASE_URL"), non_empty("SUPABASE_KEY")) {
            (Some(url), Some(key)) => Some(SupabaseConfig { url, key }),
            _ => None,
        };

        Ok(Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "licensedrop.db".to_string()),
            webhook_secret,
            shop_domain: non_empty("SHOPIFY_SHOP_DOMAIN")
                .map(|d| d.trim_end_matches('/').to_string()),
            admin_api_key: non_empty("ADMIN_API_KEY"),
            product_category_map: parse_category_map(non_empty("PRODUCT_CATEGORY_MAP").as_deref()),
            mail_transport,
            smtp,
            resend_api_key,
            from_email,
            email_retry: RetryPolicy::new(max_attempts, Duration::from_millis(base_ms)),
            failed_email_log: env::var("FAILED_EMAIL_LOG")
                .unwrap_or_else(|_| "failed_emails.jsonl".to_string()),
            supabase,
        })
    }

    /// Database path for the CLI commands, which need nothing else.
    pub fn database_path_from_env() -> String {
        dotenvy::dotenv().ok();
        env::var("DATABASE_PATH").unwrap_or_else(|_| "licensedrop.db".to_string())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_map_parses_json_object() {
        let map = parse_category_map(Some(r#"{"8377160843557": "basic", "42": "pro"}"#));
        assert_eq!(map.get("8377160843557").map(String::as_str), Some("basic"));
        assert_eq!(map.get("42").map(String::as_str), Some("pro"));
    }

    #[test]
    fn test_category_map_invalid_json_is_empty() {
        assert!(parse_category_map(Some("not json")).is_empty());
        assert!(parse_category_map(Some(r#"["basic"]"#)).is_empty());
        assert!(parse_category_map(Some("   ")).is_empty());
        assert!(parse_category_map(None).is_empty());
    }

    #[test]
    fn test_mail_transport_kind_parse() {
        assert_eq!(MailTransportKind::parse("SMTP"), Some(MailTransportKind::Smtp));
        assert_eq!(MailTransportKind::parse("resend"), Some(MailTransportKind::Resend));
        assert_eq!(MailTransportKind::parse("mock"), Some(MailTransportKind::Log));
        assert_eq!(MailTransportKind::parse("carrier-pigeon"), None);
    }
}
