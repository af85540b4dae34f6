use std::path::PathBuf;

use serde_json::Value;

use crate::models::DepartmentRoute;

pub const DEFAULT_DATABASE: &str = "studentDB";
pub const DEFAULT_COLLECTION: &str = "latecomers";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("SMTP_PORT must be a valid port number, got '{0}'")]
    InvalidPort(String),
    #[error("DEPT_MAPPINGS is not valid JSON")]
    MappingJson(#[source] serde_json::Error),
    #[error("DEPT_MAPPINGS must be a JSON object of department name to email")]
    MappingShape,
    #[error("DEPT_MAPPINGS entry for '{0}' must be a string or null")]
    MappingValue(String),
}

/// Reads a required variable, treating blank values as absent.
fn required<F>(lookup: &F, key: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::Missing(key))
}

fn optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Loads the local `.env` override file, if any.
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Document store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
    pub tls_ca_file: Option<PathBuf>,
}

impl StoreConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            uri: required(&lookup, "MONGO_URI")?,
            database: optional(&lookup, "MONGO_DATABASE")
                .unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            collection: optional(&lookup, "MONGO_COLLECTION")
                .unwrap_or_else(|| DEFAULT_COLLECTION.to_string()),
            tls_ca_file: optional(&lookup, "MONGO_TLS_CA_FILE").map(PathBuf::from),
        })
    }
}

/// SMTP relay and sender settings.
#[derive(Clone)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub sender_email: String,
    pub sender_password: String,
    pub all_mail: String,
}

impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("sender_email", &self.sender_email)
            .field("sender_password", &"<redacted>")
            .field("all_mail", &self.all_mail)
            .finish()
    }
}

impl MailConfig {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server = required(&lookup, "SMTP_SERVER")?;
        let raw_port = required(&lookup, "SMTP_PORT")?;
        let port = raw_port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(raw_port.clone()))?;

        Ok(Self {
            server,
            port,
            sender_email: required(&lookup, "SENDER_EMAIL")?,
            sender_password: required(&lookup, "SENDER_PASSWORD")?,
            all_mail: required(&lookup, "ALL_MAIL")?,
        })
    }
}

/// Ordered department → recipient mapping from `DEPT_MAPPINGS`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepartmentMappings {
    routes: Vec<DepartmentRoute>,
}

impl DepartmentMappings {
    pub fn new(routes: Vec<DepartmentRoute>) -> Self {
        Self { routes }
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = required(&lookup, "DEPT_MAPPINGS")?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(raw).map_err(ConfigError::MappingJson)?;
        let Value::Object(entries) = value else {
            return Err(ConfigError::MappingShape);
        };

        let mut routes = Vec::with_capacity(entries.len());
        for (department, email) in entries {
            let email = match email {
                Value::String(address) if address.trim().is_empty() => None,
                Value::String(address) => Some(address.trim().to_string()),
                Value::Null => None,
                _ => return Err(ConfigError::MappingValue(department)),
            };
            routes.push(DepartmentRoute { department, email });
        }

        Ok(Self { routes })
    }

    pub fn routes(&self) -> &[DepartmentRoute] {
        &self.routes
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl TelemetryConfig {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            log_level: optional(&lookup, "LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }
}
