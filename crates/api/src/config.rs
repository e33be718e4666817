//! Client credentials and environment selection.

use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::errors::ApiError;

pub const ENV_API_KEY: &str = "TRADING212_API_KEY";
pub const ENV_API_SECRET: &str = "TRADING212_API_SECRET";
pub const ENV_ENVIRONMENT: &str = "ENVIRONMENT";

const API_VERSION: &str = "v0";

/// Which brokerage environment the credentials belong to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Demo,
    Live,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Demo => "demo",
            Environment::Live => "live",
        }
    }

    pub fn base_url(&self) -> String {
        format!("https://{}.trading212.com/api/{}", self.as_str(), API_VERSION)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "demo" => Ok(Environment::Demo),
            "live" => Ok(Environment::Live),
            other => Err(ApiError::Config(format!("Unknown environment '{}'", other))),
        }
    }
}

/// Credentials and target environment for the API client.
#[derive(Clone)]
pub struct ClientConfig {
    pub api_key: String,
    pub api_secret: String,
    pub environment: Environment,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .field("environment", &self.environment)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>, environment: Environment) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            environment,
        }
    }

    /// Read credentials from `TRADING212_API_KEY` / `TRADING212_API_SECRET`
    /// and the environment from `ENVIRONMENT` (default `demo`).
    pub fn from_env() -> Result<Self, ApiError> {
        let api_key = read_required(ENV_API_KEY)?;
        let api_secret = read_required(ENV_API_SECRET)?;

        let environment = match std::env::var(ENV_ENVIRONMENT) {
            Ok(value) if !value.trim().is_empty() => value.parse().unwrap_or_else(|e| {
                warn!("{}, falling back to demo", e);
                Environment::Demo
            }),
            _ => Environment::Demo,
        };

        Ok(Self::new(api_key, api_secret, environment))
    }

    pub fn base_url(&self) -> String {
        self.environment.base_url()
    }
}

fn read_required(name: &str) -> Result<String, ApiError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ApiError::Config(format!(
            "{} is required. Set the {} environment variable.",
            name, name
        ))),
    }
}
