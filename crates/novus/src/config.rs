//! Process configuration read from the environment.

use std::env;
use std::time::Duration;

use novus_core::RetryPolicy;
use novus_openai_model::{OpenAIConfig, OpenAIConfigBuilder};

use crate::tools::{TaskStepPolicy, ToolsConfig};

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_MODEL_RETRY_SECS: u64 = 30;
const DEFAULT_SESSION_IDLE_SECS: u64 = 300;

/// A configuration variable that is missing or malformed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} environment variable is not set")]
    Missing(&'static str),
    /// A variable is set to a value that cannot be used.
    #[error("{name} has an invalid value `{value}`: {reason}")]
    Invalid {
        /// Variable name.
        name: &'static str,
        /// The offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Everything the server needs, read once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    /// Connection settings of the model provider.
    pub openai: OpenAIConfig,
    /// Port the HTTP server listens on.
    pub port: u16,
    /// How long a deferred call waits for the client, `None` waits until it
    /// is resolved or the session is deleted.
    pub deferred_timeout: Option<Duration>,
    /// Retry schedule of model requests.
    pub retry_policy: RetryPolicy,
    /// How long a session may go without a client before it is removed.
    pub session_idle_timeout: Duration,
    /// Tool selection and behavior.
    pub tools: ToolsConfig,
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which returns the value of
    /// a variable if it is set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset.
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
        };

        let api_key =
            var("OPENAI_API_KEY").ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;
        let mut openai = OpenAIConfigBuilder::with_api_key(api_key);
        if let Some(base_url) = var("OPENAI_BASE_URL") {
            openai = openai.with_base_url(base_url);
        }
        if let Some(model) = var("OPENAI_MODEL") {
            openai = openai.with_model(model);
        }

        let port = match var("NOVUS_PORT") {
            Some(value) => parse_number("NOVUS_PORT", value)?,
            None => DEFAULT_PORT,
        };
        let deferred_timeout = var("NOVUS_DEFERRED_TIMEOUT_SECS")
            .map(|value| parse_secs("NOVUS_DEFERRED_TIMEOUT_SECS", value))
            .transpose()?;
        let session_idle_timeout = match var("NOVUS_SESSION_IDLE_SECS") {
            Some(value) => parse_secs("NOVUS_SESSION_IDLE_SECS", value)?,
            None => Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
        };
        let retry_secs = match var("NOVUS_MODEL_RETRY_SECS") {
            Some(value) => parse_number("NOVUS_MODEL_RETRY_SECS", value)?,
            None => DEFAULT_MODEL_RETRY_SECS,
        };
        let task_step_policy = match var("NOVUS_STRICT_TASK_STEPS") {
            Some(value) => {
                if parse_flag("NOVUS_STRICT_TASK_STEPS", value)? {
                    TaskStepPolicy::Enforced
                } else {
                    TaskStepPolicy::Advisory
                }
            }
            None => TaskStepPolicy::Advisory,
        };

        Ok(Self {
            openai: openai.build(),
            port,
            deferred_timeout,
            retry_policy: RetryPolicy::default()
                .with_max_elapsed_time(Some(Duration::from_secs(retry_secs))),
            session_idle_timeout,
            tools: ToolsConfig {
                gmail_access_token: var("GMAIL_ACCESS_TOKEN"),
                task_step_policy,
            },
        })
    }
}

fn parse_number<T>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    value.parse().map_err(|err: std::num::ParseIntError| {
        ConfigError::Invalid {
            name,
            reason: err.to_string(),
            value,
        }
    })
}

fn parse_secs(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_number(name, value.clone())?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            value,
            reason: "must be at least one second".to_owned(),
        });
    }
    Ok(Duration::from_secs(secs))
}

fn parse_flag(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value,
            reason: "expected a boolean".to_owned(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| ((*name).to_owned(), (*value).to_owned()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("OPENAI_API_KEY", "sk-test")]).unwrap();
        assert_eq!(config.openai.model(), "gpt-4o");
        assert_eq!(config.port, 8000);
        assert_eq!(config.deferred_timeout, None);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(300));
        assert_eq!(
            config.retry_policy.max_elapsed_time,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.tools.task_step_policy, TaskStepPolicy::Advisory);
        assert_eq!(config.tools.gmail_access_token, None);
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("NOVUS_PORT", "9090"),
            ("NOVUS_DEFERRED_TIMEOUT_SECS", "120"),
            ("NOVUS_STRICT_TASK_STEPS", "true"),
            ("NOVUS_MODEL_RETRY_SECS", "5"),
            ("NOVUS_SESSION_IDLE_SECS", "60"),
            ("GMAIL_ACCESS_TOKEN", "ya29.token"),
        ])
        .unwrap();
        assert_eq!(config.openai.model(), "gpt-4o-mini");
        assert_eq!(config.port, 9090);
        assert_eq!(config.deferred_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.session_idle_timeout, Duration::from_secs(60));
        assert_eq!(
            config.retry_policy.max_elapsed_time,
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.tools.task_step_policy, TaskStepPolicy::Enforced);
        assert_eq!(config.tools.gmail_access_token.as_deref(), Some("ya29.token"));
    }

    #[test]
    fn test_errors() {
        let err = config(&[("OPENAI_API_KEY", "  ")]).unwrap_err();
        assert_eq!(err.to_string(), "OPENAI_API_KEY environment variable is not set");

        let err = config(&[("OPENAI_API_KEY", "sk-test"), ("NOVUS_PORT", "http")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "NOVUS_PORT", .. }));

        let err = config(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("NOVUS_STRICT_TASK_STEPS", "maybe"),
        ])
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "NOVUS_STRICT_TASK_STEPS has an invalid value `maybe`: expected a boolean"
        );

        for name in ["NOVUS_DEFERRED_TIMEOUT_SECS", "NOVUS_SESSION_IDLE_SECS"] {
            let err = config(&[("OPENAI_API_KEY", "sk-test"), (name, "0")])
                .unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("{name} has an invalid value `0`: must be at least one second")
            );
        }
    }
}
