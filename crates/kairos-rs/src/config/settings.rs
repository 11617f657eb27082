use log::debug;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Failures while assembling [`Config`] from the process environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for environment variable {name}: {value:?} ({reason})")]
    InvalidVar {
        name: String,
        value: String,
        reason: String,
    },
}

/// Deployment environment the router is running in. Qualifies the routing
/// table lookup key, the default WebSocket URL, and the default queue names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Beta,
    Staging,
}

impl Environment {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw {
            "prod" => Ok(Self::Prod),
            "beta" => Ok(Self::Beta),
            "staging" => Ok(Self::Staging),
            other => Err(ConfigError::InvalidVar {
                name: "ENVIRONMENT".to_string(),
                value: other.to_string(),
                reason: "expected one of: prod, beta, staging".to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Beta => "beta",
            Self::Staging => "staging",
        }
    }

    /// Test-only constructor, since [`Self::parse`] is private and real
    /// construction otherwise requires going through the process environment.
    #[cfg(test)]
    pub fn parse_for_test(raw: &str) -> Self {
        Self::parse(raw).unwrap()
    }
}

/// Process-wide configuration, assembled once at startup from the
/// environment. This loader is intentionally thin: env-var parsing with
/// explicit defaults and `thiserror` errors, no file-based layering.
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: Environment,
    pub router_host: String,
    pub router_port: u16,
    pub websocket_url: String,
    pub request_timeout: Duration,
    pub sqs_max_message_size: usize,
    pub s3_overflow_bucket: String,
    pub s3_overflow_prefix: String,
    pub compilation_results_bucket: String,
    pub compilation_results_prefix: String,
    pub aws_region: String,
    pub routing_table_name: String,
    pub queue_url_blue: Option<String>,
    pub queue_url_green: Option<String>,
}

impl Config {
    /// Reads `Config` from the process environment, per the variable list and
    /// defaults in `SPEC_FULL.md` §4.0.
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::parse(&require_var("ENVIRONMENT")?)?;

        let router_host = var_or("KAIROS_ROUTER_HOST", "0.0.0.0");
        let router_port = parse_var_or("KAIROS_ROUTER_PORT", 10240)?;

        let websocket_url = env::var("WEBSOCKET_URL").unwrap_or_else(|_| {
            format!("wss://events.godbolt.org/{}", environment.as_str())
        });

        let timeout_seconds: u64 = parse_var_or("TIMEOUT_SECONDS", 60)?;
        let sqs_max_message_size: usize = parse_var_or("SQS_MAX_MESSAGE_SIZE", 262_144)?;

        let s3_overflow_bucket = var_or("S3_OVERFLOW_BUCKET", "temp-storage.godbolt.org");
        let s3_overflow_prefix = var_or("S3_OVERFLOW_PREFIX", "sqs-overflow/");
        let compilation_results_bucket = var_or("COMPILATION_RESULTS_BUCKET", "storage.godbolt.org");
        let compilation_results_prefix = var_or("COMPILATION_RESULTS_PREFIX", "cache/");
        let aws_region = var_or("AWS_REGION", "us-east-1");
        let routing_table_name = var_or("ROUTING_TABLE_NAME", "CompilerRouting");

        let queue_url_blue = env::var("QUEUE_URL_BLUE").ok();
        let queue_url_green = env::var("QUEUE_URL_GREEN").ok();

        debug!(
            "Configuration loaded: environment={}, host={}, port={}, websocket_url={}",
            environment.as_str(),
            router_host,
            router_port,
            websocket_url
        );

        Ok(Self {
            environment,
            router_host,
            router_port,
            websocket_url,
            request_timeout: Duration::from_secs(timeout_seconds),
            sqs_max_message_size,
            s3_overflow_bucket,
            s3_overflow_prefix,
            compilation_results_bucket,
            compilation_results_prefix,
            aws_region,
            routing_table_name,
            queue_url_blue,
            queue_url_green,
        })
    }

    /// The queue URL to fall back to when a routing entry names no explicit
    /// queue, qualified by the given active color.
    pub fn default_queue_url(&self, color_is_blue: bool) -> Option<&str> {
        if color_is_blue {
            self.queue_url_blue.as_deref()
        } else {
            self.queue_url_green.as_deref()
        }
    }
}

fn require_var(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var_or<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
            name: name.to_string(),
            value: raw,
            reason: "expected a number".to_string(),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "ENVIRONMENT",
            "KAIROS_ROUTER_HOST",
            "KAIROS_ROUTER_PORT",
            "WEBSOCKET_URL",
            "TIMEOUT_SECONDS",
            "SQS_MAX_MESSAGE_SIZE",
            "S3_OVERFLOW_BUCKET",
            "S3_OVERFLOW_PREFIX",
            "COMPILATION_RESULTS_BUCKET",
            "COMPILATION_RESULTS_PREFIX",
            "AWS_REGION",
            "ROUTING_TABLE_NAME",
            "QUEUE_URL_BLUE",
            "QUEUE_URL_GREEN",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_environment_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        assert!(matches!(Config::from_env(), Err(ConfigError::MissingVar(ref v)) if v == "ENVIRONMENT"));
    }

    #[test]
    fn defaults_apply_when_environment_present() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("ENVIRONMENT", "staging");
        let cfg = Config::from_env().unwrap();
        assert_eq!(cfg.router_host, "0.0.0.0");
        assert_eq!(cfg.router_port, 10240);
        assert_eq!(cfg.websocket_url, "wss://events.godbolt.org/staging");
        assert_eq!(cfg.request_timeout, Duration::from_secs(60));
        assert_eq!(cfg.sqs_max_message_size, 262_144);
        assert_eq!(cfg.routing_table_name, "CompilerRouting");
        clear_all();
    }

    #[test]
    fn invalid_environment_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        env::set_var("ENVIRONMENT", "not-a-real-env");
        assert!(Config::from_env().is_err());
        clear_all();
    }
}
