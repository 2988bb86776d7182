//! Operator configuration parsing.

use std::path::Path;
use std::time::Duration;

use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};

/// Operator-wide configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorConfig {
    /// Namespace to watch. All namespaces when unset.
    pub namespace: Option<String>,
    /// Number of applications reconciled in parallel.
    pub concurrency: u16,
    /// Upper bound on a single reconcile pass.
    pub pass_timeout: Duration,
    pub requeue: RequeuePolicy,
    pub log: LogConfig,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: 4,
            pass_timeout: Duration::from_secs(30),
            requeue: RequeuePolicy::default(),
            log: LogConfig::default(),
        }
    }
}

/// When to run the next pass for an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequeuePolicy {
    /// First delay after a step reported it is blocked.
    pub blocked: Duration,
    /// Cap for the doubling blocked delay.
    pub blocked_max: Duration,
    /// Delay after a transient store failure.
    pub error: Duration,
    /// Delay after an optimistic concurrency conflict.
    pub conflict: Duration,
    /// Delay after a failure that retrying alone will not fix.
    pub fatal: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            blocked: Duration::from_secs(5),
            blocked_max: Duration::from_secs(120),
            error: Duration::from_secs(1),
            conflict: Duration::ZERO,
            fatal: Duration::from_secs(300),
        }
    }
}

impl RequeuePolicy {
    /// Delay before retrying a blocked application for the `attempt`-th
    /// consecutive time (starting at 0).
    pub fn blocked_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.blocked
            .checked_mul(factor)
            .unwrap_or(self.blocked_max)
            .min(self.blocked_max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                field: "log format".to_string(),
                message: format!("unknown log format: {}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Load operator configuration from a KDL file.
pub fn load_operator_config(path: impl AsRef<Path>) -> ConfigResult<OperatorConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_operator_config(&text)
}

/// Parse operator configuration from KDL text. Missing nodes keep defaults.
pub fn parse_operator_config(kdl: &str) -> ConfigResult<OperatorConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = OperatorConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "operator" => parse_operator(node, &mut config)?,
            "requeue" => parse_requeue(node, &mut config.requeue)?,
            "log" => parse_log(node, &mut config.log)?,
            _ => {} // Ignore unknown nodes
        }
    }

    if config.requeue.blocked_max < config.requeue.blocked {
        return Err(ConfigError::InvalidValue {
            field: "requeue.blocked-max".to_string(),
            message: "must not be shorter than requeue.blocked".to_string(),
        });
    }

    Ok(config)
}

fn parse_operator(node: &KdlNode, config: &mut OperatorConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "namespace" => {
                let ns = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("operator.namespace".to_string()))?;
                config.namespace = Some(ns).filter(|ns| !ns.is_empty());
            }
            "concurrency" => {
                let value = get_first_integer_arg(child).ok_or_else(|| {
                    ConfigError::MissingField("operator.concurrency".to_string())
                })?;
                config.concurrency = u16::try_from(value)
                    .ok()
                    .filter(|c| *c > 0)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        field: "operator.concurrency".to_string(),
                        message: format!("expected 1..=65535, got {}", value),
                    })?;
            }
            "pass-timeout" => {
                config.pass_timeout = get_duration_arg(child, "operator.pass-timeout")?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_requeue(node: &KdlNode, policy: &mut RequeuePolicy) -> ConfigResult<()> {
    for child in children(node) {
        let name = child.name().value();
        let field = format!("requeue.{}", name);
        match name {
            "blocked" => policy.blocked = get_duration_arg(child, &field)?,
            "blocked-max" => policy.blocked_max = get_duration_arg(child, &field)?,
            "error" => policy.error = get_duration_arg(child, &field)?,
            "conflict" => policy.conflict = get_duration_arg(child, &field)?,
            "fatal" => policy.fatal = get_duration_arg(child, &field)?,
            _ => {}
        }
    }
    Ok(())
}

fn parse_log(node: &KdlNode, log: &mut LogConfig) -> ConfigResult<()> {
    for child in children(node) {
        match child.name().value() {
            "filter" => {
                log.filter = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("log.filter".to_string()))?;
            }
            "format" => {
                log.format = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("log.format".to_string()))?
                    .parse()?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Parse a duration such as `500ms`, `5s`, `2m` or `1h 30m`. A bare number
/// is read as seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| ConfigError::InvalidValue {
        field: "duration".to_string(),
        message: format!("'{}': {}", s, e),
    })
}

// Helper functions for extracting values from KDL nodes

fn children(node: &KdlNode) -> impl Iterator<Item = &KdlNode> {
    node.children().into_iter().flat_map(|doc| doc.nodes())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_first_integer_arg(node: &KdlNode) -> Option<i128> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
}

fn get_duration_arg(node: &KdlNode, field: &str) -> ConfigResult<Duration> {
    if let Some(text) = get_first_string_arg(node) {
        return parse_duration(&text).map_err(|e| match e {
            ConfigError::InvalidValue { message, .. } => ConfigError::InvalidValue {
                field: field.to_string(),
                message,
            },
            other => other,
        });
    }
    match get_first_integer_arg(node) {
        Some(secs) => u64::try_from(secs)
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue {
                field: field.to_string(),
                message: format!("negative duration: {}", secs),
            }),
        None => Err(ConfigError::MissingField(field.to_string())),
    }
}
