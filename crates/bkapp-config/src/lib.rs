//! KDL configuration parsing for the BkApp operator.
//!
//! This crate handles parsing of:
//! - Operator settings (watch namespace, worker concurrency, pass timeout)
//! - Requeue and backoff policy
//! - Log settings

pub mod error;
pub mod operator;

pub use error::{ConfigError, ConfigResult};
pub use operator::{
    LogConfig, LogFormat, OperatorConfig, RequeuePolicy, load_operator_config,
    parse_duration, parse_operator_config,
};
