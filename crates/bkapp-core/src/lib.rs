//! Core domain types and traits for the BkApp operator.
//!
//! This crate contains:
//! - The BkApp custom resource and its label contract
//! - Object keys and the error taxonomy
//! - Status condition bookkeeping
//! - The resource store abstraction
//! - The reconcile step contract

pub mod application;
pub mod conditions;
pub mod error;
pub mod key;
pub mod reconcile;
pub mod store;

pub use application::{AppSpec, AppStatus, BkApp, HookType};
pub use conditions::{ConditionStatus, NewCondition};
pub use error::{Error, ErrorClass, Result};
pub use key::ObjectKey;
pub use reconcile::{ReconcileContext, ReconcileResult, Reconciler};
pub use store::{LabelSelector, OwnerRef, ResourceStore};
