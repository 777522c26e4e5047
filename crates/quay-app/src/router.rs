//! Router adapter interface.
//!
//! Routers publish a backend per app and map routes (unit addresses) and
//! CNAMEs onto it. Reconciliation treats `BackendExists` and
//! `CnameExists` as success when the existing state matches the desired
//! one.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{AppError, AppResult};

/// Result type alias for router calls.
pub type RouterResult<T> = Result<T, RouterError>;

/// Errors surfaced by router adapters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("backend already exists")]
    BackendExists,

    #[error("backend not found")]
    BackendNotFound,

    #[error("cname already exists")]
    CnameExists,

    #[error("cname not found")]
    CnameNotFound,

    #[error("route not found")]
    RouteNotFound,

    #[error("router error: {0}")]
    Failed(String),
}

/// A router adapter, identified by the router name on the app's plan.
pub trait Router: Send + Sync {
    fn add_backend(&self, name: &str) -> RouterResult<()>;
    fn remove_backend(&self, name: &str) -> RouterResult<()>;
    fn set_cname(&self, cname: &str, name: &str) -> RouterResult<()>;
    fn unset_cname(&self, cname: &str, name: &str) -> RouterResult<()>;
    fn addr(&self, name: &str) -> RouterResult<String>;
    fn routes(&self, name: &str) -> RouterResult<Vec<String>>;
    fn add_route(&self, name: &str, address: &str) -> RouterResult<()>;
    fn remove_route(&self, name: &str, address: &str) -> RouterResult<()>;
    /// Whether the backend is currently swapped, and with whom.
    fn is_swapped(&self, name: &str) -> RouterResult<(bool, String)>;
}

/// Named router adapters, resolved through the plan's router name.
#[derive(Clone, Default)]
pub struct RouterRegistry {
    default_name: String,
    routers: HashMap<String, Arc<dyn Router>>,
}

impl RouterRegistry {
    /// Create a registry whose empty-name lookups resolve to
    /// `default_name`.
    pub fn new(default_name: &str) -> Self {
        Self {
            default_name: default_name.to_string(),
            routers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: &str, router: Arc<dyn Router>) {
        self.routers.insert(name.to_string(), router);
    }

    /// Resolve a router by name; an empty name resolves to the default.
    pub fn get(&self, name: &str) -> AppResult<Arc<dyn Router>> {
        let name = if name.is_empty() { &self.default_name } else { name };
        self.routers
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::RouterNotFound(name.to_string()))
    }
}
