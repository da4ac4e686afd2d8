//! Sync configuration and callback payloads.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_BATCH_SIZE;
use crate::errors::StoreError;
use crate::models::Document;

/// Direction of a transfer relative to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Pull,
    Push,
}

impl SyncDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncDirection::Pull => "pull",
            SyncDirection::Push => "push",
        }
    }
}

/// One replicated batch.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncChange {
    pub direction: SyncDirection,
    /// Fraction of the known work done so far; `None` when the total is unknown
    pub progress: Option<f64>,
    pub docs: Vec<Document>,
}

/// Payload of the `on_active` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveInfo {
    pub direction: SyncDirection,
}

pub type ChangeCallback = Arc<dyn Fn(&SyncChange) + Send + Sync>;
pub type ActiveCallback = Arc<dyn Fn(&ActiveInfo) + Send + Sync>;
pub type IdleCallback = Arc<dyn Fn() + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Callbacks and tuning for a sync association. Every callback is optional.
#[derive(Clone)]
pub struct SyncOptions {
    pub on_change: Option<ChangeCallback>,
    pub on_active: Option<ActiveCallback>,
    pub on_idle: Option<IdleCallback>,
    pub on_error: Option<ErrorCallback>,
    /// Maximum documents per batch
    pub batch_size: usize,
    /// Pre-shared key sent to HTTP sync servers
    pub api_key: Option<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            on_change: None,
            on_active: None,
            on_idle: None,
            on_error: None,
            batch_size: DEFAULT_BATCH_SIZE,
            api_key: None,
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("on_change", &self.on_change.is_some())
            .field("on_active", &self.on_active.is_some())
            .field("on_idle", &self.on_idle.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("batch_size", &self.batch_size)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl SyncOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn on_change(mut self, callback: impl Fn(&SyncChange) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Arc::new(callback));
        self
    }

    pub fn on_active(mut self, callback: impl Fn(&ActiveInfo) + Send + Sync + 'static) -> Self {
        self.on_active = Some(Arc::new(callback));
        self
    }

    pub fn on_idle(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_idle = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&StoreError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}
