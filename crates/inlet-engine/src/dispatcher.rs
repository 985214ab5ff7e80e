//! Handler registry and dispatch.
//!
//! Business logic plugs in per event type through [`DeliveryHandler`]; the
//! registry is assembled once at startup and never mutated afterwards, so
//! lookup is a plain map read. A delivery whose event type has no handler is
//! a permanent failure: it is dead-lettered on first sight without consuming
//! retry budget, since redelivering an unknown type can never succeed.

use std::{collections::HashMap, fmt, sync::Arc};

use inlet_core::models::DeliveryRecord;

use crate::error::HandlerError;

/// Business-logic handler for one event type.
///
/// Handlers are side-effecting (writing derived records, calling internal
/// services) and must be idempotent per delivery id: under worker-crash
/// windows the engine guarantees at-least-once execution, so a handler may
/// see the same delivery again even after it partially ran.
#[async_trait::async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Processes one claimed delivery.
    ///
    /// Classify failures carefully: [`HandlerError::Transient`] consumes
    /// retry budget, [`HandlerError::Permanent`] dead-letters immediately.
    async fn handle(&self, delivery: &DeliveryRecord) -> Result<(), HandlerError>;
}

/// Startup-time map from event-type tag to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DeliveryHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Registers a handler for an event type, replacing any previous one.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn DeliveryHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    /// Looks up the handler for an event type.
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn DeliveryHandler>> {
        self.handlers.get(event_type).cloned()
    }

    /// Event types with a registered handler.
    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry").field("event_types", &self.registered_types()).finish()
    }
}

/// Handler that accepts a delivery without side effects.
///
/// For pass-through deployments whose downstream consumers subscribe to the
/// emitted domain events only: registering `AckHandler` for an event type
/// marks it as accepted, and the emission carries it downstream.
#[derive(Debug, Default)]
pub struct AckHandler;

impl AckHandler {
    /// Creates a new acknowledging handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl DeliveryHandler for AckHandler {
    async fn handle(&self, _delivery: &DeliveryRecord) -> Result<(), HandlerError> {
        Ok(())
    }
}
