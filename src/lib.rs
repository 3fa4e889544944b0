/// Restwright: JSON automation definitions served as live REST APIs
///
/// An automation declares a base path, a set of endpoints with typed
/// parameters, and a storage binding. Definitions are validated, compiled and
/// hot-swapped into a registry that routes requests to CRUD operations on the
/// bound backend.

// Core configuration and setup
pub mod config;

// Error taxonomy and field violations
pub mod error;

// Automation management layer - definitions, validation, registry, lifecycle
pub mod automation;

// Storage backends behind a uniform CRUD interface
pub mod backend;

// Persistence of raw automation documents
pub mod definitions;

// Runtime execution - parameter binding, auth, endpoint execution
pub mod runtime;

// HTTP API layer - console, dynamic dispatch, health
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use automation::{Automation, AutomationRegistry, AutomationService, Endpoint, HttpMethod, Parameter};
pub use error::{AutomationError, Rule, Violation};
pub use server::start_server;
