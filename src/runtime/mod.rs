/// Runtime Execution Layer
///
/// Everything that happens per request once an automation is live:
/// - Binding and coercing request parameters against the declared schema
/// - Authenticating requests to protected endpoints
/// - Dispatching CRUD operations to the automation's storage backend
/// - Shaping results into the configured response envelope

// Compile + bind definitions into live automations
pub mod engine;

// Parameter Binder
pub mod binder;

// Bearer-token verification and the global auth switch
pub mod auth;

// Per-endpoint request state machine
pub mod executor;

pub use auth::{AuthGate, JwtVerifier, TokenVerifier};
pub use engine::{AutomationEngine, LiveAutomation};
pub use executor::{EndpointExecutor, EndpointRequest, EndpointResponse, ExecutionStage};
