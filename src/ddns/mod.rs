//! Control-plane core
//!
//! Everything the server needs to turn an authenticated operation batch into
//! provider calls, plus the pieces the agent shares with it:
//!
//! * `protocol` - Records, operations, and the HTTP request envelope
//! * `registry` - The provider abstraction and the builder registry
//! * `store` - Cached file-backed role/registry definitions
//! * `authorize` - Token checks and per-operation delegation policy
//! * `planner` - Two-phase convergent execution across providers
//! * `context` - Server configuration and shared state
//! * `shutdown` - Process-wide cancellation

/// Records, operations, and the wire envelope
pub mod protocol;

/// Provider registry abstraction
pub mod registry;

/// File-backed definition store with mtime + TTL caching
pub mod store;

/// Role resolution and operation validation
pub mod authorize;

/// Batch execution planning
pub mod planner;

/// Server configuration and shared state
pub mod context;

/// Cancellation signal shared by long-running loops
pub mod shutdown;
