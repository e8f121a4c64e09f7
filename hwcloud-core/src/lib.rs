//! hwcloud Core
//!
//! Provider-agnostic model shared by cloud providers: resources and their
//! observed state, attribute schemas, diffing, operation timeouts and the
//! state-change waiter used to follow asynchronous cloud operations.

pub mod differ;
pub mod provider;
pub mod resource;
pub mod schema;
pub mod timeouts;
pub mod waiter;
