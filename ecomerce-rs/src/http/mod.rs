//! HTTP layer: Axum router, session guard, handlers and views.
//!
//! Every store-backed handler runs the same lifecycle: guard, check a
//! connection out of the store gateway, validate input, run one collection
//! operation, release the connection, then render or map the error.

mod auth;
mod error;
mod forms;
mod handlers;
mod state;
mod views;

#[cfg(test)]
mod tests;

pub use handlers::router;
pub use state::{AppState, SessionStore};
