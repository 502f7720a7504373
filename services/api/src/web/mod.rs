pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;

// Re-export the router builder to make it easily accessible
// to the binary that will build the web server.
pub use middleware::resolve_user;
pub use rest::{routes, ApiDoc};
