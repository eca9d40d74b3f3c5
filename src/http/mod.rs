//! HTTP surface: routes and identity checks

pub mod middleware;
pub mod routes;

pub use routes::build_router;
