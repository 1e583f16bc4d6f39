//! HTTP surface: status endpoints and the WebSocket route

pub mod routes;

pub use routes::build_router;
