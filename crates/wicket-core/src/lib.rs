pub mod classify;
pub mod engine;
pub mod error;
pub mod handler;
pub mod relay;
pub mod routes;
pub mod state;

pub use classify::{RouteTarget, classify_path};
pub use error::ProxyError;
pub use routes::{Route, RouteTable};
pub use state::{AppState, Core};
