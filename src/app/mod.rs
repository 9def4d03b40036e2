// App layer: axum routes, per-client rate limiting and server startup.

pub mod handlers;
pub mod prewarm;
pub mod rate_limit;
pub mod router;
pub mod server;
pub mod state;

pub use router::build_router;
pub use server::serve;
pub use state::AppState;
