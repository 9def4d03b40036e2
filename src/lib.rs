pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use app::{build_router, serve, AppState};
pub use config::AppConfig;
pub use core::GreenScoreEngine;
pub use utils::error::{GreenScoreError, Result};
