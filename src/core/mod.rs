pub mod background;
pub mod engine;
pub mod scoring;

pub use crate::utils::error::Result;
pub use engine::{GreenScoreEngine, Located};
