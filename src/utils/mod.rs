pub mod error;
pub mod logger;
pub mod ttl_cache;
pub mod validation;
