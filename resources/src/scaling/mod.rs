pub mod cache;
pub mod executor;
pub mod scaler;
pub mod scalers;
pub mod target_resolver;
