pub mod cache;
pub mod snapshot;
