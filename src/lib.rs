pub mod active;
pub mod config;
pub mod hierarchy;
pub mod migration;
pub mod store;
