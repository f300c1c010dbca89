pub mod auth;
pub mod config;
pub mod dates;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pricing;
pub mod repo;
pub mod store;
pub mod wal;
