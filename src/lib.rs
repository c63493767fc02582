pub mod accounts;
pub mod analysis;
pub mod auth;
pub mod config;
pub mod documents;
pub mod error;
pub mod file_store;
pub mod routes;
pub mod usage;
