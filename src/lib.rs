pub mod aggregate;
pub mod auth;
pub mod chain;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod projects;
pub mod reconciler;
pub mod rewards;
pub mod stakes;
pub mod store;
pub mod users;
