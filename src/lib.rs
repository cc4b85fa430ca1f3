pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod messaging;
pub mod models;
pub mod observability;
pub mod outbox;
pub mod state;
pub mod store;
