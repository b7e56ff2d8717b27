pub mod config;
pub mod observability;
pub mod health;
pub mod protocol;
pub mod store;
pub mod storage;
pub mod pipeline;
pub mod events;
pub mod api;
pub mod app;
pub mod error;
pub mod dlq;
