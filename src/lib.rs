pub mod api;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod manager;
pub mod relay;
pub mod shared;
pub mod storage;
pub mod templates;
