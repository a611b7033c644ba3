pub mod api;
pub mod archive;
pub mod clients;
pub mod config;
pub mod consumer;
pub mod discovery;
pub mod manager;
pub mod models;
