pub mod analyzer;
pub mod config;
pub mod engine;
pub mod picture;
pub mod server;
