pub mod api;
pub mod blob;
pub mod cache;
pub mod codec;
pub mod config;
pub mod db;
pub mod drive;
pub mod error;
pub mod metadata;
pub mod models;
pub mod services;
pub mod state;
