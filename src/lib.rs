pub mod api;
pub mod config;
pub mod db;
pub mod feed_cache;
pub mod hub;
pub mod state;
