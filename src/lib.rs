pub mod config;
pub mod db;
pub mod export;
pub mod model;
pub mod store;
