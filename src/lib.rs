pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod flash;
pub mod jobs;
pub mod listing;
pub mod mail;
pub mod models;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod slug;
pub mod state;
pub mod storage;
pub mod workers;

pub use workers::{default_handlers, Worker};
