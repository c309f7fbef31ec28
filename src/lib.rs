//! Private media vault: large-object uploads straight to S3-compatible storage.
//!
//! The server half signs multipart sessions and commits them; the client half
//! ([`client`]) pushes the parts with bounded concurrency.

pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
