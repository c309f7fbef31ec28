//! Core data models for the upload subsystem.
//!
//! `upload` holds the multipart session and per-part state shared by the
//! server and the client coordinator. `media` is the metadata row the server
//! records for every uploaded video. Both serialize as camelCase JSON at the
//! HTTP boundary.

pub mod media;
pub mod upload;
