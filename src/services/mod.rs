//! Server-side services: request signing, object addressing, multipart
//! session management, metadata persistence, and the admin gate.

pub mod auth;
pub mod metadata_service;
pub mod multipart_service;
pub mod naming;
pub mod object_url;
pub mod signer;
