//! Shared state handed to every handler.

use crate::services::{
    auth::AuthorizationGate, metadata_service::MetadataService,
    multipart_service::MultipartService,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub uploads: MultipartService,
    pub metadata: MetadataService,
    pub gate: Arc<dyn AuthorizationGate>,
}

impl AppState {
    pub fn new(
        uploads: MultipartService,
        metadata: MetadataService,
        gate: Arc<dyn AuthorizationGate>,
    ) -> Self {
        Self {
            uploads,
            metadata,
            gate,
        }
    }
}
