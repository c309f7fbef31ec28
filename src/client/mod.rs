//! The uploading side: reads a local file, pushes its parts straight to
//! storage, and asks the vault to create and complete the session.

pub mod api;
pub mod coordinator;
pub mod part_table;
pub mod source;
pub mod transport;

pub use api::{ApiClient, UploadApi};
pub use coordinator::{ProgressUpdate, UploadCoordinator, UploadPhase, UploadReport};
pub use source::{ByteSource, FileSource};
pub use transport::{HttpTransport, PartEvent, PartTransport};
