//! Multipart upload sessions, their parts, and the RPC payloads that carry them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A multipart upload opened at the storage provider.
///
/// Immutable once the part URLs are signed. An expired session is replaced by
/// creating a new one, never refreshed in place.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Storage key of the object being assembled.
    pub object_key: String,

    /// Provider-issued multipart upload id.
    pub upload_id: String,

    /// Size of every part except possibly the last, in bytes.
    pub part_size: u64,

    /// Number of parts, `ceil(total_size / part_size)`.
    pub total_parts: u32,

    /// One presigned PUT per part, ordered by part number.
    pub parts: Vec<PartPlan>,
}

impl UploadSession {
    /// Byte range `[start, end)` of `part_number` within a file of `file_size` bytes.
    pub fn part_range(&self, part_number: u32, file_size: u64) -> (u64, u64) {
        let start = u64::from(part_number.saturating_sub(1)).saturating_mul(self.part_size);
        let end = u64::from(part_number)
            .saturating_mul(self.part_size)
            .min(file_size);
        (start.min(end), end)
    }

    /// Whether `file_size` is exactly what this session's plan was built for.
    /// A plan whose byte bounds overflow never fits.
    pub fn fits(&self, file_size: u64) -> bool {
        let parts = u64::from(self.total_parts);
        if parts == 0 || self.parts.len() as u64 != parts {
            return false;
        }
        match (
            self.part_size.checked_mul(parts - 1),
            self.part_size.checked_mul(parts),
        ) {
            (Some(lower), Some(upper)) => lower < file_size && file_size <= upper,
            _ => false,
        }
    }
}

/// A single part's upload target.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartPlan {
    /// 1-based, contiguous.
    pub part_number: u32,

    /// Presigned PUT URL; expires after the configured window.
    pub url: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PartStatus {
    Pending,
    Uploading,
    Done,
    Error,
}

/// Client-side view of one part while the coordinator runs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PartUploadState {
    pub part_number: u32,
    pub status: PartStatus,

    /// Fraction of this part's bytes sent, `0.0..=1.0`.
    pub progress: f64,

    /// Entity tag without quotes; present only when `status` is `Done`.
    pub etag: Option<String>,

    /// Last failure reason when `status` is `Error`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl PartUploadState {
    pub fn pending(part_number: u32) -> Self {
        Self {
            part_number,
            status: PartStatus::Pending,
            progress: 0.0,
            etag: None,
            error: None,
        }
    }
}

/// Entry of the completion manifest.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

/// Body of `createUploadSession`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadRequest {
    pub title: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub content_type: String,
}

/// Reply of `createUploadSession`: the media record ids plus the session.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateUploadResponse {
    pub media_id: Uuid,
    pub slug: String,
    #[serde(flatten)]
    pub session: UploadSession,
}

/// Body of `completeUpload`.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUploadRequest {
    pub media_id: Uuid,
    pub upload_id: String,
    pub object_key: String,
    pub size_bytes: u64,
    pub parts: Vec<CompletedPart>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CompleteUploadResponse {
    pub ok: bool,
}

/// Reply of the single-object presign call.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PresignResponse {
    pub upload_url: String,
    pub object_key: String,
}

/// Storage configuration summary that never exposes full secrets.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDiagnostics {
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id_len: usize,
    pub access_key_id_suffix: String,
    pub secret_len: usize,
    pub secret_suffix: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn session(part_size: u64, total_parts: u32) -> UploadSession {
        UploadSession {
            object_key: "videos/x/a.mp4".into(),
            upload_id: "up".into(),
            part_size,
            total_parts,
            parts: (1..=total_parts)
                .map(|n| PartPlan {
                    part_number: n,
                    url: format!("https://s/{n}"),
                })
                .collect(),
        }
    }

    #[test]
    fn last_part_range_is_clamped_to_file_size() {
        let s = session(10 * MIB, 3);
        assert_eq!(s.part_range(1, 25 * MIB), (0, 10 * MIB));
        assert_eq!(s.part_range(2, 25 * MIB), (10 * MIB, 20 * MIB));
        assert_eq!(s.part_range(3, 25 * MIB), (20 * MIB, 25 * MIB));
    }

    #[test]
    fn fits_checks_the_plan_bounds() {
        let s = session(10 * MIB, 3);
        assert!(s.fits(25 * MIB));
        assert!(s.fits(30 * MIB));
        assert!(!s.fits(20 * MIB));
        assert!(!s.fits(30 * MIB + 1));
    }

    #[test]
    fn overflowing_plan_never_fits() {
        let s = session(u64::MAX / 2, 3);
        assert!(!s.fits(u64::MAX));
        assert!(!s.fits(1));
        assert_eq!(s.part_range(3, u64::MAX), (u64::MAX - 1, u64::MAX));
    }

    #[test]
    fn create_response_flattens_session_fields() {
        let response = CreateUploadResponse {
            media_id: Uuid::nil(),
            slug: "trip".into(),
            session: session(10 * MIB, 1),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["uploadId"], "up");
        assert_eq!(json["partSize"], 10 * MIB);
        assert_eq!(json["parts"][0]["partNumber"], 1);
        assert_eq!(json["mediaId"], Uuid::nil().to_string());
    }
}
