//! src/services/multipart_service.rs
//!
//! MultipartService: the server half of a multipart upload. It opens the
//! upload at the provider, plans the part layout, mints one presigned PUT per
//! part, and later commits the parts with a signed completion manifest.
//! Part bytes never pass through here.

use crate::{
    config::{StorageConfig, StorageSettings},
    errors::{UploadError, UploadResult},
    models::upload::{CompletedPart, ConfigDiagnostics, PartPlan, UploadSession},
    services::{object_url::resolve_object_url, signer::uri_encode},
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const MIB: u64 = 1024 * 1024;
/// Provider floor for every part but the last.
pub const MIN_PART_SIZE: u64 = 5 * MIB;
pub const BASE_PART_SIZE: u64 = 10 * MIB;
/// Provider ceiling for a single part.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * MIB;
pub const MAX_PARTS: u64 = 10_000;
const PART_SIZE_STEP: u64 = 5 * MIB;

/// Part size and count for one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartLayout {
    pub part_size: u64,
    pub total_parts: u32,
}

/// Choose a provider-legal part size for `total_size` bytes.
///
/// Starts at 10 MiB, grows to `ceil(size / 10000)` when the part count would
/// exceed the provider maximum, then rounds up to a 5 MiB multiple.
pub fn plan_parts(total_size: u64) -> UploadResult<PartLayout> {
    if total_size == 0 {
        return Err(UploadError::InvalidRequest(
            "sizeBytes must be greater than zero".into(),
        ));
    }

    let mut part_size = MIN_PART_SIZE.max(BASE_PART_SIZE);
    if total_size.div_ceil(part_size) > MAX_PARTS {
        part_size = total_size.div_ceil(MAX_PARTS);
    }
    if part_size > MAX_PART_SIZE {
        return Err(UploadError::InvalidRequest(format!(
            "object of {total_size} bytes exceeds the multipart size limit"
        )));
    }
    let part_size = part_size.div_ceil(PART_SIZE_STEP) * PART_SIZE_STEP;
    let total_parts = total_size.div_ceil(part_size);

    Ok(PartLayout {
        part_size,
        total_parts: total_parts as u32,
    })
}

/// Text between the first `<UploadId>` and its closing tag.
pub fn extract_upload_id(xml: &str) -> Option<&str> {
    const OPEN: &str = "<UploadId>";
    let start = xml.find(OPEN)? + OPEN.len();
    let len = xml[start..].find("</UploadId>")?;
    let id = xml[start..start + len].trim();
    (!id.is_empty() && !id.contains('<')).then_some(id)
}

/// Sort parts ascending and check they form `1..=n` with non-empty ETags.
///
/// Surrounding quotes on ETags are removed; the manifest adds its own.
pub fn validate_parts(parts: &[CompletedPart]) -> UploadResult<Vec<CompletedPart>> {
    if parts.is_empty() {
        return Err(UploadError::Precondition("no parts to complete".into()));
    }

    let mut sorted: Vec<CompletedPart> = parts
        .iter()
        .map(|p| CompletedPart {
            part_number: p.part_number,
            etag: p.etag.trim().trim_matches('"').to_string(),
        })
        .collect();
    sorted.sort_by_key(|p| p.part_number);

    for (index, part) in sorted.iter().enumerate() {
        let expected = index as u32 + 1;
        if part.part_number != expected {
            return Err(UploadError::Precondition(format!(
                "expected part {expected}, found part {}",
                part.part_number
            )));
        }
        if part.etag.is_empty() {
            return Err(UploadError::Precondition(format!(
                "part {} has no ETag",
                part.part_number
            )));
        }
    }
    Ok(sorted)
}

/// `CompleteMultipartUpload` body for parts already sorted ascending.
pub fn build_manifest(parts: &[CompletedPart]) -> String {
    let entries = parts
        .iter()
        .map(|part| {
            format!(
                "  <Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag></Part>",
                part.part_number,
                xml_escape(&part.etag)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CompleteMultipartUpload>\n{entries}\n</CompleteMultipartUpload>"
    )
}

/// Opens, signs and commits multipart uploads against one storage provider.
#[derive(Clone)]
pub struct MultipartService {
    http: reqwest::Client,
    storage: StorageConfig,
}

impl MultipartService {
    pub fn new(storage: StorageConfig) -> Self {
        Self::with_client(storage, reqwest::Client::new())
    }

    pub fn with_client(storage: StorageConfig, http: reqwest::Client) -> Self {
        Self { http, storage }
    }

    /// Storage settings, or a configuration error naming what is missing.
    pub fn settings(&self) -> UploadResult<StorageSettings> {
        self.storage.require().map_err(|missing| {
            warn!("{}", missing);
            UploadError::from(missing)
        })
    }

    /// Open a multipart upload for `key` and sign one PUT URL per part.
    pub async fn create_session(
        &self,
        key: &str,
        content_type: &str,
        total_size: u64,
    ) -> UploadResult<UploadSession> {
        let settings = self.settings()?;
        let layout = plan_parts(total_size)?;

        let upload_id = self.initiate(&settings, key, content_type).await?;
        let parts = presign_parts(&settings, key, &upload_id, layout.total_parts)?;

        info!(
            key,
            upload_id = %upload_id,
            part_size = layout.part_size,
            total_parts = layout.total_parts,
            "multipart session created"
        );

        Ok(UploadSession {
            object_key: key.to_string(),
            upload_id,
            part_size: layout.part_size,
            total_parts: layout.total_parts,
            parts,
        })
    }

    /// Commit the uploaded parts. Parts are sorted and checked first; an
    /// incomplete list never reaches the provider.
    pub async fn complete_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> UploadResult<()> {
        let settings = self.settings()?;
        let sorted = validate_parts(parts)?;
        let body = build_manifest(&sorted);

        let url = format!(
            "{}?uploadId={}",
            resolve_object_url(&settings.endpoint, &settings.bucket, key),
            uri_encode(upload_id)
        );
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        let signed = settings
            .signer()
            .sign("POST", &url, &headers, body.as_bytes())?;

        let response = self
            .http
            .post(&url)
            .headers(header_map(&signed)?)
            .body(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(key, upload_id, status = status.as_u16(), "complete upload rejected");
            return Err(UploadError::Protocol {
                operation: "complete upload",
                status: status.as_u16(),
                body,
            });
        }

        info!(key, upload_id, parts = sorted.len(), "multipart upload completed");
        Ok(())
    }

    /// Presigned PUT for a single small object such as a thumbnail. The
    /// content type is signed, so the upload must declare the same one.
    pub fn presign_object_upload(&self, key: &str, content_type: &str) -> UploadResult<String> {
        let settings = self.settings()?;
        let url = resolve_object_url(&settings.endpoint, &settings.bucket, key);
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        let signed = settings.signer().presign_with_headers(
            "PUT",
            &url,
            &[],
            &headers,
            settings.presign_expires,
        )?;
        debug!(key, content_type, "presigned single object upload");
        Ok(signed)
    }

    /// Configured values with secrets reduced to length and last four chars.
    pub fn diagnostics(&self) -> ConfigDiagnostics {
        let access = self.storage.access_key_id.as_deref().unwrap_or("");
        let secret = self.storage.secret_access_key.as_deref().unwrap_or("");
        ConfigDiagnostics {
            endpoint: self.storage.endpoint.clone().unwrap_or_default(),
            bucket: self.storage.bucket.clone().unwrap_or_default(),
            access_key_id_len: access.chars().count(),
            access_key_id_suffix: suffix(access, 4),
            secret_len: secret.chars().count(),
            secret_suffix: suffix(secret, 4),
        }
    }

    async fn initiate(
        &self,
        settings: &StorageSettings,
        key: &str,
        content_type: &str,
    ) -> UploadResult<String> {
        let url = format!(
            "{}?uploads",
            resolve_object_url(&settings.endpoint, &settings.bucket, key)
        );
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        let signed = settings.signer().sign("POST", &url, &headers, b"")?;

        let response = self
            .http
            .post(&url)
            .headers(header_map(&signed)?)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(key, status = status.as_u16(), "create upload rejected");
            return Err(UploadError::Protocol {
                operation: "create upload",
                status: status.as_u16(),
                body,
            });
        }

        match extract_upload_id(&body) {
            Some(id) => Ok(id.to_string()),
            None => Err(UploadError::MissingUploadId { body }),
        }
    }
}

fn presign_parts(
    settings: &StorageSettings,
    key: &str,
    upload_id: &str,
    total_parts: u32,
) -> UploadResult<Vec<PartPlan>> {
    let signer = settings.signer();
    let url = resolve_object_url(&settings.endpoint, &settings.bucket, key);
    (1..=total_parts)
        .map(|part_number| {
            let number = part_number.to_string();
            let signed = signer.presign(
                "PUT",
                &url,
                &[("partNumber", number.as_str()), ("uploadId", upload_id)],
                settings.presign_expires,
            )?;
            Ok(PartPlan {
                part_number,
                url: signed,
            })
        })
        .collect()
}

fn header_map(signed: &BTreeMap<String, String>) -> UploadResult<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(signed.len());
    for (name, value) in signed {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| UploadError::InvalidRequest(format!("invalid header name `{name}`")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| UploadError::InvalidRequest(format!("invalid value for header `{name}`")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn suffix(value: &str, n: usize) -> String {
    let count = value.chars().count();
    value.chars().skip(count.saturating_sub(n)).collect()
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(part_number: u32, etag: &str) -> CompletedPart {
        CompletedPart {
            part_number,
            etag: etag.to_string(),
        }
    }

    #[test]
    fn small_file_uses_base_part_size() {
        assert_eq!(
            plan_parts(MIB).unwrap(),
            PartLayout {
                part_size: 10 * MIB,
                total_parts: 1
            }
        );
    }

    #[test]
    fn twenty_five_mib_is_three_parts() {
        assert_eq!(
            plan_parts(25 * MIB).unwrap(),
            PartLayout {
                part_size: 10 * MIB,
                total_parts: 3
            }
        );
    }

    #[test]
    fn huge_file_grows_part_size_to_stay_under_part_limit() {
        let size = 200 * 1024 * MIB;
        let layout = plan_parts(size).unwrap();
        assert_eq!(layout.part_size, 25 * MIB);
        assert!(u64::from(layout.total_parts) <= MAX_PARTS);
    }

    #[test]
    fn planner_invariants_hold_across_sizes() {
        let mut sizes = vec![1, MIB - 1, 10 * MIB, 10 * MIB + 1, 97 * MIB + 3];
        sizes.extend([
            MAX_PARTS * BASE_PART_SIZE,
            MAX_PARTS * BASE_PART_SIZE + 1,
            3 * 1024 * 1024 * MIB + 17,
            MAX_PARTS * MAX_PART_SIZE,
        ]);
        let mut size = 7u64;
        while size < 40 * 1024 * 1024 * MIB {
            sizes.push(size);
            size = size * 3 + 11;
        }

        for total in sizes {
            let layout = plan_parts(total).unwrap();
            let parts = u64::from(layout.total_parts);
            assert_eq!(layout.part_size % (5 * MIB), 0, "size {total}");
            assert!(parts <= MAX_PARTS, "size {total}");
            assert_eq!(parts, total.div_ceil(layout.part_size), "size {total}");
            assert!((parts - 1) * layout.part_size < total, "size {total}");
            assert!(total <= parts * layout.part_size, "size {total}");
        }
    }

    #[test]
    fn zero_and_oversized_objects_are_rejected() {
        assert!(matches!(plan_parts(0), Err(UploadError::InvalidRequest(_))));
        assert!(matches!(
            plan_parts(MAX_PARTS * MAX_PART_SIZE + 1),
            Err(UploadError::InvalidRequest(_))
        ));
    }

    #[test]
    fn upload_id_is_extracted_from_anywhere_in_document() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Bucket>vault</Bucket><Key>videos/a.mp4</Key><UploadId>2~abc-DEF_123</UploadId>
</InitiateMultipartUploadResult>"#;
        assert_eq!(extract_upload_id(xml), Some("2~abc-DEF_123"));
        assert_eq!(extract_upload_id("<Result></Result>"), None);
        assert_eq!(extract_upload_id("<UploadId></UploadId>"), None);
    }

    #[test]
    fn manifest_is_sorted_and_quoted() {
        let sorted = validate_parts(&[part(3, "c"), part(1, "\"a\""), part(2, "b")]).unwrap();
        let xml = build_manifest(&sorted);
        assert_eq!(
            xml,
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CompleteMultipartUpload>\n\
             \x20 <Part><PartNumber>1</PartNumber><ETag>\"a\"</ETag></Part>\n\
             \x20 <Part><PartNumber>2</PartNumber><ETag>\"b\"</ETag></Part>\n\
             \x20 <Part><PartNumber>3</PartNumber><ETag>\"c\"</ETag></Part>\n\
             </CompleteMultipartUpload>"
        );
    }

    #[test]
    fn incomplete_part_lists_are_preconditions() {
        for parts in [
            vec![],
            vec![part(1, "a"), part(3, "c")],
            vec![part(1, "a"), part(1, "a")],
            vec![part(1, "a"), part(2, "  ")],
            vec![part(0, "a")],
        ] {
            assert!(
                matches!(validate_parts(&parts), Err(UploadError::Precondition(_))),
                "{parts:?}"
            );
        }
    }

    #[tokio::test]
    async fn missing_configuration_fails_before_network() {
        let service = MultipartService::new(StorageConfig::default());
        let err = service
            .create_session("videos/a.mp4", "video/mp4", MIB)
            .await
            .unwrap_err();
        match err {
            UploadError::Configuration(missing) => assert_eq!(missing.0.len(), 4),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn incomplete_parts_rejected_before_network() {
        let storage = StorageConfig {
            endpoint: Some("http://127.0.0.1:1".into()),
            bucket: Some("vault".into()),
            access_key_id: Some("AK".into()),
            secret_access_key: Some("SK".into()),
            ..StorageConfig::default()
        };
        let err = MultipartService::new(storage)
            .complete_upload("videos/a.mp4", "up", &[part(2, "b")])
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Precondition(_)));
    }

    #[test]
    fn diagnostics_reveal_only_suffixes() {
        let storage = StorageConfig {
            endpoint: Some("https://acct.r2.example.com".into()),
            bucket: Some("vault".into()),
            access_key_id: Some("AKIA1234WXYZ".into()),
            secret_access_key: Some("very-secret-value".into()),
            ..StorageConfig::default()
        };
        let diag = MultipartService::new(storage).diagnostics();
        assert_eq!(diag.access_key_id_len, 12);
        assert_eq!(diag.access_key_id_suffix, "WXYZ");
        assert_eq!(diag.secret_len, 17);
        assert_eq!(diag.secret_suffix, "alue");
    }
}
