//! Maps a storage key to the object URL at the configured endpoint.

use url::Url;

/// Resolve `key` to a fully-qualified object URL.
///
/// Endpoints may already be scoped to the bucket (`https://host/vault`), in
/// which case the key is appended directly. Anything that does not parse as a
/// URL is joined naively as `endpoint/bucket/key`.
pub fn resolve_object_url(endpoint: &str, bucket: &str, key: &str) -> String {
    let endpoint = endpoint.strip_suffix('/').unwrap_or(endpoint);

    if let Ok(url) = Url::parse(endpoint) {
        let last_segment = url.path().split('/').rfind(|segment| !segment.is_empty());
        if last_segment == Some(bucket) {
            return format!("{endpoint}/{key}");
        }
    }

    format!("{endpoint}/{bucket}/{key}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_bucket_for_bare_endpoint() {
        assert_eq!(
            resolve_object_url("https://acct.r2.example.com", "vault", "videos/a.mp4"),
            "https://acct.r2.example.com/vault/videos/a.mp4"
        );
    }

    #[test]
    fn strips_trailing_slash() {
        assert_eq!(
            resolve_object_url("https://acct.r2.example.com/", "vault", "a.mp4"),
            "https://acct.r2.example.com/vault/a.mp4"
        );
    }

    #[test]
    fn endpoint_already_scoped_to_bucket() {
        assert_eq!(
            resolve_object_url("https://acct.r2.example.com/vault/", "vault", "a.mp4"),
            "https://acct.r2.example.com/vault/a.mp4"
        );
        assert_eq!(
            resolve_object_url("http://127.0.0.1:9000/prefix/vault", "vault", "a.mp4"),
            "http://127.0.0.1:9000/prefix/vault/a.mp4"
        );
    }

    #[test]
    fn bucket_elsewhere_in_path_is_not_a_match() {
        assert_eq!(
            resolve_object_url("https://h.example.com/vault/other", "vault", "a.mp4"),
            "https://h.example.com/vault/other/vault/a.mp4"
        );
    }

    #[test]
    fn malformed_endpoint_falls_back_to_concatenation() {
        assert_eq!(
            resolve_object_url("storage.local/", "vault", "a.mp4"),
            "storage.local/vault/a.mp4"
        );
    }
}
