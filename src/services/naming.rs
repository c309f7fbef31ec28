//! Slugs, storage-safe file names, and the upload path allowlist.

/// Video formats accepted for multipart upload.
pub const ALLOWED_VIDEO_TYPES: [&str; 4] = ["video/mp4", "video/quicktime", "video/webm", "video/ogg"];

const SLUG_MAX_LEN: usize = 80;
const FILE_NAME_MAX_LEN: usize = 120;

pub fn is_allowed_video_type(content_type: &str) -> bool {
    ALLOWED_VIDEO_TYPES.contains(&content_type)
}

/// Lowercase, ASCII alphanumerics and single dashes, at most 80 characters.
pub fn slugify(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut pending_dash = false;
    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c == '-' || c.is_whitespace() {
            pending_dash = true;
        }
    }
    if pending_dash && !slug.is_empty() {
        slug.push('-');
    }

    let truncated: String = slug.chars().take(SLUG_MAX_LEN).collect();
    truncated.trim_matches('-').to_string()
}

/// Slug for `title`, falling back to `memory-<id prefix>` when the title has
/// no usable characters.
pub fn base_slug(title: &str, fallback_id: &str) -> String {
    let slug = slugify(title);
    if slug.is_empty() {
        format!("memory-{}", id_prefix(fallback_id))
    } else {
        slug
    }
}

/// Slug made unique by suffixing the id prefix.
pub fn disambiguated_slug(base: &str, fallback_id: &str) -> String {
    format!("{}-{}", base, id_prefix(fallback_id))
}

fn id_prefix(id: &str) -> String {
    id.chars().take(6).collect()
}

/// Lowercased file name restricted to `[a-z0-9._-]`, no leading dots or dashes.
pub fn sanitize_file_name(value: &str) -> String {
    let lowered = value.to_lowercase();
    let mut name = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        let keep = c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-');
        let next = if keep { c } else { '-' };
        if next == '-' && name.ends_with('-') {
            continue;
        }
        name.push(next);
    }
    name.trim_start_matches(['-', '.'])
        .chars()
        .take(FILE_NAME_MAX_LEN)
        .collect()
}

/// Rejects traversal and absolute paths.
pub fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\0')
        && !path.contains("..")
        && !path.starts_with('/')
        && !path.contains('\\')
}

/// Only the derived assets of a video may be uploaded with a single presign.
pub fn is_allowed_path(path: &str) -> bool {
    path == "pc.mp4"
        || (path.starts_with("thumb.") && !path.contains('/'))
        || (path.starts_with("hls/") && path.len() > "hls/".len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_separators() {
        assert_eq!(slugify("  Summer Trip -- 2024!  "), "summer-trip-2024");
        assert_eq!(slugify("Déjà vu"), "dj-vu");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn slugify_caps_length_without_trailing_dash() {
        let title = format!("{} tail", "a".repeat(79));
        let slug = slugify(&title);
        assert_eq!(slug.len(), 79);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn base_slug_falls_back_to_id() {
        assert_eq!(base_slug("!!!", "0a1b2c3d-..."), "memory-0a1b2c");
        assert_eq!(disambiguated_slug("trip", "0a1b2c3d"), "trip-0a1b2c");
    }

    #[test]
    fn sanitize_file_name_rewrites_unsafe_runs() {
        assert_eq!(sanitize_file_name("My Clip (final).MP4"), "my-clip-final-.mp4");
        assert_eq!(sanitize_file_name("..//secret.mov"), "secret.mov");
        assert_eq!(sanitize_file_name("???"), "");
        assert_eq!(sanitize_file_name(&"x".repeat(200)).len(), 120);
    }

    #[test]
    fn upload_paths_are_allowlisted() {
        assert!(is_allowed_path("pc.mp4"));
        assert!(is_allowed_path("thumb.jpg"));
        assert!(is_allowed_path("hls/720p/seg0.ts"));
        assert!(!is_allowed_path("hls/"));
        assert!(!is_allowed_path("thumb.d/x.jpg"));
        assert!(!is_allowed_path("raw.mp4"));
    }

    #[test]
    fn unsafe_paths_are_rejected() {
        assert!(is_safe_path("hls/a.ts"));
        assert!(!is_safe_path("../pc.mp4"));
        assert!(!is_safe_path("/pc.mp4"));
        assert!(!is_safe_path("hls\\a.ts"));
        assert!(!is_safe_path(""));
    }

    #[test]
    fn only_video_types_are_accepted() {
        assert!(is_allowed_video_type("video/webm"));
        assert!(!is_allowed_video_type("image/png"));
    }
}
