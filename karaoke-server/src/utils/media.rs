//! Upload content checks
//!
//! Uploads must carry an audio extension, and their leading bytes must not
//! identify a non-media format (an image renamed to `.mp3`, an archive, ...).

use infer::MatcherType;

/// Extensions accepted by the upload gateway (lowercase)
pub const ALLOWED_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg", "m4a", "aac", "aiff", "aif"];

/// Leading bytes needed to sniff every supported container
pub const SNIFF_LEN: usize = 8192;

/// Whether the extension is on the allowlist (case-insensitive)
pub fn is_allowed_extension(ext: Option<&str>) -> bool {
    match ext {
        Some(ext) => ALLOWED_EXTENSIONS
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Check the leading bytes of an upload
///
/// Returns the detected MIME type when the content is recognized as
/// something other than audio or a video container. Unrecognized content is
/// let through: raw MPEG frames and some AAC streams carry no magic number.
pub fn rejected_signature(head: &[u8]) -> Option<&'static str> {
    let kind = infer::get(head)?;
    match kind.matcher_type() {
        MatcherType::Audio | MatcherType::Video => None,
        _ => Some(kind.mime_type()),
    }
}

/// Content-Type for serving an artifact, by extension
pub fn content_type_for(path: &std::path::Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("ogg") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("aac") => "audio/aac",
        Some("aiff") | Some("aif") => "audio/aiff",
        _ => "application/octet-stream",
    }
}
