//! Upload filename sanitization and artifact naming
//!
//! Sanitized names are used as filesystem path components, so they must never
//! contain separators, `..` or characters outside `[A-Za-z0-9_.-]`.

use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Device names Windows refuses as file names regardless of extension
const WINDOWS_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Reduce a client-declared filename to a safe single path component
///
/// The name is NFKD-decomposed and what is still non-ASCII afterwards is
/// dropped, so accented letters keep their base letter. Path separators become whitespace,
/// whitespace runs become `_`, anything outside `[A-Za-z0-9_.-]` is removed and
/// leading/trailing `.`/`_` are trimmed. Returns an empty string when nothing
/// usable remains.
///
/// ```
/// use karaoke_server::utils::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("My cool song.mp3"), "My_cool_song.mp3");
/// assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
/// assert_eq!(sanitize_filename("café.flac"), "cafe.flac");
/// assert_eq!(sanitize_filename("..."), "");
/// ```
pub fn sanitize_filename(declared: &str) -> String {
    let spaced: String = declared
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let filtered: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    let trimmed = filtered.trim_matches(|c| c == '.' || c == '_');

    let device = trimmed.split('.').next().unwrap_or_default();
    if WINDOWS_DEVICE_NAMES
        .iter()
        .any(|name| name.eq_ignore_ascii_case(device))
    {
        return format!("_{}", trimmed);
    }

    trimmed.to_string()
}

/// Split `name.ext` into (`name`, `Some("ext")`), splitting at the last dot
pub fn split_extension(filename: &str) -> (&str, Option<&str>) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < filename.len() => {
            (&filename[..idx], Some(&filename[idx + 1..]))
        }
        _ => (filename, None),
    }
}

/// Directory name a job's stems are written under
///
/// Isolated naming uses the job id, so concurrent uploads of the same file
/// cannot collide. Legacy naming uses the base filename; a second upload of
/// `song.mp3` overwrites the first one's stems.
pub fn artifact_key(job_id: Uuid, sanitized: &str, isolate: bool) -> String {
    if isolate {
        job_id.simple().to_string()
    } else {
        split_extension(sanitized).0.to_string()
    }
}

/// File name the raw upload is stored under
///
/// The process backend names its output directory after the input file stem,
/// so the stem must equal the artifact key.
pub fn stored_upload_name(artifact_key: &str, sanitized: &str) -> String {
    match split_extension(sanitized).1 {
        Some(ext) => format!("{}.{}", artifact_key, ext.to_ascii_lowercase()),
        None => artifact_key.to_string(),
    }
}
