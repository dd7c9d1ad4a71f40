//! Content-type sniffing. The sniffed type is authoritative over whatever
//! the server declares.

/// MIME types the enrichment stages know how to handle.
pub const SUPPORTED_MIME_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/gif", "video/mp4"];

/// Reported when the leading bytes match no known signature.
pub const UNKNOWN_MIME_TYPE: &str = "application/octet-stream";

/// Sniffs the MIME type from leading content bytes.
pub fn sniff(bytes: &[u8]) -> &'static str {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .unwrap_or(UNKNOWN_MIME_TYPE)
}

pub fn is_supported(mime_type: &str) -> bool {
    SUPPORTED_MIME_TYPES.contains(&mime_type)
}

pub fn is_image(mime_type: &str) -> bool {
    mime_type.starts_with("image/")
}

pub fn is_video(mime_type: &str) -> bool {
    mime_type.starts_with("video/")
}

/// Strips parameters from a `Content-Type` header value
/// (`image/jpeg; charset=binary` becomes `image/jpeg`).
pub fn essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
