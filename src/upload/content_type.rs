use std::path::Path;

/// Fallback for any extension not listed below
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// MIME type for a file, from its extension (case-insensitive).
/// Unknown or missing extensions map to `application/octet-stream`.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        _ => DEFAULT_CONTENT_TYPE,
    }
}
