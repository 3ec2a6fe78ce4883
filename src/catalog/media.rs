//! Extension based media type classification

use std::path::Path;

/// Media type for files with unknown extensions
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Media type for a file name, decided purely by its extension
pub fn content_type(file_name: &str) -> &'static str {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("txt") => "text/plain",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") => "audio/ogg",
        Some("pdf") => "application/pdf",
        Some("doc") | Some("docx") => "application/msword",
        Some("xls") | Some("xlsx") => "application/vnd.ms-excel",
        Some("ppt") | Some("pptx") => "application/vnd.ms-powerpoint",
        Some("zip") => "application/zip",
        Some("tar") | Some("gz") | Some("bz2") => "application/x-tar",
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        _ => OCTET_STREAM,
    }
}

/// Whether a media type may be served inline for preview
pub fn is_previewable(content_type: &str) -> bool {
    content_type == "text/plain"
        || content_type.starts_with("image/")
        || content_type.starts_with("video/")
}
