//! Content classification and checksum helpers.
//!
//! Content types are inferred from the file extension only — the service
//! never sniffs bytes. Checksums are streaming SHA-256, rendered as
//! lowercase hex.

use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;
use tokio::{fs::File, io::AsyncReadExt};

/// Names longer than this are truncated before hitting the filesystem.
const MAX_FILE_NAME_LEN: usize = 200;

/// Read buffer for streaming digests.
const DIGEST_BUF_SIZE: usize = 8 * 1024;

/// Lowercase extension of `name`, or an empty string.
pub fn file_extension(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// Guess a MIME type from the file name's extension.
pub fn content_type_for(name: &str) -> &'static str {
    match file_extension(name).as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "js" => "application/javascript",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "mp4" => "video/mp4",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "mov" => "video/quicktime",
        "zip" => "application/zip",
        "rar" => "application/x-rar-compressed",
        "7z" => "application/x-7z-compressed",
        "tar" => "application/x-tar",
        "gz" => "application/gzip",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "apk" => "application/vnd.android.package-archive",
        _ => "application/octet-stream",
    }
}

/// Make a display name safe to store on disk.
///
/// Replaces characters that are unsafe on common filesystems and truncates
/// to [`MAX_FILE_NAME_LEN`]. Empty input yields `fallback`.
pub fn sanitize_file_name(name: &str, fallback: &str) -> String {
    if name.is_empty() {
        return fallback.to_string();
    }
    let mut safe: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    if safe.len() > MAX_FILE_NAME_LEN {
        let mut cut = MAX_FILE_NAME_LEN;
        while !safe.is_char_boundary(cut) {
            cut -= 1;
        }
        safe.truncate(cut);
    }
    // A name of only separators would have been rejected upstream, but a
    // dot-only name still needs the fallback.
    if safe.chars().all(|c| c == '.' || c == '_') {
        return fallback.to_string();
    }
    safe
}

/// Encode a digest as lowercase hex.
pub fn hex_digest(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Streaming SHA-256 of a file's contents, as lowercase hex.
pub async fn checksum_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_BUF_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex_digest(&hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Report.PDF"), "pdf");
        assert_eq!(file_extension("archive.tar.gz"), "gz");
        assert_eq!(file_extension("noext"), "");
        assert_eq!(file_extension(".hidden"), "");
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(content_type_for("photo.JPG"), "image/jpeg");
        assert_eq!(content_type_for("report.pdf"), "application/pdf");
        assert_eq!(content_type_for("data.bin"), "application/octet-stream");
        assert_eq!(content_type_for("no-extension"), "application/octet-stream");
    }

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(
            sanitize_file_name("a<b>c:d\"e/f\\g|h?i*j.txt", "fb"),
            "a_b_c_d_e_f_g_h_i_j.txt"
        );
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = "x".repeat(400);
        assert_eq!(sanitize_file_name(&long, "fb").len(), 200);
    }

    #[test]
    fn sanitize_falls_back_on_empty_or_degenerate() {
        assert_eq!(sanitize_file_name("", "fb"), "fb");
        assert_eq!(sanitize_file_name("..", "fb"), "fb");
    }

    #[test]
    fn hex_digest_is_lowercase() {
        assert_eq!(hex_digest(&[0x00, 0xab, 0xff]), "00abff");
    }

    #[tokio::test]
    async fn checksum_matches_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();
        assert_eq!(
            checksum_file(&path).await.unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
