//! Display helpers for candidate files.

use std::path::Path;

const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Documents",
        &[
            "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "odt", "csv",
        ],
    ),
    (
        "Images",
        &[
            "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tiff", "raw",
        ],
    ),
    (
        "Videos",
        &["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"],
    ),
    ("Audio", &["mp3", "wav", "flac", "aac", "ogg", "wma", "m4a"]),
    ("Archives", &["zip", "rar", "7z", "tar", "gz", "bz2", "xz"]),
    (
        "Code",
        &[
            "py", "js", "ts", "html", "css", "java", "cpp", "c", "h", "rs", "go", "rb",
        ],
    ),
    ("Installers", &["exe", "msi", "dmg", "deb", "rpm"]),
];

/// Formats a byte count as "1.5 MB" style text.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 3] = [("GB", 1 << 30), ("MB", 1 << 20), ("KB", 1 << 10)];
    for (unit, threshold) in UNITS {
        if bytes >= threshold {
            return format!("{:.1} {}", bytes as f64 / threshold as f64, unit);
        }
    }
    format!("{} B", bytes)
}

/// Lower-case extension without the dot, or an empty string.
pub fn file_type(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Display grouping for a file, "Other" when nothing matches.
pub fn file_category(path: &Path) -> &'static str {
    let ext = file_type(path);
    if ext.is_empty() {
        return "Other";
    }
    CATEGORIES
        .iter()
        .find(|(_, extensions)| extensions.contains(&ext.as_str()))
        .map(|(name, _)| *name)
        .unwrap_or("Other")
}
