pub mod decoder;

use std::path::Path;

pub use decoder::*;

/// File name fragments accepted as videos when scanning class directories
pub const VIDEO_EXTENSIONS: &[&str] = &[".mov", ".mp4", ".avi", ".mkv", ".mpg", ".mpeg", ".webm", ".m4v"];

/// True when the file name contains a known video extension (case-insensitive)
pub fn is_video_file_name(path: &Path) -> bool {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => {
            let name = name.to_lowercase();
            VIDEO_EXTENSIONS.iter().any(|ext| name.contains(ext))
        }
        None => false,
    }
}
