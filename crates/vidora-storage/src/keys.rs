//! Storage key helpers shared by the pipeline workers.
//!
//! Key format: `{folder}/{filename}`, where folder is one of the configured temp or
//! permanent folders.

/// Join a folder and a filename into a storage key.
pub fn folder_key(folder: &str, filename: &str) -> String {
    let folder = folder.trim_matches('/');
    if folder.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", folder, filename)
    }
}

/// Lower-cased extension of the final key segment, if any.
pub fn extension(key: &str) -> Option<String> {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext.to_lowercase()),
        _ => None,
    }
}

/// Whether `key` is a plain relative path that stays below the storage root.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('/')
        && !key.contains('\\')
        && key.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_folder_and_name() {
        assert_eq!(folder_key("videos", "1_ab.mp4"), "videos/1_ab.mp4");
        assert_eq!(folder_key("videos/", "1_ab.mp4"), "videos/1_ab.mp4");
        assert_eq!(folder_key("", "1_ab.mp4"), "1_ab.mp4");
    }

    #[test]
    fn extracts_extension() {
        assert_eq!(extension("tmp/clip.MP4").as_deref(), Some("mp4"));
        assert_eq!(extension("tmp/archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension("tmp/noext"), None);
        assert_eq!(extension("tmp/.hidden"), None);
    }

    #[test]
    fn validates_keys() {
        assert!(is_valid_key("tmp/a.mp4"));
        assert!(!is_valid_key("../etc/passwd"));
        assert!(!is_valid_key("/etc/passwd"));
        assert!(!is_valid_key("tmp//a.mp4"));
        assert!(!is_valid_key("tmp/./a.mp4"));
        assert!(!is_valid_key(""));
    }
}
