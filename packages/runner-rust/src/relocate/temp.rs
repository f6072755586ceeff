//! Temporary files holding downloaded resources until upload.
//!
//! Each candidate gets a private file named with a random 12-hex-digit
//! prefix followed by the tail of the source file name. The file is removed
//! explicitly on both the success and failure paths; [`TempFile`]'s `Drop`
//! removes it if a task is cancelled before that.

use std::path::{Path, PathBuf};

use reqwest::Url;
use tracing::warn;
use uuid::Uuid;

/// Last path segment of `url`, or an empty string if there is none.
#[must_use]
pub fn source_file_name(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|mut s| s.next_back()).map(str::to_string))
        .unwrap_or_default()
}

/// The last `max_chars` characters of `name`.
fn tail(name: &str, max_chars: usize) -> &str {
    let count = name.chars().count();
    if count <= max_chars {
        return name;
    }
    let skip = count - max_chars;
    name.char_indices()
        .nth(skip)
        .map_or(name, |(start, _)| &name[start..])
}

/// Unique temporary file name for a download of `url`.
#[must_use]
pub fn temp_file_name(url: &str, max_name_chars: usize) -> String {
    let random = Uuid::new_v4().simple().to_string();
    let suffix = &random[random.len() - 12..];
    format!("{suffix}{}", tail(&source_file_name(url), max_name_chars))
}

/// A downloaded file awaiting upload.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    removed: bool,
}

impl TempFile {
    #[must_use]
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(name),
            removed: false,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file's basename, used as the object key.
    #[must_use]
    pub fn key(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Deletes the file. A file that was never created is not an error.
    pub async fn remove(mut self) {
        self.removed = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temporary file"),
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.removed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_file_name_is_last_segment() {
        assert_eq!(source_file_name("http://a.example/x/y/photo.jpg?v=2"), "photo.jpg");
        assert_eq!(source_file_name("https://a.example/dir/"), "");
        assert_eq!(source_file_name("https://a.example"), "");
        assert_eq!(source_file_name("not a url"), "");
    }

    #[test]
    fn temp_name_is_random_prefix_plus_truncated_name() {
        let long = format!("{}.png", "n".repeat(60));
        let name = temp_file_name(&format!("http://a/{long}"), 40);
        assert_eq!(name.len(), 12 + 40);
        assert!(name[..12].bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(name.ends_with(".png"));

        let short = temp_file_name("http://a/p.jpg", 40);
        assert_eq!(&short[12..], "p.jpg");
        assert_ne!(temp_file_name("http://a/p.jpg", 40), short);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        assert_eq!(tail("héllo.png", 5), "o.png");
        assert_eq!(tail("ab", 5), "ab");
    }

    #[tokio::test]
    async fn remove_deletes_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let file = TempFile::new(dir.path(), "abc.txt");
        assert_eq!(file.key(), "abc.txt");
        tokio::fs::write(file.path(), b"x").await.unwrap();
        let path = file.path().to_path_buf();
        file.remove().await;
        assert!(!path.exists());

        TempFile::new(dir.path(), "never-written").remove().await;
    }

    #[test]
    fn drop_removes_unreleased_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let file = TempFile::new(dir.path(), "dropped.bin");
            std::fs::write(file.path(), b"x").unwrap();
            file.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
