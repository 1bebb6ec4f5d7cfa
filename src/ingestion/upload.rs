use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Uploaded bytes written to the staging directory; the file is removed on drop.
#[derive(Debug)]
pub struct StagedUpload {
    path: PathBuf,
}

impl StagedUpload {
    /// Write `bytes` under `dir` using a unique name derived from `filename`.
    pub async fn write(dir: &Path, filename: &str, bytes: &[u8]) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}-{}", Uuid::new_v4(), sanitize_filename(filename)));
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Staged upload");
        Ok(Self { path })
    }

    /// Location of the staged file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "Removed staged upload"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(
                path = %self.path.display(),
                error = %error,
                "Failed to remove staged upload"
            ),
        }
    }
}

/// Keep only the final path component and replace characters unsafe in file names.
fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_directories() {
        assert_eq!(sanitize_filename("../../etc/passwd.txt"), "passwd.txt");
        assert_eq!(sanitize_filename("C:\\docs\\policy.pdf"), "policy.pdf");
        assert_eq!(sanitize_filename("my policy (v2).docx"), "my_policy__v2_.docx");
        assert_eq!(sanitize_filename(".."), "upload");
    }

    #[tokio::test]
    async fn staged_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let staged = StagedUpload::write(dir.path(), "policy.txt", b"hello")
            .await
            .expect("staged");
        let path = staged.path().to_path_buf();

        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read(&path).expect("read"), b"hello");

        drop(staged);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn creates_missing_staging_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("temp");
        let staged = StagedUpload::write(&nested, "a.txt", b"x")
            .await
            .expect("staged");
        assert!(staged.path().exists());
    }
}
