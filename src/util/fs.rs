use anyhow::Context;
use std::path::Path;

/// Replaces `path` wholesale: readers see either the old or the new content, never a mix.
pub async fn write_atomic(path: &Path, contents: &[u8]) -> anyhow::Result<()> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("Invalid export path {}", path.display()))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    tokio::fs::write(&tmp_path, contents)
        .await
        .with_context(|| format!("Could not write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Could not replace {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn replaces_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions_log.txt");

        write_atomic(&path, b"old").await.unwrap();
        write_atomic(&path, b"new").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!dir.path().join(".positions_log.txt.tmp").exists());
    }
}
