//! 压缩包解压

use crate::error::{AppResult, ArchiveError};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 把 zip 压缩包完整解压到 `dest`（目录不存在时自动创建）
pub async fn extract(archive: &Path, dest: &Path) -> AppResult<()> {
    let archive: PathBuf = archive.to_path_buf();
    let dest: PathBuf = dest.to_path_buf();
    debug!("解压 {} -> {}", archive.display(), dest.display());

    tokio::task::spawn_blocking(move || extract_blocking(&archive, &dest))
        .await
        .map_err(|e| ArchiveError::TaskFailed(e.to_string()))?
}

fn extract_blocking(archive: &Path, dest: &Path) -> AppResult<()> {
    std::fs::create_dir_all(dest)?;
    let invalid = |source| ArchiveError::Invalid {
        path: archive.display().to_string(),
        source,
    };
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file).map_err(invalid)?;
    zip.extract(dest).map_err(invalid)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, content) in files {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[tokio::test]
    async fn test_extract_nested_archive() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("student.zip");
        write_zip(
            &archive,
            &[
                ("my-app/package.json", "{}"),
                ("my-app/src/App.jsx", "export default () => null"),
            ],
        );

        let dest = dir.path().join("raw");
        tokio_test::assert_ok!(extract(&archive, &dest).await);

        assert!(dest.join("my-app/package.json").exists());
        assert!(dest.join("my-app/src/App.jsx").exists());
    }

    #[tokio::test]
    async fn test_extract_rejects_non_zip() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, "definitely not a zip").unwrap();

        let result = extract(&archive, &dir.path().join("raw")).await;
        assert!(matches!(
            result,
            Err(crate::error::AppError::Archive(ArchiveError::Invalid { .. }))
        ));
    }
}
