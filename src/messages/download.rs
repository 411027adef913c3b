//! ダウンロードディレクトリの監視と取り込み
//!
//! ダウンロードは常に1件ずつ行うため、ディレクトリはロックせずにポーリングする。

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use base64::Engine;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::types::{AttachmentKind, AttachmentResult};
use crate::error::ScraperError;

const POLL_INTERVAL_MS: u64 = 500;

/// 探すファイル
#[derive(Debug, Clone)]
pub enum Expected {
    /// ファイル名が事前に分かっている（href型）。`since` 以前の同名ファイルは古い残骸として無視する。
    Named { name: String, since: SystemTime },
    /// 指定時刻以降に更新された最新のファイル（クリック型）
    ModifiedSince(SystemTime),
}

fn modified_since(meta: &std::fs::Metadata, since: SystemTime) -> Option<SystemTime> {
    let modified = meta.modified().ok()?;
    (meta.is_file() && modified >= since).then_some(modified)
}

fn is_partial(path: &Path) -> bool {
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    name.ends_with(".crdownload") || name.ends_with(".tmp") || name.ends_with(".part")
}

/// ディレクトリ直下から条件に合うファイルを探す
pub fn find_download(dir: &Path, expected: &Expected) -> Option<PathBuf> {
    match expected {
        Expected::Named { name, since } => {
            let path = dir.join(name);
            let meta = std::fs::metadata(&path).ok()?;
            modified_since(&meta, *since).map(|_| path)
        }
        Expected::ModifiedSince(since) => std::fs::read_dir(dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let meta = entry.metadata().ok()?;
                modified_since(&meta, *since).map(|modified| (modified, entry.path()))
            })
            .filter(|(_, path)| !is_partial(path))
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, path)| path),
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("ファイル削除に失敗: {:?}: {}", path, e);
        }
    }
}

/// ファイルが現れるまで待機
pub async fn wait_for_file(
    dir: &Path,
    expected: &Expected,
    timeout: Duration,
) -> Result<PathBuf, ScraperError> {
    let start = Instant::now();

    loop {
        if let Some(path) = find_download(dir, expected) {
            info!("ダウンロード検出: {:?}", path);
            return Ok(path);
        }

        if start.elapsed() > timeout {
            return Err(ScraperError::Timeout(format!(
                "{:?} が{}秒以内に {:?} に現れませんでした",
                expected,
                timeout.as_secs(),
                dir
            )));
        }

        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}

/// ダウンロードしたファイルを添付ディレクトリへ移し、内容をBase64で取り込んでから削除する。
/// 失敗した場合もダウンロード済みファイルは残さない。
pub fn claim_download(
    downloaded: &Path,
    dest_dir: &Path,
    filename: &str,
    kind: AttachmentKind,
    original_filename: &str,
) -> Result<AttachmentResult, ScraperError> {
    let dest = dest_dir.join(filename);

    let moved = std::fs::create_dir_all(dest_dir).and_then(|_| std::fs::rename(downloaded, &dest));
    if let Err(e) = moved {
        discard(downloaded);
        return Err(ScraperError::Download(format!(
            "{:?} -> {:?}: {}",
            downloaded, dest, e
        )));
    }
    debug!("移動: {:?} -> {:?}", downloaded, dest);

    let read = std::fs::read(&dest);
    discard(&dest);
    let bytes = read?;
    let content_base64 = base64::engine::general_purpose::STANDARD.encode(&bytes);

    Ok(AttachmentResult {
        kind,
        original_filename: original_filename.to_string(),
        filename: filename.to_string(),
        size_bytes: bytes.len() as u64,
        content_base64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, since: SystemTime) -> Expected {
        Expected::Named {
            name: name.to_string(),
            since,
        }
    }

    #[test]
    fn test_find_named() {
        let tmp = tempfile::tempdir().unwrap();
        let since = SystemTime::now() - Duration::from_secs(30);
        assert!(find_download(tmp.path(), &named("a.pdf", since)).is_none());

        std::fs::write(tmp.path().join("a.pdf"), b"%PDF").unwrap();
        assert_eq!(
            find_download(tmp.path(), &named("a.pdf", since)),
            Some(tmp.path().join("a.pdf"))
        );
    }

    #[test]
    fn test_find_named_ignores_leftover_from_earlier_download() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("lettre.pdf"), b"%PDF old").unwrap();
        let later = SystemTime::now() + Duration::from_secs(3600);
        assert!(find_download(tmp.path(), &named("lettre.pdf", later)).is_none());
    }

    #[test]
    fn test_find_recent_skips_partial_and_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let since = SystemTime::now() - Duration::from_secs(30);
        std::fs::create_dir(tmp.path().join("TA75")).unwrap();
        std::fs::write(tmp.path().join("x.pdf.crdownload"), b"..").unwrap();
        assert!(find_download(tmp.path(), &Expected::ModifiedSince(since)).is_none());

        std::fs::write(tmp.path().join("accuse.pdf"), b"%PDF").unwrap();
        assert_eq!(
            find_download(tmp.path(), &Expected::ModifiedSince(since)),
            Some(tmp.path().join("accuse.pdf"))
        );
    }

    #[test]
    fn test_find_recent_ignores_stale_files() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("old.pdf"), b"%PDF").unwrap();
        let future = SystemTime::now() + Duration::from_secs(3600);
        assert!(find_download(tmp.path(), &Expected::ModifiedSince(future)).is_none());
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let result = wait_for_file(
            tmp.path(),
            &named("missing.pdf", SystemTime::now()),
            Duration::from_millis(100),
        )
        .await;
        assert!(matches!(result, Err(ScraperError::Timeout(_))));
    }

    #[test]
    fn test_claim_encodes_and_removes() {
        let tmp = tempfile::tempdir().unwrap();
        let downloaded = tmp.path().join("doc123.pdf");
        std::fs::write(&downloaded, b"%PDF-1.4 test").unwrap();
        let dest = tmp.path().join("TA75");

        let result = claim_download(
            &downloaded,
            &dest,
            "AR_DIARRA-Bouh_11-2025.pdf",
            AttachmentKind::PrimarySentLetter,
            "doc123.pdf",
        )
        .unwrap();

        assert_eq!(result.filename, "AR_DIARRA-Bouh_11-2025.pdf");
        assert_eq!(result.original_filename, "doc123.pdf");
        assert_eq!(result.size_bytes, 13);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(&result.content_base64)
            .unwrap();
        assert_eq!(decoded, b"%PDF-1.4 test");
        assert!(!downloaded.exists());
        assert!(!dest.join("AR_DIARRA-Bouh_11-2025.pdf").exists());
    }

    #[test]
    fn test_claim_missing_file_is_download_error() {
        let tmp = tempfile::tempdir().unwrap();
        let result = claim_download(
            &tmp.path().join("nope.pdf"),
            tmp.path(),
            "x.pdf",
            AttachmentKind::DirectLink,
            "nope.pdf",
        );
        assert!(matches!(result, Err(ScraperError::Download(_))));
    }

    #[test]
    fn test_failed_claim_removes_download() {
        let tmp = tempfile::tempdir().unwrap();
        let downloaded = tmp.path().join("lettre.pdf");
        std::fs::write(&downloaded, b"%PDF").unwrap();

        // 存在しないサブディレクトリを指す名前では移動できない
        let result = claim_download(
            &downloaded,
            &tmp.path().join("TA75"),
            "missing/AR.pdf",
            AttachmentKind::PrimarySentLetter,
            "lettre.pdf",
        );

        assert!(matches!(result, Err(ScraperError::Download(_))));
        assert!(!downloaded.exists());
    }
}
