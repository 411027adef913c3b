//! メッセージのJSON保存

use std::path::{Path, PathBuf};

use tracing::info;

use super::types::MessageRecord;
use crate::error::ScraperError;

pub fn messages_file_name(code: &str) -> String {
    format!("messages_{}.json", code)
}

/// ジュリディクション単位でメッセージ配列を保存（配列順 = index順）
pub fn save_messages(
    dir: &Path,
    code: &str,
    messages: &[MessageRecord],
) -> Result<PathBuf, ScraperError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(messages_file_name(code));
    let json = serde_json::to_string_pretty(messages)?;
    std::fs::write(&path, json)?;
    info!("メッセージ {}件を保存: {:?}", messages.len(), path);
    Ok(path)
}

pub fn load_messages(path: &Path) -> Result<Vec<MessageRecord>, ScraperError> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}
