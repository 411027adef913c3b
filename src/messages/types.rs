//! メッセージ関連の型定義

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::classify::Category;

/// 既読状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    Unread,
    Read,
}

/// 添付の検出方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttachmentKind {
    /// 「送付書面」行の最初のPDFリンク
    PrimarySentLetter,
    DirectLink,
    /// hrefを持たず、クリックでダウンロードされるリンク
    OnclickTriggered,
}

/// 取得済み添付
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentResult {
    pub kind: AttachmentKind,
    pub original_filename: String,
    pub filename: String,
    pub size_bytes: u64,
    /// PDF本体（Base64）
    pub content_base64: String,
}

/// メッセージ1件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// 切り詰め後の一覧での1始まりの位置
    pub index: usize,
    pub message_id: String,
    pub message_type: String,
    pub status: ReadStatus,
    pub sender: String,
    pub case_reference: String,
    /// 元の件名
    pub subject: String,
    pub category: Category,
    pub rapporteur: String,
    pub date: String,
    #[serde(default)]
    pub attachments: Vec<AttachmentResult>,
    /// 主添付以外の添付があるか
    #[serde(default)]
    pub has_supplementary_attachments: bool,
}

impl MessageRecord {
    pub fn attachment_bytes(&self) -> u64 {
        self.attachments.iter().map(|a| a.size_bytes).sum()
    }

    pub fn primary_attachment(&self) -> Option<&AttachmentResult> {
        self.attachments
            .iter()
            .find(|a| a.kind == AttachmentKind::PrimarySentLetter)
    }
}

/// ジュリディクション単位の結果
#[derive(Debug, Clone, Default)]
pub struct JurisdictionReport {
    pub code: String,
    pub messages: Vec<MessageRecord>,
    pub output_path: Option<PathBuf>,
}

impl JurisdictionReport {
    pub fn empty(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Default::default()
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn attachment_count(&self) -> usize {
        self.messages.iter().map(|m| m.attachments.len()).sum()
    }

    pub fn attachment_bytes(&self) -> u64 {
        self.messages.iter().map(MessageRecord::attachment_bytes).sum()
    }
}
