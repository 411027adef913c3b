//! メッセージ取得
//!
//! 一覧の解析、詳細ページの添付取得、JSON保存。

pub mod download;
pub mod parse;
pub mod scraper;
pub mod store;
pub mod types;

pub use self::scraper::MessageScraper;
pub use store::{load_messages, messages_file_name, save_messages};
pub use types::{AttachmentKind, AttachmentResult, JurisdictionReport, MessageRecord, ReadStatus};
