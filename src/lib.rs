//! Télérecours スクレイパーライブラリ
//!
//! - ポータルにログインし、未読通知のあるジュリディクションを検出
//! - ジュリディクションごとにメッセージと添付PDFを取得してJSONに保存
//! - 結果を任意のwebhookへ転送
//!
//! # 使用例
//!
//! ```rust,ignore
//! use telerecours_scraper::{
//!     Credentials, ExtractionRequest, ExtractionService, RunMode, TelerecoursConfig,
//! };
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut service = ExtractionService::new();
//!
//!     let config = TelerecoursConfig::new()
//!         .with_max_messages(10)
//!         .with_headless(false);
//!     let request = ExtractionRequest::new(
//!         config,
//!         Credentials::new("identifiant", "mot de passe"),
//!         RunMode::Jurisdiction("TA75".to_string()),
//!     );
//!
//!     let summary = service.call(request).await.unwrap();
//!     println!("{}", summary);
//! }
//! ```

pub mod auth;
pub mod classify;
pub mod config;
pub mod error;
pub mod messages;
pub mod notifs;
pub mod service;
pub mod session;
pub mod webhook;

// 主要な型をリエクスポート
pub use auth::Authenticator;
pub use classify::Category;
pub use config::{Credentials, TelerecoursConfig};
pub use error::ScraperError;
pub use messages::{JurisdictionReport, MessageRecord, MessageScraper};
pub use notifs::{Jurisdiction, NotificationDetector};
pub use service::{
    AutoConfirm, ExtractionRequest, ExtractionService, Orchestrator, RunMode, RunSummary,
    Selection, SelectionPrompt,
};
pub use session::{ChromeSession, PageSession};
