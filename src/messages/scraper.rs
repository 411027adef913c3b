//! メッセージスクレイパー
//!
//! 一覧を開き、各メッセージの詳細を開いて添付を取得し、一覧に戻る。
//! 1件の失敗（詳細・添付・一覧復帰）はバッチ全体を止めない。

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time::sleep;
use tracing::{debug, info, warn};
use url::Url;

use super::download::{self, Expected};
use super::parse::{self, AttachmentLink, AttachmentTrigger};
use super::store;
use super::types::{AttachmentKind, AttachmentResult, JurisdictionReport, MessageRecord};
use crate::classify;
use crate::config::TelerecoursConfig;
use crate::error::ScraperError;
use crate::session::{PageScript, PageSession, PageSnapshot, WaitCondition};

pub(crate) const MESSAGES_TAB: &str = r#"td[title="Messages"]"#;
pub(crate) const LIST_ROW_MARKER: &str = "tr.tableListeTrR1, tr.tableListeTrR2";
pub(crate) const MESSAGE_HEADER: &str = "#divEnteteMsg";
pub(crate) const RETURN_BUTTON: &str = "#btRetour";

/// 一覧復帰・ダウンロード用スクリプトの待機上限
const SHORT_STEP_TIMEOUT: Duration = Duration::from_secs(15);
/// ダウンロードファイルの更新時刻の許容幅
const FRESHNESS_WINDOW: Duration = Duration::from_secs(5);

/// 画面状態
#[derive(Debug, Clone, PartialEq, Eq)]
enum View {
    ListClosed,
    ListOpen,
    DetailOpen { message_id: String },
    Done,
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::ListClosed => f.write_str("list-closed"),
            View::ListOpen => f.write_str("list-open"),
            View::DetailOpen { message_id } => write!(f, "detail-open({})", message_id),
            View::Done => f.write_str("done"),
        }
    }
}

fn transition(view: &mut View, next: View) {
    debug!("{} -> {}", view, next);
    *view = next;
}

pub struct MessageScraper<'a> {
    config: &'a TelerecoursConfig,
}

impl<'a> MessageScraper<'a> {
    pub fn new(config: &'a TelerecoursConfig) -> Self {
        Self { config }
    }

    /// 選択済みジュリディクションのメッセージを取得して保存する
    pub async fn scrape<S>(
        &self,
        session: &mut S,
        code: &str,
    ) -> Result<JurisdictionReport, ScraperError>
    where
        S: PageSession + ?Sized,
    {
        let mut view = View::ListClosed;
        let unread_only = !self.config.read_messages;
        let wanted = if unread_only { "未読" } else { "既読" };

        info!("メッセージタブを開いています...");
        let list = match self.open_list(session).await {
            Ok(list) => list,
            Err(e) => {
                warn!("{} のメッセージタブを開けませんでした: {}", code, e);
                return Ok(JurisdictionReport::empty(code));
            }
        };
        transition(&mut view, View::ListOpen);

        let records =
            parse::parse_message_list(&list.html, unread_only, self.config.max_messages);
        if records.is_empty() {
            info!("{} に{}メッセージはありません", code, wanted);
            return Ok(JurisdictionReport::empty(code));
        }
        info!("{}メッセージ {}件を処理します", wanted, records.len());

        let attachments_dir = self.config.attachments_dir(code)?;
        let total = records.len();
        let mut messages = Vec::with_capacity(total);

        for mut record in records {
            // 前回の一覧復帰に失敗していれば開き直す
            if let View::DetailOpen { message_id } = &view {
                warn!("{} の詳細が開いたままなので一覧を開き直します", message_id);
                match self.open_list(session).await {
                    Ok(_) => transition(&mut view, View::ListOpen),
                    Err(e) => {
                        warn!("一覧を開き直せないため残りのメッセージを中断します: {}", e);
                        break;
                    }
                }
            }

            info!(
                "メッセージ {}/{}: {}...",
                record.index,
                total,
                record.subject.chars().take(50).collect::<String>()
            );

            let detail = match self.open_detail(session, &record).await {
                Ok(detail) => detail,
                Err(e) => {
                    warn!("メッセージ {} をスキップ: {}", record.message_id, e);
                    continue;
                }
            };
            transition(
                &mut view,
                View::DetailOpen {
                    message_id: record.message_id.clone(),
                },
            );

            self.collect_attachments(session, &detail, &mut record, &attachments_dir)
                .await;
            messages.push(record);

            match self.return_to_list(session).await {
                Ok(()) => transition(&mut view, View::ListOpen),
                Err(e) => warn!("一覧への復帰に失敗: {}", e),
            }
            sleep(self.config.settle_delay).await;
        }
        transition(&mut view, View::Done);

        let output_dir = self.config.jurisdiction_dir(code)?;
        let path = store::save_messages(&output_dir, code, &messages)?;

        let report = JurisdictionReport {
            code: code.to_string(),
            messages,
            output_path: Some(path),
        };
        info!(
            "{}: メッセージ {}件, 添付 {}件 ({:.1} MB)",
            code,
            report.message_count(),
            report.attachment_count(),
            report.attachment_bytes() as f64 / (1024.0 * 1024.0)
        );
        Ok(report)
    }

    /// 前のジュリディクションの行が残っていても、新しく描画された行を待つ
    async fn open_list<S>(&self, session: &mut S) -> Result<PageSnapshot, ScraperError>
    where
        S: PageSession + ?Sized,
    {
        sleep(self.config.settle_delay).await;
        let open_tab = PageScript::CallOrClick {
            function: "ouvrirMessage".to_string(),
            args: Vec::new(),
            fallback_selector: Some(MESSAGES_TAB.to_string()),
        };
        session
            .run(
                &open_tab,
                &WaitCondition::fresh(LIST_ROW_MARKER),
                self.config.page_timeout,
            )
            .await
    }

    async fn open_detail<S>(
        &self,
        session: &mut S,
        record: &MessageRecord,
    ) -> Result<PageSnapshot, ScraperError>
    where
        S: PageSession + ?Sized,
    {
        sleep(self.config.settle_delay).await;
        let read = PageScript::CallOrClick {
            function: "lireMessage".to_string(),
            args: vec![record.message_id.clone(), record.message_type.clone()],
            fallback_selector: None,
        };
        session
            .run(
                &read,
                &WaitCondition::present(MESSAGE_HEADER),
                self.config.page_timeout,
            )
            .await
    }

    async fn return_to_list<S>(&self, session: &mut S) -> Result<(), ScraperError>
    where
        S: PageSession + ?Sized,
    {
        session
            .run(
                &PageScript::click(RETURN_BUTTON),
                &WaitCondition::absent(MESSAGE_HEADER),
                SHORT_STEP_TIMEOUT,
            )
            .await
            .map(|_| ())
    }

    async fn collect_attachments<S>(
        &self,
        session: &mut S,
        detail: &PageSnapshot,
        record: &mut MessageRecord,
        dest_dir: &Path,
    ) where
        S: PageSession + ?Sized,
    {
        let links = parse::extract_attachment_links(&detail.html);
        if links.is_empty() {
            return;
        }
        info!("   添付 {}件", links.len());

        for link in links {
            match self
                .fetch_attachment(session, &link, record, dest_dir, &detail.url)
                .await
            {
                Ok(attachment) => {
                    info!("      ✓ {}", attachment.filename);
                    record.attachments.push(attachment);
                }
                Err(e) => warn!("      ✗ {} をスキップ: {}", link.filename, e),
            }
            sleep(self.config.settle_delay * 2).await;
        }

        record.has_supplementary_attachments = record
            .attachments
            .iter()
            .any(|a| a.kind != AttachmentKind::PrimarySentLetter);
    }

    async fn fetch_attachment<S>(
        &self,
        session: &mut S,
        link: &AttachmentLink,
        record: &MessageRecord,
        dest_dir: &Path,
        page_url: &str,
    ) -> Result<AttachmentResult, ScraperError>
    where
        S: PageSession + ?Sized,
    {
        let filename = match link.kind {
            AttachmentKind::PrimarySentLetter => classify::name_attachment(
                record.category,
                &record.case_reference,
                &record.date,
                &link.filename,
            ),
            _ => format!("{}_{}", record.message_id, link.filename),
        };

        // これより古いファイルは以前のダウンロードの残骸
        let since = SystemTime::now()
            .checked_sub(FRESHNESS_WINDOW)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let expected = match &link.trigger {
            AttachmentTrigger::Href(href) => {
                let url = resolve_url(&self.config.base_url, page_url, href)?;
                debug!("取得: {}", url);
                let fetch = PageScript::FetchAndSave {
                    url,
                    filename: link.filename.clone(),
                };
                session
                    .run(&fetch, &WaitCondition::None, SHORT_STEP_TIMEOUT)
                    .await?;
                Expected::Named {
                    name: link.filename.clone(),
                    since,
                }
            }
            AttachmentTrigger::Click(id) => {
                let click = PageScript::click(format!(r#"a[id="{}"]"#, id));
                session
                    .run(&click, &WaitCondition::None, SHORT_STEP_TIMEOUT)
                    .await?;
                Expected::ModifiedSince(since)
            }
        };
        let downloaded = self.locate(session, expected).await?;

        let original = downloaded
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| link.filename.clone());

        download::claim_download(&downloaded, dest_dir, &filename, link.kind, &original)
    }

    /// セッションの完了通知を優先し、なければダウンロードディレクトリをポーリング
    async fn locate<S>(&self, session: &mut S, expected: Expected) -> Result<PathBuf, ScraperError>
    where
        S: PageSession + ?Sized,
    {
        let timeout = self.config.download_timeout;
        if let Some(path) = session.wait_for_download(timeout).await? {
            return Ok(path);
        }
        download::wait_for_file(session.download_dir(), &expected, timeout).await
    }
}

/// ルート相対・相対hrefを絶対URLにする
fn resolve_url(base_url: &str, page_url: &str, href: &str) -> Result<String, ScraperError> {
    let base = Url::parse(page_url)
        .or_else(|_| Url::parse(base_url))
        .map_err(|e| ScraperError::Download(format!("基準URLが不正です: {}", e)))?;
    base.join(href)
        .map(|url| url.to_string())
        .map_err(|e| ScraperError::Download(format!("{}: {}", href, e)))
}
