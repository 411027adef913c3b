use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tower::Service;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::config::{Credentials, TelerecoursConfig};
use crate::error::ScraperError;
use crate::messages::{JurisdictionReport, MessageScraper};
use crate::notifs::{self, Jurisdiction, NotificationDetector};
use crate::session::{ChromeSession, CookieJar, PageSession};
use crate::webhook::{self, WebhookPayload};

/// 実行モード
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMode {
    /// 通知のある全ジュリディクション（確認あり）
    Auto,
    /// コード指定の1件
    Jurisdiction(String),
    /// メニューで選択
    Interactive,
}

/// 対話モードの選択結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    One(String),
    Quit,
}

/// 利用者への確認・選択
pub trait SelectionPrompt: Send {
    /// 一覧の全件を処理してよいか
    fn confirm(&mut self, jurisdictions: &[Jurisdiction]) -> bool;

    fn choose(&mut self, jurisdictions: &[Jurisdiction]) -> Selection;
}

/// 常に全件を承認する（`--yes`、非対話実行）
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoConfirm;

impl SelectionPrompt for AutoConfirm {
    fn confirm(&mut self, _jurisdictions: &[Jurisdiction]) -> bool {
        true
    }

    fn choose(&mut self, _jurisdictions: &[Jurisdiction]) -> Selection {
        Selection::All
    }
}

/// 実行結果の集計
#[derive(Debug, Default)]
pub struct RunSummary {
    /// 1件以上のメッセージを得たジュリディクション数
    pub jurisdictions_processed: usize,
    pub messages: usize,
    pub attachments: usize,
    pub attachment_bytes: u64,
    pub duration: Duration,
    pub reports: Vec<(Jurisdiction, JurisdictionReport)>,
    /// webhook未設定・未送信なら `None`
    pub webhook_delivered: Option<bool>,
    pub session_id: String,
    /// ログインで確立したクッキー
    pub cookies: CookieJar,
}

impl RunSummary {
    fn from_reports(reports: Vec<(Jurisdiction, JurisdictionReport)>, started: Instant) -> Self {
        Self {
            jurisdictions_processed: reports
                .iter()
                .filter(|(_, r)| r.message_count() > 0)
                .count(),
            messages: reports.iter().map(|(_, r)| r.message_count()).sum(),
            attachments: reports.iter().map(|(_, r)| r.attachment_count()).sum(),
            attachment_bytes: reports.iter().map(|(_, r)| r.attachment_bytes()).sum(),
            duration: started.elapsed(),
            reports,
            webhook_delivered: None,
            session_id: String::new(),
            cookies: CookieJar::new(),
        }
    }

    fn nothing(started: Instant) -> Self {
        Self::from_reports(Vec::new(), started)
    }

    fn with_session(mut self, session_id: &str, cookies: CookieJar) -> Self {
        self.session_id = session_id.to_string();
        self.cookies = cookies;
        self
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(70);
        writeln!(f, "{}", rule)?;
        writeln!(f, "抽出結果")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "処理したジュリディクション: {}", self.jurisdictions_processed)?;
        writeln!(f, "取得したメッセージ: {}", self.messages)?;
        writeln!(
            f,
            "取得したPDF: {} ({:.1} MB)",
            self.attachments,
            self.attachment_bytes as f64 / (1024.0 * 1024.0)
        )?;
        writeln!(f, "所要時間: {:.1}s", self.duration.as_secs_f64())?;
        if !self.session_id.is_empty() {
            writeln!(
                f,
                "セッション: {} (クッキー {}件)",
                self.session_id,
                self.cookies.len()
            )?;
        }
        match self.webhook_delivered {
            Some(true) => writeln!(f, "webhook: 送信済み")?,
            Some(false) => writeln!(f, "webhook: 失敗")?,
            None => {}
        }
        write!(f, "{}", rule)
    }
}

/// ログイン → 通知検出 → ジュリディクションごとの取得 → webhook
pub struct Orchestrator<'a> {
    config: &'a TelerecoursConfig,
    credentials: &'a Credentials,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a TelerecoursConfig, credentials: &'a Credentials) -> Self {
        Self {
            config,
            credentials,
        }
    }

    /// 認証失敗のみ `Err`。ジュリディクション単位の失敗はログに残して続行する。
    pub async fn run<S>(
        &self,
        session: &mut S,
        mode: &RunMode,
        prompt: &mut dyn SelectionPrompt,
    ) -> Result<RunSummary, ScraperError>
    where
        S: PageSession + ?Sized,
    {
        let started = Instant::now();

        let cookies = Authenticator::new(self.config, self.credentials)
            .login(session)
            .await?;
        let session_id = session.id().to_string();

        let detector = NotificationDetector::new(self.config);
        let jurisdictions = detector.list(session, None).await;
        if jurisdictions.is_empty() {
            info!("通知はありません");
            return Ok(RunSummary::nothing(started).with_session(&session_id, cookies));
        }

        let targets = match self.targets(mode, jurisdictions, prompt) {
            Some(targets) => targets,
            None => return Ok(RunSummary::nothing(started).with_session(&session_id, cookies)),
        };

        let scraper = MessageScraper::new(self.config);
        let total = targets.len();
        let mut reports = Vec::with_capacity(total);

        for (i, jurisdiction) in targets.into_iter().enumerate() {
            info!(
                "ジュリディクション {}/{}: {} ({}), 未読 {}件",
                i + 1,
                total,
                jurisdiction.code,
                jurisdiction.name,
                jurisdiction.pending
            );

            if let Err(e) = detector.select(session, &jurisdiction).await {
                warn!("{} をスキップ: {}", jurisdiction.code, e);
                continue;
            }

            match scraper.scrape(session, &jurisdiction.code).await {
                Ok(report) => reports.push((jurisdiction, report)),
                Err(e) => warn!("{} の抽出に失敗: {}", jurisdiction.code, e),
            }
        }

        let mut summary =
            RunSummary::from_reports(reports, started).with_session(&session_id, cookies);
        summary.webhook_delivered = self.forward(&summary.reports).await;
        Ok(summary)
    }

    /// `run` の後、成否にかかわらずセッションを閉じる
    pub async fn run_and_close<S>(
        &self,
        session: &mut S,
        mode: &RunMode,
        prompt: &mut dyn SelectionPrompt,
    ) -> Result<RunSummary, ScraperError>
    where
        S: PageSession + ?Sized,
    {
        let result = self.run(session, mode, prompt).await;

        debug!(
            "セッション {} を終了 (クッキー {}件)",
            session.id(),
            session.cookies().len()
        );
        if let Err(e) = session.close().await {
            error!("セッション終了エラー: {}", e);
        }
        result
    }

    /// モードに応じて処理対象を決める。`None` は処理なしで終了。
    fn targets(
        &self,
        mode: &RunMode,
        jurisdictions: Vec<Jurisdiction>,
        prompt: &mut dyn SelectionPrompt,
    ) -> Option<Vec<Jurisdiction>> {
        match mode {
            RunMode::Auto => {
                info!("\n{}", notifs::display(&jurisdictions));
                if prompt.confirm(&jurisdictions) {
                    Some(jurisdictions)
                } else {
                    info!("抽出を中止しました");
                    None
                }
            }
            RunMode::Jurisdiction(code) => pick(jurisdictions, code),
            RunMode::Interactive => {
                info!("\n{}", notifs::display(&jurisdictions));
                match prompt.choose(&jurisdictions) {
                    Selection::All => Some(jurisdictions),
                    Selection::One(code) => pick(jurisdictions, &code),
                    Selection::Quit => None,
                }
            }
        }
    }

    async fn forward(&self, reports: &[(Jurisdiction, JurisdictionReport)]) -> Option<bool> {
        let url = self.config.webhook_url.as_deref()?;
        let payload = WebhookPayload::build(reports);
        if payload.is_empty() {
            info!("送信するメッセージはありません");
            return None;
        }

        match webhook::send(url, &payload).await {
            Ok(()) => Some(true),
            Err(e) => {
                warn!("{}", e);
                Some(false)
            }
        }
    }
}

fn pick(jurisdictions: Vec<Jurisdiction>, code: &str) -> Option<Vec<Jurisdiction>> {
    let code = code.trim();
    let found = jurisdictions
        .into_iter()
        .find(|j| j.code.eq_ignore_ascii_case(code));
    if found.is_none() {
        warn!("ジュリディクション {} が見つからないか通知がありません", code);
    }
    found.map(|j| vec![j])
}

/// 抽出リクエスト
pub struct ExtractionRequest {
    pub config: TelerecoursConfig,
    pub credentials: Credentials,
    pub mode: RunMode,
    pub prompt: Box<dyn SelectionPrompt>,
}

impl ExtractionRequest {
    pub fn new(config: TelerecoursConfig, credentials: Credentials, mode: RunMode) -> Self {
        Self {
            config,
            credentials,
            mode,
            prompt: Box::new(AutoConfirm),
        }
    }

    pub fn with_prompt(mut self, prompt: impl SelectionPrompt + 'static) -> Self {
        self.prompt = Box::new(prompt);
        self
    }
}

impl fmt::Debug for ExtractionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionRequest")
            .field("config", &self.config)
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// tower::Serviceを実装した抽出サービス。ブラウザセッションの起動と終了を受け持つ。
#[derive(Debug, Clone, Default)]
pub struct ExtractionService {}

impl ExtractionService {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Service<ExtractionRequest> for ExtractionService {
    type Response = RunSummary;
    type Error = ScraperError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ExtractionRequest) -> Self::Future {
        info!("抽出リクエスト受信: mode={:?}", req.mode);

        Box::pin(async move {
            let ExtractionRequest {
                config,
                credentials,
                mode,
                mut prompt,
            } = req;

            // ブラウザ起動前に検証する
            credentials.validate()?;

            let mut session = ChromeSession::launch(&config).await?;
            let summary = Orchestrator::new(&config, &credentials)
                .run_and_close(&mut session, &mode, prompt.as_mut())
                .await?;
            info!(
                "抽出完了: jurisdictions={}, messages={}, attachments={}",
                summary.jurisdictions_processed, summary.messages, summary.attachments
            );
            Ok(summary)
        })
    }
}
