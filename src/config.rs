use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScraperError;

pub const BASE_URL: &str = "https://www.telerecours.juradm.fr";
pub const LOGIN_URL: &str = "https://www.telerecours.juradm.fr/AuthentifierUtilisateur/Login.aspx";
pub const SELECTION_URL: &str =
    "https://www.telerecours.juradm.fr/AuthentifierUtilisateur/SelectionJuridiction.aspx";

#[derive(Debug, Clone)]
pub struct TelerecoursConfig {
    pub base_url: String,
    pub login_url: String,
    pub selection_url: String,
    /// JSON出力先（<output_dir>/<CODE>/messages_<CODE>.json）
    pub output_dir: PathBuf,
    /// ブラウザのダウンロード先（添付は <downloads_dir>/<CODE>/ へ移動）
    pub downloads_dir: PathBuf,
    pub max_messages: usize,
    /// true の場合は既読メッセージを対象にする（テストモード）
    pub read_messages: bool,
    pub headless: bool,
    pub page_timeout: Duration,
    /// 操作間の待機（クライアント側スクリプトの反映待ち）
    pub settle_delay: Duration,
    /// ダウンロードファイルが現れるまでの待機上限
    pub download_timeout: Duration,
    pub session_id: String,
    pub webhook_url: Option<String>,
}

impl Default for TelerecoursConfig {
    fn default() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            login_url: LOGIN_URL.to_string(),
            selection_url: SELECTION_URL.to_string(),
            output_dir: PathBuf::from("./extractions"),
            downloads_dir: PathBuf::from("./pdfs"),
            max_messages: 100,
            read_messages: false,
            headless: true,
            page_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            download_timeout: Duration::from_secs(15),
            session_id: "telerecours_session".to_string(),
            webhook_url: None,
        }
    }
}

impl TelerecoursConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn with_downloads_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.downloads_dir = path.into();
        self
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_read_messages(mut self, read: bool) -> Self {
        self.read_messages = read;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn with_webhook_url(mut self, url: Option<String>) -> Self {
        self.webhook_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    /// ジュリディクション別のJSON出力ディレクトリ（なければ作成）
    pub fn jurisdiction_dir(&self, code: &str) -> Result<PathBuf, ScraperError> {
        let dir = self.output_dir.join(code);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// ジュリディクション別の添付ディレクトリ（なければ作成）
    pub fn attachments_dir(&self, code: &str) -> Result<PathBuf, ScraperError> {
        let dir = self.downloads_dir.join(code);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// ログイン認証情報。永続化しない。
#[derive(Clone)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    /// ネットワーク操作の前に必ず呼ぶ
    pub fn validate(&self) -> Result<(), ScraperError> {
        if self.identifier.trim().is_empty() {
            return Err(ScraperError::MissingCredentials("識別子が必要です".into()));
        }
        if self.secret.trim().is_empty() {
            return Err(ScraperError::MissingCredentials("パスワードが必要です".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"***")
            .finish()
    }
}
