//! ログイン処理

use tokio::time::sleep;
use tracing::{debug, info};

use crate::config::{Credentials, TelerecoursConfig};
use crate::error::ScraperError;
use crate::session::{CookieJar, PageScript, PageSession, WaitCondition};

pub(crate) const LOGIN_SUBMIT: &str = "#login-submit";
/// ログイン後のジュリディクション選択ページの目印
pub(crate) const JURISDICTION_MARKER: &str = "li[name^='TA']";

pub struct Authenticator<'a> {
    config: &'a TelerecoursConfig,
    credentials: &'a Credentials,
}

impl<'a> Authenticator<'a> {
    pub fn new(config: &'a TelerecoursConfig, credentials: &'a Credentials) -> Self {
        Self {
            config,
            credentials,
        }
    }

    /// ログインし、確立したセッションのクッキーを返す。失敗はリトライしない。
    pub async fn login<S>(&self, session: &mut S) -> Result<CookieJar, ScraperError>
    where
        S: PageSession + ?Sized,
    {
        self.credentials.validate()?;
        info!("{} としてTélérecoursに接続中...", self.credentials.identifier);

        let login_page = session
            .open(&self.config.login_url, self.config.page_timeout)
            .await
            .map_err(|e| ScraperError::Login(format!("ログインページを開けません: {}", e)))?;
        debug!("ログインページ: {}", login_page.url);

        let fill = PageScript::FillLogin {
            identifier: self.credentials.identifier.clone(),
            secret: self.credentials.secret.clone(),
        };
        session
            .run(&fill, &WaitCondition::None, self.config.page_timeout)
            .await
            .map_err(|e| ScraperError::Login(format!("認証情報の入力: {}", e)))?;

        // クライアント側バリデーションを待つ
        sleep(self.config.settle_delay).await;

        let landing = session
            .run(
                &PageScript::click(LOGIN_SUBMIT),
                &WaitCondition::present(JURISDICTION_MARKER),
                self.config.page_timeout,
            )
            .await
            .map_err(|e| ScraperError::Login(format!("送信後の画面遷移: {}", e)))?;

        info!("ログイン成功 (クッキー {}件)", landing.cookies.len());
        Ok(landing.cookies)
    }
}
