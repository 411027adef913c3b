//! テスト用のスクリプト駆動セッション

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use super::{CookieJar, PageScript, PageSession, PageSnapshot, WaitCondition};
use crate::error::ScraperError;

type Handler = Box<dyn FnMut(&PageScript, &Path) -> Result<String, ScraperError> + Send>;

/// 実行されたスクリプトに応じてHTMLを返すセッション
pub(crate) struct ScriptedSession {
    pub url: String,
    pub opened: Vec<String>,
    pub scripts: Vec<PageScript>,
    pub waits: Vec<WaitCondition>,
    pub open_html: Result<String, String>,
    pub closed: usize,
    cookies: CookieJar,
    download_dir: PathBuf,
    handler: Handler,
}

impl ScriptedSession {
    pub fn new(
        download_dir: impl Into<PathBuf>,
        handler: impl FnMut(&PageScript, &Path) -> Result<String, ScraperError> + Send + 'static,
    ) -> Self {
        let mut cookies = CookieJar::new();
        cookies.insert("ASP.NET_SessionId".to_string(), "abc123".to_string());
        Self {
            url: "https://www.telerecours.juradm.fr/Messages.aspx".to_string(),
            opened: Vec::new(),
            scripts: Vec::new(),
            waits: Vec::new(),
            open_html: Ok("<html><body></body></html>".to_string()),
            closed: 0,
            cookies,
            download_dir: download_dir.into(),
            handler: Box::new(handler),
        }
    }

    pub fn with_open_html(mut self, html: Result<&str, &str>) -> Self {
        self.open_html = html.map(str::to_string).map_err(str::to_string);
        self
    }
}

#[async_trait]
impl PageSession for ScriptedSession {
    fn id(&self) -> &str {
        "scripted"
    }

    async fn open(&mut self, url: &str, _timeout: Duration) -> Result<PageSnapshot, ScraperError> {
        self.opened.push(url.to_string());
        let html = self.open_html.clone().map_err(ScraperError::Navigation)?;
        self.url = url.to_string();
        Ok(PageSnapshot {
            html,
            url: self.url.clone(),
            cookies: self.cookies.clone(),
        })
    }

    async fn run(
        &mut self,
        script: &PageScript,
        until: &WaitCondition,
        _timeout: Duration,
    ) -> Result<PageSnapshot, ScraperError> {
        self.scripts.push(script.clone());
        self.waits.push(until.clone());
        let html = (self.handler)(script, &self.download_dir)?;
        Ok(PageSnapshot {
            html,
            url: self.url.clone(),
            cookies: self.cookies.clone(),
        })
    }

    fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        self.closed += 1;
        Ok(())
    }
}
