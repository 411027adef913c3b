//! ページセッション抽象
//!
//! ログインからメッセージ一覧まで、1つの認証済みブラウザコンテキストを
//! 順番に遷移させるための操作をまとめる。ポータルのポストバックは
//! 再入不可なので、同一セッションに対する操作は常に直列に行う。

mod chrome;
mod script;
#[cfg(test)]
pub(crate) mod testing;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ScraperError;

pub use chrome::ChromeSession;
pub use script::PageScript;

/// クッキー名 → 値
pub type CookieJar = HashMap<String, String>;

/// 遷移後のページ状態
#[derive(Debug, Clone, Default)]
pub struct PageSnapshot {
    pub html: String,
    pub url: String,
    /// 遷移直後にキャプチャしたクッキー
    pub cookies: CookieJar,
}

/// 遷移前から存在した要素に付ける印
pub(crate) const STALE_ATTR: &str = "data-tr-stale";

/// スクリプト実行後に待機する条件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    None,
    BodyReady,
    Present(String),
    Absent(String),
    /// スクリプト実行前には無かった要素が現れる（ポストバック後の再描画待ち）
    Fresh(String),
}

impl WaitCondition {
    pub fn present(selector: impl Into<String>) -> Self {
        WaitCondition::Present(selector.into())
    }

    pub fn absent(selector: impl Into<String>) -> Self {
        WaitCondition::Absent(selector.into())
    }

    pub fn fresh(selector: impl Into<String>) -> Self {
        WaitCondition::Fresh(selector.into())
    }

    /// スクリプト実行前に評価する準備式。`Fresh` では既存の要素に印を付ける。
    pub fn prepare_js(&self) -> Option<String> {
        match self {
            WaitCondition::Fresh(selector) => Some(format!(
                "document.querySelectorAll({}).forEach(el => el.setAttribute({}, '')), true",
                script::js_str(selector),
                script::js_str(STALE_ATTR)
            )),
            _ => None,
        }
    }

    /// ページ上で評価する真偽値式
    pub fn to_js(&self) -> Option<String> {
        match self {
            WaitCondition::None => None,
            WaitCondition::BodyReady => Some(
                "document.readyState === 'complete' && document.body !== null".to_string(),
            ),
            WaitCondition::Present(selector) => Some(format!(
                "document.querySelector({}) !== null",
                script::js_str(selector)
            )),
            WaitCondition::Absent(selector) => Some(format!(
                "document.querySelector({}) === null",
                script::js_str(selector)
            )),
            WaitCondition::Fresh(selector) => Some(format!(
                "document.readyState === 'complete' && \
                 Array.from(document.querySelectorAll({})).some(el => !el.hasAttribute({}))",
                script::js_str(selector),
                script::js_str(STALE_ATTR)
            )),
        }
    }
}

#[async_trait]
pub trait PageSession: Send {
    /// セッション識別子
    fn id(&self) -> &str;

    /// URLを開く
    async fn open(&mut self, url: &str, timeout: Duration) -> Result<PageSnapshot, ScraperError>;

    /// 現在のページでスクリプトを実行し、条件が満たされるまで待機。
    /// `until.prepare_js()` があればスクリプトより先に評価する。
    async fn run(
        &mut self,
        script: &PageScript,
        until: &WaitCondition,
        timeout: Duration,
    ) -> Result<PageSnapshot, ScraperError>;

    /// 最後の遷移でキャプチャしたクッキー
    fn cookies(&self) -> &CookieJar;

    /// ブラウザのダウンロード先
    fn download_dir(&self) -> &Path;

    /// ダウンロード完了通知。通知手段がない実装は `None` を返し、
    /// 呼び出し側がディレクトリをポーリングする。
    async fn wait_for_download(
        &mut self,
        _timeout: Duration,
    ) -> Result<Option<PathBuf>, ScraperError> {
        Ok(None)
    }

    /// セッションを終了する（複数回呼んでもよい）
    async fn close(&mut self) -> Result<(), ScraperError>;
}
