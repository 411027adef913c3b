use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{
    DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{CookieJar, PageScript, PageSession, PageSnapshot, WaitCondition};
use crate::config::TelerecoursConfig;
use crate::error::ScraperError;

/// 待機条件のポーリング間隔（ミリ秒）
const CONDITION_POLL_INTERVAL_MS: u64 = 250;
/// この時間内にダウンロード開始通知がなければポーリングに任せる
const DOWNLOAD_START_GRACE: Duration = Duration::from_secs(3);

/// ブラウザから届くダウンロード通知
#[derive(Debug)]
enum DownloadEvent {
    Began { guid: String, filename: String },
    Finished { guid: String, completed: bool },
}

/// chromiumoxide によるページセッション
pub struct ChromeSession {
    id: String,
    browser: Option<Browser>,
    page: Option<Page>,
    cookies: CookieJar,
    download_dir: PathBuf,
    /// 通知を購読できなかった場合は `None`
    downloads: Option<mpsc::UnboundedReceiver<DownloadEvent>>,
}

impl ChromeSession {
    /// ブラウザを起動してセッションを作成
    pub async fn launch(config: &TelerecoursConfig) -> Result<Self, ScraperError> {
        info!("ブラウザセッション {} を起動中...", config.session_id);

        std::fs::create_dir_all(&config.downloads_dir)?;
        let download_dir = config
            .downloads_dir
            .canonicalize()
            .unwrap_or_else(|_| config.downloads_dir.clone());

        let chrome_path = std::env::var("CHROME_PATH").or_else(|_| std::env::var("CHROMIUM_PATH"));

        let mut builder = BrowserConfig::builder()
            .window_size(1920, 1080)
            .request_timeout(Duration::from_secs(60))
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");

        if let Ok(path) = chrome_path {
            builder = builder.chrome_executable(path);
        }
        if !config.headless {
            builder = builder.with_head();
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScraperError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!("ブラウザイベント: {:?}", event);
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

        // a.download のファイル名をそのまま使うため Allow（AllowAndName はGUID名になる）
        let download_params = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().to_string())
            .events_enabled(true)
            .build()
            .map_err(|e| download_setup_error(&e))?;

        page.execute(download_params)
            .await
            .map_err(|e| download_setup_error(&e))?;

        let downloads = match subscribe_downloads(&browser).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                warn!("ダウンロード通知を購読できません。ポーリングで代替します: {}", e);
                None
            }
        };

        info!("ブラウザ準備完了: ダウンロード先 {:?}", download_dir);

        Ok(Self {
            id: config.session_id.clone(),
            browser: Some(browser),
            page: Some(page),
            cookies: CookieJar::new(),
            download_dir,
            downloads,
        })
    }

    fn page(&self) -> Result<&Page, ScraperError> {
        self.page
            .as_ref()
            .ok_or_else(|| ScraperError::BrowserInit("セッションは終了しています".into()))
    }

    /// 条件が真になるまでポーリング
    async fn wait_until(
        &self,
        until: &WaitCondition,
        timeout: Duration,
    ) -> Result<(), ScraperError> {
        let Some(expr) = until.to_js() else {
            return Ok(());
        };
        let page = self.page()?;
        let start = Instant::now();

        while start.elapsed() < timeout {
            match page.evaluate(expr.as_str()).await {
                Ok(val) => {
                    if val.into_value::<bool>().unwrap_or(false) {
                        debug!("条件 {:?} を満たしました ({:?})", until, start.elapsed());
                        return Ok(());
                    }
                }
                // 遷移中はコンテキストが破棄されるので未達として扱う
                Err(e) => debug!("条件評価エラー: {}", e),
            }
            sleep(Duration::from_millis(CONDITION_POLL_INTERVAL_MS)).await;
        }

        Err(ScraperError::Timeout(format!(
            "{:?} が{}ms以内に満たされませんでした",
            until,
            timeout.as_millis()
        )))
    }

    /// 遷移後処理: クッキーをキャプチャしてスナップショットを返す
    async fn snapshot(&mut self) -> Result<PageSnapshot, ScraperError> {
        let page = self.page()?;

        let html = page
            .content()
            .await
            .map_err(|e| ScraperError::Navigation(format!("HTML取得: {}", e)))?;
        let url = page
            .url()
            .await
            .map_err(|e| ScraperError::Navigation(format!("URL取得: {}", e)))?
            .unwrap_or_default();

        match page.get_cookies().await {
            Ok(cookies) => {
                self.cookies = cookies.into_iter().map(|c| (c.name, c.value)).collect();
                debug!("クッキー {}件をキャプチャ", self.cookies.len());
            }
            Err(e) => warn!("クッキー取得に失敗（前回の値を保持）: {}", e),
        }

        Ok(PageSnapshot {
            html,
            url,
            cookies: self.cookies.clone(),
        })
    }
}

fn download_setup_error(e: &dyn std::fmt::Display) -> ScraperError {
    ScraperError::BrowserInit(format!("ダウンロード設定エラー: {}", e))
}

/// ブラウザターゲットのダウンロードイベントをチャネルへ流す
async fn subscribe_downloads(
    browser: &Browser,
) -> Result<mpsc::UnboundedReceiver<DownloadEvent>, ScraperError> {
    let mut began = browser
        .event_listener::<EventDownloadWillBegin>()
        .await
        .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;
    let mut progress = browser
        .event_listener::<EventDownloadProgress>()
        .await
        .map_err(|e| ScraperError::BrowserInit(e.to_string()))?;

    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(ev) = began.next() => DownloadEvent::Began {
                    guid: ev.guid.clone(),
                    filename: ev.suggested_filename.clone(),
                },
                Some(ev) = progress.next() => match ev.state {
                    DownloadProgressState::Completed => DownloadEvent::Finished {
                        guid: ev.guid.clone(),
                        completed: true,
                    },
                    DownloadProgressState::Canceled => DownloadEvent::Finished {
                        guid: ev.guid.clone(),
                        completed: false,
                    },
                    _ => continue,
                },
                else => break,
            };
            if tx.send(event).is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

#[async_trait]
impl PageSession for ChromeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&mut self, url: &str, timeout: Duration) -> Result<PageSnapshot, ScraperError> {
        let page = self.page()?;
        debug!("ページを開く: {}", url);

        match tokio::time::timeout(timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ScraperError::Navigation(format!("{}: {}", url, e))),
            Err(_) => {
                return Err(ScraperError::Timeout(format!(
                    "{} の読み込みが{}ms以内に完了しませんでした",
                    url,
                    timeout.as_millis()
                )))
            }
        }

        self.wait_until(&WaitCondition::BodyReady, timeout).await?;
        self.snapshot().await
    }

    async fn run(
        &mut self,
        script: &PageScript,
        until: &WaitCondition,
        timeout: Duration,
    ) -> Result<PageSnapshot, ScraperError> {
        let page = self.page()?;

        if let Some(prepare) = until.prepare_js() {
            page.evaluate(prepare)
                .await
                .map_err(|e| ScraperError::JavaScript(e.to_string()))?;
        }

        let found: bool = page
            .evaluate(script.render())
            .await
            .map_err(|e| ScraperError::JavaScript(e.to_string()))?
            .into_value()
            .unwrap_or(false);

        if !found {
            return Err(ScraperError::ElementNotFound(script.target()));
        }

        self.wait_until(until, timeout).await?;
        self.snapshot().await
    }

    fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    async fn wait_for_download(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<PathBuf>, ScraperError> {
        let Some(rx) = self.downloads.as_mut() else {
            return Ok(None);
        };

        let start = Instant::now();
        let mut pending: Option<(String, String)> = None;

        loop {
            let limit = if pending.is_some() {
                timeout
            } else {
                DOWNLOAD_START_GRACE.min(timeout)
            };
            let Some(remaining) = limit.checked_sub(start.elapsed()) else {
                break;
            };

            let event = match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Some(event)) => event,
                // 送信側終了
                Ok(None) => {
                    self.downloads = None;
                    return Ok(None);
                }
                Err(_) => break,
            };
            debug!("ダウンロードイベント: {:?}", event);

            match event {
                DownloadEvent::Began { guid, filename } => pending = Some((guid, filename)),
                DownloadEvent::Finished { guid, completed } => {
                    let Some((expected, filename)) = pending.as_ref() else {
                        continue;
                    };
                    if *expected != guid {
                        continue;
                    }
                    if !completed {
                        return Err(ScraperError::Download(format!(
                            "{} がキャンセルされました",
                            filename
                        )));
                    }
                    let path = self.download_dir.join(filename);
                    if path.is_file() {
                        return Ok(Some(path));
                    }
                    warn!("ダウンロード完了通知のあとに {:?} が見つかりません", path);
                    return Ok(None);
                }
            }
        }

        match pending {
            Some((_, filename)) => Err(ScraperError::Timeout(format!(
                "{} のダウンロードが{}秒以内に完了しませんでした",
                filename,
                timeout.as_secs()
            ))),
            None => Ok(None),
        }
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        info!("ブラウザセッション {} を終了中...", self.id);

        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("ページのクローズに失敗: {}", e);
            }
        }

        self.downloads = None;

        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!("ブラウザのクローズに失敗: {}", e);
            }
            if let Some(Err(e)) = browser.kill().await {
                debug!("ブラウザプロセスの終了に失敗: {}", e);
            }
        }

        info!("ブラウザセッション終了");
        Ok(())
    }
}
