//! 抽出結果のwebhook送信

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ScraperError;
use crate::messages::{JurisdictionReport, MessageRecord};
use crate::notifs::Jurisdiction;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// ジュリディクション情報を付けたメッセージ
#[derive(Debug, Serialize)]
pub struct AnnotatedMessage<'a> {
    pub jurisdiction_code: &'a str,
    pub jurisdiction_name: &'a str,
    #[serde(flatten)]
    pub record: &'a MessageRecord,
}

#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub timestamp: String,
    pub jurisdiction_count: usize,
    pub total_messages: usize,
    pub messages: Vec<AnnotatedMessage<'a>>,
}

impl<'a> WebhookPayload<'a> {
    /// 処理済みジュリディクションの結果から組み立てる
    pub fn build(results: &'a [(Jurisdiction, JurisdictionReport)]) -> Self {
        let messages: Vec<AnnotatedMessage<'a>> = results
            .iter()
            .flat_map(|(jurisdiction, report)| {
                report.messages.iter().map(move |record| AnnotatedMessage {
                    jurisdiction_code: &jurisdiction.code,
                    jurisdiction_name: &jurisdiction.name,
                    record,
                })
            })
            .collect();

        Self {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            jurisdiction_count: results.len(),
            total_messages: messages.len(),
            messages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn is_accepted(status: StatusCode) -> bool {
    matches!(status.as_u16(), 200 | 201 | 202 | 204)
}

/// POSTで送信する。呼び出し側はエラーをログに残すだけでよい。
pub async fn send(url: &str, payload: &WebhookPayload<'_>) -> Result<(), ScraperError> {
    let client = reqwest::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .build()
        .map_err(|e| ScraperError::Webhook(e.to_string()))?;

    info!(
        "webhookに {}件のメッセージを送信: {}",
        payload.total_messages, url
    );
    let response = client
        .post(url)
        .json(payload)
        .send()
        .await
        .map_err(|e| ScraperError::Webhook(e.to_string()))?;

    let status = response.status();
    if !is_accepted(status) {
        let body = response.text().await.unwrap_or_default();
        warn!("webhookが拒否しました: {} {}", status, body);
        return Err(ScraperError::Webhook(format!("HTTP {}", status)));
    }

    info!("webhook送信完了 ({})", status);
    Ok(())
}
