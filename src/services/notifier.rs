//! 异常通知 - 业务能力层
//!
//! 通知时机由 [`notification_policy`] 决定：有失败行政区或总笔数为 0。
//! 投递方式只是一个 [`Notifier`] 实现，投递失败只记录日志。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::NotifyError;
use crate::models::{BatchId, BatchOutcome, NotificationRecipient};

const SUBJECT_PREFIX: &str = "[戶政爬蟲] 異常通知";
const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// 有行政区重试耗尽
    CrawlerFailure,
    /// 全部行政区都没有资料
    EmptyData,
}

impl NotificationKind {
    pub fn title(self) -> &'static str {
        match self {
            NotificationKind::CrawlerFailure => "爬蟲執行失敗",
            NotificationKind::EmptyData => "查詢資料為空",
        }
    }

    fn marker(self) -> &'static str {
        match self {
            NotificationKind::CrawlerFailure => "⚠️",
            NotificationKind::EmptyData => "📭",
        }
    }
}

/// 失败优先于空资料
pub fn notification_policy(outcome: &BatchOutcome) -> Option<NotificationKind> {
    if !outcome.failed_districts.is_empty() {
        Some(NotificationKind::CrawlerFailure)
    } else if outcome.total_count == 0 {
        Some(NotificationKind::EmptyData)
    } else {
        None
    }
}

/// 一封通知的内容
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSummary {
    pub kind: NotificationKind,
    pub batch_id: Option<BatchId>,
    pub occurred_at: DateTime<FixedOffset>,
    pub detail: String,
}

impl NotificationSummary {
    pub fn from_outcome(
        kind: NotificationKind,
        outcome: &BatchOutcome,
        occurred_at: DateTime<FixedOffset>,
    ) -> Self {
        let detail = match kind {
            NotificationKind::CrawlerFailure => format!(
                "以下行政區重試次數用盡仍查詢失敗: {}",
                outcome.failed_districts.join(", ")
            ),
            NotificationKind::EmptyData => {
                let districts: Vec<&str> = outcome
                    .district_counts
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect();
                format!(
                    "日期範圍: {} ~ {}\n查詢區域: {}",
                    outcome.start_date,
                    outcome.end_date,
                    districts.join(", ")
                )
            }
        };
        Self {
            kind,
            batch_id: outcome.batch_id,
            occurred_at,
            detail,
        }
    }

    pub fn subject(&self) -> String {
        format!("{} - {}", SUBJECT_PREFIX, self.kind.title())
    }

    pub fn body(&self) -> String {
        let batch = self
            .batch_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let section = match self.kind {
            NotificationKind::CrawlerFailure => "錯誤訊息",
            NotificationKind::EmptyData => "查詢資訊",
        };
        let mut body = format!(
            "戶政門牌爬蟲系統 - 異常通知\n\n{RULE}\n{} 異常類型: {}\n{RULE}\n\n發生時間: {}\n批次 ID: {}\n\n{}:\n{}\n\n",
            self.kind.marker(),
            self.kind.title(),
            self.occurred_at.format("%Y-%m-%d %H:%M:%S"),
            batch,
            section,
            self.detail,
        );
        if self.kind == NotificationKind::EmptyData {
            body.push_str("這可能表示指定日期範圍內沒有新的門牌資料，\n或者爬蟲無法正確取得資料。\n\n");
        }
        body.push_str("請檢查系統狀態。\n\n---\n此信件由系統自動發送");
        body
    }
}

/// 通知投递能力
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        recipients: &[NotificationRecipient],
        summary: &NotificationSummary,
    ) -> Result<(), NotifyError>;
}

/// 只写日志，不实际发送
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        recipients: &[NotificationRecipient],
        summary: &NotificationSummary,
    ) -> Result<(), NotifyError> {
        let to: Vec<&str> = recipients.iter().map(|r| r.email.as_str()).collect();
        info!("📧 [通知] {} -> {}", summary.subject(), to.join(", "));
        debug!("通知内容:\n{}", summary.body());
        Ok(())
    }
}

/// 把通知以 JSON POST 到 webhook（邮件网关等）
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(
        &self,
        recipients: &[NotificationRecipient],
        summary: &NotificationSummary,
    ) -> Result<(), NotifyError> {
        let payload = json!({
            "to": recipients.iter().map(|r| r.email.as_str()).collect::<Vec<_>>(),
            "subject": summary.subject(),
            "body": summary.body(),
            "batch_id": summary.batch_id,
        });
        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            return Err(NotifyError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// 通知触发器：策略 + 开关 + 投递
#[derive(Clone)]
pub struct NotificationTrigger {
    notifier: Arc<dyn Notifier>,
    enabled: bool,
}

impl NotificationTrigger {
    pub fn new(notifier: Arc<dyn Notifier>, enabled: bool) -> Self {
        Self { notifier, enabled }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(LogNotifier), false)
    }

    /// 本批次是否需要通知
    pub fn decide(&self, outcome: &BatchOutcome) -> Option<NotificationKind> {
        if !self.enabled {
            debug!("通知功能未启用 (NOTIFICATION_ENABLED=false)");
            return None;
        }
        notification_policy(outcome)
    }

    /// 发送通知，返回是否投递成功；失败只记录日志
    pub async fn dispatch(
        &self,
        kind: NotificationKind,
        outcome: &BatchOutcome,
        recipients: &[NotificationRecipient],
        now: DateTime<FixedOffset>,
    ) -> bool {
        let active: Vec<NotificationRecipient> =
            recipients.iter().filter(|r| r.is_active).cloned().collect();
        if active.is_empty() {
            warn!("[通知] 没有启用中的收件人，跳过发送");
            return false;
        }

        let summary = NotificationSummary::from_outcome(kind, outcome, now);
        match self.notifier.notify(&active, &summary).await {
            Ok(()) => {
                info!("[通知] 已发送「{}」通知给 {} 位收件人", kind.title(), active.len());
                true
            }
            Err(e) => {
                error!("[通知] 发送失败: {}", e);
                false
            }
        }
    }
}
