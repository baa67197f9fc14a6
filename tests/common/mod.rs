//! 集成测试共用的假实现：按行政区代码脚本化的门牌网站、固定识别结果、记录型通知

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use household_crawler::clients::{PortalConnector, PortalOutcome, PortalSession, QueryParams};
use household_crawler::error::{NotifyError, PortalError};
use household_crawler::infrastructure::ResultStore;
use household_crawler::models::{find_district, HouseholdRecord, NotificationRecipient};
use household_crawler::orchestrator::{BatchOrchestrator, OrchestratorSettings};
use household_crawler::services::{
    CaptchaSolver, NotificationKind, NotificationSummary, NotificationTrigger, Notifier,
};
use household_crawler::workflow::RetryPolicy;
use tokio::sync::Notify;

pub const BUDGET: u32 = 10;

type Scripts = Arc<Mutex<HashMap<String, VecDeque<PortalOutcome>>>>;

/// 暂停第一个会话的第一次取验证码，用来制造"批次执行中"的窗口
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// 每个行政区代码一条脚本；脚本用完后一律返回验证码错误
#[derive(Clone, Default)]
pub struct FakeConnector {
    scripts: Scripts,
    pub opens: Arc<AtomicUsize>,
    pub fetches: Arc<AtomicUsize>,
    pub submits: Arc<AtomicUsize>,
    gate: Arc<Mutex<Option<Gate>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(self, gate: Gate) -> Self {
        *self.gate.lock().unwrap() = Some(gate);
        self
    }

    /// 为行政区追加若干次提交结果
    pub fn script(&self, district: &str, outcomes: Vec<PortalOutcome>) -> &Self {
        let code = find_district(district)
            .map(|d| d.code.to_string())
            .unwrap_or_else(|| district.to_string());
        self.scripts
            .lock()
            .unwrap()
            .entry(code)
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PortalConnector for FakeConnector {
    async fn open(&self, _city_code: &str) -> Result<Box<dyn PortalSession>, PortalError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            scripts: Arc::clone(&self.scripts),
            fetches: Arc::clone(&self.fetches),
            submits: Arc::clone(&self.submits),
            gate: self.gate.lock().unwrap().take(),
        }))
    }

    fn endpoint(&self) -> String {
        "fake://ris/inquiry/date".to_string()
    }
}

struct FakeSession {
    scripts: Scripts,
    fetches: Arc<AtomicUsize>,
    submits: Arc<AtomicUsize>,
    gate: Option<Gate>,
}

#[async_trait]
impl PortalSession for FakeSession {
    async fn fetch_challenge(&mut self) -> Result<Vec<u8>, PortalError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gate.take() {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        Ok(vec![0x89; 256])
    }

    async fn submit(&mut self, _guess: &str, params: &QueryParams) -> PortalOutcome {
        self.submits.fetch_add(1, Ordering::SeqCst);
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&params.area_code)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| PortalOutcome::CaptchaRejected("驗證碼錯誤".to_string()))
    }
}

/// 总是给出同一个猜测
pub struct FixedSolver(pub &'static str);

#[async_trait]
impl CaptchaSolver for FixedSolver {
    async fn solve(&self, _image: &[u8]) -> String {
        self.0.to_string()
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub kind: NotificationKind,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// 记录每次投递；`failing` 时返回错误
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<SentNotification>>,
    pub failing: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        recipients: &[NotificationRecipient],
        summary: &NotificationSummary,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(SentNotification {
            kind: summary.kind,
            to: recipients.iter().map(|r| r.email.clone()).collect(),
            subject: summary.subject(),
            body: summary.body(),
        });
        if self.failing {
            return Err(NotifyError::Rejected { status: 503 });
        }
        Ok(())
    }
}

pub fn records(district: &str, count: usize) -> Vec<HouseholdRecord> {
    (0..count)
        .map(|i| HouseholdRecord {
            city: "台北市".to_string(),
            district: district.to_string(),
            address: format!("台北市{district}測試里{}鄰測試路{}號", i % 30 + 1, i + 1),
            date: "114-10-01".to_string(),
            edit_type: "1".to_string(),
            raw: serde_json::json!({ "v1": format!("addr-{i}"), "v2": "114-10-01", "v3": "1" }),
        })
        .collect()
}

pub fn accepted(district: &str, count: usize) -> PortalOutcome {
    PortalOutcome::Accepted(records(district, count))
}

pub fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        policy: RetryPolicy::new(BUDGET, Duration::ZERO, Duration::from_secs(1)),
        district_delay: Duration::ZERO,
        max_response_records: 300,
    }
}

pub struct Harness {
    pub orchestrator: Arc<BatchOrchestrator>,
    pub connector: FakeConnector,
    pub store: ResultStore,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(connector: FakeConnector) -> Harness {
    harness_with(connector, RecordingNotifier::default(), settings())
}

pub fn harness_with(
    connector: FakeConnector,
    notifier: RecordingNotifier,
    settings: OrchestratorSettings,
) -> Harness {
    let store = ResultStore::in_memory().unwrap();
    let notifier = Arc::new(notifier);
    let trigger = NotificationTrigger::new(notifier.clone(), true);
    let orchestrator = BatchOrchestrator::new(
        Arc::new(connector.clone()),
        Arc::new(FixedSolver("abcde")),
        store.clone(),
        trigger,
        settings,
    );
    Harness {
        orchestrator: Arc::new(orchestrator),
        connector,
        store,
        notifier,
    }
}
