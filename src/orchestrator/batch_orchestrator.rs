//! 批次编排器 - 编排层
//!
//! ## 职责
//!
//! 1. **互斥**：同一时间只允许一个批次执行（进程内标志 + `crawler_logs` 的 running 行）
//! 2. **逐区执行**：按顺序为每个行政区打开新会话并跑一次重试流程
//! 3. **汇总**：总笔数、各区笔数、失败行政区
//! 4. **落库**：每个行政区独立写入，批次最后写一次终态
//! 5. **通知**：按策略决定是否通知，投递失败不影响批次结果
//!
//! 行政区之间严格串行：验证码与会话绑定，并发会让响应无法对应。

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clients::{PortalConnector, QueryParams, RisConnector};
use crate::config::Config;
use crate::error::{AppError, AppResult, StoreError};
use crate::infrastructure::ResultStore;
use crate::models::{
    BatchId, BatchOutcome, BatchPlan, BatchQueryRequest, BatchQueryResponse, BatchStatus,
    District, DistrictQueryResult, DistrictReport, DistrictStatus,
};
use crate::services::{
    build_solver, CaptchaSolver, LogNotifier, NotificationTrigger, Notifier, WebhookNotifier,
};
use crate::utils::{clock, logging};
use crate::workflow::{AttemptTerminal, DistrictCtx, DistrictQueryAttempt, RetryPolicy};

/// 编排器参数
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    pub policy: RetryPolicy,
    pub district_delay: Duration,
    /// 超过这个笔数时响应不附带明细
    pub max_response_records: usize,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: RetryPolicy::from_config(config),
            district_delay: Duration::from_millis(config.district_delay_ms),
            max_response_records: config.max_response_records,
        }
    }
}

/// 当前执行状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub batch_id: Option<BatchId>,
    pub started_at: Option<DateTime<FixedOffset>>,
}

#[derive(Default)]
struct RunSlot {
    batch_id: Option<BatchId>,
    started_at: Option<DateTime<FixedOffset>>,
}

/// 进程内的"正在执行"标志，随编排器一起创建
#[derive(Default)]
struct RunGuard {
    running: AtomicBool,
    slot: Mutex<RunSlot>,
}

impl RunGuard {
    fn try_acquire(self: &Arc<Self>) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        if let Ok(mut slot) = self.slot.lock() {
            *slot = RunSlot {
                batch_id: None,
                started_at: Some(clock::now()),
            };
        }
        Some(RunPermit {
            guard: Arc::clone(self),
        })
    }

    fn snapshot(&self) -> OrchestratorStatus {
        let running = self.running.load(Ordering::Acquire);
        let (batch_id, started_at) = match self.slot.lock() {
            Ok(slot) if running => (slot.batch_id, slot.started_at),
            _ => (None, None),
        };
        OrchestratorStatus {
            running,
            batch_id,
            started_at,
        }
    }
}

/// 持有期间标志保持为 true，drop 时清除
struct RunPermit {
    guard: Arc<RunGuard>,
}

impl RunPermit {
    fn set_batch(&self, batch_id: Option<BatchId>) {
        if let Ok(mut slot) = self.guard.slot.lock() {
            slot.batch_id = batch_id;
        }
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.guard.slot.lock() {
            *slot = RunSlot::default();
        }
        self.guard.running.store(false, Ordering::Release);
    }
}

/// 批次编排器
pub struct BatchOrchestrator {
    connector: Arc<dyn PortalConnector>,
    solver: Arc<dyn CaptchaSolver>,
    store: ResultStore,
    trigger: NotificationTrigger,
    settings: OrchestratorSettings,
    guard: Arc<RunGuard>,
}

impl BatchOrchestrator {
    pub fn new(
        connector: Arc<dyn PortalConnector>,
        solver: Arc<dyn CaptchaSolver>,
        store: ResultStore,
        trigger: NotificationTrigger,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            connector,
            solver,
            store,
            trigger,
            settings,
            guard: Arc::new(RunGuard::default()),
        }
    }

    /// 按配置组装：真实网站、配置的识别方式、SQLite 文件、日志或 webhook 通知
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let connector = Arc::new(RisConnector::new(config)?);
        let solver: Arc<dyn CaptchaSolver> = Arc::from(build_solver(config));
        let store = ResultStore::open(&config.db_path)?;

        let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(
                url,
                Duration::from_secs(config.request_timeout_secs),
            )?),
            None => Arc::new(LogNotifier),
        };
        let trigger = NotificationTrigger::new(notifier, config.notification_enabled);

        Ok(Self::new(
            connector,
            solver,
            store,
            trigger,
            OrchestratorSettings::from_config(config),
        ))
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// 当前是否有批次在执行（本进程或数据库里的 running 行）
    pub fn status(&self) -> OrchestratorStatus {
        let local = self.guard.snapshot();
        if local.running {
            return local;
        }
        match self.store.running_batch() {
            Ok(Some(run)) => OrchestratorStatus {
                running: true,
                batch_id: Some(run.id),
                started_at: Some(run.start_time),
            },
            Ok(None) => local,
            Err(e) => {
                warn!("读取批次状态失败: {}", e);
                local
            }
        }
    }

    /// 关闭上次进程遗留的 running 批次
    pub fn recover_interrupted(&self) -> AppResult<Vec<BatchId>> {
        Ok(self.store.recover_interrupted(clock::now())?)
    }

    /// 执行一个批次
    ///
    /// 只有请求非法、已有批次在执行、或无法写入批次终态时返回错误；
    /// 单个行政区的失败都汇总在响应里。
    pub async fn run_batch(&self, request: &BatchQueryRequest) -> AppResult<BatchQueryResponse> {
        let plan = request.validate()?;

        let permit = self
            .guard
            .try_acquire()
            .ok_or_else(|| AppError::BatchAlreadyRunning {
                batch_id: self.guard.snapshot().batch_id,
            })?;

        let started = Instant::now();
        let batch_id = self.begin(&plan)?;
        permit.set_batch(batch_id);

        let start_date = plan.range.start.to_string();
        let end_date = plan.range.end.to_string();
        logging::log_batch_start(
            batch_id,
            plan.districts.len(),
            &start_date,
            &end_date,
            &plan.register_kind,
        );

        let total = plan.districts.len();
        let mut reports = Vec::with_capacity(total);
        for (i, district) in plan.districts.iter().enumerate() {
            if i > 0 && !self.settings.district_delay.is_zero() {
                tokio::time::sleep(self.settings.district_delay).await;
            }
            let ctx = DistrictCtx::new(*district, i + 1, total);
            let report = self.run_district(&plan, &ctx).await;
            if let Some(id) = batch_id {
                self.persist_district(id, &plan, &report);
            }
            reports.push(report);
        }

        let outcome = aggregate(batch_id, &plan, &reports);
        let elapsed = started.elapsed().as_secs_f64();
        logging::print_final_stats(&outcome, elapsed);

        let finished = match batch_id {
            Some(id) => self.finish(id, &outcome),
            None => Ok(()),
        };

        self.notify(&outcome).await;

        if let Err(e) = finished {
            error!("❌ 无法写入批次终态: {}", e);
            return Err(e.into());
        }

        drop(permit);
        Ok(self.build_response(outcome, reports, elapsed))
    }

    fn begin(&self, plan: &BatchPlan) -> AppResult<Option<BatchId>> {
        if !plan.save_to_db {
            self.ensure_no_running_row()?;
            return Ok(None);
        }
        match self.store.begin_batch(&self.connector.endpoint(), clock::now()) {
            Ok(id) => Ok(Some(id)),
            Err(StoreError::BatchAlreadyRunning(id)) => {
                warn!("⚠️ 数据库中批次 #{} 仍在执行，拒绝启动新批次", id);
                Err(AppError::BatchAlreadyRunning { batch_id: Some(id) })
            }
            Err(e) => {
                error!("❌ 无法建立批次记录，本次结果不落库: {}", e);
                self.ensure_no_running_row()?;
                Ok(None)
            }
        }
    }

    /// 不落库的批次也要遵守其他进程留下的 running 行
    fn ensure_no_running_row(&self) -> AppResult<()> {
        match self.store.running_batch() {
            Ok(Some(run)) => {
                warn!("⚠️ 数据库中批次 #{} 仍在执行，拒绝启动新批次", run.id);
                Err(AppError::BatchAlreadyRunning {
                    batch_id: Some(run.id),
                })
            }
            Ok(None) => Ok(()),
            Err(e) => {
                warn!("读取批次状态失败，仅依赖进程内互斥: {}", e);
                Ok(())
            }
        }
    }

    async fn run_district(&self, plan: &BatchPlan, ctx: &DistrictCtx) -> DistrictReport {
        let district = ctx.district;
        info!("{} 🔍 开始查询 ({})", ctx, district.code);

        let mut session = match self.connector.open(&plan.city_code).await {
            Ok(session) => session,
            Err(e) => {
                error!("{} ❌ 无法建立会话: {}", ctx, e);
                return failed_report(district, format!("无法建立会话: {e}"), 0);
            }
        };

        let params = query_params(plan, district);
        let attempt = DistrictQueryAttempt::new(self.solver.as_ref(), self.settings.policy);
        match attempt.run(session.as_mut(), &params, ctx).await {
            AttemptTerminal::Success { records, attempts } => {
                let status = if records.is_empty() {
                    info!("{} 📭 查无资料", ctx);
                    DistrictStatus::NoData
                } else {
                    DistrictStatus::Success
                };
                DistrictReport {
                    district,
                    status,
                    records,
                    error: None,
                    attempts,
                }
            }
            AttemptTerminal::Exhausted {
                last_error,
                attempts,
            } => {
                error!("{} ❌ {}", ctx, last_error);
                failed_report(district, last_error, attempts)
            }
        }
    }

    /// 先写资料再写行政区结果；失败只记录，不影响其他行政区
    fn persist_district(&self, batch_id: BatchId, plan: &BatchPlan, report: &DistrictReport) {
        if let Err(e) = self.store.record_households(batch_id, &report.records) {
            error!(
                "❌ 写入 {} 门牌资料失败 (批次 #{}): {}",
                report.district.name, batch_id, e
            );
        }
        let row = DistrictQueryResult {
            city_name: plan.city_name.clone(),
            district_code: report.district.code.to_string(),
            district_name: report.district.name.to_string(),
            record_count: report.record_count(),
            status: report.status,
            error_message: report.error.clone(),
            queried_at: clock::now(),
        };
        if let Err(e) = self.store.record_district(batch_id, &row) {
            error!(
                "❌ 写入 {} 查询结果失败 (批次 #{}): {}",
                report.district.name, batch_id, e
            );
        }
    }

    fn finish(&self, batch_id: BatchId, outcome: &BatchOutcome) -> Result<(), StoreError> {
        let (status, error_message) = if outcome.success() {
            (BatchStatus::Completed, None)
        } else {
            (BatchStatus::Failed, Some(failure_message(&outcome.failed_districts)))
        };
        self.store.finish_batch(
            batch_id,
            status,
            error_message.as_deref(),
            outcome.total_count,
            clock::now(),
        )?;
        info!("✓ 批次 #{} 结束: {}", batch_id, status);
        Ok(())
    }

    async fn notify(&self, outcome: &BatchOutcome) {
        let Some(kind) = self.trigger.decide(outcome) else {
            return;
        };
        let recipients = self.store.active_recipients().unwrap_or_else(|e| {
            error!("[通知] 读取收件人失败: {}", e);
            Vec::new()
        });
        self.trigger
            .dispatch(kind, outcome, &recipients, clock::now())
            .await;
    }

    fn build_response(
        &self,
        outcome: BatchOutcome,
        reports: Vec<DistrictReport>,
        elapsed_secs: f64,
    ) -> BatchQueryResponse {
        let data = if outcome.total_count <= self.settings.max_response_records {
            Some(reports.into_iter().flat_map(|r| r.records).collect())
        } else {
            info!(
                "资料共 {} 笔，超过 {} 笔，响应不附带明细",
                outcome.total_count, self.settings.max_response_records
            );
            None
        };
        let error_message =
            (!outcome.success()).then(|| failure_message(&outcome.failed_districts));

        BatchQueryResponse {
            success: outcome.success(),
            total_count: outcome.total_count,
            district_results: outcome.district_counts.into_iter().collect::<BTreeMap<_, _>>(),
            failed_districts: outcome.failed_districts,
            execution_time: (elapsed_secs * 100.0).round() / 100.0,
            data,
            error_message,
            batch_id: outcome.batch_id,
        }
    }
}

fn query_params(plan: &BatchPlan, district: District) -> QueryParams {
    QueryParams {
        city_code: plan.city_code.clone(),
        city_name: plan.city_name.clone(),
        area_code: district.code.to_string(),
        district_name: district.name.to_string(),
        start_date: plan.range.start.to_string(),
        end_date: plan.range.end.to_string(),
        register_kind: plan.register_kind.clone(),
    }
}

fn failed_report(district: District, error: String, attempts: u32) -> DistrictReport {
    DistrictReport {
        district,
        status: DistrictStatus::Failed,
        records: Vec::new(),
        error: Some(error),
        attempts,
    }
}

fn failure_message(failed: &[String]) -> String {
    format!("以下行政區查詢失敗: {}", failed.join(", "))
}

/// 汇总各行政区结果；失败的行政区不计入 `district_counts`
pub fn aggregate(batch_id: Option<BatchId>, plan: &BatchPlan, reports: &[DistrictReport]) -> BatchOutcome {
    let mut district_counts = Vec::new();
    let mut failed_districts = Vec::new();
    for report in reports {
        match report.status {
            DistrictStatus::Failed => failed_districts.push(report.district.name.to_string()),
            DistrictStatus::Success | DistrictStatus::NoData => {
                district_counts.push((report.district.name.to_string(), report.record_count()))
            }
        }
    }
    let total_count = district_counts.iter().map(|(_, count)| count).sum();

    BatchOutcome {
        batch_id,
        city_name: plan.city_name.clone(),
        start_date: plan.range.start.to_string(),
        end_date: plan.range.end.to_string(),
        district_counts,
        failed_districts,
        total_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{find_district, HouseholdRecord};

    fn report(name: &str, status: DistrictStatus, count: usize) -> DistrictReport {
        let records = (0..count)
            .map(|i| {
                HouseholdRecord::from_portal_row(
                    &serde_json::json!({"v1": format!("addr-{i}"), "v2": "114-09-02", "v3": "1"}),
                    "台北市",
                    name,
                )
            })
            .collect();
        DistrictReport {
            district: find_district(name).unwrap(),
            status,
            records,
            error: (status == DistrictStatus::Failed).then(|| "exhausted".to_string()),
            attempts: 1,
        }
    }

    #[test]
    fn test_aggregate_counts_and_failures() {
        let plan = BatchQueryRequest::new("114-09-01", "114-11-30").validate().unwrap();
        let reports = vec![
            report("中正區", DistrictStatus::Success, 20),
            report("大安區", DistrictStatus::Failed, 0),
            report("南港區", DistrictStatus::NoData, 0),
            report("信義區", DistrictStatus::Success, 3),
        ];

        let outcome = aggregate(Some(1), &plan, &reports);

        assert_eq!(outcome.total_count, 23);
        assert_eq!(outcome.failed_districts, vec!["大安區".to_string()]);
        assert!(!outcome.success());
        let sum: usize = outcome.district_counts.iter().map(|(_, c)| c).sum();
        assert_eq!(sum, outcome.total_count);
        assert!(outcome
            .district_counts
            .iter()
            .all(|(name, _)| name != "大安區"));
    }

    #[test]
    fn test_run_guard_is_exclusive_and_released_on_drop() {
        let guard = Arc::new(RunGuard::default());
        let permit = guard.try_acquire().unwrap();
        permit.set_batch(Some(5));

        assert!(guard.try_acquire().is_none());
        let status = guard.snapshot();
        assert!(status.running);
        assert_eq!(status.batch_id, Some(5));

        drop(permit);
        assert!(!guard.snapshot().running);
        assert!(guard.try_acquire().is_some());
    }
}
