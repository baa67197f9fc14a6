//! 定时触发批次
//!
//! 两种模式（台北时间）：
//! - cron：每天 HH:MM，小时为 `*` 时每小时的第 MM 分
//! - interval：每 N 小时一次
//!
//! 与手动执行共用同一个编排器，已有批次在执行时本次触发直接跳过。

use std::sync::Arc;

use chrono::{DateTime, Duration, DurationRound, FixedOffset, NaiveDate, Timelike};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::ConfigError;
use crate::models::{BatchQueryRequest, BatchQueryResponse, DateRange, RocDate};
use crate::orchestrator::BatchOrchestrator;
use crate::utils::clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleMode {
    /// `hour` 为 None 表示每小时
    Cron { hour: Option<u32>, minute: u32 },
    Interval { hours: u32 },
}

/// 每次触发查询的日期范围
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryWindow {
    Fixed { start: RocDate, end: RocDate },
    /// 截至触发当天的最近 N 天
    Trailing { days: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSettings {
    pub mode: ScheduleMode,
    pub window: QueryWindow,
    pub city_code: String,
    pub register_kind: String,
}

impl ScheduleSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mode = match config.schedule_mode.as_str() {
            "interval" => ScheduleMode::Interval {
                hours: config.schedule_interval_hours.max(1),
            },
            _ => {
                let hour = match config.schedule_hour.trim() {
                    "*" => None,
                    h => Some(h.parse::<u32>().ok().filter(|h| *h < 24).ok_or_else(|| {
                        ConfigError::Invalid {
                            field: "schedule_hour",
                            value: h.to_string(),
                            reason: "应为 0-23 或 *".to_string(),
                        }
                    })?),
                };
                ScheduleMode::Cron {
                    hour,
                    minute: config.schedule_minute.min(59),
                }
            }
        };

        let window = match config.schedule_window_days {
            Some(days) => QueryWindow::Trailing { days: days.max(1) },
            None => {
                let parse = |field: &'static str, value: &str| {
                    RocDate::parse(value).map_err(|e| ConfigError::Invalid {
                        field,
                        value: value.to_string(),
                        reason: e.to_string(),
                    })
                };
                let start = parse("schedule_start_date", &config.schedule_start_date)?;
                let end = parse("schedule_end_date", &config.schedule_end_date)?;
                DateRange::new(start, end).map_err(|e| ConfigError::Invalid {
                    field: "schedule_end_date",
                    value: config.schedule_end_date.clone(),
                    reason: e.to_string(),
                })?;
                QueryWindow::Fixed { start, end }
            }
        };

        Ok(Self {
            mode,
            window,
            city_code: config.city_code.clone(),
            register_kind: config.schedule_register_kind.clone(),
        })
    }

    /// `after` 之后（不含）的下一次触发时间
    pub fn next_run_after(&self, after: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        match self.mode {
            ScheduleMode::Interval { hours } => after + Duration::hours(i64::from(hours)),
            ScheduleMode::Cron { hour: None, minute } => {
                let top = after
                    .duration_trunc(Duration::hours(1))
                    .unwrap_or(after);
                let candidate = top + Duration::minutes(i64::from(minute));
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::hours(1)
                }
            }
            ScheduleMode::Cron {
                hour: Some(hour),
                minute,
            } => {
                let midnight = after
                    - Duration::hours(i64::from(after.hour()))
                    - Duration::minutes(i64::from(after.minute()))
                    - Duration::seconds(i64::from(after.second()))
                    - Duration::nanoseconds(i64::from(after.nanosecond()));
                let candidate =
                    midnight + Duration::hours(i64::from(hour)) + Duration::minutes(i64::from(minute));
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
        }
    }

    /// 触发当天要提交的请求；`today` 早于民国纪年时为 None
    pub fn request_for(&self, today: NaiveDate) -> Option<BatchQueryRequest> {
        let range = match &self.window {
            QueryWindow::Fixed { start, end } => DateRange {
                start: *start,
                end: *end,
            },
            QueryWindow::Trailing { days } => DateRange::trailing_days(today, *days)?,
        };
        let mut request = BatchQueryRequest::new(range.start.to_string(), range.end.to_string());
        request.city_code = self.city_code.clone();
        request.register_kind = self.register_kind.clone();
        Some(request)
    }

    pub fn describe(&self) -> String {
        match self.mode {
            ScheduleMode::Interval { hours } => format!("间隔模式，每 {hours} 小时执行一次"),
            ScheduleMode::Cron { hour: None, minute } => {
                format!("cron 模式，执行时间: 每小时:{minute:02}")
            }
            ScheduleMode::Cron {
                hour: Some(hour),
                minute,
            } => format!("cron 模式，执行时间: {hour:02}:{minute:02}"),
        }
    }
}

/// 定时器
pub struct Scheduler {
    orchestrator: Arc<BatchOrchestrator>,
    settings: ScheduleSettings,
}

impl Scheduler {
    pub fn new(orchestrator: Arc<BatchOrchestrator>, settings: ScheduleSettings) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    pub fn settings(&self) -> &ScheduleSettings {
        &self.settings
    }

    pub fn next_run(&self) -> DateTime<FixedOffset> {
        self.settings.next_run_after(clock::now())
    }

    /// 执行一次；已有批次在执行时跳过
    pub async fn tick(&self) -> Option<BatchQueryResponse> {
        let now = clock::now();
        info!("{}", "=".repeat(60));
        info!("[排程任务] 开始执行 - {}", now.format("%Y-%m-%d %H:%M:%S"));
        info!("{}", "=".repeat(60));

        let Some(request) = self.settings.request_for(now.date_naive()) else {
            error!("[排程任务] 无法换算查询日期 ({})，跳过本次触发", now.date_naive());
            return None;
        };
        match self.orchestrator.run_batch(&request).await {
            Ok(response) => {
                info!(
                    "[排程任务] 执行完成，共 {} 笔，失败行政区 {} 个",
                    response.total_count,
                    response.failed_districts.len()
                );
                Some(response)
            }
            Err(e) if e.is_already_running() => {
                warn!("[排程任务] 跳过本次触发: {}", e);
                None
            }
            Err(e) => {
                error!("[排程任务] 执行错误: {}", e);
                None
            }
        }
    }

    /// 一直运行，直到外部取消
    pub async fn run_forever(&self) {
        info!("[排程器] 已启动（{}）", self.settings.describe());
        loop {
            let now = clock::now();
            let next = self.settings.next_run_after(now);
            info!("[排程器] 下次执行时间: {}", next.format("%Y-%m-%d %H:%M:%S %:z"));
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            self.tick().await;
        }
    }
}
