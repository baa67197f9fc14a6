use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::models::{District, HouseholdRecord};

/// 批次编号，数据库自增主键
pub type BatchId = i64;

/// 批次状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Running,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(BatchStatus::Running),
            "completed" => Ok(BatchStatus::Completed),
            "failed" => Ok(BatchStatus::Failed),
            other => Err(format!("未知批次状态: {other}")),
        }
    }
}

/// 单个行政区的查询状态
///
/// `NoData` 表示查询正常完成但没有资料，`Failed` 表示重试次数用尽
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DistrictStatus {
    Success,
    Failed,
    NoData,
}

impl DistrictStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DistrictStatus::Success => "success",
            DistrictStatus::Failed => "failed",
            DistrictStatus::NoData => "no_data",
        }
    }
}

impl fmt::Display for DistrictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistrictStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(DistrictStatus::Success),
            "failed" => Ok(DistrictStatus::Failed),
            "no_data" => Ok(DistrictStatus::NoData),
            other => Err(format!("未知行政区状态: {other}")),
        }
    }
}

/// crawler_logs 的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRun {
    pub id: BatchId,
    pub api_endpoint: String,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: Option<DateTime<FixedOffset>>,
    pub records_fetched: usize,
    pub status: BatchStatus,
    pub error_message: Option<String>,
}

/// district_query_results 的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictQueryResult {
    pub city_name: String,
    pub district_code: String,
    pub district_name: String,
    pub record_count: usize,
    pub status: DistrictStatus,
    pub error_message: Option<String>,
    pub queried_at: DateTime<FixedOffset>,
}

/// email_address 的一行
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecipient {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub is_active: bool,
}

/// 单个行政区跑完之后的结果，由编排层汇总
#[derive(Debug, Clone)]
pub struct DistrictReport {
    pub district: District,
    pub status: DistrictStatus,
    pub records: Vec<HouseholdRecord>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl DistrictReport {
    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

/// 一个批次的汇总结果，通知策略只看这里
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub batch_id: Option<BatchId>,
    pub city_name: String,
    pub start_date: String,
    pub end_date: String,
    /// (行政区, 笔数)，不含失败的行政区
    pub district_counts: Vec<(String, usize)>,
    pub failed_districts: Vec<String>,
    pub total_count: usize,
}

impl BatchOutcome {
    pub fn success(&self) -> bool {
        self.failed_districts.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }
}
