use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::models::{
    resolve_districts, BatchId, DateRange, District, HouseholdRecord, RocDate, EDIT_TYPE_NAMES,
    TAIPEI_CITY_CODE, TAIPEI_CITY_NAME,
};

fn default_city_code() -> String {
    TAIPEI_CITY_CODE.to_string()
}

fn default_register_kind() -> String {
    "1".to_string()
}

fn default_save_to_db() -> bool {
    true
}

/// 批量查询请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchQueryRequest {
    /// 民国日期，如 114-09-01
    pub start_date: String,
    pub end_date: String,
    #[serde(default = "default_city_code")]
    pub city_code: String,
    #[serde(default = "default_register_kind")]
    pub register_kind: String,
    /// 为空时查询全部行政区
    #[serde(default)]
    pub districts: Option<Vec<String>>,
    #[serde(default = "default_save_to_db")]
    pub save_to_db: bool,
}

impl BatchQueryRequest {
    pub fn new(start_date: impl Into<String>, end_date: impl Into<String>) -> Self {
        Self {
            start_date: start_date.into(),
            end_date: end_date.into(),
            city_code: default_city_code(),
            register_kind: default_register_kind(),
            districts: None,
            save_to_db: default_save_to_db(),
        }
    }

    pub fn with_districts(mut self, districts: &[&str]) -> Self {
        self.districts = Some(districts.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn without_persistence(mut self) -> Self {
        self.save_to_db = false;
        self
    }

    /// 校验请求并生成执行计划
    pub fn validate(&self) -> Result<BatchPlan, RequestError> {
        if self.city_code != TAIPEI_CITY_CODE {
            return Err(RequestError::UnsupportedCity(self.city_code.clone()));
        }
        let range = DateRange::new(
            RocDate::parse(&self.start_date)?,
            RocDate::parse(&self.end_date)?,
        )?;
        if !EDIT_TYPE_NAMES.contains_key(self.register_kind.as_str()) {
            return Err(RequestError::InvalidRegisterKind(
                self.register_kind.clone(),
            ));
        }
        let districts = resolve_districts(self.districts.as_deref())?;

        Ok(BatchPlan {
            city_code: self.city_code.clone(),
            city_name: TAIPEI_CITY_NAME.to_string(),
            range,
            register_kind: self.register_kind.clone(),
            districts,
            save_to_db: self.save_to_db,
        })
    }
}

/// 校验后的批次计划
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPlan {
    pub city_code: String,
    pub city_name: String,
    pub range: DateRange,
    pub register_kind: String,
    pub districts: Vec<District>,
    pub save_to_db: bool,
}

/// 批量查询响应
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchQueryResponse {
    pub success: bool,
    pub total_count: usize,
    pub district_results: BTreeMap<String, usize>,
    pub failed_districts: Vec<String>,
    /// 秒，保留两位小数
    pub execution_time: f64,
    /// 超过上限时不附带明细
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<HouseholdRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<BatchId>,
}
