use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// 程序配置
///
/// 优先级：环境变量 > TOML 配置文件 > 默认值
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 门牌网站 ---
    /// 门牌查询网站根地址
    pub portal_base_url: String,
    /// 默认城市代码（台北市）
    pub city_code: String,
    /// 普通请求超时（秒）
    pub request_timeout_secs: u64,
    /// 查询请求超时（秒）
    pub query_timeout_secs: u64,
    /// 分页请求间隔（毫秒）
    pub page_delay_ms: u64,
    /// 行政区之间的间隔（毫秒）
    pub district_delay_ms: u64,

    // --- 验证码 ---
    /// 单个行政区的验证码重试上限
    pub max_captcha_retry: u32,
    /// 重试间隔（毫秒）
    pub retry_delay_ms: u64,
    /// 验证码识别超时（秒）
    pub solver_timeout_secs: u64,
    /// 识别方式: "ocr" 或 "llm"
    pub captcha_solver: String,
    /// OCR 服务地址
    pub ocr_service_url: String,
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,

    // --- 存储 ---
    /// SQLite 数据库文件
    pub db_path: String,
    /// 响应中附带明细的最大笔数
    pub max_response_records: usize,

    // --- 通知 ---
    pub notification_enabled: bool,
    /// 通知 webhook，未设置时只写日志
    pub notify_webhook_url: Option<String>,

    // --- 排程 ---
    pub enable_scheduler: bool,
    /// "cron" 或 "interval"
    pub schedule_mode: String,
    /// 执行小时，"*" 表示每小时
    pub schedule_hour: String,
    pub schedule_minute: u32,
    pub schedule_interval_hours: u32,
    pub schedule_start_date: String,
    pub schedule_end_date: String,
    /// 设置后改为查询最近 N 天，忽略固定日期
    pub schedule_window_days: Option<u32>,
    pub schedule_register_kind: String,

    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            portal_base_url: "https://www.ris.gov.tw".to_string(),
            city_code: "63000000".to_string(),
            request_timeout_secs: 15,
            query_timeout_secs: 30,
            page_delay_ms: 300,
            district_delay_ms: 500,
            max_captcha_retry: 10,
            retry_delay_ms: 300,
            solver_timeout_secs: 20,
            captcha_solver: "ocr".to_string(),
            ocr_service_url: "http://127.0.0.1:9898/ocr".to_string(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            db_path: "household.db".to_string(),
            max_response_records: 300,
            notification_enabled: false,
            notify_webhook_url: None,
            enable_scheduler: true,
            schedule_mode: "cron".to_string(),
            schedule_hour: "9".to_string(),
            schedule_minute: 0,
            schedule_interval_hours: 1,
            schedule_start_date: "114-09-01".to_string(),
            schedule_end_date: "114-11-30".to_string(),
            schedule_window_days: None,
            schedule_register_kind: "1".to_string(),
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> Self {
        Self::default().apply_env()
    }

    /// 读取可选的 TOML 配置文件，再叠加环境变量
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        let config = base.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env(self) -> Self {
        let d = self;
        Self {
            portal_base_url: env_string("PORTAL_BASE_URL").unwrap_or(d.portal_base_url),
            city_code: env_string("CITY_CODE").unwrap_or(d.city_code),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS").unwrap_or(d.request_timeout_secs),
            query_timeout_secs: env_parse("QUERY_TIMEOUT_SECS").unwrap_or(d.query_timeout_secs),
            page_delay_ms: env_parse("PAGE_DELAY_MS").unwrap_or(d.page_delay_ms),
            district_delay_ms: env_parse("DISTRICT_DELAY_MS").unwrap_or(d.district_delay_ms),
            max_captcha_retry: env_parse("MAX_CAPTCHA_RETRY").unwrap_or(d.max_captcha_retry),
            retry_delay_ms: env_parse("RETRY_DELAY_MS").unwrap_or(d.retry_delay_ms),
            solver_timeout_secs: env_parse("SOLVER_TIMEOUT_SECS").unwrap_or(d.solver_timeout_secs),
            captcha_solver: env_string("CAPTCHA_SOLVER").unwrap_or(d.captcha_solver),
            ocr_service_url: env_string("OCR_SERVICE_URL").unwrap_or(d.ocr_service_url),
            llm_api_key: env_string("LLM_API_KEY").unwrap_or(d.llm_api_key),
            llm_api_base_url: env_string("LLM_API_BASE_URL").unwrap_or(d.llm_api_base_url),
            llm_model_name: env_string("LLM_MODEL_NAME").unwrap_or(d.llm_model_name),
            db_path: env_string("DB_PATH").unwrap_or(d.db_path),
            max_response_records: env_parse("MAX_RESPONSE_RECORDS").unwrap_or(d.max_response_records),
            notification_enabled: env_bool("NOTIFICATION_ENABLED").unwrap_or(d.notification_enabled),
            notify_webhook_url: env_string("NOTIFY_WEBHOOK_URL").or(d.notify_webhook_url),
            enable_scheduler: env_bool("ENABLE_SCHEDULER").unwrap_or(d.enable_scheduler),
            schedule_mode: env_string("SCHEDULE_MODE").unwrap_or(d.schedule_mode),
            schedule_hour: env_string("SCHEDULE_HOUR").unwrap_or(d.schedule_hour),
            schedule_minute: env_parse("SCHEDULE_MINUTE").unwrap_or(d.schedule_minute),
            schedule_interval_hours: env_parse("SCHEDULE_INTERVAL_HOURS")
                .unwrap_or(d.schedule_interval_hours),
            schedule_start_date: env_string("SCHEDULE_START_DATE").unwrap_or(d.schedule_start_date),
            schedule_end_date: env_string("SCHEDULE_END_DATE").unwrap_or(d.schedule_end_date),
            schedule_window_days: env_parse("SCHEDULE_WINDOW_DAYS").or(d.schedule_window_days),
            schedule_register_kind: env_string("SCHEDULE_REGISTER_KIND")
                .unwrap_or(d.schedule_register_kind),
            verbose_logging: env_bool("VERBOSE_LOGGING").unwrap_or(d.verbose_logging),
        }
    }

    /// 检查明显不合理的配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_captcha_retry == 0 {
            return Err(invalid("max_captcha_retry", "0", "重试上限至少为 1"));
        }
        if !matches!(self.captcha_solver.as_str(), "ocr" | "llm") {
            return Err(invalid(
                "captcha_solver",
                &self.captcha_solver,
                "只支持 ocr 或 llm",
            ));
        }
        if !matches!(self.schedule_mode.as_str(), "cron" | "interval") {
            return Err(invalid(
                "schedule_mode",
                &self.schedule_mode,
                "只支持 cron 或 interval",
            ));
        }
        if self.schedule_hour != "*" {
            match self.schedule_hour.parse::<u32>() {
                Ok(hour) if hour < 24 => {}
                _ => {
                    return Err(invalid(
                        "schedule_hour",
                        &self.schedule_hour,
                        "应为 0-23 或 *",
                    ))
                }
            }
        }
        if self.schedule_minute >= 60 {
            return Err(invalid(
                "schedule_minute",
                &self.schedule_minute.to_string(),
                "应为 0-59",
            ));
        }
        if self.schedule_interval_hours == 0 {
            return Err(invalid("schedule_interval_hours", "0", "间隔至少 1 小时"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env_string(name).map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
}
