use thiserror::Error;

use crate::models::BatchId;

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 门牌网站交互错误
    #[error("门牌网站错误: {0}")]
    Portal(#[from] PortalError),
    /// 数据库错误
    #[error("数据库错误: {0}")]
    Store(#[from] StoreError),
    /// 通知发送错误
    #[error("通知错误: {0}")]
    Notify(#[from] NotifyError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 请求参数错误
    #[error("请求参数错误: {0}")]
    Request(#[from] RequestError),
    /// 已有批次正在执行
    #[error("已有批次正在执行 (batch_id: {batch_id:?})，拒绝启动新批次")]
    BatchAlreadyRunning { batch_id: Option<BatchId> },
}

impl AppError {
    pub fn is_already_running(&self) -> bool {
        matches!(self, AppError::BatchAlreadyRunning { .. })
    }
}

/// 门牌网站交互错误
#[derive(Debug, Error)]
pub enum PortalError {
    /// 构建 HTTP 客户端失败
    #[error("无法建立 HTTP 客户端: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// 网络请求失败
    #[error("请求失败 ({endpoint}): {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    /// 非 2xx 响应
    #[error("HTTP 状态异常 ({endpoint}): {status}")]
    HttpStatus { endpoint: String, status: u16 },
    /// 页面中找不到隐藏字段
    #[error("页面缺少字段: {field}")]
    MissingField { field: &'static str },
    /// 验证码图片无效
    #[error("验证码图片无效 (长度 {len} bytes)")]
    InvalidChallenge { len: usize },
    /// 会话尚未完成初始化
    #[error("会话尚未初始化")]
    NotInitialized,
    /// JSON 解析失败
    #[error("JSON解析失败: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// 正则表达式错误
    #[error("正则表达式错误: {0}")]
    Pattern(#[from] regex::Error),
}

/// 数据库错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite 错误: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("数据库连接锁已损坏")]
    LockPoisoned,
    #[error("批次不存在: {0}")]
    BatchNotFound(BatchId),
    #[error("批次 {0} 已结束，不能再次更新终态")]
    BatchAlreadyFinished(BatchId),
    #[error("批次 {0} 仍在执行中")]
    BatchAlreadyRunning(BatchId),
    #[error("批次终态只能是 completed 或 failed")]
    NotTerminal,
    #[error("JSON 序列化失败: {0}")]
    Json(#[from] serde_json::Error),
}

/// 通知发送错误
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("通知请求失败: {0}")]
    Request(#[from] reqwest::Error),
    #[error("通知服务拒绝请求: HTTP {status}")]
    Rejected { status: u16 },
    #[error("读取收件人失败: {0}")]
    Recipients(#[from] StoreError),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    /// 配置值非法
    #[error("配置项 {field} 的值 '{value}' 非法: {reason}")]
    Invalid {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// 批量查询请求参数错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("无效的行政区: {0:?}")]
    UnknownDistricts(Vec<String>),
    #[error("不支持的城市代码: {0}")]
    UnsupportedCity(String),
    #[error("无效的民国日期: '{0}'，格式应为 114-09-01")]
    InvalidDate(String),
    #[error("起始日期 {start} 晚于结束日期 {end}")]
    ReversedRange { start: String, end: String },
    #[error("无效的编钉类别: '{0}'")]
    InvalidRegisterKind(String),
}

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
