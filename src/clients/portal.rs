/// 门牌网站会话抽象
///
/// 一个会话绑定一组 cookie 与验证码，同一时间只能被一个调用方使用，
/// 所以方法都取 `&mut self`。
use async_trait::async_trait;

use crate::error::PortalError;
use crate::models::HouseholdRecord;

/// 单个行政区的查询参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParams {
    pub city_code: String,
    pub city_name: String,
    pub area_code: String,
    pub district_name: String,
    pub start_date: String,
    pub end_date: String,
    pub register_kind: String,
}

/// 一次提交的结果
#[derive(Debug, Clone, PartialEq)]
pub enum PortalOutcome {
    /// 查询被接受，列表可能为空（查无资料）
    Accepted(Vec<HouseholdRecord>),
    /// 验证码错误
    CaptchaRejected(String),
    /// 网络错误、非 2xx 或无法解析的响应
    TransientError(String),
}

impl PortalOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PortalOutcome::Accepted(_) => "accepted",
            PortalOutcome::CaptchaRejected(_) => "captcha_rejected",
            PortalOutcome::TransientError(_) => "transient_error",
        }
    }
}

#[async_trait]
pub trait PortalSession: Send {
    /// 取得新的验证码图片
    async fn fetch_challenge(&mut self) -> Result<Vec<u8>, PortalError>;

    /// 提交验证码与查询参数；不会返回错误，所有失败都归入 `PortalOutcome`
    async fn submit(&mut self, guess: &str, params: &QueryParams) -> PortalOutcome;
}

/// 会话工厂：每个行政区打开一个新会话
#[async_trait]
pub trait PortalConnector: Send + Sync {
    async fn open(&self, city_code: &str) -> Result<Box<dyn PortalSession>, PortalError>;

    /// 写入 crawler_logs.api_endpoint 的描述
    fn endpoint(&self) -> String;
}
