/// 查询接口响应解析
///
/// 网站把 token、下一张验证码的 key、错误信息都塞在 `errorMsg`
/// 这个 JSON 字符串里，资料本身在 `rows` / `records` / `total`。
use serde_json::Value;
use tracing::warn;

use crate::utils::truncate_text;

const CAPTCHA_MARKER: &str = "驗證碼";

/// 单页结果的判定
#[derive(Debug, Clone, PartialEq)]
pub enum PageVerdict {
    Rows(Vec<Value>),
    NoData,
    CaptchaRejected(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InquiryPage {
    pub verdict: PageVerdict,
    /// 翻页用的 token
    pub token: Option<String>,
    /// 下一次查询要用的验证码 key
    pub captcha_key: Option<String>,
    pub total_pages: u32,
}

/// 解析一页查询响应
pub fn parse_inquiry(body: &Value) -> InquiryPage {
    let info = error_info(body);
    let info_str = |key: &str| {
        info.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let token = info_str("token");
    let captcha_key = info_str("captcha");
    let title = info_str("title").unwrap_or_default();

    let records = body.get("records").and_then(Value::as_u64).unwrap_or(0);
    let rows = body
        .get("rows")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let total_pages = body
        .get("total")
        .and_then(Value::as_u64)
        .map(|t| t.min(u64::from(u32::MAX)) as u32)
        .unwrap_or(1)
        .max(1);

    let verdict = if records > 0 || !rows.is_empty() {
        PageVerdict::Rows(rows)
    } else if is_truthy(info.get("error")) {
        if title.contains(CAPTCHA_MARKER) {
            PageVerdict::CaptchaRejected(title)
        } else if title.is_empty() {
            PageVerdict::Error("查詢失敗".to_string())
        } else {
            PageVerdict::Error(title)
        }
    } else {
        PageVerdict::NoData
    };

    InquiryPage {
        verdict,
        token,
        captcha_key,
        total_pages,
    }
}

fn error_info(body: &Value) -> Value {
    match body.get("errorMsg") {
        Some(Value::String(raw)) if !raw.trim().is_empty() => {
            serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!("解析 errorMsg 失败: {}, errorMsg: {}", e, truncate_text(raw, 100));
                Value::Null
            })
        }
        Some(obj @ Value::Object(_)) => obj.clone(),
        _ => Value::Null,
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
        Some(Value::Null) | None => false,
    }
}
