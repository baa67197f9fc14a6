/// 内政部户政司门牌查询网站客户端
///
/// 会话初始化要依次打三个页面才能拿到有效的 `_csrf` 与 `captchaKey`，
/// 之后才能取验证码图片、提交日期查询。
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::portal::{PortalConnector, PortalOutcome, PortalSession, QueryParams};
use super::response::{parse_inquiry, InquiryPage, PageVerdict};
use crate::config::Config;
use crate::error::PortalError;
use crate::models::HouseholdRecord;
use crate::utils::truncate_text;

const MAIN_PATH: &str = "/info-doorplate/app/doorplate/main";
const MAP_PATH: &str = "/info-doorplate/app/doorplate/map";
const QUERY_PATH: &str = "/info-doorplate/app/doorplate/query";
const CAPTCHA_PATH: &str = "/info-doorplate/captcha/image";
const INQUIRY_PATH: &str = "/info-doorplate/app/doorplate/inquiry/date";

/// 小于这个长度的图片视为无效
const MIN_CAPTCHA_BYTES: usize = 100;
const ROWS_PER_PAGE: &str = "50";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";

/// 页面隐藏字段的正则
#[derive(Debug)]
pub struct PortalPatterns {
    csrf: Regex,
    captcha_key: Regex,
}

impl PortalPatterns {
    pub fn compile() -> Result<Self, PortalError> {
        Ok(Self {
            csrf: Regex::new(r#"name="_csrf"\s+value="([^"]+)""#)?,
            captcha_key: Regex::new(r#"id="captchaKey_captchaKey"\s+value="([^"]+)""#)?,
        })
    }

    fn csrf(&self, html: &str) -> Result<String, PortalError> {
        capture(&self.csrf, html, "_csrf")
    }

    fn captcha_key(&self, html: &str) -> Result<String, PortalError> {
        capture(&self.captcha_key, html, "captchaKey")
    }
}

fn capture(re: &Regex, html: &str, field: &'static str) -> Result<String, PortalError> {
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(PortalError::MissingField { field })
}

#[derive(Debug, Clone)]
struct SessionSettings {
    base_url: String,
    request_timeout: Duration,
    query_timeout: Duration,
    page_delay: Duration,
}

/// 为每个行政区打开新的 [`RisPortalSession`]
pub struct RisConnector {
    settings: SessionSettings,
    patterns: Arc<PortalPatterns>,
}

impl RisConnector {
    pub fn new(config: &Config) -> Result<Self, PortalError> {
        Ok(Self {
            settings: SessionSettings {
                base_url: config.portal_base_url.trim_end_matches('/').to_string(),
                request_timeout: Duration::from_secs(config.request_timeout_secs),
                query_timeout: Duration::from_secs(config.query_timeout_secs),
                page_delay: Duration::from_millis(config.page_delay_ms),
            },
            patterns: Arc::new(PortalPatterns::compile()?),
        })
    }
}

#[async_trait]
impl PortalConnector for RisConnector {
    async fn open(&self, city_code: &str) -> Result<Box<dyn PortalSession>, PortalError> {
        let session =
            RisPortalSession::new(self.settings.clone(), city_code, Arc::clone(&self.patterns))?;
        Ok(Box::new(session))
    }

    fn endpoint(&self) -> String {
        format!("{}{}", self.settings.base_url, INQUIRY_PATH)
    }
}

/// 一个带 cookie 的网站会话
pub struct RisPortalSession {
    client: reqwest::Client,
    settings: SessionSettings,
    patterns: Arc<PortalPatterns>,
    city_code: String,
    csrf_token: String,
    captcha_key: String,
    ready: bool,
}

impl RisPortalSession {
    fn new(
        settings: SessionSettings,
        city_code: &str,
        patterns: Arc<PortalPatterns>,
    ) -> Result<Self, PortalError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("zh-TW,zh;q=0.9,en;q=0.8"),
        );
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(settings.request_timeout)
            .build()
            .map_err(PortalError::ClientBuild)?;

        Ok(Self {
            client,
            settings,
            patterns,
            city_code: city_code.to_string(),
            csrf_token: String::new(),
            captcha_key: String::new(),
            ready: false,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url, path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: &str,
    ) -> Result<reqwest::Response, PortalError> {
        let response = request.send().await.map_err(|source| PortalError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortalError::HttpStatus {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn read_text(response: reqwest::Response, endpoint: &str) -> Result<String, PortalError> {
        response.text().await.map_err(|source| PortalError::Request {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// 三步握手：主页 → 选择以编钉日期查询 → 选择城市
    pub async fn init_session(&mut self) -> Result<(), PortalError> {
        debug!("会话初始化: 取得主页面");
        let response = self.send(self.client.get(self.url(MAIN_PATH)), MAIN_PATH).await?;
        let html = Self::read_text(response, MAIN_PATH).await?;
        self.csrf_token = self.patterns.csrf(&html)?;

        debug!("会话初始化: 选择查询方式");
        let form = [("_csrf", self.csrf_token.as_str()), ("searchType", "date")];
        let response = self
            .send(self.client.post(self.url(MAP_PATH)).form(&form), MAP_PATH)
            .await?;
        let html = Self::read_text(response, MAP_PATH).await?;
        self.csrf_token = self.patterns.csrf(&html)?;

        debug!("会话初始化: 选择城市 {}", self.city_code);
        let form = [
            ("_csrf", self.csrf_token.as_str()),
            ("searchType", "date"),
            ("cityCode", self.city_code.as_str()),
        ];
        let response = self
            .send(self.client.post(self.url(QUERY_PATH)).form(&form), QUERY_PATH)
            .await?;
        let html = Self::read_text(response, QUERY_PATH).await?;
        self.csrf_token = self.patterns.csrf(&html)?;
        self.captcha_key = self.patterns.captcha_key(&html)?;

        info!(
            "✓ 会话初始化完成 (csrf: {}, captchaKey: {})",
            truncate_text(&self.csrf_token, 12),
            self.captcha_key
        );
        self.ready = true;
        Ok(())
    }

    async fn download_challenge(&self) -> Result<Vec<u8>, PortalError> {
        let time = chrono::Utc::now().timestamp_millis().to_string();
        let request = self
            .client
            .get(self.url(CAPTCHA_PATH))
            .query(&[("CAPTCHA_KEY", self.captcha_key.as_str()), ("time", time.as_str())]);
        let response = self.send(request, CAPTCHA_PATH).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|source| PortalError::Request {
                endpoint: CAPTCHA_PATH.to_string(),
                source,
            })?;
        if bytes.len() <= MIN_CAPTCHA_BYTES {
            return Err(PortalError::InvalidChallenge { len: bytes.len() });
        }
        Ok(bytes.to_vec())
    }

    /// 查询一页；带 token 时不需要验证码
    async fn query_page(
        &self,
        captcha_input: &str,
        params: &QueryParams,
        token: Option<&str>,
        page: u32,
    ) -> Result<InquiryPage, PortalError> {
        let nd = chrono::Utc::now().timestamp_millis().to_string();
        let page = page.to_string();
        let captcha_input = if token.is_some() { "" } else { captcha_input };

        let mut form: Vec<(&str, &str)> = vec![
            ("searchType", "date"),
            ("cityCode", params.city_code.as_str()),
            ("tkt", "-1"),
            ("areaCode", params.area_code.as_str()),
            ("village", ""),
            ("neighbor", ""),
            ("sDate", params.start_date.as_str()),
            ("eDate", params.end_date.as_str()),
            ("_includeNoDate", "on"),
            ("registerKind", params.register_kind.as_str()),
            ("captchaInput", captcha_input),
            ("captchaKey", self.captcha_key.as_str()),
            ("_csrf", self.csrf_token.as_str()),
            ("floor", ""),
            ("lane", ""),
            ("alley", ""),
            ("number", ""),
            ("number1", ""),
            ("ext", ""),
            ("_search", "false"),
            ("nd", nd.as_str()),
            ("rows", ROWS_PER_PAGE),
            ("page", page.as_str()),
            ("sidx", ""),
            ("sord", "asc"),
        ];
        if let Some(token) = token {
            form.push(("token", token));
        }

        let request = self
            .client
            .post(self.url(INQUIRY_PATH))
            .timeout(self.settings.query_timeout)
            .header(header::ACCEPT, "application/json, text/javascript, */*; q=0.01")
            .header("X-Requested-With", "XMLHttpRequest")
            .header("X-CSRF-TOKEN", self.csrf_token.as_str())
            .header(header::REFERER, self.url(QUERY_PATH))
            .form(&form);

        let response = self.send(request, INQUIRY_PATH).await?;
        let text = Self::read_text(response, INQUIRY_PATH).await?;
        let body: Value = serde_json::from_str(&text)?;
        Ok(parse_inquiry(&body))
    }

    fn absorb(&mut self, page: &InquiryPage) {
        if let Some(key) = &page.captcha_key {
            self.captcha_key = key.clone();
        }
    }

    /// 用 token 抓取第 2 页之后的资料，单页失败只记录不中断
    async fn collect_remaining_pages(
        &mut self,
        params: &QueryParams,
        first: &InquiryPage,
        rows: &mut Vec<Value>,
    ) {
        let Some(mut token) = first.token.clone() else {
            warn!("第 1 页没有返回 token，只保留第 1 页资料");
            return;
        };

        for page_num in 2..=first.total_pages {
            tokio::time::sleep(self.settings.page_delay).await;
            match self.query_page("", params, Some(&token), page_num).await {
                Ok(page) => {
                    self.absorb(&page);
                    if let Some(next) = &page.token {
                        token = next.clone();
                    }
                    match page.verdict {
                        PageVerdict::Rows(page_rows) => {
                            debug!(
                                "第 {}/{} 页，本页 {} 笔",
                                page_num,
                                first.total_pages,
                                page_rows.len()
                            );
                            rows.extend(page_rows);
                        }
                        PageVerdict::NoData => {}
                        PageVerdict::CaptchaRejected(msg) | PageVerdict::Error(msg) => {
                            warn!("第 {} 页查询失败: {}", page_num, msg);
                        }
                    }
                }
                Err(e) => warn!("第 {} 页查询失败: {}", page_num, e),
            }
        }
    }
}

#[async_trait]
impl PortalSession for RisPortalSession {
    async fn fetch_challenge(&mut self) -> Result<Vec<u8>, PortalError> {
        if !self.ready {
            self.init_session().await?;
        }
        let result = self.download_challenge().await;
        if result.is_err() {
            self.ready = false;
        }
        result
    }

    async fn submit(&mut self, guess: &str, params: &QueryParams) -> PortalOutcome {
        if !self.ready {
            return PortalOutcome::TransientError(PortalError::NotInitialized.to_string());
        }

        let first = match self.query_page(guess, params, None, 1).await {
            Ok(page) => page,
            Err(e) => {
                self.ready = false;
                return PortalOutcome::TransientError(e.to_string());
            }
        };
        self.absorb(&first);

        match first.verdict.clone() {
            PageVerdict::CaptchaRejected(msg) => PortalOutcome::CaptchaRejected(msg),
            PageVerdict::Error(msg) => {
                self.ready = false;
                PortalOutcome::TransientError(msg)
            }
            PageVerdict::NoData => PortalOutcome::Accepted(Vec::new()),
            PageVerdict::Rows(mut rows) => {
                if first.total_pages > 1 {
                    info!(
                        "{} 共 {} 页，使用 token 继续查询",
                        params.district_name, first.total_pages
                    );
                    self.collect_remaining_pages(params, &first, &mut rows).await;
                }
                let records = rows
                    .iter()
                    .map(|row| {
                        HouseholdRecord::from_portal_row(row, &params.city_name, &params.district_name)
                    })
                    .collect();
                PortalOutcome::Accepted(records)
            }
        }
    }
}
