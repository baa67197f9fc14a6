//! 验证码识别 - 业务能力层
//!
//! 只负责"看图给出猜测"，不重试、不保存状态。任何失败都返回空字符串，
//! 是否重试由流程层决定。
//!
//! ## 实现
//! - `OcrServiceSolver`：调用本地 OCR HTTP 服务
//! - `LlmCaptchaSolver`：通过 `async-openai` 调用视觉模型

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::Config;

/// 网站验证码固定 5 个字符，不区分大小写
pub const CAPTCHA_LENGTH: usize = 5;

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// 返回识别结果；识别失败时返回空字符串
    async fn solve(&self, image: &[u8]) -> String;

    fn name(&self) -> &'static str;
}

/// 去掉空白并转小写
pub fn normalize_guess(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// 长度为 5 且只含 ASCII 字母数字才值得提交
pub fn is_plausible_guess(guess: &str) -> bool {
    guess.chars().count() == CAPTCHA_LENGTH && guess.chars().all(|c| c.is_ascii_alphanumeric())
}

/// 根据配置选择识别方式
pub fn build_solver(config: &Config) -> Box<dyn CaptchaSolver> {
    match config.captcha_solver.as_str() {
        "llm" => Box::new(LlmCaptchaSolver::new(config)),
        _ => Box::new(OcrServiceSolver::new(config)),
    }
}

/// 本地 OCR 服务
///
/// 请求: `POST {"image": "<base64>"}`，响应里的 `result` / `data` / `text` 任一字段为识别结果
pub struct OcrServiceSolver {
    client: reqwest::Client,
    url: String,
}

impl OcrServiceSolver {
    pub fn new(config: &Config) -> Self {
        Self::with_url(
            &config.ocr_service_url,
            Duration::from_secs(config.solver_timeout_secs),
        )
    }

    pub fn with_url(url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("OCR 客户端配置失败，使用默认客户端: {}", e);
                reqwest::Client::new()
            });
        Self {
            client,
            url: url.to_string(),
        }
    }

    async fn request(&self, image: &[u8]) -> Result<String, reqwest::Error> {
        let body: Value = self
            .client
            .post(&self.url)
            .json(&json!({ "image": STANDARD.encode(image) }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(["result", "data", "text"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl CaptchaSolver for OcrServiceSolver {
    async fn solve(&self, image: &[u8]) -> String {
        match self.request(image).await {
            Ok(text) => {
                debug!("OCR 识别结果: {}", text);
                text
            }
            Err(e) => {
                warn!("OCR 识别失败: {}", e);
                String::new()
            }
        }
    }

    fn name(&self) -> &'static str {
        "ocr"
    }
}

/// 视觉大模型识别
pub struct LlmCaptchaSolver {
    client: Client<OpenAIConfig>,
    model_name: String,
}

impl LlmCaptchaSolver {
    pub fn new(config: &Config) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
        }
    }

    async fn ask(&self, image: &[u8]) -> Result<String, OpenAIError> {
        let data_url = format!("data:image/png;base64,{}", STANDARD.encode(image));

        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content("你是验证码识别助手。图片中是 5 个英文字母或数字，只输出这 5 个字符，不要输出其他内容。")
            .build()?;

        let content_parts = vec![
            ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: "请识别验证码".to_string(),
                },
            ),
            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: data_url,
                        detail: Some(ImageDetail::High),
                    },
                },
            ),
        ];
        let user_msg = ChatCompletionRequestUserMessageArgs::default()
            .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(vec![
                ChatCompletionRequestMessage::System(system_msg),
                ChatCompletionRequestMessage::User(user_msg),
            ])
            .temperature(0.0)
            .max_tokens(16u32)
            .build()?;

        let response = self.client.chat().create(request).await?;
        Ok(response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CaptchaSolver for LlmCaptchaSolver {
    async fn solve(&self, image: &[u8]) -> String {
        debug!("调用视觉模型识别验证码，模型: {}", self.model_name);
        match self.ask(image).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                warn!("LLM 识别验证码失败: {}", e);
                String::new()
            }
        }
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}
