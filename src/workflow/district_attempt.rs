//! 单个行政区的验证码重试流程 - 流程层
//!
//! 状态：取验证码 → 识别 → 提交 →
//! - 接受：结束（资料可能为空）
//! - 验证码错误 / 临时错误：重新取验证码
//!
//! 次数用尽时结束为 `Exhausted`，附带最后一次的错误。

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clients::{PortalOutcome, PortalSession, QueryParams};
use crate::config::Config;
use crate::models::HouseholdRecord;
use crate::services::{is_plausible_guess, normalize_guess, CaptchaSolver};
use crate::workflow::DistrictCtx;

/// 重试策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最多几轮"取验证码 + 提交"，至少为 1
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub solver_timeout: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration, solver_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
            solver_timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_captcha_retry,
            Duration::from_millis(config.retry_delay_ms),
            Duration::from_secs(config.solver_timeout_secs),
        )
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(10, Duration::from_millis(300), Duration::from_secs(20))
    }
}

/// 一轮尝试失败的原因
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptFailure {
    Challenge(String),
    ImplausibleGuess(String),
    Rejected(String),
    Transient(String),
}

impl AttemptFailure {
    fn describe(&self) -> String {
        match self {
            AttemptFailure::Challenge(e) => format!("取得验证码失败: {e}"),
            AttemptFailure::ImplausibleGuess(g) => format!("验证码识别结果无效: '{g}'"),
            AttemptFailure::Rejected(msg) => format!("验证码错误: {msg}"),
            AttemptFailure::Transient(msg) => format!("查询失败: {msg}"),
        }
    }
}

/// 重试流程的终态
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptTerminal {
    Success {
        records: Vec<HouseholdRecord>,
        attempts: u32,
    },
    Exhausted {
        last_error: String,
        attempts: u32,
    },
}

impl AttemptTerminal {
    pub fn attempts(&self) -> u32 {
        match self {
            AttemptTerminal::Success { attempts, .. } | AttemptTerminal::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// 单个行政区的查询流程
///
/// - 不持有会话，会话由编排层为每个行政区新开
/// - 不关心落库与通知
pub struct DistrictQueryAttempt<'a> {
    solver: &'a dyn CaptchaSolver,
    policy: RetryPolicy,
}

impl<'a> DistrictQueryAttempt<'a> {
    pub fn new(solver: &'a dyn CaptchaSolver, policy: RetryPolicy) -> Self {
        Self { solver, policy }
    }

    pub async fn run(
        &self,
        session: &mut dyn PortalSession,
        params: &QueryParams,
        ctx: &DistrictCtx,
    ) -> AttemptTerminal {
        let max = self.policy.max_attempts;
        let mut last_failure = None;

        for attempt in 1..=max {
            debug!("{} 第 {}/{} 次尝试", ctx, attempt, max);

            match self.try_once(session, params).await {
                Ok(records) => {
                    info!(
                        "{} ✓ 查询成功 (第 {} 次)，{} 笔资料",
                        ctx,
                        attempt,
                        records.len()
                    );
                    return AttemptTerminal::Success {
                        records,
                        attempts: attempt,
                    };
                }
                Err(failure) => {
                    warn!("{} {} ({}/{})", ctx, failure.describe(), attempt, max);
                    last_failure = Some(failure);
                }
            }

            if attempt < max && !self.policy.retry_delay.is_zero() {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        let last_error = last_failure
            .map(|f| f.describe())
            .unwrap_or_else(|| "未执行任何尝试".to_string());
        AttemptTerminal::Exhausted {
            last_error: format!("重试 {max} 次仍失败，最后错误: {last_error}"),
            attempts: max,
        }
    }

    /// 一轮：取验证码 → 识别 → 提交
    async fn try_once(
        &self,
        session: &mut dyn PortalSession,
        params: &QueryParams,
    ) -> Result<Vec<HouseholdRecord>, AttemptFailure> {
        let image = session
            .fetch_challenge()
            .await
            .map_err(|e| AttemptFailure::Challenge(e.to_string()))?;

        let raw = self.solve(&image).await;
        let guess = normalize_guess(&raw);
        if !is_plausible_guess(&guess) {
            return Err(AttemptFailure::ImplausibleGuess(raw));
        }
        debug!("验证码识别结果: {}", guess);

        match session.submit(&guess, params).await {
            PortalOutcome::Accepted(records) => Ok(records),
            PortalOutcome::CaptchaRejected(msg) => Err(AttemptFailure::Rejected(msg)),
            PortalOutcome::TransientError(msg) => Err(AttemptFailure::Transient(msg)),
        }
    }

    async fn solve(&self, image: &[u8]) -> String {
        match tokio::time::timeout(self.policy.solver_timeout, self.solver.solve(image)).await {
            Ok(guess) => guess,
            Err(_) => {
                warn!(
                    "验证码识别超时 ({} 秒)",
                    self.policy.solver_timeout.as_secs_f64()
                );
                String::new()
            }
        }
    }
}
