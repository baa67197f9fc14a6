//! # Household Crawler
//!
//! 户政门牌异动资料批量查询：逐个行政区通过验证码查询门牌网站，
//! 把结果连同批次来源写入 SQLite。
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（SQLite 连接），只暴露能力
//! - `ResultStore` - 批次 → 行政区结果 → 门牌资料 的来源模型
//!
//! ### ② 业务能力层（Services / Clients）
//! - `clients/` - 门牌网站会话：握手、取验证码、提交查询、解析响应
//! - `services/` - 描述"我能做什么"
//! - `CaptchaSolver` - 验证码识别（OCR 服务 / 视觉模型）
//! - `NotificationTrigger` - 异常通知策略与投递
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个行政区"的完整查询流程
//! - `DistrictCtx` - 上下文封装（第几个行政区）
//! - `DistrictQueryAttempt` - 有上限的验证码重试状态机
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_orchestrator` - 批次互斥、逐区执行、汇总、落库、通知
//! - `orchestrator/scheduler` - 定时触发
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::ResultStore;
pub use models::{BatchQueryRequest, BatchQueryResponse};
pub use orchestrator::{BatchOrchestrator, Scheduler};
