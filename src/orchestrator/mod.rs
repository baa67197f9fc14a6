//! 编排层（Orchestration Layer）
//!
//! ## 模块划分
//!
//! ### `batch_orchestrator` - 批次编排器
//! - 批次互斥（进程内标志 + 数据库 running 行）
//! - 逐个行政区执行重试流程并汇总
//! - 落库与通知
//!
//! ### `scheduler` - 定时触发
//! - cron / interval 两种模式
//! - 每次触发调用同一个编排器
//!
//! ## 层次关系
//!
//! ```text
//! scheduler / CLI
//!     ↓
//! batch_orchestrator (处理 Vec<District>)
//!     ↓
//! workflow::DistrictQueryAttempt (处理单个行政区)
//!     ↓
//! services (验证码识别 / 通知)  +  clients (门牌网站会话)
//!     ↓
//! infrastructure (ResultStore)
//! ```

pub mod batch_orchestrator;
pub mod scheduler;

pub use batch_orchestrator::{aggregate, BatchOrchestrator, OrchestratorSettings, OrchestratorStatus};
pub use scheduler::{QueryWindow, ScheduleMode, ScheduleSettings, Scheduler};
