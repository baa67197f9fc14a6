/// 日志工具模块
///
/// 提供日志初始化和批次日志格式化的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::models::BatchOutcome;

/// 初始化 tracing 订阅者
///
/// `RUST_LOG` 优先；未设置时默认 `info`，`verbose` 为 true 时为 `debug`
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // 重复初始化（例如测试中）时忽略错误
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(db_path: &str, max_retry: u32, solver: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 门牌异动批量查询");
    info!("💾 数据库: {}", db_path);
    info!("🔐 验证码识别: {} (单区最多 {} 次)", solver, max_retry);
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
pub fn log_batch_start(
    batch_id: Option<i64>,
    district_count: usize,
    start_date: &str,
    end_date: &str,
    register_kind: &str,
) {
    info!("\n{}", "=".repeat(60));
    match batch_id {
        Some(id) => info!("📦 开始批次 #{}，共 {} 个行政区", id, district_count),
        None => info!("📦 开始批次（不落库），共 {} 个行政区", district_count),
    }
    info!(
        "📅 查询条件: {} ~ {}，编钉类别: {}",
        start_date, end_date, register_kind
    );
    info!("{}", "=".repeat(60));
}

/// 打印批次最终统计
pub fn print_final_stats(outcome: &BatchOutcome, elapsed_secs: f64) {
    info!("\n{}", "=".repeat(60));
    info!("📊 批次处理完成统计");
    info!("{}", "=".repeat(60));
    for (district, count) in &outcome.district_counts {
        info!("  {}: {} 笔", district, count);
    }
    info!("✅ 总笔数: {}", outcome.total_count);
    if outcome.failed_districts.is_empty() {
        info!("❌ 失败行政区: 无");
    } else {
        info!("❌ 失败行政区: {}", outcome.failed_districts.join("、"));
    }
    info!("⏱️ 耗时: {:.2} 秒", elapsed_secs);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
