use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use household_crawler::config::Config;
use household_crawler::infrastructure::{RecordFilter, ResultStore};
use household_crawler::models::{BatchQueryRequest, TAIPEI_DISTRICTS};
use household_crawler::orchestrator::{BatchOrchestrator, ScheduleSettings, Scheduler};
use household_crawler::utils::logging;

/// 台北市门牌异动资料批量查询
#[derive(Parser, Debug)]
#[command(name = "household-crawler")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML 配置文件，环境变量优先
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 显示详细日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 执行一次批量查询，输出 JSON 结果
    Run(RunArgs),
    /// 列出可查询的行政区
    Districts,
    /// 查看执行状态与下次排程时间
    Status,
    /// 前台运行排程器，Ctrl+C 结束
    Schedule,
    /// 关闭上次进程遗留的 running 批次
    Recover,
    /// 查询已落库的门牌资料
    Records(RecordsArgs),
    /// 管理通知收件人
    #[command(subcommand)]
    Recipients(RecipientCommands),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// 起始日期（民国），如 114-09-01
    #[arg(long)]
    start: String,
    /// 结束日期（民国），如 114-11-30
    #[arg(long)]
    end: String,
    /// 城市代码，默认取配置 city_code
    #[arg(long)]
    city: Option<String>,
    /// 编钉类别代码
    #[arg(long, default_value = "1")]
    register_kind: String,
    /// 指定行政区，可重复；不指定时查询全部
    #[arg(short, long = "district")]
    districts: Vec<String>,
    /// 不写入数据库
    #[arg(long)]
    no_save: bool,
}

#[derive(Args, Debug)]
struct RecordsArgs {
    #[arg(long)]
    district: Option<String>,
    #[arg(long)]
    edit_type: Option<String>,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    batch: Option<i64>,
    #[arg(long, default_value_t = 50)]
    limit: usize,
}

#[derive(Subcommand, Debug)]
enum RecipientCommands {
    /// 新增或重新启用收件人
    Add {
        email: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// 停用收件人
    Remove { email: String },
    /// 列出全部收件人
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = Config::load(cli.config.as_deref()).context("加载配置失败")?;
    logging::init(cli.verbose || config.verbose_logging);

    match cli.command {
        Commands::Districts => {
            let districts: Vec<_> = TAIPEI_DISTRICTS
                .iter()
                .map(|d| serde_json::json!({ "name": d.name, "code": d.code }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&districts)?);
            return Ok(());
        }
        Commands::Run(args) => {
            let orchestrator = build_orchestrator(&config)?;
            let mut request = BatchQueryRequest::new(args.start, args.end);
            request.city_code = args.city.unwrap_or_else(|| config.city_code.clone());
            request.register_kind = args.register_kind;
            if !args.districts.is_empty() {
                request.districts = Some(args.districts);
            }
            request.save_to_db = !args.no_save;

            let response = orchestrator.run_batch(&request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Status => {
            let orchestrator = build_orchestrator(&config)?;
            let status = orchestrator.status();
            let latest = orchestrator.store().latest_batch()?;
            let next_run = if config.enable_scheduler {
                let settings = ScheduleSettings::from_config(&config)?;
                Some(Scheduler::new(Arc::new(orchestrator), settings).next_run())
            } else {
                None
            };
            let report = serde_json::json!({
                "running": status.running,
                "batch_id": status.batch_id,
                "started_at": status.started_at,
                "scheduler_enabled": config.enable_scheduler,
                "next_run": next_run,
                "latest_batch": latest,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Recover => {
            let orchestrator = build_orchestrator(&config)?;
            let recovered = orchestrator.recover_interrupted()?;
            info!("已关闭 {} 个遗留批次: {:?}", recovered.len(), recovered);
        }
        Commands::Schedule => {
            if !config.enable_scheduler {
                warn!("排程器未启用 (ENABLE_SCHEDULER=false)，退出");
                return Ok(());
            }
            let settings = ScheduleSettings::from_config(&config)?;
            let orchestrator = Arc::new(build_orchestrator(&config)?);
            orchestrator.recover_interrupted()?;

            let scheduler = Scheduler::new(orchestrator, settings);
            tokio::select! {
                _ = scheduler.run_forever() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("收到中断信号，排程器停止");
                }
            }
        }
        Commands::Records(args) => {
            let store = ResultStore::open(&config.db_path)?;
            let rows = store.search_records(&RecordFilter {
                city: None,
                district: args.district,
                edit_type: args.edit_type,
                start_date: args.start,
                end_date: args.end,
                batch_id: args.batch,
                limit: Some(args.limit),
            })?;
            let out: Vec<_> = rows
                .iter()
                .map(|row| {
                    serde_json::json!({
                        "id": row.id,
                        "batch_id": row.batch_id,
                        "edit_type_name": row.edit_type_name,
                        "record": row.record,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        Commands::Recipients(command) => {
            let store = ResultStore::open(&config.db_path)?;
            match command {
                RecipientCommands::Add { email, name } => {
                    let id = store.add_recipient(&email, name.as_deref())?;
                    info!("✅ 收件人已启用: {} (id: {})", email, id);
                }
                RecipientCommands::Remove { email } => {
                    if store.deactivate_recipient(&email)? {
                        info!("收件人已停用: {}", email);
                    } else {
                        warn!("收件人不存在: {}", email);
                    }
                }
                RecipientCommands::List => {
                    let recipients = store.list_recipients()?;
                    println!("{}", serde_json::to_string_pretty(&recipients)?);
                }
            }
        }
    }

    Ok(())
}

fn build_orchestrator(config: &Config) -> Result<BatchOrchestrator> {
    logging::log_startup(&config.db_path, config.max_captcha_retry, &config.captcha_solver);
    BatchOrchestrator::from_config(config).context("初始化编排器失败")
}
