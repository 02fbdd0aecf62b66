mod app;
mod core;
mod file_processor;
mod history;
mod logger;
mod shotgrid;
mod utils;
mod workflow;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::app::{AppConfig, dirs};
use crate::core::types::CancelFlag;
use crate::file_processor::naming::CanonicalName;
use crate::file_processor::scanner::{FileScanner, ScanOptions};
use crate::file_processor::sequence::{SequenceResolver, parse_shot};
use crate::file_processor::task_assigner::TaskAssigner;
use crate::history::{ProcessedFilesTracker, UploadHistory};
use crate::shotgrid::ShotgridClient;
use crate::utils::text::human_size;
use crate::workflow::pipeline::{ProcessOptions, run_process, run_upload};

#[derive(Parser)]
#[command(
    name = "shotpipe",
    version,
    about = "媒体文件入库：按规则命名、分批整理并上传到 ShotGrid"
)]
struct Cli {
    /// 配置文件路径
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 扫描目录，列出待处理文件和跳过原因
    Scan {
        dir: PathBuf,

        /// 只扫描顶层目录
        #[arg(long, default_value_t = false)]
        no_recursive: bool,

        /// 不跳过已处理的文件
        #[arg(long, default_value_t = false)]
        include_processed: bool,
    },

    /// 命名并复制到批次目录，生成清单
    Process {
        dir: PathBuf,

        /// 输出目录，默认写回扫描目录
        #[arg(long)]
        output: Option<PathBuf>,

        /// 手动指定序列
        #[arg(long)]
        sequence: Option<String>,

        /// 手动指定镜头，例如 c001
        #[arg(long, value_parser = parse_shot_arg)]
        shot: Option<u32>,

        #[arg(long, default_value_t = false)]
        no_recursive: bool,

        #[arg(long, default_value_t = false)]
        include_processed: bool,

        /// 只显示命名结果，不复制文件
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },

    /// 上传清单中的文件到 ShotGrid
    Upload {
        manifest: PathBuf,

        /// 项目名，默认使用配置中的 default_project
        #[arg(long)]
        project: Option<String>,
    },

    /// 按命名规则解析文件名
    Parse {
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// 处理历史
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },

    /// 写出默认配置文件
    InitConfig {
        path: Option<PathBuf>,

        /// 覆盖已有文件
        #[arg(long, default_value_t = false)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// 统计
    Stats,
    /// 导出为 JSON
    Export { path: PathBuf },
    /// 清空处理历史
    Reset {
        /// 同时清空上传历史
        #[arg(long, default_value_t = false)]
        uploads: bool,
    },
}

fn parse_shot_arg(value: &str) -> Result<u32, String> {
    parse_shot(value).ok_or_else(|| format!("无效的镜头: '{}'，应为 c001 或 1 的形式", value))
}

/// Ctrl-C 后在当前文件处理完时停止
fn install_cancel_handler() -> CancelFlag {
    let cancel = CancelFlag::new();
    let handle = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 收到中断信号，当前文件完成后停止");
            handle.cancel();
        }
    });
    cancel
}

fn cmd_scan(cfg: &AppConfig, dir: &Path, recursive: bool, exclude_processed: bool) -> Result<()> {
    let assigner = TaskAssigner::new(&cfg.file_processing);
    let resolver = SequenceResolver::new(&cfg.file_processing);
    let tracker = if exclude_processed {
        Some(ProcessedFilesTracker::from_config(cfg)?)
    } else {
        None
    };
    let result = FileScanner::new(&assigner, tracker.as_ref()).scan(
        dir,
        ScanOptions {
            recursive,
            exclude_processed,
        },
    )?;

    for record in &result.records {
        let shot = resolver
            .infer(&record.file_path, Some(dir))
            .map(|h| format!("{}_c{:03}", h.sequence, h.shot))
            .unwrap_or_else(|| "未能推断序列/镜头".to_string());
        println!(
            "{}\t{}\t{}\t{}\t{}",
            record.file_path.display(),
            record.file_type,
            record.task.as_deref().unwrap_or("-"),
            shot,
            human_size(record.file_size)
        );
    }
    for skipped in &result.skipped {
        println!("跳过\t{}\t{}", skipped.path.display(), skipped.reason);
    }
    println!("{}", result.skipped_summary());
    Ok(())
}

fn cmd_parse(names: &[String]) -> Result<()> {
    let mut invalid = 0;
    for name in names {
        match CanonicalName::parse(name) {
            Some(parsed) => println!(
                "{}\tsequence={}\tshot={}\ttask={}\tversion={}",
                name,
                parsed.sequence,
                parsed.shot_code(),
                parsed.task,
                parsed.version_code()
            ),
            None => {
                invalid += 1;
                println!("{}\t不符合命名规则", name);
            }
        }
    }
    if invalid > 0 {
        bail!("{} 个名称不符合命名规则", invalid);
    }
    Ok(())
}

fn cmd_history(cfg: &AppConfig, action: HistoryAction) -> Result<()> {
    let mut tracker = ProcessedFilesTracker::from_config(cfg)?;
    match action {
        HistoryAction::Stats => {
            let stats = tracker.stats();
            println!("历史文件: {}", tracker.path().display());
            println!("已处理文件: {}", stats.total_files);
            println!("总大小: {}", human_size(stats.total_size));
            println!("当前批次: {} (已创建 {} 个新批次)", stats.current_batch, stats.last_batch);
            for (task, count) in &stats.by_task {
                println!("任务 {}: {}", task, count);
            }
            for (sequence, count) in &stats.by_sequence {
                println!("序列 {}: {}", sequence, count);
            }
        }
        HistoryAction::Export { path } => {
            tracker.export(&path)?;
            println!("已导出到 {}", path.display());
        }
        HistoryAction::Reset { uploads } => {
            tracker.reset()?;
            if uploads {
                UploadHistory::from_config(cfg)?.reset()?;
            }
            println!("历史已清空");
        }
    }
    Ok(())
}

fn cmd_init_config(path: Option<PathBuf>, force: bool) -> Result<()> {
    let path = match path {
        Some(p) => p,
        None => dirs::default_config_path()?,
    };
    if path.exists() && !force {
        bail!("配置文件已存在: {} (使用 --force 覆盖)", path.display());
    }
    AppConfig::default().save(&path)?;
    println!("已写入默认配置: {}", path.display());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(cli.verbose)?;

    match cli.cmd {
        Commands::Parse { names } => cmd_parse(&names),
        Commands::InitConfig { path, force } => cmd_init_config(path, force),
        Commands::Scan {
            dir,
            no_recursive,
            include_processed,
        } => {
            let cfg = AppConfig::load(cli.config.as_deref())?;
            let recursive = cfg.general.recursive && !no_recursive;
            let exclude_processed = cfg.general.exclude_processed && !include_processed;
            cmd_scan(&cfg, &dir, recursive, exclude_processed)
        }
        Commands::History { action } => {
            let cfg = AppConfig::load(cli.config.as_deref())?;
            cmd_history(&cfg, action)
        }
        Commands::Process {
            dir,
            output,
            sequence,
            shot,
            no_recursive,
            include_processed,
            dry_run,
        } => {
            let cfg = AppConfig::load(cli.config.as_deref())?;
            let mut options = ProcessOptions::from_config(&cfg, &dir);
            if output.is_some() {
                options.output_dir = output;
            }
            options.sequence = sequence;
            options.shot = shot;
            options.recursive = cfg.general.recursive && !no_recursive;
            options.exclude_processed = cfg.general.exclude_processed && !include_processed;
            options.dry_run = dry_run;

            let mut tracker = ProcessedFilesTracker::from_config(&cfg)?;
            let cancel = install_cancel_handler();
            let report = run_process(&cfg, &options, &mut tracker, &cancel)?;

            for record in &report.manifest.records {
                match (&record.processed_filename, &record.message) {
                    (_, Some(message)) => println!("失败\t{}\t{}", record.file_path.display(), message),
                    (Some(name), None) => println!("{}\t{}", record.file_path.display(), name),
                    (None, None) => println!("未处理\t{}", record.file_path.display()),
                }
            }
            let stats = report.manifest.stats;
            println!(
                "成功 {}，失败 {}，跳过 {}",
                stats.success,
                stats.failed,
                report.manifest.skipped.len()
            );
            if let Some(path) = &report.manifest_path {
                println!("清单: {}", path.display());
            }
            if report.manifest.cancelled {
                bail!("处理被中断");
            }
            Ok(())
        }
        Commands::Upload { manifest, project } => {
            let cfg = AppConfig::load(cli.config.as_deref())?;
            let client = ShotgridClient::new(&cfg.shotgrid)?;
            let mut history = UploadHistory::from_config(&cfg)?;
            let cancel = install_cancel_handler();
            let summary = run_upload(
                &client,
                &cfg,
                &manifest,
                project.as_deref(),
                &mut history,
                &cancel,
            )
            .await?;
            info!("🎉 上传流程结束");
            println!(
                "成功 {}，已存在 {}，失败 {}，跳过 {}",
                summary.stats.success, summary.stats.exists, summary.stats.failed, summary.skipped
            );
            if summary.cancelled {
                bail!("上传被中断");
            }
            Ok(())
        }
    }
}
