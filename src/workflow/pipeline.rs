use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::app::AppConfig;
use crate::core::types::{CancelFlag, FileRecord, ProcessResult, ProcessingState};
use crate::file_processor::metadata::{extract_metadata, save_metadata, sidecar_path};
use crate::file_processor::naming::{NamingManager, VersionCounter};
use crate::file_processor::scanner::{FileScanner, ScanOptions};
use crate::file_processor::sequence::SequenceResolver;
use crate::file_processor::task_assigner::TaskAssigner;
use crate::history::processed::{PROCESSED_DIR, ProcessedFilesTracker};
use crate::history::uploads::UploadHistory;
use crate::shotgrid::api_client::ShotgridApi;
use crate::shotgrid::uploader::{UploadSettings, UploadSummary, Uploader};
use crate::workflow::manifest::Manifest;

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub source_dir: PathBuf,
    pub output_dir: Option<PathBuf>,
    pub sequence: Option<String>,
    pub shot: Option<u32>,
    pub recursive: bool,
    pub exclude_processed: bool,
    pub dry_run: bool,
}

impl ProcessOptions {
    pub fn from_config(cfg: &AppConfig, source_dir: &Path) -> Self {
        Self {
            source_dir: source_dir.to_path_buf(),
            output_dir: cfg.general.output_dir.clone(),
            sequence: None,
            shot: None,
            recursive: cfg.general.recursive,
            exclude_processed: cfg.general.exclude_processed,
            dry_run: false,
        }
    }

    /// 未指定输出目录时写回扫描目录
    pub fn resolved_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.source_dir.clone())
    }
}

#[derive(Debug)]
pub struct ProcessReport {
    pub manifest: Manifest,
    pub manifest_path: Option<PathBuf>,
}

/// 单次处理运行中共享的组件
struct Processor<'a> {
    resolver: SequenceResolver,
    naming: NamingManager,
    counter: VersionCounter,
    tracker: &'a mut ProcessedFilesTracker,
    options: &'a ProcessOptions,
    output_dir: PathBuf,
}

impl Processor<'_> {
    fn process_record(&mut self, record: &mut FileRecord) -> Result<()> {
        let hint = self.resolver.resolve(
            &record.file_path,
            Some(&self.options.source_dir),
            self.options.sequence.as_deref(),
            self.options.shot,
        )?;
        let task = record
            .task
            .clone()
            .context("扫描阶段未分配任务")?;

        let batch_dir = if self.options.dry_run {
            self.tracker.current_batch_dir(&self.output_dir)
        } else {
            self.tracker.get_or_create_batch_folder(&self.output_dir)?
        };
        let resolved = self.naming.resolve(
            &record.file_path,
            &hint.sequence,
            hint.shot,
            &task,
            &batch_dir,
            &mut self.counter,
        )?;

        record.sequence = Some(resolved.name.sequence.clone());
        record.shot = Some(resolved.name.shot);
        record.version = Some(resolved.name.version);
        record.processed_filename = Some(resolved.file_name.clone());
        record.processed_path = Some(resolved.path.clone());

        if self.options.dry_run {
            info!("🧪 [预演] {} -> {}", record.file_name, resolved.file_name);
        } else {
            fs::copy(&record.file_path, &resolved.path).with_context(|| {
                format!("复制文件失败: {} -> {}", record.file_path.display(), resolved.path.display())
            })?;
            let metadata_path = sidecar_path(&resolved.path);
            match extract_metadata(&resolved.path, record.file_type)
                .and_then(|meta| save_metadata(&meta, &metadata_path))
            {
                Ok(()) => record.metadata_path = Some(metadata_path),
                Err(e) => warn!("⚠️ 元数据写入失败 {}: {}", resolved.file_name, e),
            }
            self.tracker.add_processed_file(&record.file_path, record)?;
        }

        record.advance(ProcessingState::Renamed)?;
        Ok(())
    }
}

/// 扫描、命名并复制到批次目录，最后写出清单
///
/// 单个文件失败只记录在该文件的记录中，不会中断整个批次。
pub fn run_process(
    cfg: &AppConfig,
    options: &ProcessOptions,
    tracker: &mut ProcessedFilesTracker,
    cancel: &CancelFlag,
) -> Result<ProcessReport> {
    let output_dir = options.resolved_output_dir();
    info!("🚀 开始处理: {}", options.source_dir.display());
    info!("📂 输出目录: {}", output_dir.display());
    if options.dry_run {
        info!("🧪 预演模式：不会复制文件或写入历史");
    }

    let assigner = TaskAssigner::new(&cfg.file_processing);
    let scan_options = ScanOptions {
        recursive: options.recursive,
        exclude_processed: options.exclude_processed,
    };
    let scan = {
        let tracker_ref = options.exclude_processed.then_some(&*tracker);
        FileScanner::new(&assigner, tracker_ref)
            .exclude_dir(&output_dir.join(PROCESSED_DIR))
            .scan(&options.source_dir, scan_options)?
    };

    let mut counter = VersionCounter::new();
    let seeded = counter.seed_from_dir(&output_dir.join(PROCESSED_DIR), true);
    debug!("已有输出文件 {} 个", seeded);

    let mut manifest = Manifest::new(&options.source_dir, &output_dir);
    manifest.skipped = scan.skipped;
    let mut records = scan.records;
    let total = records.len();

    let mut processor = Processor {
        resolver: SequenceResolver::new(&cfg.file_processing),
        naming: NamingManager::new(cfg.file_processing.known_sequences.clone()),
        counter,
        tracker,
        options,
        output_dir: output_dir.clone(),
    };

    for (index, record) in records.iter_mut().enumerate() {
        if cancel.is_cancelled() {
            warn!("🛑 处理已取消，剩余 {} 个文件未处理", total - index);
            manifest.cancelled = true;
            break;
        }
        info!("[{}/{}] {}", index + 1, total, record.file_path.display());
        match processor.process_record(record) {
            Ok(()) => manifest.stats.add_result(&ProcessResult::Success),
            Err(e) => {
                error!("❌ {} 处理失败: {}", record.file_name, e);
                if let Err(err) = record.fail(e.to_string()) {
                    warn!("{}", err);
                }
                manifest.stats.add_result(&ProcessResult::Failed);
            }
        }
    }
    manifest.records = records;

    info!(
        "处理完成: 成功 {}，失败 {}，跳过 {}",
        manifest.stats.success,
        manifest.stats.failed,
        manifest.skipped.len()
    );

    let manifest_path = if options.dry_run || manifest.records.is_empty() {
        None
    } else {
        let path = output_dir.join(manifest.file_name());
        manifest.save(&path)?;
        Some(path)
    };

    Ok(ProcessReport {
        manifest,
        manifest_path,
    })
}

/// 上传清单中已重命名的记录，并把结果写回清单
pub async fn run_upload<A: ShotgridApi>(
    api: &A,
    cfg: &AppConfig,
    manifest_path: &Path,
    project: Option<&str>,
    history: &mut UploadHistory,
    cancel: &CancelFlag,
) -> Result<UploadSummary> {
    let mut manifest = Manifest::load(manifest_path)?;
    let settings = UploadSettings::from_config(&cfg.shotgrid, project);
    info!(
        "🚀 开始上传 {} 个文件到项目 {}",
        manifest.count_in(ProcessingState::Renamed),
        settings.project
    );

    let mut uploader = Uploader::new(api, settings);
    let summary = uploader
        .upload_batch(&mut manifest.records, history, cancel)
        .await;

    manifest.save(manifest_path)?;
    Ok(summary)
}
