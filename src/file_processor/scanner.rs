use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::types::{FileRecord, FileType};
use crate::file_processor::naming::CanonicalName;
use crate::file_processor::task_assigner::TaskAssigner;
use crate::history::processed::ProcessedFilesTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipKind {
    Unsupported,
    AlreadyNamed,
    AlreadyProcessed,
}

/// 扫描时被跳过的文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub file_name: String,
    pub extension: String,
    pub size: u64,
    pub file_type: FileType,
    pub kind: SkipKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    pub recursive: bool,
    pub exclude_processed: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            exclude_processed: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub records: Vec<FileRecord>,
    pub skipped: Vec<SkippedFile>,
}

impl ScanResult {
    pub fn processed_skips(&self) -> usize {
        self.skipped
            .iter()
            .filter(|s| s.kind != SkipKind::Unsupported)
            .count()
    }

    pub fn skipped_summary(&self) -> String {
        let processed = self.processed_skips();
        format!(
            "找到 {} 个待处理文件，跳过 {} 个 (已处理 {}，不支持 {})",
            self.records.len(),
            self.skipped.len(),
            processed,
            self.skipped.len() - processed
        )
    }
}

pub struct FileScanner<'a> {
    assigner: &'a TaskAssigner,
    tracker: Option<&'a ProcessedFilesTracker>,
    excluded: Vec<PathBuf>,
}

impl<'a> FileScanner<'a> {
    pub fn new(assigner: &'a TaskAssigner, tracker: Option<&'a ProcessedFilesTracker>) -> Self {
        Self {
            assigner,
            tracker,
            excluded: Vec::new(),
        }
    }

    /// 不进入该目录（例如输出目录位于扫描目录之内时）
    pub fn exclude_dir(mut self, dir: &Path) -> Self {
        self.excluded
            .push(dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf()));
        self
    }

    fn is_excluded(&self, path: &Path) -> bool {
        if self.excluded.is_empty() {
            return false;
        }
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.excluded.iter().any(|dir| *dir == path)
    }

    /// 扫描目录，返回待处理的记录（已分配任务）和跳过的文件
    pub fn scan(&self, dir: &Path, options: ScanOptions) -> Result<ScanResult> {
        if !dir.is_dir() {
            bail!("扫描目录不存在或不是目录: {}", dir.display());
        }
        info!("🔍 扫描目录: {} (递归: {})", dir.display(), options.recursive);

        let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
        if !options.recursive {
            walker = walker.max_depth(1);
        }

        let mut result = ScanResult::default();
        let entries = walker
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && self.is_excluded(e.path())));
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("⚠️ 无法访问: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let file_name = entry.file_name().to_string_lossy().to_string();
            if file_name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!("⚠️ 读取文件信息失败 {}: {}", path.display(), e);
                    continue;
                }
            };
            let mut record = FileRecord::scanned(path, FileType::Unknown, size);
            record.file_type = self.assigner.file_type(&record.extension);

            if let Some((kind, reason)) = self.skip_reason(path, &record, options) {
                debug!("跳过 {}: {}", file_name, reason);
                result.skipped.push(SkippedFile {
                    path: path.to_path_buf(),
                    file_name,
                    extension: record.extension,
                    size,
                    file_type: record.file_type,
                    kind,
                    reason,
                });
                continue;
            }

            self.assigner.assign(&mut record);
            result.records.push(record);
        }

        info!("{}", result.skipped_summary());
        Ok(result)
    }

    fn skip_reason(
        &self,
        path: &Path,
        record: &FileRecord,
        options: ScanOptions,
    ) -> Option<(SkipKind, String)> {
        if !self.assigner.is_supported(&record.extension) {
            return Some((
                SkipKind::Unsupported,
                format!("不支持的文件类型: {}", record.extension),
            ));
        }
        if !options.exclude_processed {
            return None;
        }
        if CanonicalName::parse(&record.file_name).is_some() {
            return Some((SkipKind::AlreadyNamed, "已符合命名规则".to_string()));
        }
        self.tracker
            .and_then(|t| t.is_file_processed(path))
            .map(|reason| (SkipKind::AlreadyProcessed, reason))
    }
}
