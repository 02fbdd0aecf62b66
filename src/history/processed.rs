//! 已处理文件记录
//!
//! 以源文件绝对路径为键，保存 mtime、大小和 SHA-256。再次扫描时先比对路径+mtime+大小，
//! 不一致时再比对内容哈希，用于跳过已经处理过的文件。同时管理输出目录下的批次文件夹。

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::app::AppConfig;
use crate::core::types::FileRecord;
use crate::history::hash::file_sha256;

pub const HISTORY_VERSION: &str = "1.0";
pub const PROCESSED_DIR: &str = "processed";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEntry {
    /// 修改时间（Unix 毫秒）
    pub mtime: i64,
    pub size: u64,
    pub hash: String,
    pub processed_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_path: Option<PathBuf>,
    #[serde(default)]
    pub processed_filename: Option<String>,
    #[serde(default)]
    pub sequence: Option<String>,
    #[serde(default)]
    pub shot: Option<u32>,
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchInfo {
    pub last_batch: u32,
    pub current_batch: String,
}

impl Default for BatchInfo {
    fn default() -> Self {
        Self {
            last_batch: 0,
            current_batch: "batch01".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryFile {
    #[serde(default = "default_version")]
    version: String,
    #[serde(default)]
    processed_files: BTreeMap<String, ProcessedEntry>,
    #[serde(default)]
    batch_info: BatchInfo,
}

impl Default for HistoryFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            processed_files: BTreeMap::new(),
            batch_info: BatchInfo::default(),
        }
    }
}

fn default_version() -> String {
    HISTORY_VERSION.to_string()
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct HistoryStats {
    pub total_files: usize,
    pub total_size: u64,
    pub by_task: BTreeMap<String, usize>,
    pub by_sequence: BTreeMap<String, usize>,
    pub current_batch: String,
    pub last_batch: u32,
}

pub struct ProcessedFilesTracker {
    path: PathBuf,
    history: HistoryFile,
    hash_lookup: HashMap<String, String>,
    max_files_per_batch: usize,
    max_history_items: usize,
}

impl ProcessedFilesTracker {
    pub fn open(path: &Path, max_files_per_batch: usize, max_history_items: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建历史目录失败: {}", parent.display()))?;
        }
        let history = load_history(path);
        let mut tracker = Self {
            path: path.to_path_buf(),
            history,
            hash_lookup: HashMap::new(),
            max_files_per_batch: max_files_per_batch.max(1),
            max_history_items: max_history_items.max(1),
        };
        if tracker.cleanup_history() {
            tracker.save()?;
        }
        tracker.rebuild_lookup();
        Ok(tracker)
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Self::open(
            &cfg.processed_history_path()?,
            cfg.file_processing.max_files_per_batch,
            cfg.history.max_history_items,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.history.processed_files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.processed_files.is_empty()
    }

    pub fn batch_info(&self) -> &BatchInfo {
        &self.history.batch_info
    }

    fn rebuild_lookup(&mut self) {
        self.hash_lookup = self
            .history
            .processed_files
            .iter()
            .map(|(path, entry)| (entry.hash.clone(), path.clone()))
            .collect();
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.history)?;
        fs::write(&self.path, content)
            .with_context(|| format!("保存处理历史失败: {}", self.path.display()))?;
        Ok(())
    }

    /// 已处理时返回跳过原因
    ///
    /// 先比对路径+mtime+大小，再比对内容哈希；读取失败时按未处理对待。
    pub fn is_file_processed(&self, file_path: &Path) -> Option<String> {
        let Ok(meta) = fs::metadata(file_path) else {
            return None;
        };
        let key = path_key(file_path);
        if let Some(entry) = self.history.processed_files.get(&key) {
            if entry.size == meta.len() && Some(entry.mtime) == mtime_millis(&meta) {
                debug!("路径和修改时间一致，已处理: {}", file_path.display());
                return Some("已处理 (路径、时间一致)".to_string());
            }
        }
        let hash = match file_sha256(file_path) {
            Ok(h) => h,
            Err(e) => {
                warn!("无法计算哈希，按未处理对待: {}", e);
                return None;
            }
        };
        self.hash_lookup.get(&hash).map(|original| {
            let name = Path::new(original)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| original.clone());
            debug!("内容哈希一致，已处理: {} (原文件 {})", file_path.display(), original);
            format!("已处理 (内容相同: {})", name)
        })
    }

    pub fn add_processed_file(&mut self, file_path: &Path, record: &FileRecord) -> Result<()> {
        let meta = fs::metadata(file_path)
            .with_context(|| format!("源文件不存在，无法记录: {}", file_path.display()))?;
        let hash = file_sha256(file_path)?;
        let entry = ProcessedEntry {
            mtime: mtime_millis(&meta).unwrap_or_default(),
            size: meta.len(),
            hash: hash.clone(),
            processed_at: Utc::now(),
            processed_path: record.processed_path.clone(),
            processed_filename: record.processed_filename.clone(),
            sequence: record.sequence.clone(),
            shot: record.shot,
            task: record.task.clone(),
            version: record.version,
        };
        let key = path_key(file_path);
        self.history.processed_files.insert(key.clone(), entry);
        self.hash_lookup.insert(hash, key);
        self.cleanup_history();
        self.save()?;
        debug!("已记录处理历史: {}", file_path.display());
        Ok(())
    }

    /// 当前批次目录，不创建也不检查是否已满
    pub fn current_batch_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir
            .join(PROCESSED_DIR)
            .join(&self.history.batch_info.current_batch)
    }

    /// 返回当前批次目录；当前批次已满时切换到新批次
    pub fn get_or_create_batch_folder(&mut self, output_dir: &Path) -> Result<PathBuf> {
        let processed_dir = output_dir.join(PROCESSED_DIR);
        fs::create_dir_all(&processed_dir)
            .with_context(|| format!("创建输出目录失败: {}", processed_dir.display()))?;
        let batch_dir = self.current_batch_dir(output_dir);
        let count = count_files_in_batch(&batch_dir);
        if count >= self.max_files_per_batch {
            info!(
                "当前批次 {} 已有 {} 个文件 (上限 {})，创建新批次",
                self.history.batch_info.current_batch, count, self.max_files_per_batch
            );
            return self.create_new_batch(output_dir);
        }
        fs::create_dir_all(&batch_dir)?;
        Ok(batch_dir)
    }

    pub fn create_new_batch(&mut self, output_dir: &Path) -> Result<PathBuf> {
        let next = self.history.batch_info.last_batch + 1;
        let name = batch_name(Local::now().format("%Y-%m-%d").to_string().as_str(), next);
        self.history.batch_info.last_batch = next;
        self.history.batch_info.current_batch = name.clone();
        let batch_dir = output_dir.join(PROCESSED_DIR).join(&name);
        fs::create_dir_all(&batch_dir)
            .with_context(|| format!("创建批次目录失败: {}", batch_dir.display()))?;
        self.save()?;
        info!("📁 新批次目录: {}", name);
        Ok(batch_dir)
    }

    /// 超出上限时删除最早的记录，返回是否有删除
    fn cleanup_history(&mut self) -> bool {
        let total = self.history.processed_files.len();
        if total <= self.max_history_items {
            return false;
        }
        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .history
            .processed_files
            .iter()
            .map(|(k, e)| (e.processed_at, k.clone()))
            .collect();
        by_age.sort();
        let excess = total - self.max_history_items;
        for (_, key) in by_age.into_iter().take(excess) {
            self.history.processed_files.remove(&key);
        }
        self.rebuild_lookup();
        info!("清理处理历史: 删除 {} 条旧记录", excess);
        true
    }

    pub fn stats(&self) -> HistoryStats {
        let mut stats = HistoryStats {
            total_files: self.history.processed_files.len(),
            current_batch: self.history.batch_info.current_batch.clone(),
            last_batch: self.history.batch_info.last_batch,
            ..HistoryStats::default()
        };
        for entry in self.history.processed_files.values() {
            stats.total_size += entry.size;
            if let Some(task) = &entry.task {
                *stats.by_task.entry(task.clone()).or_insert(0) += 1;
            }
            if let Some(seq) = &entry.sequence {
                *stats.by_sequence.entry(seq.clone()).or_insert(0) += 1;
            }
        }
        stats
    }

    pub fn export(&self, export_path: &Path) -> Result<()> {
        if let Some(parent) = export_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.history)?;
        fs::write(export_path, content)
            .with_context(|| format!("导出历史失败: {}", export_path.display()))?;
        info!("处理历史已导出到 {}", export_path.display());
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.history = HistoryFile::default();
        self.hash_lookup.clear();
        self.save()?;
        info!("处理历史已重置");
        Ok(())
    }
}

fn load_history(path: &Path) -> HistoryFile {
    if !path.exists() {
        return HistoryFile::default();
    }
    let parsed = fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| serde_json::from_str::<HistoryFile>(&raw).map_err(anyhow::Error::from));
    match parsed {
        Ok(history) => history,
        Err(e) => {
            error!("处理历史读取失败，将使用空历史: {} ({})", path.display(), e);
            HistoryFile::default()
        }
    }
}

pub fn batch_name(date: &str, number: u32) -> String {
    format!("batch_{}_{:02}", date, number)
}

/// 批次中的媒体文件数量，不计元数据文件
fn count_files_in_batch(batch_dir: &Path) -> usize {
    if !batch_dir.is_dir() {
        return 0;
    }
    WalkDir::new(batch_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_string_lossy().ends_with(".metadata.json"))
        .count()
}

pub(crate) fn path_key(path: &Path) -> String {
    path.canonicalize()
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .to_string()
}

fn mtime_millis(meta: &fs::Metadata) -> Option<i64> {
    meta.modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as i64)
}
