//! 上传历史：避免同一个文件重复上传到 ShotGrid

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

use crate::app::AppConfig;
use crate::core::types::FileRecord;
use crate::history::hash::file_sha256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadEntry {
    pub processed_filename: String,
    pub original_path: PathBuf,
    pub size: u64,
    pub hash: String,
    pub upload_time: DateTime<Utc>,
    pub shotgrid_version_id: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UploadHistoryFile {
    #[serde(default)]
    uploads: BTreeMap<String, UploadEntry>,
}

pub struct UploadHistory {
    path: PathBuf,
    history: UploadHistoryFile,
}

/// `项目_序列_镜头_任务_版本`
pub fn upload_key(record: &FileRecord, project: &str) -> Option<String> {
    Some(format!(
        "{}_{}_c{:03}_{}_v{:04}",
        project,
        record.sequence.as_deref()?,
        record.shot?,
        record.task.as_deref()?,
        record.version?
    ))
}

impl UploadHistory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("创建历史目录失败: {}", parent.display()))?;
        }
        let history = if path.exists() {
            match fs::read_to_string(path)
                .map_err(anyhow::Error::from)
                .and_then(|raw| serde_json::from_str(&raw).map_err(anyhow::Error::from))
            {
                Ok(h) => h,
                Err(e) => {
                    error!("上传历史读取失败，将使用空历史: {} ({})", path.display(), e);
                    UploadHistoryFile::default()
                }
            }
        } else {
            UploadHistoryFile::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            history,
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        Self::open(&cfg.upload_history_path()?)
    }

    pub fn len(&self) -> usize {
        self.history.uploads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.uploads.is_empty()
    }

    fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.history)?;
        fs::write(&self.path, content)
            .with_context(|| format!("保存上传历史失败: {}", self.path.display()))?;
        Ok(())
    }

    /// 已上传时返回之前的 Version ID
    ///
    /// 同一键且内容相同视为已上传；内容相同但键不同（例如换了版本号）也视为已上传。
    pub fn is_file_uploaded(&self, record: &FileRecord, project: &str) -> Option<i64> {
        let hash = match file_sha256(record.upload_path()) {
            Ok(h) => h,
            Err(e) => {
                debug!("无法计算哈希，跳过上传历史检查: {}", e);
                return None;
            }
        };
        if let Some(entry) = upload_key(record, project).and_then(|k| self.history.uploads.get(&k)) {
            if entry.hash == hash {
                return Some(entry.shotgrid_version_id);
            }
        }
        self.history
            .uploads
            .values()
            .find(|e| e.hash == hash)
            .map(|e| e.shotgrid_version_id)
    }

    pub fn add_upload_entry(&mut self, record: &FileRecord, project: &str, version_id: i64) -> Result<()> {
        let Some(key) = upload_key(record, project) else {
            anyhow::bail!("记录缺少序列/镜头/任务/版本，无法写入上传历史: {}", record.file_name);
        };
        let path = record.upload_path();
        let entry = UploadEntry {
            processed_filename: record
                .processed_filename
                .clone()
                .unwrap_or_else(|| record.file_name.clone()),
            original_path: record.file_path.clone(),
            size: fs::metadata(path).map(|m| m.len()).unwrap_or(record.file_size),
            hash: file_sha256(path)?,
            upload_time: Utc::now(),
            shotgrid_version_id: version_id,
        };
        self.history.uploads.insert(key.clone(), entry);
        self.save()?;
        info!("已记录上传: {} (Version {})", key, version_id);
        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        self.history = UploadHistoryFile::default();
        self.save()
    }
}
