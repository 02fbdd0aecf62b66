use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::types::FileType;

/// 写在处理后文件旁边的元数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    pub file_name: String,
    pub file_size: u64,
    pub file_type: FileType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub extracted_at: DateTime<Utc>,
}

pub fn extract_metadata(path: &Path, file_type: FileType) -> Result<FileMetadata> {
    let meta = fs::metadata(path).with_context(|| format!("读取文件信息失败: {}", path.display()))?;
    let (width, height) = match file_type {
        // 只读文件头，解析不了的格式（如 exr/dpx 的部分变体）直接忽略
        FileType::Image => match image::image_dimensions(path) {
            Ok((w, h)) => (Some(w), Some(h)),
            Err(e) => {
                debug!("无法读取图片尺寸 {}: {}", path.display(), e);
                (None, None)
            }
        },
        _ => (None, None),
    };
    Ok(FileMetadata {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        file_size: meta.len(),
        file_type,
        modified: meta.modified().ok().map(DateTime::<Utc>::from),
        created: meta.created().ok().map(DateTime::<Utc>::from),
        width,
        height,
        extracted_at: Utc::now(),
    })
}

/// `LIG_c001_comp_v0001.png` -> `LIG_c001_comp_v0001.metadata.json`
pub fn sidecar_path(processed_path: &Path) -> PathBuf {
    processed_path.with_extension("metadata.json")
}

pub fn save_metadata(metadata: &FileMetadata, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(metadata)?;
    fs::write(output_path, content)
        .with_context(|| format!("写入元数据失败: {}", output_path.display()))?;
    Ok(())
}
