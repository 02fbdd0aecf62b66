//! 处理清单：处理步骤的输出，上传步骤的输入

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

use crate::core::types::{FileRecord, ProcessStats, ProcessingState};
use crate::file_processor::scanner::SkippedFile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub records: Vec<FileRecord>,
    #[serde(default)]
    pub skipped: Vec<SkippedFile>,
    #[serde(default)]
    pub stats: ProcessStats,
    #[serde(default)]
    pub cancelled: bool,
}

impl Manifest {
    pub fn new(source_dir: &Path, output_dir: &Path) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            created_at: Utc::now(),
            source_dir: source_dir.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            records: Vec::new(),
            skipped: Vec::new(),
            stats: ProcessStats::default(),
            cancelled: false,
        }
    }

    /// `manifest_<YYYYmmdd_HHMMSS>_<运行 ID 前 8 位>.json`，同一秒内的多次运行互不覆盖
    pub fn file_name(&self) -> String {
        let run_id = self.run_id.simple().to_string();
        format!(
            "manifest_{}_{}.json",
            self.created_at.with_timezone(&Local).format("%Y%m%d_%H%M%S"),
            &run_id[..8]
        )
    }

    pub fn count_in(&self, state: ProcessingState) -> usize {
        self.records.iter().filter(|r| r.state == state).count()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("写入清单失败: {}", path.display()))?;
        info!("📝 清单已保存: {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("读取清单失败: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("解析清单失败: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::FileType;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::new(Path::new("/in"), dir.path());
        let mut ok = FileRecord::scanned(Path::new("/in/a.png"), FileType::Image, 3);
        ok.advance(ProcessingState::Renamed).unwrap();
        let mut bad = FileRecord::scanned(Path::new("/in/b.png"), FileType::Image, 3);
        bad.fail("无法推断序列/镜头").unwrap();
        manifest.records = vec![ok, bad];

        let path = dir.path().join(manifest.file_name());
        manifest.save(&path).unwrap();
        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded.run_id, manifest.run_id);
        assert_eq!(loaded.count_in(ProcessingState::Renamed), 1);
        assert_eq!(loaded.count_in(ProcessingState::Failed), 1);
        assert_eq!(loaded.records[1].message.as_deref(), Some("无法推断序列/镜头"));
    }

    #[test]
    fn test_file_name_format() {
        let manifest = Manifest::new(Path::new("/in"), Path::new("/out"));
        let name = manifest.file_name();
        assert!(name.starts_with("manifest_") && name.ends_with(".json"));
        assert_eq!(name.len(), "manifest_20261019_120000_1a2b3c4d.json".len());
        assert!(name.contains(&manifest.run_id.simple().to_string()[..8]));

        let other = Manifest::new(Path::new("/in"), Path::new("/out"));
        assert_ne!(other.file_name(), name);
    }

    #[test]
    fn test_load_missing_is_error() {
        assert!(Manifest::load(Path::new("/no/such/manifest.json")).is_err());
    }
}
