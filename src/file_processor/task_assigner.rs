use phf::phf_map;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::app::config::FileProcessingConfig;
use crate::core::types::{FileRecord, FileType};

/// 内置的扩展名 -> 文件类型表（不带点，小写）
static EXTENSION_TYPES: phf::Map<&'static str, FileType> = phf_map! {
    "jpg" => FileType::Image,
    "jpeg" => FileType::Image,
    "png" => FileType::Image,
    "tif" => FileType::Image,
    "tiff" => FileType::Image,
    "gif" => FileType::Image,
    "bmp" => FileType::Image,
    "webp" => FileType::Image,
    "exr" => FileType::Image,
    "dpx" => FileType::Image,
    "mp4" => FileType::Video,
    "mov" => FileType::Video,
    "avi" => FileType::Video,
    "mkv" => FileType::Video,
    "wmv" => FileType::Video,
    "mxf" => FileType::Video,
    "m4v" => FileType::Video,
    "webm" => FileType::Video,
};

/// 统一扩展名格式：小写、去掉前导点
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// 只查内置表
pub fn classify_extension(ext: &str) -> FileType {
    EXTENSION_TYPES
        .get(normalize_extension(ext).as_str())
        .copied()
        .unwrap_or(FileType::Unknown)
}

/// 根据扩展名为文件分配任务
///
/// 查找顺序：按扩展名覆盖 > 按文件类型映射 > 兜底任务。结果只取决于扩展名。
#[derive(Debug, Clone)]
pub struct TaskAssigner {
    image_task: String,
    video_task: String,
    fallback_task: String,
    overrides: HashMap<String, String>,
    configured: HashMap<String, FileType>,
}

impl Default for TaskAssigner {
    fn default() -> Self {
        Self::new(&FileProcessingConfig::default())
    }
}

impl TaskAssigner {
    pub fn new(cfg: &FileProcessingConfig) -> Self {
        let mut configured = HashMap::new();
        for ext in &cfg.image_extensions {
            configured.insert(normalize_extension(ext), FileType::Image);
        }
        for ext in &cfg.video_extensions {
            configured.insert(normalize_extension(ext), FileType::Video);
        }
        let overrides = cfg
            .extension_overrides
            .iter()
            .map(|(ext, task)| (normalize_extension(ext), task.clone()))
            .collect();
        Self {
            image_task: cfg.task_mapping.image.clone(),
            video_task: cfg.task_mapping.video.clone(),
            fallback_task: cfg.task_mapping.fallback.clone(),
            overrides,
            configured,
        }
    }

    /// 配置中的扩展名列表优先，其次内置表
    pub fn file_type(&self, ext: &str) -> FileType {
        let ext = normalize_extension(ext);
        self.configured
            .get(&ext)
            .copied()
            .unwrap_or_else(|| classify_extension(&ext))
    }

    /// 扫描时只接受配置中列出的扩展名，以及单独指定了任务的扩展名
    pub fn is_supported(&self, ext: &str) -> bool {
        let ext = normalize_extension(ext);
        self.configured.contains_key(&ext) || self.overrides.contains_key(&ext)
    }

    pub fn task_for_extension(&self, ext: &str) -> &str {
        let key = normalize_extension(ext);
        if let Some(task) = self.overrides.get(&key) {
            return task;
        }
        match self.file_type(&key) {
            FileType::Image => &self.image_task,
            FileType::Video => &self.video_task,
            FileType::Unknown => &self.fallback_task,
        }
    }

    pub fn task_for_path(&self, path: &Path) -> &str {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        self.task_for_extension(&ext)
    }

    pub fn assign(&self, record: &mut FileRecord) {
        let task = self.task_for_extension(&record.extension).to_string();
        record.file_type = self.file_type(&record.extension);
        debug!("为 {} 分配任务 {}", record.file_name, task);
        record.task = Some(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let assigner = TaskAssigner::default();
        assert_eq!(assigner.task_for_extension(".png"), "txtToImage");
        assert_eq!(assigner.task_for_extension("EXR"), "txtToImage");
        assert_eq!(assigner.task_for_extension(".MOV"), "imgToVideo");
        assert_eq!(assigner.task_for_extension(".psd"), "comp");
        assert_eq!(assigner.task_for_extension(""), "comp");
    }

    #[test]
    fn test_assignment_is_deterministic() {
        let assigner = TaskAssigner::default();
        for ext in [".jpg", ".mp4", ".abc", ".webm", ".dpx"] {
            let first = assigner.task_for_extension(ext).to_string();
            for _ in 0..3 {
                assert_eq!(assigner.task_for_extension(ext), first);
            }
            assert_eq!(
                assigner.task_for_path(Path::new(&format!("/a/b/x{}", ext))),
                first
            );
        }
    }

    #[test]
    fn test_overrides_win_over_type_mapping() {
        let mut cfg = FileProcessingConfig::default();
        cfg.task_mapping.video = "edit".to_string();
        cfg.extension_overrides
            .insert(".EXR".to_string(), "comp".to_string());
        let assigner = TaskAssigner::new(&cfg);
        assert_eq!(assigner.task_for_extension(".exr"), "comp");
        assert_eq!(assigner.task_for_extension(".png"), "txtToImage");
        assert_eq!(assigner.task_for_extension(".mkv"), "edit");
    }

    #[test]
    fn test_supported_follows_config_lists() {
        let mut cfg = FileProcessingConfig::default();
        cfg.image_extensions = vec![".png".to_string()];
        cfg.video_extensions = vec![];
        let assigner = TaskAssigner::new(&cfg);
        assert!(assigner.is_supported("PNG"));
        assert!(!assigner.is_supported(".mov"));
        // 内置表仍然决定类型
        assert_eq!(assigner.file_type(".mov"), FileType::Video);
    }

    #[test]
    fn test_override_makes_extension_supported() {
        let mut cfg = FileProcessingConfig::default();
        assert!(!TaskAssigner::new(&cfg).is_supported(".psd"));
        cfg.extension_overrides
            .insert("PSD".to_string(), "comp".to_string());
        let assigner = TaskAssigner::new(&cfg);
        assert!(assigner.is_supported(".psd"));
        assert_eq!(assigner.task_for_extension(".psd"), "comp");
    }

    #[test]
    fn test_assign_updates_record() {
        let assigner = TaskAssigner::default();
        let mut record =
            FileRecord::scanned(Path::new("/in/clip.mp4"), FileType::Unknown, 1);
        assigner.assign(&mut record);
        assert_eq!(record.task.as_deref(), Some("imgToVideo"));
        assert_eq!(record.file_type, FileType::Video);
    }
}
