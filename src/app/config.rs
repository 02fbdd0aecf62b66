use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::app::dirs;
use crate::utils::text::{is_name_token, sanitize_token};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub file_processing: FileProcessingConfig,
    #[serde(default)]
    pub shotgrid: ShotgridConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GeneralConfig {
    /// 处理结果输出目录，未设置时写回源文件所在目录
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub exclude_processed: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FileProcessingConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    #[serde(default)]
    pub task_mapping: TaskMappingConfig,
    /// 按扩展名覆盖任务，例如 `".exr" = "comp"`
    #[serde(default)]
    pub extension_overrides: BTreeMap<String, String>,
    #[serde(default = "default_known_sequences")]
    pub known_sequences: Vec<String>,
    #[serde(default = "default_shot")]
    pub default_shot: Option<String>,
    #[serde(default = "default_max_files_per_batch")]
    pub max_files_per_batch: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskMappingConfig {
    #[serde(default = "default_image_task")]
    pub image: String,
    #[serde(default = "default_video_task")]
    pub video: String,
    #[serde(default = "default_fallback_task")]
    pub fallback: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ShotgridConfig {
    #[serde(default)]
    pub server_url: String,
    #[serde(default)]
    pub script_name: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_project")]
    pub default_project: String,
    #[serde(default)]
    pub user_email: Option<String>,
    #[serde(default = "default_status")]
    pub default_status: String,
    #[serde(default = "default_upload_fields")]
    pub upload_fields: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HistoryConfig {
    #[serde(default)]
    pub processed_file: Option<PathBuf>,
    #[serde(default)]
    pub uploaded_file: Option<PathBuf>,
    #[serde(default = "default_max_history_items")]
    pub max_history_items: usize,
}

impl AppConfig {
    /// 依次尝试：指定路径、当前目录 `config.toml`、应用目录 `config.toml`，都不存在则用默认值
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut cfg = match Self::resolve_path(config_path)? {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
                let cfg: AppConfig = toml::from_str(&raw)
                    .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
                info!("📄 已加载配置: {}", path.display());
                cfg
            }
            None => {
                debug!("未找到配置文件，使用默认配置");
                AppConfig::default()
            }
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_path(config_path: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = config_path {
            if !path.exists() {
                bail!("配置文件不存在: {}", path.display());
            }
            return Ok(Some(path.to_path_buf()));
        }
        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Ok(Some(local));
        }
        let global = dirs::default_config_path()?;
        Ok(global.exists().then_some(global))
    }

    /// 环境变量中的 ShotGrid 凭证优先于配置文件
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("SHOTGRID_URL") {
            self.shotgrid.server_url = v;
        }
        if let Some(v) = non_empty("SHOTGRID_SCRIPT_NAME") {
            self.shotgrid.script_name = v;
        }
        if let Some(v) = non_empty("SHOTGRID_API_KEY") {
            self.shotgrid.api_key = v;
        }
    }

    /// 任务名会出现在文件名里，必须是纯字母数字
    pub fn validate(&self) -> Result<()> {
        let mapping = &self.file_processing.task_mapping;
        let tasks = [&mapping.image, &mapping.video, &mapping.fallback]
            .into_iter()
            .chain(self.file_processing.extension_overrides.values());
        for task in tasks {
            if !is_name_token(task) {
                bail!("任务名只能包含字母和数字: '{}'", task);
            }
        }
        for sequence in &self.file_processing.known_sequences {
            if sanitize_token(sequence).is_empty() {
                bail!("已知序列至少需要包含一个字母或数字: '{}'", sequence);
            }
        }
        if self.file_processing.max_files_per_batch == 0 {
            bail!("max_files_per_batch 必须大于 0");
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("写入配置文件失败: {}", path.display()))?;
        Ok(())
    }

    pub fn processed_history_path(&self) -> Result<PathBuf> {
        match &self.history.processed_file {
            Some(p) => Ok(p.clone()),
            None => dirs::processed_history_path(),
        }
    }

    pub fn upload_history_path(&self) -> Result<PathBuf> {
        match &self.history.uploaded_file {
            Some(p) => Ok(p.clone()),
            None => dirs::upload_history_path(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            recursive: true,
            exclude_processed: true,
        }
    }
}

impl Default for FileProcessingConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
            task_mapping: TaskMappingConfig::default(),
            extension_overrides: BTreeMap::new(),
            known_sequences: default_known_sequences(),
            default_shot: default_shot(),
            max_files_per_batch: default_max_files_per_batch(),
        }
    }
}

impl Default for TaskMappingConfig {
    fn default() -> Self {
        Self {
            image: default_image_task(),
            video: default_video_task(),
            fallback: default_fallback_task(),
        }
    }
}

impl Default for ShotgridConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            script_name: String::new(),
            api_key: String::new(),
            default_project: default_project(),
            user_email: None,
            default_status: default_status(),
            upload_fields: default_upload_fields(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            processed_file: None,
            uploaded_file: None,
            max_history_items: default_max_history_items(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_image_extensions() -> Vec<String> {
    [".png", ".jpg", ".jpeg", ".tiff", ".tif", ".gif", ".bmp", ".webp", ".exr", ".dpx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_video_extensions() -> Vec<String> {
    [".mp4", ".mov", ".avi", ".mkv", ".wmv", ".mxf", ".m4v", ".webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_image_task() -> String {
    "txtToImage".to_string()
}

fn default_video_task() -> String {
    "imgToVideo".to_string()
}

fn default_fallback_task() -> String {
    "comp".to_string()
}

fn default_known_sequences() -> Vec<String> {
    vec!["LIG".to_string(), "KIAP".to_string()]
}

fn default_shot() -> Option<String> {
    Some("c001".to_string())
}

fn default_max_files_per_batch() -> usize {
    100
}

fn default_project() -> String {
    "AXRD-296".to_string()
}

fn default_status() -> String {
    "wip".to_string()
}

fn default_upload_fields() -> Vec<String> {
    vec!["sg_uploaded_movie".to_string()]
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_history_items() -> usize {
    5000
}
