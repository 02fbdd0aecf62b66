use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::error::PipelineError;

/// 文件大类，由扩展名决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Image,
    Video,
    Unknown,
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileType::Image => "image",
            FileType::Video => "video",
            FileType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// 单个文件在一次批处理中的状态
///
/// 只能沿 `Scanned -> Renamed -> Uploaded` 前进，`Failed` 可从任何未上传的状态进入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Scanned,
    Renamed,
    Uploaded,
    Failed,
}

impl ProcessingState {
    fn rank(self) -> u8 {
        match self {
            ProcessingState::Scanned => 0,
            ProcessingState::Renamed => 1,
            ProcessingState::Uploaded => 2,
            ProcessingState::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingState::Uploaded | ProcessingState::Failed)
    }

    pub fn can_advance_to(self, next: ProcessingState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingState::Scanned => "scanned",
            ProcessingState::Renamed => "renamed",
            ProcessingState::Uploaded => "uploaded",
            ProcessingState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 一次批处理中跟踪的文件记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub file_path: PathBuf,
    pub file_name: String,
    pub extension: String,
    pub file_type: FileType,
    pub file_size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shot: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shotgrid_version_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub state: ProcessingState,
}

impl FileRecord {
    /// 由扫描到的文件创建记录，初始状态为 `Scanned`
    pub fn scanned(path: &Path, file_type: FileType, file_size: u64) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        Self {
            file_path: path.to_path_buf(),
            file_name,
            extension,
            file_type,
            file_size,
            task: None,
            sequence: None,
            shot: None,
            version: None,
            processed_path: None,
            processed_filename: None,
            metadata_path: None,
            shotgrid_version_id: None,
            message: None,
            state: ProcessingState::Scanned,
        }
    }

    pub fn advance(&mut self, next: ProcessingState) -> Result<(), PipelineError> {
        if !self.state.can_advance_to(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// 标记失败并记录原因；已上传的记录不会被改写
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), PipelineError> {
        self.advance(ProcessingState::Failed)?;
        self.message = Some(message.into());
        Ok(())
    }

    /// 上传时使用的路径：优先处理后的文件
    pub fn upload_path(&self) -> &Path {
        self.processed_path.as_deref().unwrap_or(&self.file_path)
    }
}

/// 单个文件的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    Success,
    AlreadyExists,
    Failed,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessStats {
    pub success: usize,
    pub exists: usize,
    pub failed: usize,
}

impl ProcessStats {
    pub fn add_result(&mut self, result: &ProcessResult) {
        match result {
            ProcessResult::Success => self.success += 1,
            ProcessResult::AlreadyExists => self.exists += 1,
            ProcessResult::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.success + self.exists + self.failed
    }
}

/// 取消标记，由 Ctrl-C 处理器设置，流水线在两个文件之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
