use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::ProcessingState;

/// 流水线中需要被调用方区分处理的错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 无法从路径或文件名推断出序列/镜头
    #[error("无法推断序列/镜头: {0}")]
    UnresolvedShot(PathBuf),

    /// 文件名不符合 `序列_c镜头_任务_v版本` 规则
    #[error("文件名不符合命名规则: {0}")]
    InvalidName(String),

    /// 名称中的某个片段含有非法字符或为空
    #[error("无效的{field}: '{value}'")]
    InvalidComponent { field: &'static str, value: String },

    /// 记录状态只能向前推进
    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition {
        from: ProcessingState,
        to: ProcessingState,
    },

    /// 该三元组的版本号已到上限
    #[error("版本号已达上限: {0}")]
    VersionOverflow(String),

    /// 记录还不能上传（未重命名或缺少字段）
    #[error("记录不可上传: {0}")]
    NotUploadable(String),
}
