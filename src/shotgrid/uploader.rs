use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::{Value, json};
use std::path::Path;
use tokio::time::{Duration, sleep};
use tracing::{error, info, warn};

use crate::app::config::ShotgridConfig;
use crate::core::error::PipelineError;
use crate::core::types::{CancelFlag, FileRecord, ProcessResult, ProcessStats, ProcessingState};
use crate::file_processor::naming::format_version;
use crate::history::uploads::UploadHistory;
use crate::shotgrid::api_client::ShotgridApi;
use crate::shotgrid::entity_manager::{EntityManager, ShotContext};
use crate::shotgrid::models::EntityType;

#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub project: String,
    pub status: String,
    pub user_email: Option<String>,
    pub upload_fields: Vec<String>,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl UploadSettings {
    pub fn from_config(cfg: &ShotgridConfig, project: Option<&str>) -> Self {
        Self {
            project: project
                .filter(|p| !p.trim().is_empty())
                .unwrap_or(&cfg.default_project)
                .to_string(),
            status: cfg.default_status.clone(),
            user_email: cfg.user_email.clone(),
            upload_fields: cfg.upload_fields.clone(),
            max_retries: cfg.max_retries.max(1),
            retry_delay_secs: cfg.retry_delay_secs,
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct UploadSummary {
    pub stats: ProcessStats,
    /// 状态不是 `renamed` 而未参与上传的记录
    pub skipped: usize,
    pub cancelled: bool,
}

/// 上传前需要的名称片段
struct UploadParts {
    sequence: String,
    shot: u32,
    task: String,
    version: u32,
    code: String,
}

fn check_uploadable(record: &FileRecord) -> Result<UploadParts, PipelineError> {
    if record.state != ProcessingState::Renamed {
        return Err(PipelineError::NotUploadable(format!(
            "{} 的状态为 {}",
            record.file_name, record.state
        )));
    }
    let missing = |field: &str| PipelineError::NotUploadable(format!("{} 缺少{}", record.file_name, field));
    let parts = UploadParts {
        sequence: record.sequence.clone().ok_or_else(|| missing("序列"))?,
        shot: record.shot.ok_or_else(|| missing("镜头"))?,
        task: record.task.clone().ok_or_else(|| missing("任务"))?,
        version: record.version.ok_or_else(|| missing("版本"))?,
        code: record
            .processed_filename
            .clone()
            .ok_or_else(|| missing("处理后文件名"))?,
    };
    if !record.upload_path().is_file() {
        return Err(PipelineError::NotUploadable(format!(
            "文件不存在: {}",
            record.upload_path().display()
        )));
    }
    Ok(parts)
}

pub struct Uploader<'a, A: ShotgridApi> {
    api: &'a A,
    entities: EntityManager<'a, A>,
    settings: UploadSettings,
}

impl<'a, A: ShotgridApi> Uploader<'a, A> {
    pub fn new(api: &'a A, settings: UploadSettings) -> Self {
        Self {
            api,
            entities: EntityManager::new(api),
            settings,
        }
    }

    pub fn project(&self) -> &str {
        &self.settings.project
    }

    /// 创建 Version 并上传文件，成功后记录进入 `uploaded` 状态
    pub async fn upload_file(&mut self, record: &mut FileRecord) -> Result<i64> {
        let parts = check_uploadable(record)?;
        let ctx = self
            .entities
            .ensure_entities(
                &self.settings.project,
                &parts.sequence,
                parts.shot,
                &parts.task,
                self.settings.user_email.as_deref(),
                &self.settings.status,
            )
            .await?;

        let data = version_payload(record, &parts, &ctx, &self.settings.status);
        let version = self.api.create(EntityType::Version, data).await?;
        info!("🎬 已创建 Version {} (id {})", parts.code, version.id);
        record.shotgrid_version_id = Some(version.id);

        let path = record.upload_path().to_path_buf();
        let field = self.upload_media(version.id, &path, &parts.code).await?;
        info!("✅ {} 已上传到字段 {}", parts.code, field);

        record.advance(ProcessingState::Uploaded)?;
        record.message = None;
        Ok(version.id)
    }

    /// 按配置顺序尝试上传字段，第一个成功即返回
    async fn upload_media(&self, version_id: i64, path: &Path, display_name: &str) -> Result<String> {
        let mut last_error = None;
        for field in &self.settings.upload_fields {
            match self.upload_with_retry(version_id, path, field, display_name).await {
                Ok(()) => return Ok(field.clone()),
                Err(e) => {
                    warn!("⚠️ 上传到字段 {} 失败: {}", field, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("未配置上传字段")))
    }

    async fn upload_with_retry(
        &self,
        version_id: i64,
        path: &Path,
        field: &str,
        display_name: &str,
    ) -> Result<()> {
        let max_retries = self.settings.max_retries;
        let mut last_error = None;

        for attempt in 1..=max_retries {
            info!("📤 尝试上传 {} (第 {}/{} 次)", display_name, attempt, max_retries);
            match self
                .api
                .upload(EntityType::Version, version_id, path, field, Some(display_name))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) => {
                    error!("❌ 第 {} 次上传出错: {}", attempt, e);
                    if attempt < max_retries {
                        // 递增延迟
                        let delay = attempt as u64 * self.settings.retry_delay_secs;
                        warn!("⏳ {} 秒后重试...", delay);
                        sleep(Duration::from_secs(delay)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        error!("❌ 上传最终失败，已重试 {} 次", max_retries);
        Err(last_error
            .map(|e| anyhow!("上传失败：已重试 {} 次，最后一次错误: {}", max_retries, e))
            .unwrap_or_else(|| anyhow!("上传失败：未知错误")))
    }

    /// 逐个上传，已上传过的内容直接跳过；每个文件之间检查取消标记
    pub async fn upload_batch(
        &mut self,
        records: &mut [FileRecord],
        history: &mut UploadHistory,
        cancel: &CancelFlag,
    ) -> UploadSummary {
        let mut summary = UploadSummary::default();
        let total = records.len();

        for (index, record) in records.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                warn!("🛑 上传已取消，剩余 {} 个文件未处理", total - index);
                summary.cancelled = true;
                break;
            }
            if record.state != ProcessingState::Renamed {
                summary.skipped += 1;
                continue;
            }
            info!("[{}/{}] {}", index + 1, total, record.upload_path().display());

            if let Some(version_id) = history.is_file_uploaded(record, &self.settings.project) {
                info!("⏭️ 内容已上传过 (Version {})，跳过", version_id);
                record.shotgrid_version_id = Some(version_id);
                record.message = Some("已上传过".to_string());
                if let Err(e) = record.advance(ProcessingState::Uploaded) {
                    warn!("{}", e);
                }
                summary.stats.add_result(&ProcessResult::AlreadyExists);
                continue;
            }

            match self.upload_file(record).await {
                Ok(version_id) => {
                    if let Err(e) = history.add_upload_entry(record, &self.settings.project, version_id) {
                        warn!("⚠️ 写入上传历史失败: {}", e);
                    }
                    summary.stats.add_result(&ProcessResult::Success);
                }
                Err(e) => {
                    error!("❌ {} 上传失败: {}", record.file_name, e);
                    if let Err(err) = record.fail(e.to_string()) {
                        warn!("{}", err);
                    }
                    summary.stats.add_result(&ProcessResult::Failed);
                }
            }
        }

        info!(
            "上传完成: 成功 {}，已存在 {}，失败 {}，跳过 {}",
            summary.stats.success, summary.stats.exists, summary.stats.failed, summary.skipped
        );
        summary
    }
}

fn version_payload(record: &FileRecord, parts: &UploadParts, ctx: &ShotContext, status: &str) -> Value {
    let mut data = json!({
        "project": ctx.project.to_value(),
        "code": parts.code,
        "description": format!("Uploaded by ShotPipe - {}", format_version(parts.version)),
        "sg_status_list": status,
        "entity": ctx.shot.to_value(),
        "sg_task": ctx.task.to_value(),
        "sg_path_to_movie": record.upload_path().to_string_lossy(),
    });
    if let Some(user) = &ctx.user {
        data["user"] = user.to_value();
    }
    data
}
