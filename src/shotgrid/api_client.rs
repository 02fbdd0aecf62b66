//! ShotGrid REST API v1 客户端
//!
//! 使用脚本凭证（client_credentials）换取访问令牌，令牌过期前自动刷新。

use anyhow::{Context, Result, anyhow, bail};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::app::config::ShotgridConfig;
use crate::shotgrid::models::{
    AccessTokenResponse, Entity, EntityType, Filter, SearchResponse, SingleResponse,
    UploadInfoResponse,
};

const API_PREFIX: &str = "/api/v1";
const ARRAY_FILTER_CONTENT_TYPE: &str = "application/vnd+shotgun.api3_array+json";
/// 提前刷新令牌的余量
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// 上传流程依赖的 ShotGrid 操作
#[allow(async_fn_in_trait)]
pub trait ShotgridApi {
    async fn find_one(
        &self,
        entity: EntityType,
        filters: &[Filter],
        fields: &[&str],
    ) -> Result<Option<Entity>>;

    async fn create(&self, entity: EntityType, data: Value) -> Result<Entity>;

    async fn update(&self, entity: EntityType, id: i64, data: Value) -> Result<Entity>;

    /// 上传本地文件到实体的某个字段
    async fn upload(
        &self,
        entity: EntityType,
        id: i64,
        path: &Path,
        field: &str,
        display_name: Option<&str>,
    ) -> Result<()>;
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct ShotgridClient {
    http: reqwest::Client,
    base_url: String,
    script_name: String,
    api_key: String,
    token: Mutex<Option<CachedToken>>,
}

impl ShotgridClient {
    pub fn new(cfg: &ShotgridConfig) -> Result<Self> {
        if cfg.server_url.trim().is_empty()
            || cfg.script_name.trim().is_empty()
            || cfg.api_key.trim().is_empty()
        {
            bail!("ShotGrid 连接信息不完整，请配置 server_url/script_name/api_key 或对应环境变量");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("创建 HTTP 客户端失败")?;
        Ok(Self {
            http,
            base_url: cfg.server_url.trim().trim_end_matches('/').to_string(),
            script_name: cfg.script_name.clone(),
            api_key: cfg.api_key.clone(),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
            debug!("访问令牌即将过期，重新获取");
        }

        let url = format!("{}{}/auth/access_token", self.base_url, API_PREFIX);
        let body = form_body(&[
            ("grant_type", "client_credentials"),
            ("client_id", &self.script_name),
            ("client_secret", &self.api_key),
        ]);
        let resp = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await
            .with_context(|| format!("连接 ShotGrid 失败: {}", self.base_url))?;
        let token: AccessTokenResponse = read_json(resp, "获取访问令牌").await?;
        info!("🔑 已获取 ShotGrid 访问令牌");

        let value = token.access_token.clone();
        *guard = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(value)
    }

    fn absolute(&self, link: &str) -> String {
        resolve_link(&self.base_url, link)
    }
}

impl ShotgridApi for ShotgridClient {
    async fn find_one(
        &self,
        entity: EntityType,
        filters: &[Filter],
        fields: &[&str],
    ) -> Result<Option<Entity>> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/_search?fields={}&page[size]=1",
            entity_url(&self.base_url, entity),
            urlencoding::encode(&fields.join(","))
        );
        debug!("查询 {}: {:?}", entity.as_str(), filters);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .header(CONTENT_TYPE, ARRAY_FILTER_CONTENT_TYPE)
            .header(ACCEPT, "application/json")
            .body(search_body(filters).to_string())
            .send()
            .await?;
        let found: SearchResponse = read_json(resp, &format!("查询 {}", entity.as_str())).await?;
        Ok(found.data.into_iter().next())
    }

    async fn create(&self, entity: EntityType, data: Value) -> Result<Entity> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .post(entity_url(&self.base_url, entity))
            .bearer_auth(token)
            .json(&data)
            .send()
            .await?;
        let created: SingleResponse = read_json(resp, &format!("创建 {}", entity.as_str())).await?;
        info!("🆕 已创建 {} (id {})", entity.as_str(), created.data.id);
        Ok(created.data)
    }

    async fn update(&self, entity: EntityType, id: i64, data: Value) -> Result<Entity> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .put(format!("{}/{}", entity_url(&self.base_url, entity), id))
            .bearer_auth(token)
            .json(&data)
            .send()
            .await?;
        let updated: SingleResponse = read_json(resp, &format!("更新 {}", entity.as_str())).await?;
        Ok(updated.data)
    }

    async fn upload(
        &self,
        entity: EntityType,
        id: i64,
        path: &Path,
        field: &str,
        display_name: Option<&str>,
    ) -> Result<()> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| anyhow!("无效的上传路径: {}", path.display()))?;
        let token = self.access_token().await?;

        // 1. 申请上传地址
        let url = format!(
            "{}/{}/{}/_upload?filename={}",
            entity_url(&self.base_url, entity),
            id,
            field,
            urlencoding::encode(&file_name)
        );
        let resp = self.http.get(&url).bearer_auth(&token).send().await?;
        let info: UploadInfoResponse = read_json(resp, "申请上传地址").await?;

        // 2. 上传文件内容；指向 ShotGrid 自身时需要带令牌
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("读取上传文件失败: {}", path.display()))?;
        let upload_url = self.absolute(&info.links.upload);
        let mut request = self
            .http
            .put(&upload_url)
            .header(CONTENT_TYPE, "application/octet-stream");
        if upload_url.starts_with(&self.base_url) {
            request = request.bearer_auth(&token);
        }
        let resp = request.body(bytes).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            error!("❌ 文件内容上传失败: {} {}", status, text);
            bail!("文件内容上传失败 ({}): {}", status, text);
        }

        // 3. 通知 ShotGrid 上传完成
        let complete = json!({
            "upload_info": info.data,
            "upload_data": { "display_name": display_name.unwrap_or(&file_name) },
        });
        let resp = self
            .http
            .post(self.absolute(&info.links.complete_upload))
            .bearer_auth(&token)
            .json(&complete)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("完成上传失败 ({}): {}", status, text);
        }
        info!("📤 已上传 {} 到 {} {} 的 {}", file_name, entity.as_str(), id, field);
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, action: &str) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        error!("❌ {}失败: {} {}", action, status, text);
        bail!("{}失败 ({}): {}", action, status, text);
    }
    serde_json::from_str(&text).with_context(|| format!("{}: 无法解析响应 {}", action, text))
}

pub fn entity_url(base_url: &str, entity: EntityType) -> String {
    format!("{}{}/entity/{}", base_url, API_PREFIX, entity.collection())
}

pub fn search_body(filters: &[Filter]) -> Value {
    json!({ "filters": filters.iter().map(Filter::to_value).collect::<Vec<_>>() })
}

pub fn form_body(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// 服务端返回的链接可能是相对路径
pub fn resolve_link(base_url: &str, link: &str) -> String {
    if link.starts_with("http://") || link.starts_with("https://") {
        link.to_string()
    } else if link.starts_with('/') {
        format!("{}{}", base_url, link)
    } else {
        format!("{}/{}", base_url, link)
    }
}
