use anyhow::Result;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::file_processor::naming::format_shot;
use crate::shotgrid::api_client::ShotgridApi;
use crate::shotgrid::models::{EntityRef, EntityType, Filter};

/// 上传一个版本所需的全部实体
#[derive(Debug, Clone, PartialEq)]
pub struct ShotContext {
    pub project: EntityRef,
    pub sequence: EntityRef,
    pub shot: EntityRef,
    pub task: EntityRef,
    pub user: Option<EntityRef>,
}

/// 查找或创建 Project / Sequence / Shot / Task，结果在一次运行内缓存
pub struct EntityManager<'a, A: ShotgridApi> {
    api: &'a A,
    cache: HashMap<String, EntityRef>,
    users: HashMap<String, Option<EntityRef>>,
}

impl<'a, A: ShotgridApi> EntityManager<'a, A> {
    pub fn new(api: &'a A) -> Self {
        Self {
            api,
            cache: HashMap::new(),
            users: HashMap::new(),
        }
    }

    pub async fn ensure_entities(
        &mut self,
        project: &str,
        sequence: &str,
        shot: u32,
        task: &str,
        user_email: Option<&str>,
        status: &str,
    ) -> Result<ShotContext> {
        let project = self.ensure_project(project).await?;
        let sequence = self.ensure_sequence(&project, sequence).await?;
        let shot = self.ensure_shot(&project, &sequence, shot).await?;
        let user = match user_email {
            Some(email) if !email.trim().is_empty() => self.find_user(email).await?,
            _ => None,
        };
        let task = self
            .ensure_task(&project, &shot, task, status, user.as_ref())
            .await?;
        Ok(ShotContext {
            project,
            sequence,
            shot,
            task,
            user,
        })
    }

    pub async fn ensure_project(&mut self, name: &str) -> Result<EntityRef> {
        let (project, _) = self
            .find_or_create(
                EntityType::Project,
                format!("project:{}", name),
                vec![Filter::is("name", name)],
                json!({ "name": name }),
            )
            .await?;
        Ok(project)
    }

    pub async fn ensure_sequence(&mut self, project: &EntityRef, code: &str) -> Result<EntityRef> {
        let (sequence, _) = self
            .find_or_create(
                EntityType::Sequence,
                format!("sequence:{}:{}", project.id, code),
                vec![
                    Filter::is("project", project.to_value()),
                    Filter::is("code", code),
                ],
                json!({ "project": project.to_value(), "code": code }),
            )
            .await?;
        Ok(sequence)
    }

    pub async fn ensure_shot(
        &mut self,
        project: &EntityRef,
        sequence: &EntityRef,
        shot: u32,
    ) -> Result<EntityRef> {
        let code = format_shot(shot);
        let (shot, _) = self
            .find_or_create(
                EntityType::Shot,
                format!("shot:{}:{}", sequence.id, code),
                vec![
                    Filter::is("project", project.to_value()),
                    Filter::is("sg_sequence", sequence.to_value()),
                    Filter::is("code", code.as_str()),
                ],
                json!({
                    "project": project.to_value(),
                    "sg_sequence": sequence.to_value(),
                    "code": code,
                }),
            )
            .await?;
        Ok(shot)
    }

    /// 新建的任务会分配给指定用户；已有任务保持原样
    pub async fn ensure_task(
        &mut self,
        project: &EntityRef,
        shot: &EntityRef,
        content: &str,
        status: &str,
        assignee: Option<&EntityRef>,
    ) -> Result<EntityRef> {
        let (task, created) = self
            .find_or_create(
                EntityType::Task,
                format!("task:{}:{}", shot.id, content),
                vec![
                    Filter::is("project", project.to_value()),
                    Filter::is("entity", shot.to_value()),
                    Filter::is("content", content),
                ],
                json!({
                    "project": project.to_value(),
                    "entity": shot.to_value(),
                    "content": content,
                    "sg_status_list": status,
                }),
            )
            .await?;
        if created {
            if let Some(user) = assignee {
                self.api
                    .update(
                        EntityType::Task,
                        task.id,
                        json!({ "task_assignees": [user.to_value()] }),
                    )
                    .await?;
                debug!("任务 {} 已分配给用户 {}", task.id, user.id);
            }
        }
        Ok(task)
    }

    /// 按邮箱查找用户，找不到时返回 `None`
    pub async fn find_user(&mut self, email: &str) -> Result<Option<EntityRef>> {
        if let Some(user) = self.users.get(email) {
            return Ok(user.clone());
        }
        let user = self
            .api
            .find_one(
                EntityType::HumanUser,
                &[Filter::is("email", email)],
                &["id", "name", "email"],
            )
            .await?
            .map(|e| e.to_ref());
        if user.is_none() {
            warn!("⚠️ 未找到用户: {}", email);
        }
        self.users.insert(email.to_string(), user.clone());
        Ok(user)
    }

    async fn find_or_create(
        &mut self,
        entity: EntityType,
        cache_key: String,
        filters: Vec<Filter>,
        data: Value,
    ) -> Result<(EntityRef, bool)> {
        if let Some(found) = self.cache.get(&cache_key) {
            return Ok((found.clone(), false));
        }
        let (found, created) = match self
            .api
            .find_one(entity, &filters, &["id", "code", "name", "content"])
            .await?
        {
            Some(existing) => {
                debug!(
                    "找到 {} {} (id {})",
                    entity.as_str(),
                    ["code", "name", "content"]
                        .iter()
                        .find_map(|f| existing.attr_str(f))
                        .unwrap_or("-"),
                    existing.id
                );
                (existing.to_ref(), false)
            }
            None => {
                let created = self.api.create(entity, data).await?;
                info!("已创建 {}: id {}", entity.as_str(), created.id);
                (created.to_ref(), true)
            }
        };
        self.cache.insert(cache_key, found.clone());
        Ok((found, created))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shotgrid::fake::FakeShotgrid;

    #[tokio::test]
    async fn test_creates_missing_hierarchy_once() {
        let api = FakeShotgrid::default();
        api.insert(EntityType::HumanUser, json!({"email": "artist@studio.com"}));
        let mut manager = EntityManager::new(&api);

        let ctx = manager
            .ensure_entities("DEMO", "LIG", 1, "txtToImage", Some("artist@studio.com"), "wip")
            .await
            .unwrap();
        assert_eq!(ctx.project.entity_type, "Project");
        assert_eq!(ctx.shot.entity_type, "Shot");
        assert!(ctx.user.is_some());

        let task = api.get(EntityType::Task, ctx.task.id).unwrap();
        assert_eq!(task.attr_str("content"), Some("txtToImage"));
        assert_eq!(task.attr_str("sg_status_list"), Some("wip"));
        assert_eq!(
            task.attributes["task_assignees"][0]["id"],
            json!(ctx.user.as_ref().unwrap().id)
        );
        let shot = api.get(EntityType::Shot, ctx.shot.id).unwrap();
        assert_eq!(shot.attr_str("code"), Some("c001"));

        let again = manager
            .ensure_entities("DEMO", "LIG", 1, "txtToImage", Some("artist@studio.com"), "wip")
            .await
            .unwrap();
        assert_eq!(again, ctx);
        assert_eq!(api.count(EntityType::Shot), 1);
        assert_eq!(api.count(EntityType::Task), 1);
    }

    #[tokio::test]
    async fn test_reuses_existing_entities() {
        let api = FakeShotgrid::default();
        let project = api.insert(EntityType::Project, json!({"name": "DEMO"}));
        let mut manager = EntityManager::new(&api);

        let ctx = manager
            .ensure_entities("DEMO", "KIAP", 3, "comp", None, "wip")
            .await
            .unwrap();
        assert_eq!(ctx.project.id, project);
        assert_eq!(api.count(EntityType::Project), 1);
        assert!(ctx.user.is_none());

        // 另一个管理器（新的运行）也能通过查询找到已创建的实体
        let mut fresh = EntityManager::new(&api);
        let other = fresh
            .ensure_entities("DEMO", "KIAP", 3, "comp", None, "wip")
            .await
            .unwrap();
        assert_eq!(other.task, ctx.task);
        assert_eq!(api.count(EntityType::Sequence), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_an_error() {
        let api = FakeShotgrid::default();
        let mut manager = EntityManager::new(&api);
        assert!(manager.find_user("nobody@studio.com").await.unwrap().is_none());
    }
}
