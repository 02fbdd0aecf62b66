//! 内存中的 ShotGrid，用于测试

use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::shotgrid::api_client::ShotgridApi;
use crate::shotgrid::models::{Entity, EntityType, Filter};

#[derive(Debug, Clone)]
pub struct UploadCall {
    pub entity: EntityType,
    pub id: i64,
    pub field: String,
    pub path: PathBuf,
}

#[derive(Default)]
struct State {
    next_id: i64,
    entities: Vec<(EntityType, Entity)>,
    uploads: Vec<UploadCall>,
    failing_fields: Vec<String>,
    upload_failures: u32,
}

#[derive(Default)]
pub struct FakeShotgrid {
    state: Mutex<State>,
}

impl FakeShotgrid {
    pub fn insert(&self, entity: EntityType, attributes: Value) -> i64 {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let attributes = match attributes {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        state.entities.push((
            entity,
            Entity {
                entity_type: entity.as_str().to_string(),
                id,
                attributes,
            },
        ));
        id
    }

    pub fn get(&self, entity: EntityType, id: i64) -> Option<Entity> {
        let state = self.state.lock().unwrap();
        state
            .entities
            .iter()
            .find(|(t, e)| *t == entity && e.id == id)
            .map(|(_, e)| e.clone())
    }

    pub fn count(&self, entity: EntityType) -> usize {
        let state = self.state.lock().unwrap();
        state.entities.iter().filter(|(t, _)| *t == entity).count()
    }

    pub fn uploads(&self) -> Vec<UploadCall> {
        self.state.lock().unwrap().uploads.clone()
    }

    /// 接下来的 `n` 次上传失败
    pub fn fail_next_uploads(&self, n: u32) {
        self.state.lock().unwrap().upload_failures = n;
    }

    /// 上传到该字段总是失败
    pub fn fail_field(&self, field: &str) {
        self.state.lock().unwrap().failing_fields.push(field.to_string());
    }
}

impl ShotgridApi for FakeShotgrid {
    async fn find_one(
        &self,
        entity: EntityType,
        filters: &[Filter],
        _fields: &[&str],
    ) -> Result<Option<Entity>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .entities
            .iter()
            .filter(|(t, _)| *t == entity)
            .map(|(_, e)| e)
            .find(|e| {
                filters
                    .iter()
                    .all(|f| e.attributes.get(&f.field) == Some(&f.value))
            })
            .cloned())
    }

    async fn create(&self, entity: EntityType, data: Value) -> Result<Entity> {
        let id = self.insert(entity, data);
        self.get(entity, id).ok_or_else(|| anyhow!("创建失败"))
    }

    async fn update(&self, entity: EntityType, id: i64, data: Value) -> Result<Entity> {
        let mut state = self.state.lock().unwrap();
        let (_, target) = state
            .entities
            .iter_mut()
            .find(|(t, e)| *t == entity && e.id == id)
            .ok_or_else(|| anyhow!("实体不存在: {} {}", entity.as_str(), id))?;
        if let Value::Object(map) = data {
            target.attributes.extend(map);
        }
        Ok(target.clone())
    }

    async fn upload(
        &self,
        entity: EntityType,
        id: i64,
        path: &Path,
        field: &str,
        _display_name: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.failing_fields.iter().any(|f| f == field) {
            bail!("字段 {} 不接受上传", field);
        }
        if state.upload_failures > 0 {
            state.upload_failures -= 1;
            bail!("模拟的网络错误");
        }
        state.uploads.push(UploadCall {
            entity,
            id,
            field: field.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }
}
