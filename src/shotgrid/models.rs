use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// 用到的 ShotGrid 实体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Project,
    Sequence,
    Shot,
    Task,
    Version,
    HumanUser,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Project => "Project",
            EntityType::Sequence => "Sequence",
            EntityType::Shot => "Shot",
            EntityType::Task => "Task",
            EntityType::Version => "Version",
            EntityType::HumanUser => "HumanUser",
        }
    }

    /// REST 路径中的集合名
    pub fn collection(self) -> &'static str {
        match self {
            EntityType::Project => "projects",
            EntityType::Sequence => "sequences",
            EntityType::Shot => "shots",
            EntityType::Task => "tasks",
            EntityType::Version => "versions",
            EntityType::HumanUser => "human_users",
        }
    }
}

/// 实体链接，即 `{"type": "Shot", "id": 12}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: i64,
}

impl EntityRef {
    pub fn to_value(&self) -> Value {
        json!({ "type": self.entity_type, "id": self.id })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: i64,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl Entity {
    pub fn to_ref(&self) -> EntityRef {
        EntityRef {
            entity_type: self.entity_type.clone(),
            id: self.id,
        }
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).and_then(Value::as_str)
    }
}

/// 查询条件 `[field, relation, value]`
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub relation: String,
    pub value: Value,
}

impl Filter {
    pub fn is(field: &str, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            relation: "is".to_string(),
            value: value.into(),
        }
    }

    pub fn to_value(&self) -> Value {
        json!([self.field, self.relation, self.value])
    }
}

#[derive(Debug, Deserialize)]
pub struct AccessTokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    600
}

#[derive(Debug, Deserialize)]
pub struct SingleResponse {
    pub data: Entity,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub data: Vec<Entity>,
}

/// `_upload` 返回的上传信息和后续两个链接
#[derive(Debug, Deserialize)]
pub struct UploadInfoResponse {
    pub data: Value,
    pub links: UploadLinks,
}

#[derive(Debug, Deserialize)]
pub struct UploadLinks {
    pub upload: String,
    pub complete_upload: String,
}
