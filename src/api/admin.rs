// src/api/admin.rs

use serde::Deserialize;
use serde_json::Value;

use super::sources::SourceSummary;
use super::ApiClient;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl ApiClient {
    pub async fn list_users(&self) -> Result<Vec<UserSummary>> {
        self.get("/api/admin/users").await
    }

    pub async fn create_user(&self, user: &Value) -> Result<Value> {
        self.post("/api/admin/users", user).await
    }

    pub async fn update_user(&self, user_id: i64, user: &Value) -> Result<Value> {
        self.put(&format!("/api/admin/users/{}", user_id), user).await
    }

    pub async fn delete_user(&self, user_id: i64) -> Result<()> {
        self.delete(&format!("/api/admin/users/{}", user_id)).await
    }

    pub async fn list_all_sources(&self) -> Result<Vec<SourceSummary>> {
        self.get("/api/admin/sources").await
    }

    pub async fn create_system_source(&self, source: &Value) -> Result<Value> {
        self.post("/api/admin/sources", source).await
    }

    pub async fn update_any_source(&self, source_id: i64, source: &Value) -> Result<Value> {
        self.put(&format!("/api/admin/sources/{}", source_id), source).await
    }

    pub async fn delete_any_source(&self, source_id: i64) -> Result<()> {
        self.delete(&format!("/api/admin/sources/{}", source_id)).await
    }
}
