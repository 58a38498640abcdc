// src/api/sops.rs

use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiClient;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SopQuery {
    pub search_condition: String,
    pub page_size: u32,
    pub page_num: u32,
}

impl Default for SopQuery {
    fn default() -> Self {
        Self { search_condition: String::new(), page_size: 10, page_num: 1 }
    }
}

impl SopQuery {
    pub fn next_page(&self) -> Self {
        Self { page_num: self.page_num + 1, ..self.clone() }
    }

    pub fn prev_page(&self) -> Self {
        Self { page_num: self.page_num.saturating_sub(1).max(1), ..self.clone() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SopSummary {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl SopSummary {
    pub fn display_name(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| format!("SOP #{}", self.id))
    }
}

/// A page of SOPs. The backend answers with either a bare list or an
/// envelope with `items`/`total`.
#[derive(Debug, Clone, Default)]
pub struct SopPage {
    pub items: Vec<SopSummary>,
    pub total: Option<u64>,
}

impl SopPage {
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Array(_) => Ok(Self { items: serde_json::from_value(value)?, total: None }),
            Value::Object(mut map) => {
                let items = map
                    .remove("items")
                    .or_else(|| map.remove("data"))
                    .map(serde_json::from_value)
                    .transpose()?
                    .unwrap_or_default();
                let total = map.get("total").and_then(Value::as_u64);
                Ok(Self { items, total })
            }
            _ => Ok(Self::default()),
        }
    }
}

impl ApiClient {
    pub async fn list_sops(&self, query: &SopQuery) -> Result<SopPage> {
        let value: Value = self
            .send_json(self.request(Method::GET, "/api/sops").query(query))
            .await?;
        SopPage::from_value(value)
    }

    pub async fn get_sop(&self, sop_id: i64) -> Result<Value> {
        self.get(&format!("/api/sops/{}", sop_id)).await
    }

    pub async fn create_sop(&self, sop: &Value) -> Result<Value> {
        self.post("/api/sops", sop).await
    }

    pub async fn update_sop(&self, sop_id: i64, sop: &Value) -> Result<Value> {
        self.put(&format!("/api/sops/{}", sop_id), sop).await
    }

    pub async fn delete_sop(&self, sop_id: i64) -> Result<()> {
        self.delete(&format!("/api/sops/{}", sop_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use serde_json::json;

    #[test]
    fn test_query_params() {
        let api = ApiClient::new(&AppConfig::default()).unwrap();
        let query = SopQuery { search_condition: "refund".into(), ..SopQuery::default() }.next_page();
        let request = api.request(Method::GET, "/api/sops").query(&query).build().unwrap();
        assert_eq!(
            request.url().query(),
            Some("search_condition=refund&page_size=10&page_num=2")
        );
        assert_eq!(query.prev_page().prev_page().page_num, 1);
    }

    #[test]
    fn test_page_shapes() {
        let bare = SopPage::from_value(json!([{"id": 1, "title": "Refunds"}])).unwrap();
        assert_eq!(bare.items[0].display_name(), "Refunds");

        let envelope = SopPage::from_value(json!({"items": [{"id": 2}], "total": 11})).unwrap();
        assert_eq!(envelope.total, Some(11));
        assert_eq!(envelope.items[0].display_name(), "SOP #2");
    }
}
