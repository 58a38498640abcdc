// src/api/sources.rs
//! Data-source catalog, schema discovery and annotation endpoints.

use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;

use super::ApiClient;
use crate::error::{ConsoleError, Result};
use crate::log_info;

/// A description in one language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LangText {
    pub lang: String,
    pub text: String,
}

impl LangText {
    pub fn new(lang: &str, text: &str) -> Self {
        Self { lang: lang.to_string(), text: text.to_string() }
    }
}

/// Pick the text for `lang`, or empty.
pub fn text_for_lang(texts: &[LangText], lang: &str) -> String {
    texts
        .iter()
        .find(|t| t.lang == lang)
        .map(|t| t.text.clone())
        .unwrap_or_default()
}

/// Descriptions arrive as a list, a single object or null depending on
/// the endpoint; normalise to a list.
fn lang_texts<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<LangText>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        Value::Object(_) => serde_json::from_value(value).map(|t| vec![t]).unwrap_or_default(),
        _ => Vec::new(),
    })
}

fn string_or_null<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSummary {
    pub id: i64,
    #[serde(default)]
    pub source_name: Option<String>,
    pub source_type: String,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default, deserialize_with = "lang_texts")]
    pub description: Vec<LangText>,
}

impl SourceSummary {
    pub fn display_name(&self) -> String {
        self.source_name.clone().unwrap_or_else(|| format!("source #{}", self.id))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceDetail {
    pub id: i64,
    #[serde(default, deserialize_with = "string_or_null")]
    pub source_name: String,
    pub source_type: String,
    #[serde(default)]
    pub connection: Option<Map<String, Value>>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default, deserialize_with = "lang_texts")]
    pub description: Vec<LangText>,
}

/// One connection field of a source type, as the backend describes it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConnectionFieldSpec {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub allowed: Option<Vec<String>>,
    #[serde(default)]
    pub file_uploader: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default)]
    pub allowed_exts: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawSourceType {
    name: String,
    #[serde(default)]
    display_info: Value,
    #[serde(default)]
    connection_info: Map<String, Value>,
}

/// A source type with its connection fields in backend order.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTypeInfo {
    pub name: String,
    pub display_info: Value,
    pub fields: Vec<(String, ConnectionFieldSpec)>,
}

impl SourceTypeInfo {
    pub fn display_name(&self) -> String {
        self.display_info
            .get("title")
            .or_else(|| self.display_info.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn field(&self, name: &str) -> Option<&ConnectionFieldSpec> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, spec)| spec)
    }

    pub fn has_file_uploader(&self) -> bool {
        self.fields.iter().any(|(_, spec)| spec.file_uploader)
    }
}

impl<'de> Deserialize<'de> for SourceTypeInfo {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawSourceType::deserialize(deserializer)?;
        let fields = raw
            .connection_info
            .into_iter()
            .map(|(name, spec)| (name, serde_json::from_value(spec).unwrap_or_default()))
            .collect();
        Ok(SourceTypeInfo { name: raw.name, display_info: raw.display_info, fields })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub column_name: String,
    #[serde(rename = "type", default, deserialize_with = "string_or_null")]
    pub column_type: String,
    #[serde(default, deserialize_with = "lang_texts")]
    pub description: Vec<LangText>,
    #[serde(default, deserialize_with = "string_or_null")]
    pub tags: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub table_name: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub file_type: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub original_file: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub object_name: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub sheet_name: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub media_type: String,
    #[serde(default, deserialize_with = "lang_texts")]
    pub description: Vec<LangText>,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default, deserialize_with = "string_or_null")]
    pub tags: String,
    #[serde(default)]
    pub columns: Vec<ColumnSchema>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub foreign_keys: Vec<Value>,
    /// Persisted selection flag, read on edit and never sent back.
    #[serde(rename = "_selected", default, skip_serializing)]
    pub selected: bool,
}

/// Create/update body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcePayload {
    pub source_name: String,
    pub is_private: bool,
    pub description: Vec<LangText>,
    pub connection_info: Map<String, Value>,
    pub additional_details: String,
    pub entities: Vec<EntitySchema>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationRequest {
    pub lang: Vec<String>,
    pub source_name: String,
    pub source_description: Vec<LangText>,
    pub entity: EntitySchema,
}

/// Suggested descriptions for one language.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub table_description: String,
    #[serde(default)]
    pub columns: HashMap<String, String>,
}

/// An uploaded file as referenced from `connection_info.file_objects`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileObject {
    pub object_name: String,
    pub media_type: String,
    pub original_filename: String,
}

#[derive(Debug, Deserialize)]
struct EntitiesEnvelope {
    #[serde(default)]
    data: Vec<EntitySchema>,
}

#[derive(Debug, Deserialize)]
struct SavedEntitiesEnvelope {
    #[serde(default)]
    data: Option<SavedTables>,
}

#[derive(Debug, Deserialize)]
struct SavedTables {
    #[serde(default)]
    tables: Vec<EntitySchema>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    object_name: String,
}

/// Guess a media type from the extension, for the upload form.
pub fn media_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        Some("xls") => "application/vnd.ms-excel",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

impl ApiClient {
    pub async fn list_sources(&self) -> Result<Vec<SourceSummary>> {
        self.get("/api/sources").await
    }

    pub async fn list_source_types(&self) -> Result<Vec<SourceTypeInfo>> {
        self.get("/api/sources_types").await
    }

    pub async fn source_type_details(&self, name: &str) -> Result<SourceTypeInfo> {
        self.get(&format!("/api/sources_types/{}", name)).await
    }

    pub async fn test_connectivity(&self, source_type: &str, connection: &Map<String, Value>) -> Result<()> {
        let _: Value = self
            .post(&format!("/api/sources/{}/test_connectivity", source_type), connection)
            .await?;
        Ok(())
    }

    /// Discover tables for a connection that is not saved yet.
    pub async fn discover_entities(
        &self,
        source_type: &str,
        connection: &Map<String, Value>,
    ) -> Result<Vec<EntitySchema>> {
        let envelope: EntitiesEnvelope = self
            .post(&format!("/api/sources/{}/entities", source_type), connection)
            .await?;
        Ok(envelope.data)
    }

    pub async fn create_source(&self, source_type: &str, payload: &SourcePayload) -> Result<Value> {
        let created = self.post(&format!("/api/sources/{}/create", source_type), payload).await?;
        log_info!("Created source '{}' ({})", payload.source_name, source_type);
        Ok(created)
    }

    pub async fn update_source(&self, source_id: i64, payload: &SourcePayload) -> Result<Value> {
        let updated = self.put(&format!("/api/sources/update/{}", source_id), payload).await?;
        log_info!("Updated source {}", source_id);
        Ok(updated)
    }

    pub async fn delete_source(&self, source_id: i64) -> Result<()> {
        self.delete(&format!("/api/sources/{}", source_id)).await
    }

    pub async fn get_source(&self, source_id: i64) -> Result<SourceDetail> {
        self.get(&format!("/api/sources/{}", source_id)).await
    }

    /// Saved schema of an existing source, with `_selected` flags.
    pub async fn saved_entities(&self, source_id: i64) -> Result<Vec<EntitySchema>> {
        let envelope: SavedEntitiesEnvelope = self.get(&format!("/api/sources/entities/{}", source_id)).await?;
        Ok(envelope.data.map(|d| d.tables).unwrap_or_default())
    }

    /// Ask the annotation service for descriptions, keyed by language.
    pub async fn annotate_table(&self, request: &AnnotationRequest) -> Result<HashMap<String, Annotation>> {
        self.post("/api/sources/table_annotate", request).await
    }

    pub async fn upload_file(&self, path: &Path) -> Result<FileObject> {
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ConsoleError::Config(format!("not a file: {}", path.display())))?
            .to_string();
        let media_type = media_type_for(path);

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.clone())
            .mime_str(media_type)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("media_type", media_type.to_string());

        let response: UploadResponse = self
            .send_json(self.request(Method::POST, "/api/sources/upload").multipart(form))
            .await?;
        log_info!("Uploaded {} as {}", filename, response.object_name);

        Ok(FileObject {
            object_name: response.object_name,
            media_type: media_type.to_string(),
            original_filename: filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_source_type_keeps_field_order() {
        let info: SourceTypeInfo = serde_json::from_value(json!({
            "name": "mysql",
            "display_info": {"title": "MySQL"},
            "connection_info": {
                "host": {"required": true, "hint": "hostname"},
                "port": {"required": true, "default": 3306},
                "database": {"required": true},
                "password": {"required": false}
            }
        }))
        .unwrap();

        let names: Vec<&str> = info.fields.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["host", "port", "database", "password"]);
        assert_eq!(info.display_name(), "MySQL");
        assert!(!info.has_file_uploader());
        assert_eq!(info.field("port").unwrap().default, Some(json!(3306)));
    }

    #[test]
    fn test_entity_description_shapes() {
        let entity: EntitySchema = serde_json::from_value(json!({
            "table_name": "orders",
            "description": {"lang": "en", "text": "all orders"},
            "columns": [{"column_name": "id", "type": "int", "description": null, "tags": null}],
            "primary_keys": ["id"],
            "_selected": true
        }))
        .unwrap();
        assert_eq!(text_for_lang(&entity.description, "en"), "all orders");
        assert!(entity.selected);
        assert!(entity.columns[0].description.is_empty());

        let out = serde_json::to_value(&entity).unwrap();
        assert!(out.get("_selected").is_none());
        assert_eq!(out["columns"][0]["type"], "int");
    }

    #[test]
    fn test_media_type_for() {
        assert_eq!(media_type_for(Path::new("a/b/sales.CSV")), "text/csv");
        assert_eq!(media_type_for(Path::new("x.bin")), "application/octet-stream");
    }
}
