//! Schema lookups over the remote service's describe endpoints.

use super::{FieldMetadata, ObjectMetadata, RelationshipMetadata, SchemaProvider};
use crate::error::{CopilotError, Result};
use crate::execution::rest_engine::{describe_failure, RestConnection};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct GlobalDescribe {
    sobjects: Vec<GlobalObject>,
}

#[derive(Debug, Deserialize)]
struct GlobalObject {
    name: String,
    #[serde(default = "default_true")]
    queryable: bool,
}

#[derive(Debug, Deserialize)]
struct ObjectDescribe {
    name: String,
    #[serde(default)]
    fields: Vec<DescribeField>,
}

#[derive(Debug, Deserialize)]
struct DescribeField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(rename = "referenceTo", default)]
    reference_to: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl From<ObjectDescribe> for ObjectMetadata {
    fn from(describe: ObjectDescribe) -> Self {
        let relationships = describe
            .fields
            .iter()
            .filter(|f| f.field_type == "reference")
            .filter_map(|f| {
                f.reference_to.first().map(|target| RelationshipMetadata {
                    field: f.name.clone(),
                    target_type: target.clone(),
                })
            })
            .collect();

        let fields = describe
            .fields
            .into_iter()
            .map(|f| FieldMetadata {
                name: f.name,
                data_type: f.field_type,
            })
            .collect();

        ObjectMetadata {
            name: describe.name,
            fields,
            relationships,
        }
    }
}

pub struct RestSchemaProvider {
    connection: Arc<RestConnection>,
}

impl RestSchemaProvider {
    pub fn new(connection: Arc<RestConnection>) -> Self {
        Self { connection }
    }

    async fn fetch(&self, path: &str) -> Result<Option<String>> {
        let response = self.connection.get(&self.connection.endpoint(path), &[]).await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CopilotError::Schema(describe_failure(status, &body)));
        }
        Ok(Some(body))
    }
}

#[async_trait]
impl SchemaProvider for RestSchemaProvider {
    async fn schema(&self, entity_type: Option<&str>) -> Result<Vec<ObjectMetadata>> {
        match entity_type {
            None => {
                let Some(body) = self.fetch("sobjects").await? else {
                    return Ok(Vec::new());
                };
                let global: GlobalDescribe = serde_json::from_str(&body)?;
                Ok(global
                    .sobjects
                    .into_iter()
                    .filter(|o| o.queryable)
                    .map(|o| ObjectMetadata::new(o.name))
                    .collect())
            }
            Some(name) => {
                debug!("Describing {}", name);
                let Some(body) = self.fetch(&format!("sobjects/{}/describe", name)).await? else {
                    return Ok(Vec::new());
                };
                let describe: ObjectDescribe = serde_json::from_str(&body)?;
                Ok(vec![describe.into()])
            }
        }
    }
}
