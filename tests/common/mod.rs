#![allow(dead_code)]

use async_trait::async_trait;
use soql_copilot::error::{CopilotError, Result};
use soql_copilot::execution::{ExecutionError, RowSet, StatementExecutor};
use soql_copilot::llm::TextGenerator;
use soql_copilot::schema::{ObjectMetadata, StaticSchemaProvider};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replies with canned responses in order; the last one repeats.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            Ok(responses.pop_front().unwrap())
        } else {
            responses
                .front()
                .cloned()
                .ok_or_else(|| CopilotError::Llm("no scripted response".to_string()))
        }
    }
}

/// Generator whose transport always fails.
pub struct UnreachableGenerator;

#[async_trait]
impl TextGenerator for UnreachableGenerator {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Err(CopilotError::Llm("connection refused".to_string()))
    }
}

pub enum Step {
    Rows(RowSet),
    Fail(&'static str),
    /// Cancel the token, then hang.
    CancelAndHang(CancellationToken),
    /// Never answer within a test's lifetime.
    Hang,
}

/// Plays back one step per execution and records every statement.
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<Step>>,
    pub statements: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatementExecutor for ScriptedExecutor {
    async fn execute(&self, statement: &str) -> std::result::Result<RowSet, ExecutionError> {
        self.statements.lock().unwrap().push(statement.to_string());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Rows(rows)) => Ok(rows),
            Some(Step::Fail(message)) => Err(ExecutionError::new(message)),
            Some(Step::CancelAndHang(token)) => {
                token.cancel();
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(ExecutionError::new("should have been cancelled"))
            }
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ExecutionError::new("should have hit the deadline"))
            }
            None => Err(ExecutionError::new("no scripted step")),
        }
    }
}

pub fn rows(ids: &[&str]) -> RowSet {
    let records = ids
        .iter()
        .map(|id| serde_json::json!({"Id": id, "Name": format!("Record {}", id)}))
        .collect();
    RowSet::new(records, ids.len() as u64)
}

pub fn schema() -> StaticSchemaProvider {
    StaticSchemaProvider::new(vec![
        ObjectMetadata::new("Account")
            .with_field("Id", "id")
            .with_field("Name", "string")
            .with_field("Phone", "phone")
            .with_field("BillingState", "string")
            .with_field("OwnerId", "reference")
            .with_relationship("OwnerId", "User"),
        ObjectMetadata::new("Contact")
            .with_field("Id", "id")
            .with_field("Name", "string")
            .with_field("Email", "email")
            .with_field("AccountId", "reference")
            .with_relationship("AccountId", "Account"),
        ObjectMetadata::new("User")
            .with_field("Id", "id")
            .with_field("Name", "string"),
    ])
}
