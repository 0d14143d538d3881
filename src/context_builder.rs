//! Context Builder
//!
//! Gathers everything the generator needs for one attempt: the schema excerpt
//! for the target entity type, carried clauses and identifiers from the
//! previous turn, relationship hints, domain constraints and the error trail.

use crate::config::CopilotConfig;
use crate::conversation::ConversationTurn;
use crate::execution_loop::ErrorClass;
use crate::reference_resolver::{
    mentions_related_entities, ContinuationKind, MarkerPatterns,
    ReferenceResolution,
};
use crate::schema::{ObjectMetadata, SchemaProvider};
use crate::statement::StatementClauses;
use std::sync::Arc;
use tracing::{debug, warn};

/// Schema slice handed to the generator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaExcerpt {
    pub target: Option<ObjectMetadata>,
    pub related: Vec<ObjectMetadata>,
    /// Catalogue of entity type names, only filled when no target resolved.
    pub available_types: Vec<String>,
}

impl SchemaExcerpt {
    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.related.is_empty() && self.available_types.is_empty()
    }

    /// Every field name on the target and related entity types.
    pub fn field_names(&self) -> Vec<&str> {
        self.target
            .iter()
            .chain(self.related.iter())
            .flat_map(|o| o.field_names())
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&ObjectMetadata> {
        self.target
            .iter()
            .chain(self.related.iter())
            .find(|o| o.is_named(name))
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(target) = &self.target {
            out.push_str(&render_object("Target", target));
        }
        for object in &self.related {
            out.push_str(&render_object("Related", object));
        }
        if !self.available_types.is_empty() {
            out.push_str(&format!(
                "Available entity types: {}\n",
                self.available_types.join(", ")
            ));
        }
        if out.is_empty() {
            out.push_str("(no schema information available)\n");
        }
        out
    }
}

fn render_object(label: &str, object: &ObjectMetadata) -> String {
    let fields = object
        .fields
        .iter()
        .map(|f| format!("{} ({})", f.name, f.data_type))
        .collect::<Vec<_>>()
        .join(", ");
    let mut out = format!("{} {}: {}\n", label, object.name, fields);
    for rel in &object.relationships {
        out.push_str(&format!("  {}.{} -> {}\n", object.name, rel.field, rel.target_type));
    }
    out
}

/// One failed execution, as fed back to the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    pub attempt_number: u32,
    pub statement: String,
    pub error_message: String,
    pub error_class: ErrorClass,
}

/// Everything one generation attempt sees. Built fresh per attempt.
#[derive(Debug, Clone)]
pub struct GenerationContext {
    pub question: String,
    pub target_entity_type: Option<String>,
    pub schema_excerpt: SchemaExcerpt,
    pub relationship_hints: Vec<String>,
    pub previous_turn: Option<ConversationTurn>,
    pub continuation_kind: ContinuationKind,
    pub literal_identifiers: Vec<String>,
    /// Previous statement's clauses, kept for a field-addition follow-up.
    pub carried_clauses: Option<StatementClauses>,
    pub carried_identifiers: Vec<String>,
    pub domain_constraints: Vec<String>,
    pub error_history: Vec<FailedAttempt>,
    /// Per-error-class correction guidance for the next attempt.
    pub correction_hints: Vec<String>,
}

pub struct ContextBuilder {
    schema: Arc<dyn SchemaProvider>,
    patterns: MarkerPatterns,
    max_related_objects: usize,
    max_excerpt_fields: usize,
    domain_constraints: Vec<String>,
}

impl ContextBuilder {
    pub fn new(schema: Arc<dyn SchemaProvider>, patterns: MarkerPatterns, config: &CopilotConfig) -> Self {
        Self {
            schema,
            patterns,
            max_related_objects: config.max_related_objects,
            max_excerpt_fields: config.max_excerpt_fields,
            domain_constraints: config.domain_constraints.clone(),
        }
    }

    /// Explicit mention (vocabulary or custom-type token), then the previous
    /// turn's type when the question continues it.
    pub fn resolve_target(
        &self,
        resolution: &ReferenceResolution,
        history: &[ConversationTurn],
    ) -> Option<String> {
        if let Some(mentioned) = &resolution.mentioned_entity_type {
            return Some(mentioned.clone());
        }
        if resolution.continuation_kind.is_same_topic() {
            return history.last().and_then(|t| t.target_entity_type.clone());
        }
        None
    }

    /// Fetch the excerpt for `target`. The previous turn's type is always
    /// included among the related types so traversal hints can be built.
    /// Lookup failures degrade to whatever was fetched so far.
    pub async fn schema_excerpt(
        &self,
        target: Option<&str>,
        previous_target: Option<&str>,
    ) -> SchemaExcerpt {
        let mut excerpt = SchemaExcerpt::default();

        let Some(target) = target else {
            match self.schema.schema(None).await {
                Ok(objects) => {
                    excerpt.available_types = objects.into_iter().map(|o| o.name).collect();
                }
                Err(e) => warn!("Schema catalogue lookup failed: {}", e),
            }
            return excerpt;
        };

        let Some(target_object) = self.lookup(target).await else {
            return excerpt;
        };

        let mut related_names: Vec<String> = Vec::new();
        if let Some(previous) = previous_target.filter(|p| !p.eq_ignore_ascii_case(target)) {
            related_names.push(previous.to_string());
        }
        for rel in &target_object.relationships {
            if !rel.target_type.eq_ignore_ascii_case(target)
                && !related_names.iter().any(|n| n.eq_ignore_ascii_case(&rel.target_type))
            {
                related_names.push(rel.target_type.clone());
            }
        }
        related_names.truncate(self.max_related_objects);

        for name in related_names {
            if let Some(object) = self.lookup(&name).await {
                excerpt.related.push(object);
            }
        }
        excerpt.target = Some(target_object);
        debug!(
            "Schema excerpt for {}: {} related types",
            target,
            excerpt.related.len()
        );
        excerpt
    }

    async fn lookup(&self, name: &str) -> Option<ObjectMetadata> {
        match self.schema.schema(Some(name)).await {
            Ok(objects) => objects.into_iter().next().map(|mut o| {
                o.fields.truncate(self.max_excerpt_fields);
                o
            }),
            Err(e) => {
                warn!("Schema lookup for {} failed: {}", name, e);
                None
            }
        }
    }

    pub fn build(
        &self,
        question: &str,
        resolution: &ReferenceResolution,
        history: &[ConversationTurn],
        target_entity_type: Option<String>,
        schema_excerpt: SchemaExcerpt,
    ) -> GenerationContext {
        let previous_turn = history.last().cloned();
        let kind = resolution.continuation_kind;

        let carried_clauses = match (&previous_turn, kind) {
            (Some(prev), ContinuationKind::SameTopicAddFields) => prev
                .statement
                .as_deref()
                .map(StatementClauses::parse)
                .filter(|c| !c.is_empty()),
            _ => None,
        };

        let traverses = kind == ContinuationKind::TopicSwitch
            && mentions_related_entities(question, &self.patterns);

        let carried_identifiers = match &previous_turn {
            Some(prev) if kind.is_same_topic() || traverses => prev.result_identifiers.clone(),
            _ => Vec::new(),
        };

        let mut relationship_hints = Vec::new();
        if traverses {
            let previous_target = previous_turn.as_ref().and_then(|t| t.target_entity_type.as_deref());
            if let (Some(previous), Some(target)) = (previous_target, target_entity_type.as_deref()) {
                match traversal_hint(&schema_excerpt, previous, target) {
                    Some(hint) => relationship_hints.push(hint),
                    None => debug!("No relationship between {} and {} in schema", previous, target),
                }
            }
        }

        GenerationContext {
            question: question.to_string(),
            target_entity_type,
            schema_excerpt,
            relationship_hints,
            previous_turn,
            continuation_kind: kind,
            literal_identifiers: resolution.literal_identifiers.clone(),
            carried_clauses,
            carried_identifiers,
            domain_constraints: self.domain_constraints.clone(),
            error_history: Vec::new(),
            correction_hints: Vec::new(),
        }
    }
}

/// Worked example for moving from the previous entity type to `target`,
/// using whichever side of the foreign key the schema shows.
pub fn traversal_hint(excerpt: &SchemaExcerpt, previous: &str, target: &str) -> Option<String> {
    if let Some(rel) = excerpt.find(target).and_then(|o| o.relationship_to(previous)) {
        return Some(format!(
            "{target} references {previous} through {field}: \
             SELECT Id, Name FROM {target} WHERE {field} IN (<previous {previous} ids>)",
            target = target,
            previous = previous,
            field = rel.field
        ));
    }
    if let Some(rel) = excerpt.find(previous).and_then(|o| o.relationship_to(target)) {
        return Some(format!(
            "{previous} references {target} through {field}: \
             SELECT Id, Name FROM {target} WHERE Id IN (SELECT {field} FROM {previous} WHERE Id IN (<previous {previous} ids>))",
            target = target,
            previous = previous,
            field = rel.field
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CopilotError, Result};
    use crate::reference_resolver::{EntityVocabulary, ReferenceResolver};
    use crate::schema::StaticSchemaProvider;
    use async_trait::async_trait;

    fn schema() -> Arc<dyn SchemaProvider> {
        Arc::new(StaticSchemaProvider::new(vec![
            ObjectMetadata::new("Account")
                .with_field("Id", "id")
                .with_field("Name", "string")
                .with_field("BillingState", "string")
                .with_field("OwnerId", "reference")
                .with_relationship("OwnerId", "User"),
            ObjectMetadata::new("Contact")
                .with_field("Id", "id")
                .with_field("Name", "string")
                .with_field("AccountId", "reference")
                .with_relationship("AccountId", "Account"),
            ObjectMetadata::new("User")
                .with_field("Id", "id")
                .with_field("Name", "string"),
        ]))
    }

    fn builder(schema: Arc<dyn SchemaProvider>) -> ContextBuilder {
        let config = CopilotConfig::default();
        ContextBuilder::new(
            schema,
            MarkerPatterns::from_tables(&config.patterns).unwrap(),
            &config,
        )
    }

    fn resolver() -> ReferenceResolver {
        let config = CopilotConfig::default();
        ReferenceResolver::new(
            MarkerPatterns::from_tables(&config.patterns).unwrap(),
            EntityVocabulary::new(&config.entity_types).unwrap(),
        )
    }

    fn account_turn() -> ConversationTurn {
        ConversationTurn::new(
            "accounts in NY",
            Some("SELECT Id, Name FROM Account WHERE BillingState = 'NY' ORDER BY Name LIMIT 5".to_string()),
            Some("Account".to_string()),
            vec!["001000000000001".to_string(), "001000000000002".to_string()],
            2,
        )
    }

    struct FailingProvider;

    #[async_trait]
    impl SchemaProvider for FailingProvider {
        async fn schema(&self, _entity_type: Option<&str>) -> Result<Vec<ObjectMetadata>> {
            Err(CopilotError::Schema("describe unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_field_addition_carries_clauses_and_ids() {
        let builder = builder(schema());
        let history = vec![account_turn()];
        let question = "show their owner too";
        let resolution = resolver().resolve(question, &history);
        let target = builder.resolve_target(&resolution, &history);
        assert_eq!(target.as_deref(), Some("Account"));

        let excerpt = builder.schema_excerpt(target.as_deref(), Some("Account")).await;
        assert_eq!(excerpt.related.len(), 1);
        assert_eq!(excerpt.related[0].name, "User");

        let context = builder.build(question, &resolution, &history, target, excerpt);
        assert_eq!(context.continuation_kind, ContinuationKind::SameTopicAddFields);
        let clauses = context.carried_clauses.unwrap();
        assert_eq!(clauses.filter(), Some("BillingState = 'NY'"));
        assert_eq!(clauses.limit(), Some("5"));
        assert_eq!(context.carried_identifiers.len(), 2);
        assert_eq!(context.domain_constraints.len(), 4);
    }

    #[tokio::test]
    async fn test_related_topic_switch_adds_traversal_hint() {
        let builder = builder(schema());
        let history = vec![account_turn()];
        let question = "show the contacts related to those";
        let resolution = resolver().resolve(question, &history);
        assert_eq!(resolution.continuation_kind, ContinuationKind::TopicSwitch);

        let target = builder.resolve_target(&resolution, &history);
        let excerpt = builder.schema_excerpt(target.as_deref(), Some("Account")).await;
        let context = builder.build(question, &resolution, &history, target, excerpt);

        assert_eq!(context.relationship_hints.len(), 1);
        assert!(context.relationship_hints[0].contains("WHERE AccountId IN"));
        assert_eq!(context.carried_identifiers.len(), 2);
        assert!(context.carried_clauses.is_none());
    }

    #[tokio::test]
    async fn test_traversal_hint_reverse_direction() {
        let builder = builder(schema());
        let excerpt = builder.schema_excerpt(Some("User"), Some("Account")).await;
        let hint = traversal_hint(&excerpt, "Account", "User").unwrap();
        assert!(hint.contains("SELECT OwnerId FROM Account"));
    }

    #[tokio::test]
    async fn test_custom_type_token_resolves_target() {
        let builder = builder(schema());
        let question = "count the Shipment__c records";
        let resolution = resolver().resolve(question, &[]);
        assert_eq!(
            builder.resolve_target(&resolution, &[]).as_deref(),
            Some("Shipment__c")
        );
    }

    #[tokio::test]
    async fn test_unresolved_target_lists_catalogue() {
        let builder = builder(schema());
        let excerpt = builder.schema_excerpt(None, None).await;
        assert!(excerpt.target.is_none());
        assert_eq!(excerpt.available_types, vec!["Account", "Contact", "User"]);
        assert!(excerpt.render().contains("Available entity types"));
    }

    #[tokio::test]
    async fn test_schema_failure_degrades_to_empty_excerpt() {
        let builder = builder(Arc::new(FailingProvider));
        let excerpt = builder.schema_excerpt(Some("Account"), None).await;
        assert!(excerpt.is_empty());
        assert!(excerpt.render().contains("no schema information"));
    }

    #[tokio::test]
    async fn test_excerpt_field_cap() {
        let config = CopilotConfig {
            max_excerpt_fields: 2,
            ..CopilotConfig::default()
        };
        let builder = ContextBuilder::new(
            schema(),
            MarkerPatterns::from_tables(&config.patterns).unwrap(),
            &config,
        );
        let excerpt = builder.schema_excerpt(Some("Account"), None).await;
        assert_eq!(excerpt.target.unwrap().fields.len(), 2);
    }
}
