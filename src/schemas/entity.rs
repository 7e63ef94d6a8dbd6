//! Entity schema - tasks, QA records and sessions

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The kind of record a state machine governs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Task,
    Qa,
    Session,
}

impl EntityType {
    /// Directory name used by the file repository
    pub fn dir_name(&self) -> &'static str {
        match self {
            EntityType::Task => "tasks",
            EntityType::Qa => "qa",
            EntityType::Session => "sessions",
        }
    }

    /// Key used for this type in the state machine configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Task => "task",
            EntityType::Qa => "qa",
            EntityType::Session => "session",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task" | "tasks" => Ok(EntityType::Task),
            "qa" => Ok(EntityType::Qa),
            "session" | "sessions" => Ok(EntityType::Session),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

/// Typed relationship edge between entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Parent,
    Child,
    DependsOn,
    Blocks,
    Related,
    BundleRoot,
}

/// A single relationship edge: `kind` → `target`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipKind,
    pub target: String,
}

/// A workflow record: task, QA record or session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier (e.g. "T-1")
    pub id: String,

    /// Which state machine governs this record
    pub entity_type: EntityType,

    /// Human-readable title
    #[serde(default)]
    pub title: String,

    /// Current state name
    pub state: String,

    /// Relationship edges
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,

    /// Session currently owning the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Owner (agent or human) of the record
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Free-form metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    /// ISO 8601 creation timestamp
    pub created_at: String,

    /// ISO 8601 last update timestamp
    pub updated_at: String,

    /// Markdown body following the header block
    #[serde(skip)]
    pub body: String,
}

impl Entity {
    /// Create a new entity in the given state
    pub fn new(entity_type: EntityType, id: impl Into<String>, state: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Entity {
            id: id.into(),
            entity_type,
            title: String::new(),
            state: state.into(),
            relationships: Vec::new(),
            session_id: None,
            owner: None,
            metadata: BTreeMap::new(),
            created_at: now.clone(),
            updated_at: now,
            body: String::new(),
        }
    }

    /// Return a new Entity with the given state, updating the timestamp
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self.touch_returning()
    }

    /// Return a new Entity with the given title
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Return a new Entity owned by the given session
    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self.touch_returning()
    }

    /// Return a new Entity with an extra relationship edge
    pub fn with_relationship(mut self, kind: RelationshipKind, target: impl Into<String>) -> Self {
        let target = target.into();
        if !self
            .relationships
            .iter()
            .any(|r| r.kind == kind && r.target == target)
        {
            self.relationships.push(Relationship { kind, target });
        }
        self
    }

    /// Return a new Entity with the given body
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Targets of all edges of the given kind
    pub fn related(&self, kind: RelationshipKind) -> Vec<&str> {
        self.relationships
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.target.as_str())
            .collect()
    }

    /// Set a metadata value in place
    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Read a metadata value as a string
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    fn touch_returning(mut self) -> Self {
        self.updated_at = chrono::Utc::now().to_rfc3339();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_round_trip() {
        for ty in [EntityType::Task, EntityType::Qa, EntityType::Session] {
            let parsed: EntityType = ty.as_str().parse().unwrap();
            assert_eq!(parsed, ty);
        }
        assert!("epic".parse::<EntityType>().is_err());
        assert_eq!(serde_json::to_string(&EntityType::Qa).unwrap(), "\"qa\"");
    }

    #[test]
    fn test_with_state_does_not_mutate_original() {
        let task = Entity::new(EntityType::Task, "T-1", "todo");
        let moved = task.clone().with_state("wip");
        assert_eq!(task.state, "todo");
        assert_eq!(moved.state, "wip");
        assert!(moved.updated_at >= task.updated_at);
    }

    #[test]
    fn test_relationships_are_deduplicated() {
        let task = Entity::new(EntityType::Task, "T-1", "todo")
            .with_relationship(RelationshipKind::Child, "T-2")
            .with_relationship(RelationshipKind::Child, "T-2")
            .with_relationship(RelationshipKind::DependsOn, "T-0");
        assert_eq!(task.related(RelationshipKind::Child), vec!["T-2"]);
        assert_eq!(task.related(RelationshipKind::DependsOn), vec!["T-0"]);
        assert!(task.related(RelationshipKind::Blocks).is_empty());
    }

    #[test]
    fn test_body_is_not_serialized_in_header() {
        let task = Entity::new(EntityType::Task, "T-1", "todo").with_body("# Notes");
        let json = serde_json::to_string(&task).unwrap();
        assert!(!json.contains("Notes"));
        assert!(!json.contains("\"session_id\""));
    }
}
