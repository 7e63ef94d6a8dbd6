//! File-backed entity repository

use std::fs;
use std::path::{Path, PathBuf};

use crate::errors::{GatekeeperError, Result};
use crate::fs::{get_entity_dir, get_entity_path, parse_document, render_document, validate_id, write_atomic};
use crate::schemas::{Entity, EntityType};

use super::EntityRepository;

/// Stores entities as `.gatekeeper/<type dir>/<id>.md`
#[derive(Debug, Clone)]
pub struct FileEntityRepository {
    root: PathBuf,
}

impl FileEntityRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FileEntityRepository { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_entity(path: &Path) -> Result<Entity> {
        let content = fs::read_to_string(path)?;
        let (mut entity, body): (Entity, String) = parse_document(&content).map_err(|e| {
            GatekeeperError::InvalidDocument(format!("{}: {}", path.display(), e))
        })?;
        entity.body = body;
        Ok(entity)
    }
}

impl EntityRepository for FileEntityRepository {
    fn find(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>> {
        validate_id(id)?;
        let path = get_entity_path(&self.root, entity_type, id);
        if !path.exists() {
            return Ok(None);
        }
        let entity = Self::read_entity(&path)?;
        if entity.entity_type != entity_type || entity.id != id {
            return Err(GatekeeperError::InvalidDocument(format!(
                "{} declares {} '{}'",
                path.display(),
                entity.entity_type,
                entity.id
            )));
        }
        Ok(Some(entity))
    }

    fn save(&self, entity: &Entity) -> Result<()> {
        validate_id(&entity.id)?;
        let path = get_entity_path(&self.root, entity.entity_type, &entity.id);
        let content = render_document(entity, &entity.body)?;
        write_atomic(&path, content.as_bytes())?;
        tracing::debug!(entity = %entity.id, state = %entity.state, "saved entity");
        Ok(())
    }

    fn list(&self, entity_type: EntityType) -> Result<Vec<Entity>> {
        let dir = get_entity_dir(&self.root, entity_type);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut entities = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            match Self::read_entity(&path) {
                Ok(entity) => entities.push(entity),
                Err(e) => tracing::warn!(path = %path.display(), "skipping unreadable entity: {}", e),
            }
        }
        entities.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::RelationshipKind;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileEntityRepository) {
        let temp = TempDir::new().unwrap();
        let repo = FileEntityRepository::new(temp.path());
        (temp, repo)
    }

    #[test]
    fn test_save_and_get_roundtrip_keeps_body() {
        let (_temp, repo) = setup();
        let task = Entity::new(EntityType::Task, "T-1", "todo")
            .with_title("Add login")
            .with_body("## Notes\n\nSome detail.\n");
        repo.save(&task).unwrap();

        let loaded = repo.get(EntityType::Task, "T-1").unwrap();
        assert_eq!(loaded, task);
    }

    #[test]
    fn test_missing_entity() {
        let (_temp, repo) = setup();
        assert!(repo.find(EntityType::Qa, "Q-1").unwrap().is_none());
        let err = repo.get(EntityType::Qa, "Q-1").unwrap_err();
        assert!(matches!(err, GatekeeperError::EntityNotFound { .. }));
    }

    #[test]
    fn test_list_sorted_and_skips_garbage() {
        let (temp, repo) = setup();
        repo.save(&Entity::new(EntityType::Task, "T-2", "todo")).unwrap();
        repo.save(&Entity::new(EntityType::Task, "T-1", "wip")).unwrap();
        let dir = get_entity_dir(temp.path(), EntityType::Task);
        fs::write(dir.join("broken.md"), "no header").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let ids: Vec<String> = repo
            .list(EntityType::Task)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["T-1", "T-2"]);
    }

    #[test]
    fn test_children_and_dependents() {
        let (_temp, repo) = setup();
        repo.save(
            &Entity::new(EntityType::Task, "T-1", "wip").with_relationship(RelationshipKind::Child, "T-2"),
        )
        .unwrap();
        repo.save(&Entity::new(EntityType::Task, "T-2", "wip")).unwrap();
        repo.save(
            &Entity::new(EntityType::Task, "T-3", "todo")
                .with_relationship(RelationshipKind::BundleRoot, "T-1")
                .with_relationship(RelationshipKind::DependsOn, "T-2"),
        )
        .unwrap();
        repo.save(&Entity::new(EntityType::Task, "T-4", "todo")).unwrap();

        let children: Vec<String> = repo.children("T-1").unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(children, vec!["T-2", "T-3"]);

        let dependents: Vec<String> = repo.dependents("T-2").unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(dependents, vec!["T-3"]);
    }

    #[test]
    fn test_rejects_bad_ids() {
        let (_temp, repo) = setup();
        assert!(repo.find(EntityType::Task, "../escape").is_err());
    }
}
