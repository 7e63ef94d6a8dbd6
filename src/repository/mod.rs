//! Entity persistence
//!
//! The workflow layer talks to a repository trait; the default implementation
//! stores one front-matter document per entity under `.gatekeeper/`.

mod file;

pub use file::FileEntityRepository;

use crate::errors::{GatekeeperError, Result};
use crate::schemas::{Entity, EntityType, RelationshipKind};

/// Storage for tasks, QA records and sessions
pub trait EntityRepository: Send + Sync {
    /// Look up an entity, `None` if it does not exist
    fn find(&self, entity_type: EntityType, id: &str) -> Result<Option<Entity>>;

    /// Persist an entity, replacing any previous version
    fn save(&self, entity: &Entity) -> Result<()>;

    /// All entities of a type, sorted by id
    fn list(&self, entity_type: EntityType) -> Result<Vec<Entity>>;

    fn get(&self, entity_type: EntityType, id: &str) -> Result<Entity> {
        self.find(entity_type, id)?
            .ok_or_else(|| GatekeeperError::EntityNotFound {
                entity_type: entity_type.to_string(),
                id: id.to_string(),
            })
    }

    /// Tasks that belong under `task_id`: declared `child` edges plus tasks
    /// pointing back through `parent` or `bundle_root`
    fn children(&self, task_id: &str) -> Result<Vec<Entity>> {
        let tasks = self.list(EntityType::Task)?;
        let declared: Vec<String> = tasks
            .iter()
            .find(|t| t.id == task_id)
            .map(|t| {
                t.related(RelationshipKind::Child)
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(tasks
            .into_iter()
            .filter(|t| t.id != task_id)
            .filter(|t| {
                declared.contains(&t.id)
                    || t.related(RelationshipKind::Parent).contains(&task_id)
                    || t.related(RelationshipKind::BundleRoot).contains(&task_id)
            })
            .collect())
    }

    /// Tasks that declare a `depends_on` edge to `task_id`
    fn dependents(&self, task_id: &str) -> Result<Vec<Entity>> {
        Ok(self
            .list(EntityType::Task)?
            .into_iter()
            .filter(|t| t.related(RelationshipKind::DependsOn).contains(&task_id))
            .collect())
    }
}
