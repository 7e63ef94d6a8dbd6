//! Transition command - Move an entity to another state

use std::path::Path;

use crate::errors::Result;
use crate::schemas::EntityType;

use super::{open_workflow, print_json};

pub async fn run(
    cwd: Option<&Path>,
    entity_type: EntityType,
    id: &str,
    target: &str,
    session: Option<&str>,
    json: bool,
) -> Result<()> {
    let workflow = open_workflow(cwd)?;
    let entity = workflow.transition(entity_type, id, target, session).await?;
    if json {
        return print_json(&entity);
    }
    println!("{} {} -> {}", entity_type, entity.id, entity.state);
    Ok(())
}
