//! Show command - Show one entity with its allowed transitions

use std::path::Path;

use serde::Serialize;

use crate::errors::Result;
use crate::schemas::{BundleSummary, Entity, EntityType};

use super::{open_workflow, print_json};

#[derive(Debug, Serialize)]
struct ShowOutput {
    entity: Entity,
    allowed_transitions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bundle: Option<BundleSummary>,
}

/// Show details of a specific entity
pub async fn run(cwd: Option<&Path>, entity_type: EntityType, id: &str, json: bool) -> Result<()> {
    let workflow = open_workflow(cwd)?;
    let entity = workflow.repository().get(entity_type, id)?;
    let allowed_transitions = workflow
        .engine()
        .allowed_targets(entity_type.as_str(), &entity.state)?;

    let (round, bundle) = if entity_type == EntityType::Task {
        let store = workflow.evidence(id)?;
        (store.latest_round()?, store.read_bundle(None)?)
    } else {
        (None, None)
    };

    let output = ShowOutput {
        entity,
        allowed_transitions,
        round,
        bundle,
    };
    if json {
        return print_json(&output);
    }

    let e = &output.entity;
    println!("{} {}: {}", e.entity_type, e.id, e.title);
    println!("  state:   {}", e.state);
    if let Some(session) = &e.session_id {
        println!("  session: {}", session);
    }
    for rel in &e.relationships {
        println!("  {:?} -> {}", rel.kind, rel.target);
    }
    if output.allowed_transitions.is_empty() {
        println!("  next:    (final)");
    } else {
        println!("  next:    {}", output.allowed_transitions.join(", "));
    }
    if let Some(round) = output.round {
        println!("  round:   {}", round);
    }
    if let Some(bundle) = &output.bundle {
        println!("  bundle:  {:?} (round {})", bundle.status, bundle.round);
    }
    Ok(())
}
