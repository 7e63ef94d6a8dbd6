//! Guard, condition and action handlers
//!
//! State machine specs refer to handlers by name. The registry maps those
//! names to typed function values; a name missing from the registry fails
//! closed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;

use crate::errors::{GatekeeperError, Result};
use crate::schemas::{Entity, HandlerKind};

/// Facts a transition is evaluated against
#[derive(Debug, Clone)]
pub struct TransitionContext {
    /// Session requesting the transition
    pub session_id: Option<String>,

    /// Session currently owning the entity
    pub owner_session: Option<String>,

    /// Latest bundle summary is approved
    pub bundle_approved: bool,

    /// Latest bundle summary is rejected
    pub bundle_rejected: bool,

    /// An implementation report exists for the current round
    pub has_implementation_report: bool,

    /// Every `depends_on` target is done
    pub dependencies_done: bool,

    /// Children not yet done
    pub open_children: Vec<String>,

    /// Current evidence round, if any
    pub round: Option<u32>,

    pub max_rounds: u32,

    /// Tasks still in progress that the session owns
    pub owned_wip: Vec<String>,

    /// Extra named facts for custom handlers
    pub facts: BTreeMap<String, bool>,
}

impl Default for TransitionContext {
    fn default() -> Self {
        TransitionContext {
            session_id: None,
            owner_session: None,
            bundle_approved: false,
            bundle_rejected: false,
            has_implementation_report: false,
            dependencies_done: true,
            open_children: Vec::new(),
            round: None,
            max_rounds: 3,
            owned_wip: Vec::new(),
            facts: BTreeMap::new(),
        }
    }
}

impl TransitionContext {
    /// Context for a transition requested by `session_id`
    pub fn for_session(session_id: Option<&str>) -> Self {
        TransitionContext {
            session_id: session_id.map(str::to_string),
            ..Default::default()
        }
    }

    /// Fill the owner from the entity being transitioned
    pub fn with_owner(mut self, entity: &Entity) -> Self {
        self.owner_session = entity.session_id.clone();
        self
    }

    pub fn fact(&self, name: &str) -> bool {
        self.facts.get(name).copied().unwrap_or(false)
    }
}

pub type GuardFn = Arc<dyn Fn(&TransitionContext) -> bool + Send + Sync>;
pub type ConditionFn = Arc<dyn Fn(&TransitionContext) -> bool + Send + Sync>;
pub type ActionFn = Arc<dyn Fn(&mut Entity, &TransitionContext) -> Result<()> + Send + Sync>;

/// Name → handler tables
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    guards: HashMap<String, GuardFn>,
    conditions: HashMap<String, ConditionFn>,
    actions: HashMap<String, ActionFn>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut guards: Vec<_> = self.guards.keys().collect();
        let mut conditions: Vec<_> = self.conditions.keys().collect();
        let mut actions: Vec<_> = self.actions.keys().collect();
        guards.sort();
        conditions.sort();
        actions.sort();
        f.debug_struct("HandlerRegistry")
            .field("guards", &guards)
            .field("conditions", &conditions)
            .field("actions", &actions)
            .finish()
    }
}

impl HandlerRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the built-in handlers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register_guard("always", |_| true);
        registry.register_guard("fail_closed", |_| false);
        registry.register_guard("can_claim", |ctx| match (&ctx.owner_session, &ctx.session_id) {
            (None, _) => true,
            (Some(owner), Some(session)) => owner == session,
            (Some(_), None) => false,
        });
        registry.register_guard("has_bundle_approval", |ctx| ctx.bundle_approved);
        registry.register_guard("has_bundle_rejection", |ctx| ctx.bundle_rejected);
        registry.register_guard("can_complete_session", |ctx| ctx.owned_wip.is_empty());

        registry.register_condition("has_implementation_report", |ctx| {
            ctx.has_implementation_report
        });
        registry.register_condition("dependencies_done", |ctx| ctx.dependencies_done);
        registry.register_condition("no_open_children", |ctx| ctx.open_children.is_empty());
        registry.register_condition("within_round_limit", |ctx| {
            ctx.round.map_or(true, |r| r <= ctx.max_rounds)
        });
        registry.register_condition("has_session", |ctx| ctx.session_id.is_some());

        registry.register_action("assign_session", |entity, ctx| {
            let session = ctx.session_id.clone().ok_or_else(|| {
                GatekeeperError::StateTransition(format!(
                    "cannot assign {} without a session",
                    entity.id
                ))
            })?;
            entity.session_id = Some(session);
            Ok(())
        });
        registry.register_action("release_session", |entity, _| {
            entity.session_id = None;
            Ok(())
        });
        registry.register_action("record_completion", |entity, ctx| {
            entity.set_meta("completed_at", Value::from(chrono::Utc::now().to_rfc3339()));
            if let Some(round) = ctx.round {
                entity.set_meta("completed_round", Value::from(round));
            }
            Ok(())
        });
        registry.register_action("record_rework", |entity, ctx| {
            let count = entity
                .metadata
                .get("rework_count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            entity.set_meta("rework_count", Value::from(count + 1));
            if let Some(round) = ctx.round {
                entity.set_meta("rework_round", Value::from(round));
            }
            Ok(())
        });

        registry
    }

    pub fn register_guard<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&TransitionContext) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_condition<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&TransitionContext) -> bool + Send + Sync + 'static,
    {
        self.conditions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn register_action<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&mut Entity, &TransitionContext) -> Result<()> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn guard(&self, name: &str) -> Option<&GuardFn> {
        self.guards.get(name)
    }

    pub fn condition(&self, name: &str) -> Option<&ConditionFn> {
        self.conditions.get(name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionFn> {
        self.actions.get(name)
    }

    pub fn contains(&self, kind: HandlerKind, name: &str) -> bool {
        match kind {
            HandlerKind::Guard => self.guards.contains_key(name),
            HandlerKind::Condition => self.conditions.contains_key(name),
            HandlerKind::Action => self.actions.contains_key(name),
        }
    }
}
