//! State machine engine
//!
//! Validates transitions against the declarative spec and produces updated
//! entities. Nothing here persists; callers save through the repository.

use std::sync::Arc;

use crate::errors::{GatekeeperError, Result};
use crate::schemas::{ConditionSpec, Config, Entity, EntityStateMachine, StateMachineSpec, TransitionSpec};

use super::handlers::{HandlerRegistry, TransitionContext};

pub struct StateMachineEngine {
    spec: StateMachineSpec,
    registry: Arc<HandlerRegistry>,
}

impl StateMachineEngine {
    /// Build an engine, rejecting specs that reference unknown states or handlers
    pub fn new(spec: StateMachineSpec, registry: Arc<HandlerRegistry>) -> Result<Self> {
        let errors = spec.validate(|kind, name| registry.contains(kind, name));
        if !errors.is_empty() {
            return Err(GatekeeperError::ConfigError(errors.join("; ")));
        }
        Ok(StateMachineEngine { spec, registry })
    }

    /// Engine over the configured spec with the built-in handlers
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.state_machine.clone(),
            Arc::new(HandlerRegistry::with_builtins()),
        )
    }

    pub fn spec(&self) -> &StateMachineSpec {
        &self.spec
    }

    pub fn machine(&self, entity_type: &str) -> Result<&EntityStateMachine> {
        self.spec
            .get(entity_type)
            .ok_or_else(|| GatekeeperError::MissingStateMachine(entity_type.to_string()))
    }

    /// Declared targets reachable from `state`
    pub fn allowed_targets(&self, entity_type: &str, state: &str) -> Result<Vec<String>> {
        let machine = self.machine(entity_type)?;
        let spec = machine.states.get(state).ok_or_else(|| {
            GatekeeperError::StateTransition(format!("unknown {} state '{}'", entity_type, state))
        })?;
        Ok(spec
            .allowed_transitions
            .iter()
            .map(|t| t.to.clone())
            .collect())
    }

    /// Check that `current → target` is declared and its guard and conditions hold.
    pub fn validate(
        &self,
        entity_type: &str,
        current: &str,
        target: &str,
        ctx: &TransitionContext,
    ) -> Result<()> {
        self.resolve(entity_type, current, target, ctx).map(|_| ())
    }

    /// Validate, then produce the updated entity.
    ///
    /// Actions run against a working copy in declaration order; the first
    /// failing action aborts the transition and the input is left untouched.
    pub fn validate_and_execute(
        &self,
        entity: &Entity,
        target: &str,
        ctx: &TransitionContext,
        execute_actions: bool,
    ) -> Result<Entity> {
        let entity_type = entity.entity_type.as_str();
        let transition = self.resolve(entity_type, &entity.state, target, ctx)?;

        let mut next = entity.clone().with_state(target);
        if execute_actions {
            for name in &transition.actions {
                let action = self.registry.action(name).ok_or_else(|| {
                    GatekeeperError::StateTransition(format!("unknown action '{}'", name))
                })?;
                action(&mut next, ctx).map_err(|e| {
                    GatekeeperError::StateTransition(format!(
                        "action '{}' failed for {} {}: {}",
                        name, entity_type, entity.id, e
                    ))
                })?;
            }
        }

        tracing::debug!(
            entity = %entity.id,
            from = %entity.state,
            to = %target,
            "transition validated"
        );
        Ok(next)
    }

    /// Validate and execute with actions enabled
    pub fn transition(&self, entity: &Entity, target: &str, ctx: &TransitionContext) -> Result<Entity> {
        self.validate_and_execute(entity, target, ctx, true)
    }

    fn resolve(
        &self,
        entity_type: &str,
        current: &str,
        target: &str,
        ctx: &TransitionContext,
    ) -> Result<&TransitionSpec> {
        let machine = self.machine(entity_type)?;
        let state = machine.states.get(current).ok_or_else(|| {
            GatekeeperError::StateTransition(format!(
                "unknown {} state '{}'",
                entity_type, current
            ))
        })?;

        let transition = state
            .allowed_transitions
            .iter()
            .find(|t| t.to == target)
            .ok_or_else(|| {
                GatekeeperError::StateTransition(format!(
                    "{}: transition {} -> {} is not declared",
                    entity_type, current, target
                ))
            })?;

        if let Some(name) = &transition.guard {
            let passed = match self.registry.guard(name) {
                Some(guard) => guard(ctx),
                None => false,
            };
            if !passed {
                return Err(GatekeeperError::StateTransition(format!(
                    "{}: guard '{}' blocked {} -> {}",
                    entity_type, name, current, target
                )));
            }
        }

        for condition in &transition.conditions {
            if let Err(message) = self.check_condition(condition, ctx) {
                return Err(GatekeeperError::StateTransition(format!(
                    "{}: {} -> {}: {}",
                    entity_type, current, target, message
                )));
            }
        }

        Ok(transition)
    }

    fn check_condition(&self, condition: &ConditionSpec, ctx: &TransitionContext) -> std::result::Result<(), String> {
        match condition {
            ConditionSpec::Named { name, error } => {
                let passed = match self.registry.condition(name) {
                    Some(check) => check(ctx),
                    None => false,
                };
                if passed {
                    Ok(())
                } else {
                    Err(error
                        .clone()
                        .unwrap_or_else(|| format!("condition '{}' not met", name)))
                }
            }
            ConditionSpec::AnyOf { or } => {
                let mut failures = Vec::new();
                for set in or {
                    match set.iter().try_for_each(|c| self.check_condition(c, ctx)) {
                        Ok(()) => return Ok(()),
                        Err(message) => failures.push(message),
                    }
                }
                Err(format!("no alternative satisfied ({})", failures.join(" | ")))
            }
        }
    }
}
