//! State machine schema - declarative states, transitions and handler names

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A condition attached to a transition.
///
/// Either a single named condition, or an OR-group of alternative condition
/// sets where any one set (all of its members satisfied) is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    AnyOf {
        or: Vec<Vec<ConditionSpec>>,
    },
    Named {
        name: String,
        /// Message reported when the condition fails
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ConditionSpec {
    pub fn named(name: impl Into<String>) -> Self {
        ConditionSpec::Named {
            name: name.into(),
            error: None,
        }
    }

    /// All handler names referenced by this condition, recursively
    pub fn names(&self) -> Vec<&str> {
        match self {
            ConditionSpec::Named { name, .. } => vec![name.as_str()],
            ConditionSpec::AnyOf { or } => or
                .iter()
                .flat_map(|set| set.iter().flat_map(|c| c.names()))
                .collect(),
        }
    }
}

/// One declared transition out of a state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    /// Target state
    pub to: String,

    /// Guard predicate name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,

    /// Conditions that must all hold
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ConditionSpec>,

    /// Side-effect actions, run in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

/// One declared state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    #[serde(default)]
    pub initial: bool,

    #[serde(default, rename = "final")]
    pub terminal: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub allowed_transitions: Vec<TransitionSpec>,
}

/// State machine for one entity type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStateMachine {
    pub states: BTreeMap<String, StateSpec>,
}

impl EntityStateMachine {
    /// The state flagged `initial`, if any
    pub fn initial_state(&self) -> Option<&str> {
        self.states
            .iter()
            .find(|(_, s)| s.initial)
            .map(|(name, _)| name.as_str())
    }

    /// Find the declared transition from `from` to `to`
    pub fn find_transition(&self, from: &str, to: &str) -> Option<&TransitionSpec> {
        self.states
            .get(from)?
            .allowed_transitions
            .iter()
            .find(|t| t.to == to)
    }
}

/// Mapping entity type name → state machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateMachineSpec {
    pub entities: BTreeMap<String, EntityStateMachine>,
}

impl StateMachineSpec {
    pub fn get(&self, entity_type: &str) -> Option<&EntityStateMachine> {
        self.entities.get(entity_type)
    }

    /// Check structural invariants: every transition target is a declared state.
    ///
    /// Returns one message per violation.
    pub fn structural_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (entity, machine) in &self.entities {
            if machine.states.is_empty() {
                errors.push(format!("{}: no states declared", entity));
            }
            for (state, spec) in &machine.states {
                for t in &spec.allowed_transitions {
                    if !machine.states.contains_key(&t.to) {
                        errors.push(format!(
                            "{}: transition {} -> {} targets an undeclared state",
                            entity, state, t.to
                        ));
                    }
                }
            }
        }
        errors
    }
}

/// Which handler table a name refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Guard,
    Condition,
    Action,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Guard => write!(f, "guard"),
            HandlerKind::Condition => write!(f, "condition"),
            HandlerKind::Action => write!(f, "action"),
        }
    }
}

impl StateMachineSpec {
    /// Structural errors plus every handler name `is_registered` rejects.
    pub fn validate(&self, is_registered: impl Fn(HandlerKind, &str) -> bool) -> Vec<String> {
        let mut errors = self.structural_errors();
        for (entity, machine) in &self.entities {
            for (state, spec) in &machine.states {
                for t in &spec.allowed_transitions {
                    let refs = t
                        .guard
                        .iter()
                        .map(|g| (HandlerKind::Guard, g.as_str()))
                        .chain(
                            t.conditions
                                .iter()
                                .flat_map(|c| c.names())
                                .map(|n| (HandlerKind::Condition, n)),
                        )
                        .chain(t.actions.iter().map(|a| (HandlerKind::Action, a.as_str())));
                    for (kind, name) in refs {
                        if !is_registered(kind, name) {
                            errors.push(format!(
                                "{}: transition {} -> {} uses unknown {} '{}'",
                                entity, state, t.to, kind, name
                            ));
                        }
                    }
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPEC: &str = r#"
task:
  states:
    todo:
      initial: true
      allowed_transitions:
        - to: wip
          guard: can_claim
          actions: [assign_session]
    wip:
      allowed_transitions:
        - to: done
          guard: has_bundle_approval
          conditions:
            - name: has_implementation_report
            - or:
                - [{ name: dependencies_done }]
                - [{ name: no_open_children }, { name: has_session }]
    done:
      final: true
"#;

    #[test]
    fn test_parse_yaml_spec() {
        let spec: StateMachineSpec = serde_yaml::from_str(SPEC).unwrap();
        let task = spec.get("task").unwrap();
        assert_eq!(task.initial_state(), Some("todo"));
        assert!(task.states["done"].terminal);

        let t = task.find_transition("wip", "done").unwrap();
        assert_eq!(t.guard.as_deref(), Some("has_bundle_approval"));
        assert_eq!(t.conditions.len(), 2);
        assert!(matches!(t.conditions[1], ConditionSpec::AnyOf { .. }));
        assert_eq!(
            t.conditions[1].names(),
            vec!["dependencies_done", "no_open_children", "has_session"]
        );
        assert!(task.find_transition("todo", "done").is_none());
        assert!(spec.structural_errors().is_empty());
    }

    #[test]
    fn test_undeclared_target_is_reported() {
        let mut spec: StateMachineSpec = serde_yaml::from_str(SPEC).unwrap();
        spec.entities
            .get_mut("task")
            .unwrap()
            .states
            .get_mut("todo")
            .unwrap()
            .allowed_transitions
            .push(TransitionSpec {
                to: "archived".into(),
                guard: None,
                conditions: vec![],
                actions: vec![],
            });
        let errors = spec.structural_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("archived"));
    }

    #[test]
    fn test_validate_reports_unknown_handlers() {
        let spec: StateMachineSpec = serde_yaml::from_str(SPEC).unwrap();
        let errors = spec.validate(|kind, name| !(kind == HandlerKind::Guard && name == "can_claim"));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unknown guard 'can_claim'"));
        assert!(spec.validate(|_, _| true).is_empty());
    }
}
