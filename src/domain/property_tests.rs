//! Property-based tests for the state machine engine
//!
//! These tests use proptest to verify invariants across many random inputs.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::{load_config, ConfigLayers};
    use crate::domain::{HandlerRegistry, StateMachineEngine, TransitionContext};
    use crate::schemas::{Entity, EntityType, StateMachineSpec};
    use proptest::prelude::*;

    // ===== STRATEGY HELPERS =====

    const TASK_STATES: [&str; 6] = ["todo", "wip", "blocked", "done", "validated", "limbo"];

    fn default_engine() -> StateMachineEngine {
        let config = load_config(&ConfigLayers::default()).unwrap();
        StateMachineEngine::from_config(&config).unwrap()
    }

    /// Any task state name, including one no machine declares
    fn any_task_state() -> impl Strategy<Value = &'static str> {
        prop::sample::select(TASK_STATES.to_vec())
    }

    fn any_session() -> impl Strategy<Value = Option<String>> {
        prop_oneof![Just(None), Just(Some("s1".to_string())), Just(Some("s2".to_string()))]
    }

    /// Random transition facts
    fn any_context() -> impl Strategy<Value = TransitionContext> {
        (
            any_session(),
            any_session(),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            prop::collection::vec("T-[0-9]", 0..3),
            prop::option::of(1u32..6),
        )
            .prop_map(
                |(session, owner, approved, rejected, report, deps, children, round)| {
                    TransitionContext {
                        session_id: session,
                        owner_session: owner,
                        bundle_approved: approved,
                        bundle_rejected: rejected,
                        has_implementation_report: report,
                        dependencies_done: deps,
                        open_children: children,
                        round,
                        ..Default::default()
                    }
                },
            )
    }

    fn any_task() -> impl Strategy<Value = Entity> {
        (any_task_state(), any_session()).prop_map(|(state, session)| {
            Entity::new(EntityType::Task, "T-1", state).with_session(session)
        })
    }

    // ===== SOUNDNESS TESTS =====

    proptest! {
        /// Property: no transition outside the declared set is ever allowed
        #[test]
        fn test_undeclared_transitions_never_allowed(
            from in any_task_state(),
            to in any_task_state(),
            ctx in any_context()
        ) {
            let engine = default_engine();
            let declared = engine
                .spec()
                .get("task")
                .and_then(|m| m.find_transition(from, to))
                .is_some();
            if engine.validate("task", from, to, &ctx).is_ok() {
                prop_assert!(declared);
            }
        }

        /// Property: a fail_closed guard denies every context
        #[test]
        fn test_fail_closed_always_denies(ctx in any_context()) {
            let spec: StateMachineSpec = serde_yaml::from_str(
                "task:\n  states:\n    a:\n      allowed_transitions:\n        - to: b\n          guard: fail_closed\n    b: {}\n",
            )
            .unwrap();
            let engine =
                StateMachineEngine::new(spec, Arc::new(HandlerRegistry::with_builtins())).unwrap();
            prop_assert!(engine.validate("task", "a", "b", &ctx).is_err());
        }

        /// Property: done is only reachable with an approved bundle
        #[test]
        fn test_done_requires_approval(ctx in any_context()) {
            let engine = default_engine();
            if engine.validate("task", "wip", "done", &ctx).is_ok() {
                prop_assert!(ctx.bundle_approved);
                prop_assert!(ctx.has_implementation_report);
                prop_assert!(ctx.open_children.is_empty());
            }
        }
    }

    // ===== IMMUTABILITY TESTS =====

    proptest! {
        /// Property: transition never mutates its input
        #[test]
        fn test_transition_never_mutates(
            task in any_task(),
            to in any_task_state(),
            ctx in any_context()
        ) {
            let original = task.clone();
            let _ = default_engine().transition(&task, to, &ctx);
            prop_assert_eq!(task, original);
        }

        /// Property: a successful transition lands exactly on the target state
        #[test]
        fn test_transition_lands_on_target(
            task in any_task(),
            to in any_task_state(),
            ctx in any_context()
        ) {
            if let Ok(next) = default_engine().transition(&task, to, &ctx) {
                prop_assert_eq!(next.state.as_str(), to);
                prop_assert!(next.updated_at >= task.updated_at);
                prop_assert_eq!(next.id, task.id);
            }
        }

        /// Property: validate and validate_and_execute agree on acceptance
        #[test]
        fn test_validate_agrees_with_execute(
            task in any_task(),
            to in any_task_state(),
            ctx in any_context()
        ) {
            let engine = default_engine();
            let ctx = ctx.with_owner(&task);
            let validated = engine.validate("task", &task.state, to, &ctx).is_ok();
            let executed = engine.validate_and_execute(&task, to, &ctx, false).is_ok();
            prop_assert_eq!(validated, executed);
        }
    }
}
