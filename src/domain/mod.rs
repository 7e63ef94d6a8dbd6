//! Domain logic: declarative state machines and their handlers

mod engine;
mod handlers;

// Property-based tests (compiled only in test builds)
#[cfg(test)]
mod property_tests;

pub use engine::StateMachineEngine;
pub use handlers::{ActionFn, ConditionFn, GuardFn, HandlerRegistry, TransitionContext};
