//! Validator prompt templates

mod template;

pub use template::{
    load_validator_template, render_prompt, PromptProvider, PromptVariables,
    TemplatePromptProvider,
};
