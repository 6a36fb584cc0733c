//! Typed workflow templates.
//!
//! - `schema`: template, parameter and prompt-slot types
//! - `text`: the small text-template language used by prompt slots
//! - `manager`: validation, instantiation and file persistence
//! - `builtin`: stock templates

pub mod builtin;
pub mod manager;
pub mod schema;
pub mod text;

pub use manager::TemplateManager;
pub use schema::{ParameterType, PromptSlot, TemplateMetadata, TemplateParameter, WorkflowTemplate};
pub use text::TextTemplate;
