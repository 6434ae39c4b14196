mod models;
pub mod name;
mod variables;

pub use models::*;
pub use variables::{TemplateVariable, VariableInput, VariableTemplate};
