use serde::{Deserialize, Serialize};

/// Input form shown to module consumers, parsed from `variables.json`-style files.
pub type VariableTemplate = Vec<TemplateVariable>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_help: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(flatten)]
    pub input: VariableInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VariableInput {
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
        #[serde(default = "default_quote_value")]
        quote_value: bool,
    },
    Boolean {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<bool>,
    },
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<f64>,
    },
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<Vec<String>>,
    },
    Select {
        choices: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
    },
}

fn default_quote_value() -> bool {
    true
}

impl TemplateVariable {
    #[must_use]
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            additional_help: None,
            required: true,
            input: VariableInput::Text {
                default_value: None,
                quote_value: true,
            },
        }
    }
}
