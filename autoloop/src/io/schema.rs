//! JSON Schema validation for files other processes may write.

use std::sync::LazyLock;

use anyhow::{Result, anyhow};
use jsonschema::Validator;
use serde_json::Value;

const STATE_SCHEMA: &str = include_str!("../../schemas/state.schema.json");
const IDEA_SCHEMA: &str = include_str!("../../schemas/idea.schema.json");
const IDEA_INDEX_SCHEMA: &str = include_str!("../../schemas/idea_index.schema.json");

/// Embedded schemas, compiled once.
#[derive(Debug, Clone, Copy)]
pub enum Schema {
    State,
    Idea,
    IdeaIndex,
}

fn compile(raw: &str) -> Validator {
    let schema: Value = serde_json::from_str(raw).expect("embedded schema is valid json");
    jsonschema::validator_for(&schema).expect("embedded schema compiles")
}

static STATE: LazyLock<Validator> = LazyLock::new(|| compile(STATE_SCHEMA));
static IDEA: LazyLock<Validator> = LazyLock::new(|| compile(IDEA_SCHEMA));
static IDEA_INDEX: LazyLock<Validator> = LazyLock::new(|| compile(IDEA_INDEX_SCHEMA));

impl Schema {
    fn validator(self) -> &'static Validator {
        match self {
            Schema::State => &STATE,
            Schema::Idea => &IDEA,
            Schema::IdeaIndex => &IDEA_INDEX,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Schema::State => "state",
            Schema::Idea => "idea",
            Schema::IdeaIndex => "idea index",
        }
    }

    /// Validate `instance`, joining every violation into one error.
    pub fn validate(self, instance: &Value) -> Result<()> {
        let validator = self.validator();
        if validator.is_valid(instance) {
            return Ok(());
        }
        let messages = validator
            .iter_errors(instance)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        Err(anyhow!(
            "{} schema validation failed: {}",
            self.label(),
            messages.join("; ")
        ))
    }
}
