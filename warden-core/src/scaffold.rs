//! Module scaffolds: description -> syntax-checked source file.

use warden_schema::SchemaDescriptor;
use warden_syntax::{SourceGrammar, SyntaxValidator, ValidatedCode};

use crate::config::GatewayConfig;
use crate::gateway::{Gateway, SessionReport};
use crate::prompts::{code_context, PromptContext};

const SLUG_WORDS: usize = 4;

pub struct ScaffoldPipeline {
    gateway: Gateway,
    validator: SyntaxValidator,
    context: PromptContext,
}

impl ScaffoldPipeline {
    /// `contracts` feeds record and enum summaries into the prompt; `None`
    /// uses generic guidance.
    pub fn new(
        gateway: Gateway,
        grammar: SourceGrammar,
        contracts: Option<&SchemaDescriptor>,
        cfg: &GatewayConfig,
    ) -> Self {
        Self {
            gateway,
            validator: SyntaxValidator::new(grammar),
            context: code_context(grammar, contracts, cfg.code_max_tokens),
        }
    }

    pub fn grammar(&self) -> SourceGrammar {
        self.validator.grammar()
    }

    pub async fn run(&self, description: &str) -> SessionReport<ValidatedCode> {
        self.gateway
            .generate_and_validate(description, &self.validator, &self.context)
            .await
    }
}

/// `scaffold_<slug>.<ext>`, slug built from the first few words.
pub fn scaffold_file_name(description: &str, grammar: SourceGrammar) -> String {
    let joined = description
        .to_lowercase()
        .split_whitespace()
        .take(SLUG_WORDS)
        .collect::<Vec<_>>()
        .join("_");
    let slug: String = joined
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    let slug = if slug.trim_matches('_').is_empty() {
        "module".to_string()
    } else {
        slug
    };
    format!("scaffold_{slug}.{}", grammar.extension())
}
