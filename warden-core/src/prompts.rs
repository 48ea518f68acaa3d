use warden_policy::PolicySpec;
use warden_schema::{FieldKind, SchemaDescriptor, TableSchema};
use warden_syntax::SourceGrammar;
use warden_types::{ArtifactKind, ChatMessage, GenerationRequest, Rejection};

pub const NO_CONTRACTS: &str = "(no contract descriptor found; generate with standard patterns)";

/// Fixed prompt material for one session.
#[derive(Clone, Debug)]
pub struct PromptContext {
    pub kind: ArtifactKind,
    pub system: String,
    /// Prepended to the caller's request.
    pub instruction_prefix: String,
    /// Tail of the corrective message sent after a rejection.
    pub correction: String,
    pub max_tokens: u32,
}

impl PromptContext {
    pub fn request(&self, text: &str, feedback: Option<&str>, temperature: f32) -> GenerationRequest {
        let mut messages = vec![
            ChatMessage::system(self.system.clone()),
            ChatMessage::user(format!("{}{}", self.instruction_prefix, text)),
        ];
        if let Some(note) = feedback {
            messages.push(ChatMessage::user(note.to_string()));
        }
        GenerationRequest {
            kind: self.kind,
            messages,
            max_tokens: self.max_tokens,
            temperature,
        }
    }

    pub fn feedback(&self, reason: &Rejection) -> String {
        format!("The previous answer was rejected: {reason}. {}", self.correction)
    }
}

pub fn clause_context(table: &TableSchema, policy: &PolicySpec, max_tokens: u32) -> PromptContext {
    let mut system = format!(
        "You are a SQL query assistant. Given a natural language query about log data, \
         generate ONLY a SQL WHERE clause (without the word WHERE).\n\n{}\n\n",
        table.summary()
    );
    system.push_str(
        "Rules:\n\
         - Output ONLY the WHERE clause content, nothing else\n\
         - Use single quotes for string values\n\
         - Use standard SQL operators: =, !=, <, >, <=, >=, LIKE, BETWEEN, IN, AND, OR, NOT, IS NULL, IS NOT NULL\n",
    );
    system.push_str(&format!(
        "- For time-based queries, compare {} against ISO 8601 strings\n",
        table.recency_field
    ));
    system.push_str(
        "- Do NOT use subqueries, UNION, or any DDL/DML statements\n\
         - Do NOT use functions like LOWER(), UPPER(), etc.\n",
    );
    system.push_str(&format!(
        "- Keep the clause under {} characters\n",
        policy.max_length()
    ));

    let examples = clause_examples(table);
    if !examples.is_empty() {
        system.push_str("\nExamples:\n");
        for ex in examples {
            system.push_str(&format!("{ex}\n"));
        }
    }

    PromptContext {
        kind: ArtifactKind::Clause,
        system: system.trim_end().to_string(),
        instruction_prefix: String::new(),
        correction: "Return ONLY a corrected WHERE clause that uses the available columns."
            .to_string(),
        max_tokens,
    }
}

fn clause_examples(table: &TableSchema) -> Vec<String> {
    let mut out = Vec::new();
    let text_fields: Vec<_> = table
        .fields
        .iter()
        .filter(|f| f.kind == FieldKind::Text && !f.examples.is_empty())
        .take(2)
        .collect();
    if !text_fields.is_empty() {
        let parts: Vec<String> = text_fields
            .iter()
            .map(|f| format!("{} = '{}'", f.name, f.examples[f.examples.len() - 1]))
            .collect();
        out.push(parts.join(" AND "));
    }
    if let Some(f) = table.fields.iter().find(|f| f.kind == FieldKind::Real) {
        out.push(format!("{} > 0.05", f.name));
    }
    out
}

pub fn code_context(
    grammar: SourceGrammar,
    contracts: Option<&SchemaDescriptor>,
    max_tokens: u32,
) -> PromptContext {
    let (records, enums) = match contracts {
        Some(desc) if !desc.records.is_empty() || !desc.enums.is_empty() => {
            let records = desc.record_summaries();
            let records = if records.is_empty() {
                "None".to_string()
            } else {
                records
            };
            (records, desc.enum_summaries())
        }
        _ => (NO_CONTRACTS.to_string(), "None".to_string()),
    };
    let lang = grammar.display_name();

    let system = format!(
        "You are a code generator for a governance-first AI platform.\n\n\
         Generate ONLY valid {lang} code. No markdown fences, no explanations, no prose \
         outside the code. The output must parse without syntax errors.\n\n\
         Platform conventions:\n{conventions}\n\n\
         Available record contracts:\n\n{records}\n\n\
         Available enums:\n\n{enums}\n\n\
         Code patterns to follow:\n\
         1. Deterministic logic in code, not the model (the model extracts or translates, code decides)\n\
         2. Structured outputs validated against the record contracts\n\
         3. Cost tracking: count tokens and USD for every model call\n\
         4. Audit logging: record every significant action as an audit event\n\
         5. Error handling: explicit error types, no catch-all handlers\n\n\
         Generate a complete, runnable {lang} module with imports, types, functions \
         and a command-line entry point.",
        conventions = conventions(grammar),
    );

    PromptContext {
        kind: ArtifactKind::Code,
        system,
        instruction_prefix: format!("Generate a {lang} module for: "),
        correction: format!("Fix it and return ONLY the corrected {lang} code."),
        max_tokens,
    }
}

fn conventions(grammar: SourceGrammar) -> &'static str {
    match grammar {
        SourceGrammar::Python => {
            "- Every public function must log an audit event\n\
             - Every model call must track cost\n\
             - Use Pydantic models for all data validation\n\
             - Use type hints on all functions\n\
             - Include a module docstring explaining what the file does\n\
             - Include a __main__ block with argparse for CLI usage"
        }
        SourceGrammar::Rust => {
            "- Every public function must log an audit event\n\
             - Every model call must track cost\n\
             - Use serde-derived structs for all data crossing a boundary\n\
             - Return Result from fallible functions; no unwrap outside tests\n\
             - Include a module-level doc comment explaining what the file does\n\
             - Include a main function that parses command-line arguments"
        }
    }
}
