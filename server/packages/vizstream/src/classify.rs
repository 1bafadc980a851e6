use vizstream_agent_client::UseCase;

use crate::formats;

const VISUALIZATION_KEYWORDS: &[&str] = &[
    "chart",
    "graph",
    "plot",
    "visualize",
    "analyze",
    "dashboard",
    "trend",
    "correlation",
    "statistics",
    "metrics",
    "distribution",
];

const TEXT_KEYWORDS: &[&str] = &["summarize", "explain", "extract", "find", "search", "read"];

fn mentions(prompt: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| prompt.contains(keyword))
}

/// Picks the execution modes for an attachment. Always non-empty, ordered
/// `Chat` before `CodeExecution`.
///
/// The MIME type is accepted for interface symmetry with the request but the
/// decision is made on the extension and the prompt.
pub fn classify(file_name: &str, _mime_type: &str, prompt: &str) -> Vec<UseCase> {
    let prompt = prompt.to_lowercase();
    let wants_viz = mentions(&prompt, VISUALIZATION_KEYWORDS);
    let wants_text = mentions(&prompt, TEXT_KEYWORDS);

    if formats::is_data_file(file_name) {
        return match (wants_viz, wants_text) {
            (true, true) => vec![UseCase::Chat, UseCase::CodeExecution],
            (false, true) => vec![UseCase::Chat],
            _ => vec![UseCase::CodeExecution],
        };
    }

    if formats::is_document_file(file_name) {
        return if wants_viz {
            vec![UseCase::Chat, UseCase::CodeExecution]
        } else {
            vec![UseCase::Chat]
        };
    }

    if wants_viz {
        vec![UseCase::CodeExecution]
    } else {
        vec![UseCase::Chat]
    }
}

/// Caller override for the execution mode, `auto` defers to [`classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UseCaseSelection {
    #[default]
    Auto,
    Chat,
    CodeInterpreter,
    Both,
}

impl UseCaseSelection {
    pub fn resolve(self, file_name: &str, mime_type: &str, prompt: &str) -> Vec<UseCase> {
        match self {
            Self::Auto => classify(file_name, mime_type, prompt),
            Self::Chat => vec![UseCase::Chat],
            Self::CodeInterpreter => vec![UseCase::CodeExecution],
            Self::Both => vec![UseCase::Chat, UseCase::CodeExecution],
        }
    }
}
