use std::collections::HashSet;
use std::sync::LazyLock;

use fancy_regex::Regex;
use itertools::Itertools;

use crate::index::ScoredChunk;

static CITATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid regex"));

/// A source the generated answer refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub source_id: String,
    pub title: String,
}

/// Pull `[Title](source-id)` references out of generated text, keeping only
/// those that point at a retrieved chunk. Duplicates collapse to the first
/// occurrence; order follows the answer text.
pub fn extract_citations(text: &str, context: &[ScoredChunk]) -> Vec<Citation> {
    let known_sources: HashSet<&str> = context
        .iter()
        .map(|chunk| chunk.metadata.source_id.as_str())
        .collect();

    CITATION_REGEX
        .captures_iter(text)
        .filter_map(|capture| capture.ok())
        .filter_map(|capture| {
            let title = capture.get(1)?.as_str();
            let source_id = capture.get(2)?.as_str();
            known_sources.contains(source_id).then(|| Citation {
                source_id: source_id.to_string(),
                title: title.to_string(),
            })
        })
        .unique_by(|citation| citation.source_id.clone())
        .collect()
}
