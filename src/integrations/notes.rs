//! Keyword-scored markdown notes used as prompt context.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::NotesConfig;

/// Words too common to score on.
const STOP_WORDS: [&str; 4] = ["the", "and", "for", "with"];

/// Shortest query word considered.
const MIN_WORD_CHARS: usize = 3;

/// Supplies optional context text for a prompt.
pub trait NotesProvider: Send + Sync {
    /// Context relevant to `query`, or `None` when nothing matches.
    fn build_context(&self, query: &str) -> Option<String>;
}

/// Scans `*.md` files under a directory.
#[derive(Debug, Clone)]
pub struct MarkdownNotes {
    dir: PathBuf,
    max_snippets: usize,
    snippet_chars: usize,
}

impl MarkdownNotes {
    /// Build for `dir` with the configured limits.
    #[must_use]
    pub fn new(dir: PathBuf, config: &NotesConfig) -> Self {
        Self {
            dir,
            max_snippets: config.max_snippets.max(1),
            snippet_chars: config.snippet_chars,
        }
    }

    fn notes(&self) -> Vec<PathBuf> {
        let pattern = format!(
            "{}/**/*.md",
            glob::Pattern::escape(&self.dir.display().to_string())
        );
        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "invalid notes pattern");
                return Vec::new();
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .filter(|path| path.is_file() && !is_hidden(path))
            .collect();
        paths.sort();
        paths
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Lowercase query words worth scoring on.
#[must_use]
pub fn query_words(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .filter(|word| word.len() >= MIN_WORD_CHARS && !STOP_WORDS.contains(word))
        .map(str::to_owned)
        .collect()
}

impl NotesProvider for MarkdownNotes {
    fn build_context(&self, query: &str) -> Option<String> {
        let words = query_words(query);
        if words.is_empty() {
            return None;
        }

        let mut scored: Vec<(usize, PathBuf, String)> = Vec::new();
        for path in self.notes() {
            let Ok(body) = std::fs::read_to_string(&path) else {
                continue;
            };
            let lowered = body.to_lowercase();
            let score: usize = words.iter().map(|w| lowered.matches(w.as_str()).count()).sum();
            if score == 0 {
                continue;
            }
            let flat = body.trim().replace('\n', " ");
            let mut snippet: String = flat.chars().take(self.snippet_chars).collect();
            if flat.chars().count() > self.snippet_chars {
                snippet.push('…');
            }
            scored.push((score, path, snippet));
        }

        if scored.is_empty() {
            return None;
        }
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.truncate(self.max_snippets);
        debug!(matches = scored.len(), "notes context built");

        let mut lines = vec!["Memory notes (local markdown):".to_owned()];
        for (score, path, snippet) in scored {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let rel = path.strip_prefix(&self.dir).unwrap_or(&path);
            lines.push(format!("- {stem} ({score} hits): {}", rel.display()));
            lines.push(format!("  {snippet}"));
        }
        Some(lines.join("\n"))
    }
}
