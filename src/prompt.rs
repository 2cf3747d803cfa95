use anyhow::{Context, Result};
use std::path::Path;

use crate::error::PromptError;
use crate::text::content_hash;

pub const DEFAULT_SLOT: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Slot,
}

/// A prompt template with a single named slot.
///
/// Placeholders use `{name}` syntax; `{{` and `}}` produce literal braces.
/// The template is parsed once at construction, so rendering cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    name: String,
    text: String,
    slot: String,
    hash: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Result<Self, PromptError> {
        Self::with_slot(name, text, DEFAULT_SLOT)
    }

    pub fn with_slot(
        name: impl Into<String>,
        text: impl Into<String>,
        slot: &str,
    ) -> Result<Self, PromptError> {
        let name = name.into();
        let text = text.into();
        let segments = parse(&name, &text, slot)?;
        Ok(Self {
            hash: content_hash(&text),
            name,
            text,
            slot: slot.to_string(),
            segments,
        })
    }

    /// Loads a template from disk; the file name becomes the template name.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt template {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, text)?)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn render(&self, input: &str) -> String {
        let mut out = String::with_capacity(self.text.len() + input.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Slot => out.push_str(input),
            }
        }
        out
    }
}

fn parse(name: &str, text: &str, slot: &str) -> Result<Vec<Segment>, PromptError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut saw_slot = false;
    let mut chars = text.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    literal.push('{');
                    continue;
                }
                let mut placeholder = String::new();
                let mut closed = false;
                for (_, inner) in chars.by_ref() {
                    if inner == '}' {
                        closed = true;
                        break;
                    }
                    if inner == '{' {
                        break;
                    }
                    placeholder.push(inner);
                }
                if !closed {
                    return Err(PromptError::UnbalancedBrace {
                        template: name.to_string(),
                        offset,
                    });
                }
                if placeholder.trim() != slot {
                    return Err(PromptError::UnknownPlaceholder {
                        template: name.to_string(),
                        placeholder,
                    });
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Slot);
                saw_slot = true;
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                    literal.push('}');
                } else {
                    return Err(PromptError::UnbalancedBrace {
                        template: name.to_string(),
                        offset,
                    });
                }
            }
            other => literal.push(other),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    if !saw_slot {
        return Err(PromptError::MissingSlot {
            template: name.to_string(),
            slot: slot.to_string(),
        });
    }

    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_input() {
        let t = PromptTemplate::new("restore.md", "Restore diacritics:\n{input}\n").unwrap();
        assert_eq!(
            t.render("Maine, cand rasare soarele"),
            "Restore diacritics:\nMaine, cand rasare soarele\n"
        );
    }

    #[test]
    fn test_render_repeated_slot() {
        let t = PromptTemplate::new("twice", "{input} / {input}").unwrap();
        assert_eq!(t.render("x"), "x / x");
    }

    #[test]
    fn test_escaped_braces() {
        let t = PromptTemplate::new("json", "Reply as {{\"text\": \"{input}\"}}").unwrap();
        assert_eq!(t.render("mar"), "Reply as {\"text\": \"mar\"}");
    }

    #[test]
    fn test_input_is_not_reinterpreted() {
        let t = PromptTemplate::new("t", "<{input}>").unwrap();
        assert_eq!(t.render("{input} }{"), "<{input} }{>");
    }

    #[test]
    fn test_custom_slot() {
        let t = PromptTemplate::with_slot("hello", "Hello, {name}!", "name").unwrap();
        assert_eq!(t.render("Test"), "Hello, Test!");
        assert_eq!(t.slot(), "name");
    }

    #[test]
    fn test_unknown_placeholder() {
        let err = PromptTemplate::new("t", "{input} {other}").unwrap_err();
        assert_eq!(
            err,
            PromptError::UnknownPlaceholder {
                template: "t".to_string(),
                placeholder: "other".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_slot() {
        let err = PromptTemplate::new("t", "no slot here").unwrap_err();
        assert!(matches!(err, PromptError::MissingSlot { .. }));
    }

    #[test]
    fn test_unbalanced_braces() {
        assert!(matches!(
            PromptTemplate::new("t", "{input").unwrap_err(),
            PromptError::UnbalancedBrace { offset: 0, .. }
        ));
        assert!(matches!(
            PromptTemplate::new("t", "{input} }").unwrap_err(),
            PromptError::UnbalancedBrace { offset: 8, .. }
        ));
    }

    #[test]
    fn test_from_file_uses_file_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("restore_diacritics.md");
        std::fs::write(&path, "Fix: {input}").unwrap();
        let t = PromptTemplate::from_file(&path).unwrap();
        assert_eq!(t.name(), "restore_diacritics.md");
        assert_eq!(t.hash(), content_hash("Fix: {input}"));
    }
}
