// prompt_template.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{ConversationError, ConversationResult};
use crate::models::content::ContentBlock;
use crate::providers::base::SystemPrompt;

/// Values for a bot's prompt fields, either in field order or by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Argv {
    Positional(Vec<String>),
    Named(BTreeMap<String, String>),
}

impl Default for Argv {
    fn default() -> Self {
        Argv::Positional(Vec::new())
    }
}

impl Argv {
    pub fn none() -> Self {
        Argv::default()
    }

    /// Pair each declared field with its value. Positional values bind in
    /// order and surplus fields stay unbound. Named values must cover every
    /// field.
    pub fn bind(&self, fields: &[String]) -> ConversationResult<Vec<(String, String)>> {
        match self {
            Argv::Positional(values) => Ok(fields
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect()),
            Argv::Named(values) => {
                let missing: Vec<String> = fields
                    .iter()
                    .filter(|field| !values.contains_key(*field))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return Err(ConversationError::FieldValuesMissing { fields: missing });
                }
                Ok(fields
                    .iter()
                    .map(|field| (field.clone(), values[field].clone()))
                    .collect())
            }
        }
    }
}

impl From<Vec<String>> for Argv {
    fn from(values: Vec<String>) -> Self {
        Argv::Positional(values)
    }
}

impl From<Vec<&str>> for Argv {
    fn from(values: Vec<&str>) -> Self {
        Argv::Positional(values.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Argv {
    fn from(values: [&str; N]) -> Self {
        Argv::Positional(values.iter().map(|v| v.to_string()).collect())
    }
}

impl From<BTreeMap<String, String>> for Argv {
    fn from(values: BTreeMap<String, String>) -> Self {
        Argv::Named(values)
    }
}

impl From<std::collections::HashMap<String, String>> for Argv {
    fn from(values: std::collections::HashMap<String, String>) -> Self {
        Argv::Named(values.into_iter().collect())
    }
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}").expect("valid placeholder regex"))
}

/// Replace every `{{FIELD}}` with its bound value. Anything unbound is left
/// as literal text.
pub fn render(template: &str, bindings: &[(String, String)]) -> String {
    bindings
        .iter()
        .fold(template.to_string(), |text, (field, value)| {
            text.replace(&format!("{{{{{field}}}}}"), value)
        })
}

/// Names of the `{{FIELD}}` placeholders still present in `text`
pub fn placeholders(text: &str) -> Vec<String> {
    placeholder_pattern()
        .captures_iter(text)
        .map(|captures| captures[1].to_string())
        .collect()
}

/// Render every text segment of a system prompt
pub fn render_system_prompt(prompt: &SystemPrompt, bindings: &[(String, String)]) -> SystemPrompt {
    match prompt {
        SystemPrompt::Text(text) => SystemPrompt::Text(render(text, bindings)),
        SystemPrompt::Segments(segments) => SystemPrompt::Segments(
            segments
                .iter()
                .map(|segment| match segment {
                    ContentBlock::Text(block) => {
                        let mut rendered = block.clone();
                        rendered.text = render(&block.text, bindings);
                        ContentBlock::Text(rendered)
                    }
                    other => other.clone(),
                })
                .collect(),
        ),
    }
}

/// Read a prompt template from disk, without rendering it
pub fn load_prompt_file(path: impl AsRef<Path>) -> ConversationResult<String> {
    let path = path.as_ref();
    fs::read_to_string(path).map_err(|source| ConversationError::Prompt {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::CacheControl;
    use std::fs;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_render_positional() {
        let template = "You are a {{ANIMAL_TYPE}} who is {{COLOUR}}.";
        let bindings = Argv::from(["cat", "green"])
            .bind(&fields(&["ANIMAL_TYPE", "COLOUR"]))
            .unwrap();
        assert_eq!(render(template, &bindings), "You are a cat who is green.");
    }

    #[test]
    fn test_render_named() {
        let mut values = BTreeMap::new();
        values.insert("COLOUR".to_string(), "green".to_string());
        values.insert("ANIMAL_TYPE".to_string(), "cat".to_string());

        let bindings = Argv::from(values)
            .bind(&fields(&["ANIMAL_TYPE", "COLOUR"]))
            .unwrap();
        assert_eq!(
            render("{{ANIMAL_TYPE}} / {{COLOUR}}", &bindings),
            "cat / green"
        );
    }

    #[test]
    fn test_named_argv_reports_every_missing_field() {
        let mut values = BTreeMap::new();
        values.insert("ANIMAL_TYPE".to_string(), "cat".to_string());

        let err = Argv::from(values)
            .bind(&fields(&["ANIMAL_TYPE", "COLOUR", "SIZE"]))
            .unwrap_err();
        match err {
            ConversationError::FieldValuesMissing { fields } => {
                assert_eq!(fields, vec!["COLOUR".to_string(), "SIZE".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_short_positional_argv_leaves_placeholders_literal() {
        let bindings = Argv::from(["cat"])
            .bind(&fields(&["ANIMAL_TYPE", "COLOUR"]))
            .unwrap();
        let rendered = render("{{ANIMAL_TYPE}} is {{COLOUR}}", &bindings);
        assert_eq!(rendered, "cat is {{COLOUR}}");
        assert_eq!(placeholders(&rendered), vec!["COLOUR".to_string()]);
    }

    #[test]
    fn test_render_segments_keeps_cache_markers() {
        let mut cached = ContentBlock::text("Tell me about {{THING}}");
        cached.set_cache_control(Some(CacheControl::Ephemeral));
        let prompt = SystemPrompt::Segments(vec![ContentBlock::text("{{THING}}"), cached]);

        let bindings = vec![("THING".to_string(), "otters".to_string())];
        let SystemPrompt::Segments(rendered) = render_system_prompt(&prompt, &bindings) else {
            panic!("segments expected");
        };
        assert_eq!(rendered[0].as_text(), Some("otters"));
        assert_eq!(rendered[1].as_text(), Some("Tell me about otters"));
        assert_eq!(rendered[1].cache_control(), Some(CacheControl::Ephemeral));
    }

    #[test]
    fn test_load_prompt_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("sysprompt.txt");
        fs::write(&file_path, "Hello, {{NAME}}!").unwrap();

        assert_eq!(load_prompt_file(&file_path).unwrap(), "Hello, {{NAME}}!");
    }

    #[test]
    fn test_load_prompt_file_missing() {
        let err = load_prompt_file("/definitely/not/here.txt").unwrap_err();
        assert!(matches!(err, ConversationError::Prompt { .. }));
    }
}
