//! Command templates ("cheatsheets").
//!
//! A cheatsheet is a markdown file per phase. `#` headings open sections
//! and every line that is entirely a backtick-quoted command is a
//! template. Templates reference the target as `{target}`.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

use crate::phase::Phase;
use crate::target::Target;

/// Placeholder substituted with the quoted target.
pub const TARGET_PLACEHOLDER: &str = "{target}";

/// Source of command templates for a phase.
pub trait CommandTemplates: Send + Sync {
    /// Ordered templates for `phase`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the templates cannot be loaded; callers
    /// degrade to an empty set.
    fn templates(&self, phase: Phase) -> std::io::Result<Vec<String>>;
}

/// No templates for any phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTemplates;

impl CommandTemplates for NoTemplates {
    fn templates(&self, _phase: Phase) -> std::io::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Reads `<dir>/<phase_id>.md` on every call.
#[derive(Debug, Clone)]
pub struct MarkdownCheatsheets {
    dir: PathBuf,
}

impl MarkdownCheatsheets {
    /// Creates a source rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the cheatsheet for `phase`.
    #[must_use]
    pub fn path_for(&self, phase: Phase) -> PathBuf {
        self.dir.join(format!("{}.md", phase.id()))
    }

    /// Directory holding the cheatsheets.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CommandTemplates for MarkdownCheatsheets {
    fn templates(&self, phase: Phase) -> std::io::Result<Vec<String>> {
        let content = std::fs::read_to_string(self.path_for(phase))?;
        Ok(parse_cheatsheet(&content)
            .into_iter()
            .flat_map(|section| section.commands)
            .collect())
    }
}

/// One `#` section of a cheatsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Heading text, lowercased; empty for commands before any heading.
    pub title: String,
    /// Commands in file order.
    pub commands: Vec<String>,
}

/// Parses a cheatsheet into sections, in file order.
///
/// Code fences (```` ``` ````) are not commands.
#[must_use]
pub fn parse_cheatsheet(content: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();

    for line in content.lines().map(str::trim) {
        if line.starts_with('#') {
            sections.push(Section {
                title: line.trim_start_matches('#').trim().to_lowercase(),
                commands: Vec::new(),
            });
        } else if let Some(cmd) = command_line(line) {
            if sections.is_empty() {
                sections.push(Section {
                    title: String::new(),
                    commands: Vec::new(),
                });
            }
            if let Some(current) = sections.last_mut() {
                current.commands.push(cmd.to_string());
            }
        }
    }

    sections
}

fn command_line(line: &str) -> Option<&str> {
    if line.starts_with("```") {
        return None;
    }
    let inner = line.strip_prefix('`')?.strip_suffix('`')?.trim();
    (!inner.is_empty() && !inner.contains('`')).then_some(inner)
}

/// Substitutes the shell-quoted target into one template.
///
/// # Errors
///
/// Fails when the target cannot be quoted (it contains a NUL byte).
pub fn render(template: &str, target: &Target) -> Result<String, shlex::QuoteError> {
    let quoted: Cow<'_, str> = shlex::try_quote(target.as_str())?;
    Ok(template.replace(TARGET_PLACEHOLDER, &quoted))
}

/// Loads and renders the templates for `phase`, degrading to none.
pub fn rendered_commands(
    source: &dyn CommandTemplates,
    phase: Phase,
    target: &Target,
) -> Vec<String> {
    let templates = match source.templates(phase) {
        Ok(t) => t,
        Err(e) => {
            warn!(phase = %phase, error = %e, "command templates unavailable; dispatching without commands");
            return Vec::new();
        }
    };
    templates
        .iter()
        .filter_map(|t| match render(t, target) {
            Ok(cmd) => Some(cmd),
            Err(e) => {
                warn!(phase = %phase, error = %e, "skipping template that cannot be rendered");
                None
            }
        })
        .collect()
}

/// Builds the request `options`: rendered commands merged with static
/// phase options. `None` when both are empty.
#[must_use]
pub fn build_options(commands: &[String], static_options: &Map<String, Value>) -> Option<Value> {
    if commands.is_empty() && static_options.is_empty() {
        return None;
    }
    let mut options = static_options.clone();
    if !commands.is_empty() {
        options.insert(
            "commands".to_string(),
            Value::Array(commands.iter().cloned().map(Value::String).collect()),
        );
    }
    Some(Value::Object(options))
}
