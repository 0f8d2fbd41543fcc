//! Prompt templates.
//!
//! A template is plain text with `{{USER_QUERY}}` and `{{CONTEXT}}`
//! placeholders. Templates are validated when they are loaded: a file that
//! lacks a placeholder its [`PromptKind`] requires is rejected right away
//! instead of producing a broken prompt at request time.
//!
//! One template set per language lives under the prompts directory:
//!
//! ```text
//! prompts/
//!   en/keyword_extractor.md
//!   en/context_based_query.md
//!   de/keyword_extractor.md
//!   de/context_based_query.md
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use thiserror::Error;

use crate::config::PromptsConfig;

pub const USER_QUERY: &str = "{{USER_QUERY}}";
pub const CONTEXT: &str = "{{CONTEXT}}";

pub const KEYWORD_FILE: &str = "keyword_extractor.md";
pub const CONTEXT_FILE: &str = "context_based_query.md";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read prompt template {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("prompt template {} is missing the {placeholder} placeholder", .path.display())]
    MissingPlaceholder {
        path: PathBuf,
        placeholder: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    KeywordExtraction,
    ContextQuery,
}

impl PromptKind {
    pub fn required_placeholders(&self) -> &'static [&'static str] {
        match self {
            PromptKind::KeywordExtraction => &[USER_QUERY],
            PromptKind::ContextQuery => &[CONTEXT, USER_QUERY],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    kind: PromptKind,
    path: PathBuf,
    text: String,
}

impl PromptTemplate {
    pub fn load(path: &Path, kind: PromptKind) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, kind, text)
    }

    /// Validate template text that did not come from disk. `origin` is only
    /// used in error messages.
    pub fn parse(origin: &Path, kind: PromptKind, text: String) -> Result<Self, TemplateError> {
        for placeholder in kind.required_placeholders() {
            if !text.contains(placeholder) {
                return Err(TemplateError::MissingPlaceholder {
                    path: origin.to_path_buf(),
                    placeholder,
                });
            }
        }
        Ok(Self {
            kind,
            path: origin.to_path_buf(),
            text,
        })
    }

    pub fn kind(&self) -> PromptKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replace every occurrence of each placeholder in one pass over the
    /// template. Inserted values are not scanned again, so a query that
    /// itself contains `{{CONTEXT}}` is kept literally.
    pub fn render(&self, values: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text.as_str();
        while let Some(pos) = rest.find("{{") {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos..];
            match values.iter().find(|(key, _)| tail.starts_with(key)) {
                Some((key, value)) => {
                    out.push_str(value);
                    rest = &tail[key.len()..];
                }
                None => {
                    out.push_str("{{");
                    rest = &tail[2..];
                }
            }
        }
        out.push_str(rest);
        out
    }
}

/// The keyword-extraction and context-query templates used together by a responder.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    pub keyword: Arc<PromptTemplate>,
    pub context: Arc<PromptTemplate>,
}

impl TemplateSet {
    /// Template paths for the configured language, with explicit paths
    /// taking precedence over both the config file and the language set.
    pub fn resolve_paths(
        config: &PromptsConfig,
        keyword_override: Option<&Path>,
        context_override: Option<&Path>,
    ) -> (PathBuf, PathBuf) {
        let lang_dir = config.dir.join(&config.language);
        let keyword = keyword_override
            .map(Path::to_path_buf)
            .or_else(|| config.keyword_prompt_path.clone())
            .unwrap_or_else(|| lang_dir.join(KEYWORD_FILE));
        let context = context_override
            .map(Path::to_path_buf)
            .or_else(|| config.context_prompt_path.clone())
            .unwrap_or_else(|| lang_dir.join(CONTEXT_FILE));
        (keyword, context)
    }

    pub fn load(keyword_path: &Path, context_path: &Path) -> Result<Self, TemplateError> {
        Ok(Self {
            keyword: Arc::new(PromptTemplate::load(
                keyword_path,
                PromptKind::KeywordExtraction,
            )?),
            context: Arc::new(PromptTemplate::load(context_path, PromptKind::ContextQuery)?),
        })
    }

    pub fn render_keywords(&self, query: &str) -> String {
        self.keyword.render(&[(USER_QUERY, query)])
    }

    pub fn render_context(&self, context: &str, query: &str) -> String {
        self.context.render(&[(CONTEXT, context), (USER_QUERY, query)])
    }
}

struct Cached {
    modified: Option<SystemTime>,
    template: Arc<PromptTemplate>,
}

/// Loaded templates keyed by path. A template is read again when its file's
/// modification time changes; a different path is simply a different entry.
#[derive(Default)]
pub struct TemplateStore {
    cache: Mutex<HashMap<(PathBuf, PromptKind), Cached>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path, kind: PromptKind) -> Result<Arc<PromptTemplate>, TemplateError> {
        let modified = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map_err(|source| TemplateError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let key = (path.to_path_buf(), kind);
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.get(&key) {
            if cached.modified == Some(modified) {
                return Ok(cached.template.clone());
            }
        }

        tracing::debug!(path = %path.display(), "loading prompt template");
        let template = Arc::new(PromptTemplate::load(path, kind)?);
        cache.insert(
            key,
            Cached {
                modified: Some(modified),
                template: template.clone(),
            },
        );
        Ok(template)
    }

    pub fn load_set(
        &self,
        keyword_path: &Path,
        context_path: &Path,
    ) -> Result<TemplateSet, TemplateError> {
        Ok(TemplateSet {
            keyword: self.get(keyword_path, PromptKind::KeywordExtraction)?,
            context: self.get(context_path, PromptKind::ContextQuery)?,
        })
    }
}
