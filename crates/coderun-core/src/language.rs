//! Language resolution
//!
//! Maps a caller-supplied language name (or a filename) to the runtime profile
//! used by both backends. Resolution is fail-open: anything unrecognized runs
//! as python, and the `Resolution` records that it did so callers can check.

use crate::config::types::ImageConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Go,
    Rust,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Javascript,
        Language::Go,
        Language::Rust,
    ];

    /// Match a case-insensitive language name or alias.
    pub fn from_alias(name: &str) -> Option<Language> {
        match name.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Some(Language::Python),
            "javascript" | "js" | "node" | "nodejs" => Some(Language::Javascript),
            "go" | "golang" => Some(Language::Go),
            "rust" | "rs" => Some(Language::Rust),
            _ => None,
        }
    }

    /// Match on the file extension only; directories in the path are ignored.
    pub fn from_filename(filename: &str) -> Option<Language> {
        let ext = Path::new(filename).extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "py" => Some(Language::Python),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::Javascript),
            "go" => Some(Language::Go),
            "rs" => Some(Language::Rust),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a backend needs to run one language.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeProfile {
    pub language: Language,
    /// Container image for the container backend.
    pub image: String,
    /// Full argv, run with the scratch directory as working directory.
    pub interpreter_command: Vec<String>,
    /// Name the source text is written under inside the scratch directory.
    pub source_filename: String,
    /// Host programs tried in order for `interpreter_command[0]` when running locally.
    pub local_programs: Vec<String>,
    /// Toolchain binaries the local command invokes itself; all must be on `PATH`.
    pub local_toolchain: Vec<String>,
}

impl RuntimeProfile {
    fn new(language: Language, image: &str) -> Self {
        let (source_filename, interpreter_command, local_programs, local_toolchain): (
            &str,
            Vec<&str>,
            Vec<&str>,
            Vec<&str>,
        ) = match language {
            Language::Python => (
                "main.py",
                vec!["python", "-u", "main.py"],
                vec!["python3", "python"],
                vec![],
            ),
            Language::Javascript => ("main.js", vec!["node", "main.js"], vec!["node", "nodejs"], vec![]),
            // Build then exec, so killing the shell kills the program too.
            Language::Go => (
                "main.go",
                vec!["sh", "-c", "go build -o main main.go && exec ./main"],
                vec!["sh"],
                vec!["go"],
            ),
            Language::Rust => (
                "main.rs",
                vec!["sh", "-c", "rustc -O -o main main.rs && exec ./main"],
                vec!["sh"],
                vec!["rustc"],
            ),
        };

        Self {
            language,
            image: image.to_string(),
            interpreter_command: interpreter_command.into_iter().map(String::from).collect(),
            source_filename: source_filename.to_string(),
            local_programs: local_programs.into_iter().map(String::from).collect(),
            local_toolchain: local_toolchain.into_iter().map(String::from).collect(),
        }
    }
}

/// Outcome of resolving a request's language.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub profile: RuntimeProfile,
    /// The language string exactly as the caller sent it.
    pub requested: String,
    /// True when the request named something unrecognized and python was substituted.
    pub fell_back: bool,
}

/// Immutable profile table, one entry per supported language.
#[derive(Debug, Clone)]
pub struct LanguageResolver {
    profiles: Vec<RuntimeProfile>,
}

impl LanguageResolver {
    pub fn new(images: &ImageConfig) -> Self {
        let profiles = Language::ALL
            .iter()
            .map(|lang| RuntimeProfile::new(*lang, images.image_for(*lang)))
            .collect();
        Self { profiles }
    }

    pub fn profile(&self, language: Language) -> &RuntimeProfile {
        // Built from Language::ALL, so every variant is present.
        self.profiles
            .iter()
            .find(|p| p.language == language)
            .unwrap_or(&self.profiles[0])
    }

    pub fn profiles(&self) -> &[RuntimeProfile] {
        &self.profiles
    }

    pub fn resolve(&self, language: &str, filename: Option<&str>) -> Resolution {
        let by_name = Language::from_alias(language);
        let by_file = filename.and_then(Language::from_filename);

        let (resolved, fell_back) = match (by_name, by_file) {
            (Some(lang), _) => (lang, false),
            (None, Some(lang)) => (lang, false),
            (None, None) => {
                let nothing_requested =
                    language.trim().is_empty() && filename.map_or(true, |f| f.trim().is_empty());
                (Language::Python, !nothing_requested)
            }
        };

        if fell_back {
            log::warn!(
                "Unrecognized language '{}' (filename {:?}), running as python",
                language,
                filename
            );
        }

        Resolution {
            profile: self.profile(resolved).clone(),
            requested: language.to_string(),
            fell_back,
        }
    }
}

impl Default for LanguageResolver {
    fn default() -> Self {
        Self::new(&ImageConfig::default())
    }
}
