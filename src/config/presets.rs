/// Language registry
///
/// Data-driven mapping from a language tag to the profile used to run code
/// written in it. Adding a language means adding one entry here (or in the
/// `languages` section of config.json); the pipeline never branches on a tag.
use crate::config::config::LanguageEntry;
use crate::config::types::{Result, WarmboxError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Placeholder substituted with the injected source path in run templates
pub const FILE_PLACEHOLDER: &str = "{file}";

/// Immutable execution profile for one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    /// Canonical language tag
    pub language: String,
    /// Container image reference
    pub image: String,
    /// Source file extension including the leading dot
    pub extension: String,
    /// Run command template; `{file}` is replaced by the source path
    pub run: Vec<String>,
}

impl LanguageProfile {
    pub fn new(language: &str, image: &str, extension: &str, run: &[&str]) -> Self {
        Self {
            language: language.to_string(),
            image: image.to_string(),
            extension: extension.to_string(),
            run: run.iter().map(|arg| arg.to_string()).collect(),
        }
    }

    /// Source path inside the sandbox: `<workspace>/main<extension>`
    pub fn source_path(&self, workspace: &str) -> String {
        format!("{}/main{}", workspace.trim_end_matches('/'), self.extension)
    }

    /// Argv that runs `file`
    pub fn run_command(&self, file: &str) -> Vec<String> {
        self.run
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, file))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(WarmboxError::Config(format!(
                "language {}: image must not be empty",
                self.language
            )));
        }
        if !self.extension.starts_with('.') || self.extension.len() < 2 {
            return Err(WarmboxError::Config(format!(
                "language {}: extension '{}' must start with '.'",
                self.language, self.extension
            )));
        }
        if !self.run.iter().any(|arg| arg.contains(FILE_PLACEHOLDER)) {
            return Err(WarmboxError::Config(format!(
                "language {}: run command must reference {}",
                self.language, FILE_PLACEHOLDER
            )));
        }
        Ok(())
    }
}

/// Registry of language profiles; read-only once shared
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: BTreeMap<String, LanguageProfile>,
    aliases: HashMap<String, String>,
}

fn normalize(tag: &str) -> String {
    tag.trim().to_lowercase()
}

impl LanguageRegistry {
    /// Registry with the built-in profiles
    pub fn new() -> Self {
        let mut registry = Self::empty();

        registry.register_python();
        registry.register_golang();
        registry.register_javascript();

        registry
    }

    /// Registry without any profile
    pub fn empty() -> Self {
        Self {
            profiles: BTreeMap::new(),
            aliases: HashMap::new(),
        }
    }

    fn register_python(&mut self) {
        self.insert(LanguageProfile::new(
            "python",
            "python:3.12",
            ".py",
            &["python3", FILE_PLACEHOLDER],
        ));
        self.alias("py", "python");
    }

    fn register_golang(&mut self) {
        self.insert(LanguageProfile::new(
            "golang",
            "golang:1.22",
            ".go",
            &["go", "run", FILE_PLACEHOLDER],
        ));
        self.alias("go", "golang");
    }

    fn register_javascript(&mut self) {
        self.insert(LanguageProfile::new(
            "javascript",
            "node:20",
            ".js",
            &["node", FILE_PLACEHOLDER],
        ));
        self.alias("js", "javascript");
        self.alias("node", "javascript");
    }

    fn insert(&mut self, profile: LanguageProfile) -> Option<LanguageProfile> {
        self.profiles.insert(normalize(&profile.language), profile)
    }

    fn alias(&mut self, alias: &str, canonical: &str) {
        self.aliases.insert(normalize(alias), normalize(canonical));
    }

    /// Add or replace a profile after validating it
    pub fn register(&mut self, mut profile: LanguageProfile) -> Result<Option<LanguageProfile>> {
        profile.language = normalize(&profile.language);
        profile.validate()?;
        Ok(self.insert(profile))
    }

    /// Apply `languages` entries from config.json.
    ///
    /// An entry naming a known language may override any field; an entry
    /// for a new language must provide all of them.
    pub fn apply_entries(&mut self, entries: &BTreeMap<String, LanguageEntry>) -> Result<()> {
        for (tag, entry) in entries {
            let profile = match self.get(tag) {
                Some(existing) => LanguageProfile {
                    language: existing.language.clone(),
                    image: entry.image.clone(),
                    extension: entry
                        .extension
                        .clone()
                        .unwrap_or_else(|| existing.extension.clone()),
                    run: entry.run.clone().unwrap_or_else(|| existing.run.clone()),
                },
                None => LanguageProfile {
                    language: tag.clone(),
                    image: entry.image.clone(),
                    extension: entry.extension.clone().ok_or_else(|| {
                        WarmboxError::Config(format!("language {}: missing extension", tag))
                    })?,
                    run: entry.run.clone().ok_or_else(|| {
                        WarmboxError::Config(format!("language {}: missing run command", tag))
                    })?,
                },
            };

            if self.register(profile)?.is_some() {
                log::info!("Language profile overridden from config: {}", tag);
            } else {
                log::info!("Language profile added from config: {}", tag);
            }
        }
        Ok(())
    }

    /// Canonical tag for `tag`, following aliases
    pub fn canonical(&self, tag: &str) -> Option<&str> {
        let key = normalize(tag);
        let key = self.aliases.get(&key).cloned().unwrap_or(key);
        self.profiles
            .get_key_value(&key)
            .map(|(canonical, _)| canonical.as_str())
    }

    pub fn get(&self, tag: &str) -> Option<&LanguageProfile> {
        self.canonical(tag).and_then(|key| self.profiles.get(key))
    }

    /// Resolve a request tag; unknown tags are validation failures
    pub fn resolve(&self, tag: &str) -> Result<&LanguageProfile> {
        self.get(tag)
            .ok_or_else(|| WarmboxError::unsupported_language(tag))
    }

    pub fn has(&self, tag: &str) -> bool {
        self.get(tag).is_some()
    }

    /// Canonical tags in sorted order
    pub fn languages(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    pub fn list(&self) -> Vec<&LanguageProfile> {
        self.profiles.values().collect()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.languages(), vec!["golang", "javascript", "python"]);

        let python = registry.resolve("python").unwrap();
        assert_eq!(python.image, "python:3.12");
        assert_eq!(python.extension, ".py");
        assert_eq!(
            python.run_command("/app/main.py"),
            vec!["python3", "/app/main.py"]
        );

        let go = registry.resolve("golang").unwrap();
        assert_eq!(go.image, "golang:1.22");
        assert_eq!(go.run_command("/app/main.go"), vec!["go", "run", "/app/main.go"]);

        let js = registry.resolve("javascript").unwrap();
        assert_eq!(js.image, "node:20");
        assert_eq!(js.run_command("/app/main.js"), vec!["node", "/app/main.js"]);
    }

    #[test]
    fn test_aliases_and_case() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.canonical("goLang"), Some("golang"));
        assert_eq!(registry.canonical("go"), Some("golang"));
        assert_eq!(registry.canonical(" PY "), Some("python"));
        assert_eq!(registry.canonical("node"), Some("javascript"));
        assert_eq!(registry.canonical("ruby"), None);
    }

    #[test]
    fn test_unknown_language_is_validation_error() {
        let registry = LanguageRegistry::new();
        let err = registry.resolve("ruby").unwrap_err();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "Validation error: unsupported language: ruby");
    }

    #[test]
    fn test_source_path() {
        let registry = LanguageRegistry::new();
        let python = registry.resolve("python").unwrap();
        assert_eq!(python.source_path("/app"), "/app/main.py");
        assert_eq!(python.source_path("/app/"), "/app/main.py");
    }

    #[test]
    fn test_apply_entries() {
        let mut registry = LanguageRegistry::new();
        let mut entries = BTreeMap::new();
        entries.insert(
            "ruby".to_string(),
            LanguageEntry {
                image: "ruby:3.3".to_string(),
                extension: Some(".rb".to_string()),
                run: Some(vec!["ruby".to_string(), "{file}".to_string()]),
            },
        );
        entries.insert(
            "python".to_string(),
            LanguageEntry {
                image: "python:3.12-slim".to_string(),
                extension: None,
                run: None,
            },
        );
        registry.apply_entries(&entries).unwrap();

        let ruby = registry.resolve("ruby").unwrap();
        assert_eq!(ruby.run_command("/app/main.rb"), vec!["ruby", "/app/main.rb"]);

        let python = registry.resolve("py").unwrap();
        assert_eq!(python.image, "python:3.12-slim");
        assert_eq!(python.extension, ".py");
    }

    #[test]
    fn test_rejects_incomplete_entries() {
        let mut registry = LanguageRegistry::new();
        let mut entries = BTreeMap::new();
        entries.insert(
            "lua".to_string(),
            LanguageEntry {
                image: "lua:5.4".to_string(),
                extension: Some(".lua".to_string()),
                run: Some(vec!["lua".to_string()]),
            },
        );
        let err = registry.apply_entries(&entries).unwrap_err();
        assert!(err.to_string().contains("{file}"));
        assert!(!registry.has("lua"));
    }
}
