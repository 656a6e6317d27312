use crate::messages::PersonalityKey;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A selectable assistant persona.
///
/// Built-ins ship with the crate; `./parley/personas/<key>.md` files override
/// or extend them. Frontmatter may set `display_name` and `greeting`; the
/// Markdown body becomes the description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub key: PersonalityKey,
    pub display_name: String,
    pub greeting: String,
    pub description: String,
    pub path: Option<PathBuf>,
}

impl Persona {
    pub fn builtin(key: &str, display_name: &str, greeting: &str, description: &str) -> Self {
        Self {
            key: PersonalityKey::from(key),
            display_name: display_name.to_string(),
            greeting: greeting.to_string(),
            description: description.to_string(),
            path: None,
        }
    }

    /// Parse a single `.md` file into a `Persona`.
    pub fn parse(path: &Path) -> Result<Self> {
        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("invalid filename: {:?}", path))?
            .to_string();

        let content = std::fs::read_to_string(path)?;

        let (display_name, greeting, description) =
            if let Some(stripped) = content.strip_prefix("---") {
                let after_open = stripped.trim_start_matches('\n');
                if let Some(end) = after_open.find("\n---") {
                    let yaml_str = &after_open[..end];
                    let body = after_open[end + 4..].trim().to_string();

                    let yaml: serde_yaml::Value = serde_yaml::from_str(yaml_str)?;
                    let display_name = yaml["display_name"].as_str().map(String::from);
                    let greeting = yaml["greeting"].as_str().map(String::from);

                    (display_name, greeting, body)
                } else {
                    (None, None, content.trim().to_string())
                }
            } else {
                (None, None, content.trim().to_string())
            };

        Ok(Self {
            display_name: display_name.unwrap_or_else(|| key.clone()),
            greeting: greeting.unwrap_or_else(|| "Hi! How can I help?".to_string()),
            key: PersonalityKey::from(key),
            description,
            path: Some(path.to_path_buf()),
        })
    }

    /// Parse every `*.md` file in `dir`, skipping bad files with a warning.
    /// Returns personas sorted by key.
    pub fn discover_in(dir: &Path) -> Vec<Self> {
        if !dir.exists() {
            return Vec::new();
        }

        let entries = match std::fs::read_dir(dir) {
            Ok(e) => e,
            Err(e) => {
                warn!("Failed to read personas directory {:?}: {}", dir, e);
                return Vec::new();
            }
        };

        let mut personas: Vec<Self> = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Failed to read directory entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }

            match Self::parse(&path) {
                Ok(persona) => personas.push(persona),
                Err(e) => warn!("Skipping persona at {:?}: {}", path, e),
            }
        }

        personas.sort_by(|a, b| a.key.cmp(&b.key));
        personas
    }

    /// `./parley/personas/` relative to the working directory.
    pub fn discover() -> Vec<Self> {
        let cwd = std::env::current_dir().unwrap_or_default();
        Self::discover_in(&cwd.join("parley").join("personas"))
    }
}
