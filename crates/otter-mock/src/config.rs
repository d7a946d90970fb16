//! Configuration for the mocking layer (`otter-mock.toml`).

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{MockError, MockResult};

/// File name searched for by [`MockConfig::discover`].
pub const CONFIG_FILE_NAME: &str = "otter-mock.toml";

/// Mocking layer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MockConfig {
    /// Project root. Override files for packages and builtins live under
    /// `<root>/<overrides_dir>/`.
    pub root: PathBuf,

    /// Name of the override convention directory
    pub overrides_dir: String,

    /// File extensions tried during resolution
    pub extensions: Vec<String>,

    /// Condition names for package.json `exports`
    pub conditions: Vec<String>,

    /// Identifier of the declarative surface object in test sources
    /// (`mocker.declareMock(...)`)
    pub api_namespace: String,

    /// Specifiers that are never intercepted by the registry
    pub internal_specifiers: Vec<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            root: std::env::current_dir().unwrap_or_default(),
            overrides_dir: "__overrides__".into(),
            extensions: vec![
                ".ts".into(),
                ".tsx".into(),
                ".js".into(),
                ".jsx".into(),
                ".mjs".into(),
                ".mts".into(),
                ".cjs".into(),
                ".cts".into(),
                ".json".into(),
            ],
            conditions: vec![
                "import".into(),
                "module".into(),
                "node".into(),
                "default".into(),
            ],
            api_namespace: "mocker".into(),
            internal_specifiers: vec!["otter:mock".into(), "@otter/mock".into()],
        }
    }
}

impl MockConfig {
    /// Default configuration rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> MockResult<Self> {
        toml::from_str(content).map_err(|e| MockError::Config(e.to_string()))
    }

    /// Load configuration from a file. A relative `root` is taken relative
    /// to the file's directory; a missing `root` means the file's directory.
    pub fn load(path: impl AsRef<Path>) -> MockResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MockError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let raw: RawConfig = toml::from_str(&content)
            .map_err(|e| MockError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        let base = path.parent().unwrap_or(Path::new("."));
        let mut config = raw.config;
        config.root = match raw.root {
            Some(root) if root.is_absolute() => root,
            Some(root) => base.join(root),
            None => base.to_path_buf(),
        };
        Ok(config)
    }

    /// Search `start_dir` and its ancestors for `otter-mock.toml`.
    /// Falls back to defaults rooted at `start_dir`.
    pub fn discover(start_dir: impl AsRef<Path>) -> MockResult<Self> {
        let start_dir = start_dir.as_ref();
        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.is_file() {
                tracing::debug!("Using mock config at {:?}", candidate);
                return Self::load(candidate);
            }
            dir = current.parent();
        }
        Ok(Self::with_root(start_dir))
    }

    /// Whether a specifier belongs to the framework allow-list.
    pub fn is_internal_specifier(&self, specifier: &str) -> bool {
        self.internal_specifiers.iter().any(|s| s == specifier)
    }

    /// Directory that holds overrides for packages and builtins.
    pub fn root_overrides_dir(&self) -> PathBuf {
        self.root.join(&self.overrides_dir)
    }
}

/// On-disk shape: `root` is kept apart so it can be made relative to the file.
#[derive(Deserialize)]
struct RawConfig {
    root: Option<PathBuf>,
    #[serde(flatten)]
    config: MockConfig,
}
