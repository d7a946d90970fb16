//! Host module loading
//!
//! The mocking layer never touches the filesystem for module sources
//! directly; it goes through a [`HostLoader`]. [`FsLoader`] is the default
//! implementation backed by oxc-resolver (node_modules, `exports`
//! conditions, extension probing).

use async_trait::async_trait;
use oxc_resolver::{ResolveError, ResolveOptions, Resolver};
use std::path::{Path, PathBuf};

use crate::config::MockConfig;
use crate::error::{MockError, MockResult};
use crate::package_cache::{PackageMetadataCache, PackageType};

/// Module format of a resolved file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModuleFormat {
    /// ES Modules (import/export)
    #[default]
    Esm,
    /// CommonJS (require/module.exports)
    CommonJs,
    /// JSON module
    Json,
    /// Host builtin, no source text
    Builtin,
}

impl ModuleFormat {
    /// Format implied by the file extension alone
    pub fn from_extension(ext: Option<&str>) -> Option<Self> {
        match ext {
            Some("cjs" | "cts") => Some(Self::CommonJs),
            Some("mjs" | "mts" | "ts" | "tsx") => Some(Self::Esm),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }

    pub fn is_commonjs(&self) -> bool {
        matches!(self, Self::CommonJs)
    }
}

/// Result of a successful host resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostResolution {
    /// Canonical absolute path of the module file
    pub path: PathBuf,
    pub format: ModuleFormat,
}

/// Resolution and source loading supplied by the host runtime.
#[async_trait]
pub trait HostLoader: Send + Sync {
    /// Resolve `specifier` as imported from `importer`.
    ///
    /// Must fail with [`MockError::NotFound`] when no file matches, so
    /// callers can tell a missing module apart from a broken one.
    fn resolve(&self, specifier: &str, importer: &str) -> MockResult<HostResolution>;

    /// Read the source text of a resolved module.
    async fn load(&self, path: &Path) -> MockResult<String>;
}

/// Filesystem loader using oxc-resolver
pub struct FsLoader {
    root: PathBuf,
    resolver: Resolver,
}

impl FsLoader {
    pub fn new(config: &MockConfig) -> Self {
        let options = ResolveOptions {
            extensions: config.extensions.clone(),
            condition_names: config.conditions.clone(),
            ..ResolveOptions::default()
        };

        Self {
            root: config.root.clone(),
            resolver: Resolver::new(options),
        }
    }

    /// Directory that relative specifiers from `importer` are resolved against.
    fn base_dir(&self, importer: &str) -> PathBuf {
        let path = Path::new(importer);
        if !path.is_absolute() {
            return self.root.clone();
        }
        if path.is_dir() {
            return path.to_path_buf();
        }
        path.parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone())
    }

    /// Detect the module format from the extension, then the nearest manifest.
    pub fn detect_format(path: &Path) -> ModuleFormat {
        let ext = path.extension().and_then(|e| e.to_str());
        if let Some(format) = ModuleFormat::from_extension(ext) {
            return format;
        }

        let Some(dir) = path.parent() else {
            return ModuleFormat::Esm;
        };
        match PackageMetadataCache::global().find_nearest_manifest(dir) {
            Ok(manifest) => match manifest.package_type() {
                Some(PackageType::Module) => ModuleFormat::Esm,
                Some(PackageType::CommonJs) => ModuleFormat::CommonJs,
                // a manifest without "type" means CommonJS
                None if !manifest.is_empty() => ModuleFormat::CommonJs,
                None => ModuleFormat::Esm,
            },
            Err(err) => {
                tracing::warn!("Ignoring unreadable manifest near {:?}: {}", path, err);
                ModuleFormat::Esm
            }
        }
    }
}

#[async_trait]
impl HostLoader for FsLoader {
    fn resolve(&self, specifier: &str, importer: &str) -> MockResult<HostResolution> {
        // `npm:pkg@1` resolves as plain `pkg`
        let specifier = match specifier.strip_prefix("npm:") {
            Some(raw) => normalize_npm_specifier(raw)
                .ok_or_else(|| MockError::Resolve(format!("Invalid npm specifier '{}'", specifier)))?,
            None => specifier.to_string(),
        };
        let specifier = specifier
            .strip_prefix("file://")
            .map(str::to_string)
            .unwrap_or(specifier);

        let base_dir = self.base_dir(importer);
        match self.resolver.resolve(&base_dir, &specifier) {
            Ok(resolution) => {
                let path = canonicalize_path(&resolution.full_path());
                let format = Self::detect_format(&path);
                Ok(HostResolution { path, format })
            }
            Err(ResolveError::NotFound(_)) => Err(MockError::not_found(specifier, importer)),
            Err(e) => Err(MockError::Resolve(format!(
                "Cannot resolve '{}' from '{}': {}",
                specifier,
                base_dir.display(),
                e
            ))),
        }
    }

    async fn load(&self, path: &Path) -> MockResult<String> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MockError::Io(format!("Failed to read '{}': {}", path.display(), e)))?;
        Ok(strip_shebang(&source))
    }
}

/// Normalize an `npm:` payload to a bare package specifier.
fn normalize_npm_specifier(raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }

    if let Some(scoped) = raw.strip_prefix('@') {
        let (scope, rest) = scoped.split_once('/')?;
        let name_end = rest.find('/').unwrap_or(rest.len());
        let (name_and_version, subpath) = rest.split_at(name_end);
        let name = name_and_version.split('@').next().unwrap_or_default();
        if scope.is_empty() || name.is_empty() {
            return None;
        }
        return Some(format!("@{}/{}{}", scope, name, subpath));
    }

    let name_end = raw.find('/').unwrap_or(raw.len());
    let (name_and_version, subpath) = raw.split_at(name_end);
    let name = name_and_version.split('@').next().unwrap_or_default();
    if name.is_empty() {
        return None;
    }
    Some(format!("{}{}", name, subpath))
}

/// Blank out a leading `#!` line, keeping line numbers intact.
fn strip_shebang(source: &str) -> String {
    if !source.starts_with("#!") {
        return source.to_string();
    }
    match source.find('\n') {
        Some(newline) => format!("{}{}", " ".repeat(newline), &source[newline..]),
        None => String::new(),
    }
}

pub(crate) fn canonicalize_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
