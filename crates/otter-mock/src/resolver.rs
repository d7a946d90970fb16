//! Specifier resolution and classification
//!
//! Turns `(specifier, importer)` into a canonical [`ModuleId`] plus a
//! [`ModuleKind`]. Nothing here evaluates code.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::builtins::{builtin_id, normalize_builtin};
use crate::error::MockResult;
use crate::loader::{HostLoader, ModuleFormat};

/// Canonical identity of a module: an absolute path, `node:<name>` for
/// builtins, or the bare specifier of a virtual module.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(Arc<str>);

impl ModuleId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(path.to_string_lossy())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&*self.0)
    }

    pub fn is_builtin(&self) -> bool {
        self.0.starts_with(crate::builtins::BUILTIN_PREFIX)
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({:?})", &*self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<&Path> for ModuleId {
    fn from(path: &Path) -> Self {
        Self::from_path(path)
    }
}

/// Module classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// A project file reached through a relative or absolute specifier
    Internal,
    /// A package reached through a bare specifier
    External,
    /// A platform builtin (`fs`, `node:path`, ...)
    Builtin,
}

/// Result of resolving a specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModule {
    pub id: ModuleId,
    pub kind: ModuleKind,
    pub format: ModuleFormat,
    /// Whether the id names an existing file or builtin
    pub exists: bool,
    /// Package or builtin name for non-internal modules (`node:` stripped)
    pub external: Option<String>,
}

/// Whether a specifier is written relative to its importer (`./x`, `../x`).
pub fn is_relative(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
}

/// Whether a specifier is already an absolute location.
pub fn is_absolute(specifier: &str) -> bool {
    specifier.starts_with("file://") || Path::new(specifier).is_absolute()
}

/// Classify a specifier without touching the filesystem.
pub fn classify(specifier: &str) -> ModuleKind {
    if normalize_builtin(specifier).is_some() {
        ModuleKind::Builtin
    } else if !is_relative(specifier) && !is_absolute(specifier) {
        ModuleKind::External
    } else {
        ModuleKind::Internal
    }
}

/// Resolves specifiers through the host loader.
#[derive(Clone)]
pub struct SpecifierResolver {
    host: Arc<dyn HostLoader>,
    root: PathBuf,
}

impl SpecifierResolver {
    pub fn new(host: Arc<dyn HostLoader>, root: impl Into<PathBuf>) -> Self {
        Self {
            host,
            root: root.into(),
        }
    }

    /// Resolve `specifier` from `importer`. A missing file is an error.
    pub fn resolve(&self, specifier: &str, importer: &str) -> MockResult<ResolvedModule> {
        let kind = classify(specifier);

        if kind == ModuleKind::Builtin {
            let name = normalize_builtin(specifier).unwrap_or(specifier);
            let id = builtin_id(specifier).unwrap_or_else(|| specifier.to_string());
            return Ok(ResolvedModule {
                id: ModuleId::new(id),
                kind,
                format: ModuleFormat::Builtin,
                exists: true,
                external: Some(name.to_string()),
            });
        }

        let resolution = self.host.resolve(specifier, importer)?;
        tracing::trace!("Resolved '{}' from '{}' to {:?}", specifier, importer, resolution.path);

        Ok(ResolvedModule {
            id: ModuleId::from_path(&resolution.path),
            kind,
            format: resolution.format,
            exists: true,
            external: (kind == ModuleKind::External).then(|| specifier.to_string()),
        })
    }

    /// Like [`resolve`](Self::resolve), but a missing module still gets an
    /// id so it can be declared as a virtual mock. Bare specifiers keep the
    /// specifier itself; relative ones get the normalized joined path.
    pub fn resolve_lenient(&self, specifier: &str, importer: &str) -> MockResult<ResolvedModule> {
        match self.resolve(specifier, importer) {
            Ok(resolved) => Ok(resolved),
            Err(err) if err.is_not_found() => {
                let kind = classify(specifier);
                let (id, external) = match kind {
                    ModuleKind::External => (ModuleId::new(specifier), Some(specifier.to_string())),
                    _ => {
                        let target = specifier.strip_prefix("file://").unwrap_or(specifier);
                        let joined = self.base_dir(importer).join(target);
                        (ModuleId::from_path(&normalize_path(&joined)), None)
                    }
                };
                tracing::debug!("'{}' does not resolve, using virtual id {}", specifier, id);
                Ok(ResolvedModule {
                    id,
                    kind,
                    format: ModuleFormat::Esm,
                    exists: false,
                    external,
                })
            }
            Err(err) => Err(err),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

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
}

/// Lexically normalize `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push(component);
                }
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MockConfig;
    use crate::loader::FsLoader;
    use tempfile::tempdir;

    fn resolver_for(root: &Path) -> SpecifierResolver {
        let host = Arc::new(FsLoader::new(&MockConfig::with_root(root)));
        SpecifierResolver::new(host, root)
    }

    #[test]
    fn test_classify_order() {
        assert_eq!(classify("fs"), ModuleKind::Builtin);
        assert_eq!(classify("node:fs/promises"), ModuleKind::Builtin);
        assert_eq!(classify("lodash"), ModuleKind::External);
        assert_eq!(classify("@scope/pkg/sub"), ModuleKind::External);
        assert_eq!(classify("./math"), ModuleKind::Internal);
        assert_eq!(classify("../lib/x"), ModuleKind::Internal);
        assert_eq!(classify("/abs/x.ts"), ModuleKind::Internal);
    }

    #[test]
    fn test_builtin_resolution_has_stable_id() {
        let dir = tempdir().unwrap();
        let resolver = resolver_for(dir.path());
        let bare = resolver.resolve("fs", "/x/a.ts").unwrap();
        let prefixed = resolver.resolve("node:fs", "/x/a.ts").unwrap();
        assert_eq!(bare.id, prefixed.id);
        assert_eq!(bare.id.as_str(), "node:fs");
        assert!(bare.id.is_builtin());
        assert_eq!(bare.external.as_deref(), Some("fs"));
    }

    #[test]
    fn test_missing_module_is_not_found() {
        let dir = tempdir().unwrap();
        let resolver = resolver_for(dir.path());
        let importer = dir.path().join("a.test.ts");
        let err = resolver
            .resolve("./missing", importer.to_str().unwrap())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_lenient_resolution_of_missing_modules() {
        let dir = tempdir().unwrap();
        let resolver = resolver_for(dir.path());
        let importer = dir.path().join("src").join("a.test.ts");

        let virtual_pkg = resolver
            .resolve_lenient("virtual-pkg", importer.to_str().unwrap())
            .unwrap();
        assert_eq!(virtual_pkg.id.as_str(), "virtual-pkg");
        assert_eq!(virtual_pkg.kind, ModuleKind::External);
        assert!(!virtual_pkg.exists);

        let relative = resolver
            .resolve_lenient("../lib/./gone", importer.to_str().unwrap())
            .unwrap();
        assert_eq!(relative.id.as_path(), dir.path().join("lib").join("gone"));
        assert_eq!(relative.kind, ModuleKind::Internal);
        assert!(!relative.exists);
    }

    #[test]
    fn test_existing_file_resolves_to_canonical_path() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("math.js"), "export const add = () => 0;").unwrap();
        let resolver = resolver_for(dir.path());
        let importer = dir.path().join("a.test.ts");

        let resolved = resolver
            .resolve("./math", importer.to_str().unwrap())
            .unwrap();
        let expected = std::fs::canonicalize(dir.path().join("math.js")).unwrap();
        assert_eq!(resolved.id.as_path(), expected);
        assert!(resolved.exists);
        assert_eq!(resolved.external, None);
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
