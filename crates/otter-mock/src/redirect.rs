//! Hand-written override lookup (`__overrides__` directories)
//!
//! Project files are overridden by a sibling `__overrides__` directory next
//! to the file. Packages, builtins and modules that do not exist on disk are
//! overridden from `<root>/__overrides__/`, mirroring the specifier's
//! directory structure (`@scope/pkg/sub` -> `__overrides__/@scope/pkg/sub.*`).

use std::path::{Path, PathBuf};

use crate::config::MockConfig;
use crate::resolver::{ModuleKind, ResolvedModule};

/// Finds override files for resolved modules. Never evaluates anything.
#[derive(Debug, Clone)]
pub struct RedirectResolver {
    root: PathBuf,
    overrides_dir: String,
}

impl RedirectResolver {
    pub fn new(config: &MockConfig) -> Self {
        Self {
            root: config.root.clone(),
            overrides_dir: config.overrides_dir.clone(),
        }
    }

    /// Path of the override for `module`, if one exists.
    pub fn resolve_override(&self, module: &ResolvedModule) -> Option<PathBuf> {
        let (dir, target) = self.lookup_location(module)?;
        let found = find_match(&dir, &target);
        match &found {
            Some(path) => tracing::debug!("Override for {} found at {:?}", module.id, path),
            None => tracing::trace!("No override for {} in {:?}", module.id, dir),
        }
        found
    }

    /// Directory to search and the basename to match inside it.
    fn lookup_location(&self, module: &ResolvedModule) -> Option<(PathBuf, String)> {
        let root_overrides = self.root.join(&self.overrides_dir);

        if module.kind == ModuleKind::Internal && module.exists {
            let file = module.id.as_path();
            let dir = file.parent()?.join(&self.overrides_dir);
            return Some((dir, stem_of(file)?));
        }

        let specifier = match &module.external {
            Some(external) => external.clone(),
            None => {
                let path = module.id.as_path();
                match path.strip_prefix(&self.root) {
                    Ok(relative) => relative.to_string_lossy().into_owned(),
                    Err(_) => module
                        .id
                        .as_str()
                        .trim_start_matches("./")
                        .trim_start_matches('/')
                        .to_string(),
                }
            }
        };

        let specifier = Path::new(&specifier);
        let dir = match specifier.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => root_overrides.join(parent),
            _ => root_overrides,
        };
        // package names may contain dots (`socket.io`, `lodash.debounce`)
        let target = match module.kind {
            ModuleKind::Internal => stem_of(specifier)?,
            ModuleKind::External | ModuleKind::Builtin => name_of(specifier)?,
        };
        Some((dir, target))
    }
}

fn stem_of(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

fn name_of(path: &Path) -> Option<String> {
    path.file_name().map(|s| s.to_string_lossy().into_owned())
}

/// First entry of `dir` matching `target`: a file by its basename without
/// extension, a directory by its full name. A matching directory is
/// searched for an `index.*` file.
fn find_match(dir: &Path, target: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    entries.sort();

    for entry in entries {
        if entry.is_dir() {
            if name_of(&entry).as_deref() != Some(target) {
                continue;
            }
            if let Some(index) = find_match(&entry, "index") {
                return Some(index);
            }
            continue;
        }
        if stem_of(&entry).as_deref() == Some(target) {
            return Some(entry);
        }
    }
    None
}
