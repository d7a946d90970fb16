//! Mock registry
//!
//! Maps canonical module ids to mock descriptors. Declarations are either
//! applied at once or queued and applied in order before the next module
//! request. Every install bumps a revision, which is how the context tells
//! a cached substitution apart from a newer declaration.

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::context::MockContext;
use crate::error::{MockError, MockResult};
use crate::resolver::{ModuleId, ResolvedModule};
use crate::value::ModuleNamespace;

/// Produces the namespace of a factory mock.
pub type MockFactory =
    Arc<dyn Fn(FactoryScope) -> BoxFuture<'static, MockResult<ModuleNamespace>> + Send + Sync>;

/// Wrap an async closure as a [`MockFactory`].
pub fn factory<F, Fut>(f: F) -> MockFactory
where
    F: Fn(FactoryScope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResult<ModuleNamespace>> + Send + 'static,
{
    Arc::new(move |scope| f(scope).boxed())
}

/// Factory that builds a fresh namespace from `entries` on every call.
pub fn namespace_factory<F>(entries: F) -> MockFactory
where
    F: Fn() -> ModuleNamespace + Send + Sync + 'static,
{
    factory(move |_| {
        let namespace = entries();
        async move { Ok(namespace) }
    })
}

/// Where a substituted module comes from
#[derive(Clone)]
pub enum MockSource {
    Factory(MockFactory),
    /// Hand-written override file
    Redirect(PathBuf),
    Automock,
}

impl MockSource {
    pub fn kind(&self) -> MockKind {
        match self {
            Self::Factory(_) => MockKind::Factory,
            Self::Redirect(_) => MockKind::Redirect,
            Self::Automock => MockKind::Automock,
        }
    }
}

impl fmt::Debug for MockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Factory(_) => f.write_str("Factory(..)"),
            Self::Redirect(path) => f.debug_tuple("Redirect").field(path).finish(),
            Self::Automock => f.write_str("Automock"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockKind {
    Unmocked,
    Factory,
    Redirect,
    Automock,
}

/// A declared mock becomes active the first time its module is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockState {
    Pending,
    Active,
}

#[derive(Debug, Clone)]
pub struct MockDescriptor {
    pub module: ResolvedModule,
    /// Module that declared the mock; `import_actual` inside a factory
    /// resolves relative to it.
    pub importer: String,
    pub source: MockSource,
    pub revision: u64,
}

impl MockDescriptor {
    pub fn id(&self) -> &ModuleId {
        &self.module.id
    }

    pub fn kind(&self) -> MockKind {
        self.source.kind()
    }
}

#[derive(Clone)]
pub enum PendingAction {
    Declare(Option<MockFactory>),
    Undeclare,
}

impl fmt::Debug for PendingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declare(Some(_)) => f.write_str("Declare(factory)"),
            Self::Declare(None) => f.write_str("Declare"),
            Self::Undeclare => f.write_str("Undeclare"),
        }
    }
}

/// A queued declaration, still unresolved
#[derive(Debug, Clone)]
pub struct PendingDeclaration {
    pub specifier: String,
    pub importer: String,
    pub action: PendingAction,
}

struct RegistryEntry {
    descriptor: MockDescriptor,
    state: MockState,
    /// Revision of the descriptor whose result sits in the module cache
    materialized: Option<u64>,
}

#[derive(Default)]
pub struct MockRegistry {
    entries: HashMap<ModuleId, RegistryEntry>,
    pending: VecDeque<PendingDeclaration>,
    next_revision: u64,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a descriptor, replacing any previous one for the same id.
    pub fn install(
        &mut self,
        module: ResolvedModule,
        importer: impl Into<String>,
        source: MockSource,
    ) -> MockDescriptor {
        self.next_revision += 1;
        let descriptor = MockDescriptor {
            module,
            importer: importer.into(),
            source,
            revision: self.next_revision,
        };
        let materialized = self
            .entries
            .get(descriptor.id())
            .and_then(|entry| entry.materialized);

        tracing::debug!(
            "Mock {:?} installed for {} (revision {})",
            descriptor.kind(),
            descriptor.id(),
            descriptor.revision
        );
        self.entries.insert(
            descriptor.id().clone(),
            RegistryEntry {
                descriptor: descriptor.clone(),
                state: MockState::Pending,
                materialized,
            },
        );
        descriptor
    }

    pub fn remove(&mut self, id: &ModuleId) -> Option<MockDescriptor> {
        let removed = self.entries.remove(id).map(|entry| entry.descriptor);
        if removed.is_some() {
            tracing::debug!("Mock for {} removed", id);
        }
        removed
    }

    pub fn get(&self, id: &ModuleId) -> Option<&MockDescriptor> {
        self.entries.get(id).map(|entry| &entry.descriptor)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn kind_of(&self, id: &ModuleId) -> MockKind {
        self.get(id).map_or(MockKind::Unmocked, MockDescriptor::kind)
    }

    pub fn state_of(&self, id: &ModuleId) -> Option<MockState> {
        self.entries.get(id).map(|entry| entry.state)
    }

    /// Mark the mock for `id` active and return its descriptor.
    pub fn activate(&mut self, id: &ModuleId) -> Option<MockDescriptor> {
        let entry = self.entries.get_mut(id)?;
        if entry.state == MockState::Pending {
            tracing::trace!("Mock for {} is now active", id);
            entry.state = MockState::Active;
        }
        Some(entry.descriptor.clone())
    }

    /// Record that the result of `revision` is now cached for `id`.
    pub fn mark_materialized(&mut self, id: &ModuleId, revision: u64) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.materialized = Some(revision);
        }
    }

    /// Whether the cached substitution for `id` no longer matches the
    /// registry: the mock was removed or declared again since.
    pub fn is_stale(&self, id: &ModuleId) -> bool {
        match self.entries.get(id) {
            Some(entry) => entry.materialized != Some(entry.descriptor.revision),
            None => true,
        }
    }

    pub fn enqueue(&mut self, declaration: PendingDeclaration) {
        tracing::trace!(
            "Queued {:?} for '{}' from '{}'",
            declaration.action,
            declaration.specifier,
            declaration.importer
        );
        self.pending.push_back(declaration);
    }

    pub fn next_pending(&mut self) -> Option<PendingDeclaration> {
        self.pending.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending.clear();
    }
}

/// Handed to a factory while it runs.
#[derive(Clone)]
pub struct FactoryScope {
    ctx: MockContext,
    module: ResolvedModule,
    importer: String,
}

impl FactoryScope {
    pub(crate) fn new(ctx: MockContext, module: ResolvedModule, importer: String) -> Self {
        Self {
            ctx,
            module,
            importer,
        }
    }

    /// Id of the module being substituted
    pub fn id(&self) -> &ModuleId {
        &self.module.id
    }

    pub fn importer(&self) -> &str {
        &self.importer
    }

    pub fn context(&self) -> &MockContext {
        &self.ctx
    }

    /// Real namespace of the module being substituted.
    pub async fn import_original(&self) -> MockResult<ModuleNamespace> {
        if !self.module.exists {
            return Err(MockError::not_found(
                self.module.id.as_str(),
                self.importer.as_str(),
            ));
        }
        self.ctx.load_actual(self.module.clone()).await
    }

    /// Real namespace of `specifier`, resolved from the declaring module.
    pub async fn import_actual(&self, specifier: &str) -> MockResult<ModuleNamespace> {
        self.ctx.import_actual(specifier, &self.importer).await
    }

    /// Registry-aware import from the declaring module.
    pub async fn import(&self, specifier: &str) -> MockResult<ModuleNamespace> {
        self.ctx.import(specifier, &self.importer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ModuleFormat;
    use crate::resolver::ModuleKind;

    fn module(id: &str) -> ResolvedModule {
        ResolvedModule {
            id: ModuleId::new(id),
            kind: ModuleKind::Internal,
            format: ModuleFormat::Esm,
            exists: true,
            external: None,
        }
    }

    #[test]
    fn test_install_and_activate() {
        let mut registry = MockRegistry::new();
        registry.install(module("/p/math.ts"), "/p/a.test.ts", MockSource::Automock);

        let id = ModuleId::new("/p/math.ts");
        assert_eq!(registry.kind_of(&id), MockKind::Automock);
        assert_eq!(registry.state_of(&id), Some(MockState::Pending));

        let descriptor = registry.activate(&id).unwrap();
        assert_eq!(descriptor.importer, "/p/a.test.ts");
        assert_eq!(registry.state_of(&id), Some(MockState::Active));
        assert_eq!(registry.kind_of(&ModuleId::new("/p/other.ts")), MockKind::Unmocked);
    }

    #[test]
    fn test_redeclaration_makes_cached_result_stale() {
        let mut registry = MockRegistry::new();
        let id = ModuleId::new("/p/math.ts");
        let first = registry.install(module("/p/math.ts"), "t", MockSource::Automock);
        assert!(registry.is_stale(&id));

        registry.mark_materialized(&id, first.revision);
        assert!(!registry.is_stale(&id));

        let second = registry.install(
            module("/p/math.ts"),
            "t",
            MockSource::Redirect(PathBuf::from("/p/__overrides__/math.ts")),
        );
        assert!(second.revision > first.revision);
        assert!(registry.is_stale(&id));
        assert_eq!(registry.state_of(&id), Some(MockState::Pending));

        registry.remove(&id);
        assert!(registry.is_stale(&id));
    }

    #[test]
    fn test_pending_queue_is_fifo() {
        let mut registry = MockRegistry::new();
        for specifier in ["./a", "./b"] {
            registry.enqueue(PendingDeclaration {
                specifier: specifier.into(),
                importer: "t".into(),
                action: PendingAction::Declare(None),
            });
        }
        registry.enqueue(PendingDeclaration {
            specifier: "./a".into(),
            importer: "t".into(),
            action: PendingAction::Undeclare,
        });
        assert_eq!(registry.pending_len(), 3);

        let order: Vec<_> = std::iter::from_fn(|| registry.next_pending())
            .map(|p| (p.specifier, matches!(p.action, PendingAction::Undeclare)))
            .collect();
        assert_eq!(
            order,
            vec![
                ("./a".to_string(), false),
                ("./b".to_string(), false),
                ("./a".to_string(), true)
            ]
        );
    }

    #[test]
    fn test_clear() {
        let mut registry = MockRegistry::new();
        registry.install(module("/p/a.ts"), "t", MockSource::Automock);
        registry.enqueue(PendingDeclaration {
            specifier: "./b".into(),
            importer: "t".into(),
            action: PendingAction::Declare(None),
        });
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.pending_len(), 0);
    }

    #[test]
    fn test_source_debug_hides_factory() {
        let source = MockSource::Factory(namespace_factory(ModuleNamespace::new));
        assert_eq!(format!("{:?}", source), "Factory(..)");
        assert_eq!(source.kind(), MockKind::Factory);
    }
}
