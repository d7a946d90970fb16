//! Per-test mocking context
//!
//! A [`MockContext`] owns one registry and one module cache. Test files in
//! separate contexts never see each other's mocks. Every module request
//! goes through the context:
//!
//! - `import` consults the registry, then falls back to the real module
//! - `import_actual` always returns the real module
//! - `import_substituted` always returns a substitute
//!
//! Real modules are loaded through the [`HostLoader`], rewritten by the
//! hoist pass and executed by the host's [`ModuleEvaluator`].

use async_trait::async_trait;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use crate::automock::automock;
use crate::config::MockConfig;
use crate::error::{MockError, MockResult};
use crate::hoist::RewriteOptions;
use crate::loader::{FsLoader, HostLoader, ModuleFormat};
use crate::module_cache::{CacheKey, ModuleCache};
use crate::redirect::RedirectResolver;
use crate::registry::{
    FactoryScope, MockDescriptor, MockFactory, MockKind, MockRegistry, MockSource, MockState,
    PendingAction, PendingDeclaration,
};
use crate::resolver::{ModuleId, ModuleKind, ResolvedModule, SpecifierResolver};
use crate::transform::Transformer;
use crate::value::ModuleNamespace;

/// Prefix of a computed dynamic import that asks for the substitute of the
/// rest of the specifier (`import("mock:./math")`).
pub const SUBSTITUTE_SIGIL: &str = "mock:";

/// A module handed to the host for execution
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub id: ModuleId,
    pub kind: ModuleKind,
    pub format: ModuleFormat,
    /// Rewritten source text; `None` for builtins
    pub code: Option<String>,
}

/// Executes module code on behalf of the context.
#[async_trait]
pub trait ModuleEvaluator: Send + Sync {
    /// Run `request` and return its exports.
    ///
    /// `namespace` is what circular importers see while the module runs;
    /// filling it and returning it is the usual implementation. Imports
    /// made by the module go through `ctx`.
    async fn evaluate(
        &self,
        ctx: MockContext,
        request: EvaluationRequest,
        namespace: ModuleNamespace,
    ) -> MockResult<ModuleNamespace>;
}

struct ContextInner {
    config: MockConfig,
    host: Arc<dyn HostLoader>,
    evaluator: Arc<dyn ModuleEvaluator>,
    resolver: SpecifierResolver,
    redirects: RedirectResolver,
    transformer: Transformer,
    registry: Mutex<MockRegistry>,
    cache: ModuleCache,
}

/// Handle to a per-test mocking context. Clones share all state.
#[derive(Clone)]
pub struct MockContext {
    inner: Arc<ContextInner>,
    /// Evaluation this handle was given to, if any
    current: Option<CacheKey>,
}

impl MockContext {
    pub fn new(
        config: MockConfig,
        host: Arc<dyn HostLoader>,
        evaluator: Arc<dyn ModuleEvaluator>,
    ) -> Self {
        let resolver = SpecifierResolver::new(host.clone(), config.root.clone());
        let redirects = RedirectResolver::new(&config);
        let transformer = Transformer::new(RewriteOptions::from_config(&config));
        Self {
            inner: Arc::new(ContextInner {
                config,
                host,
                evaluator,
                resolver,
                redirects,
                transformer,
                registry: Mutex::new(MockRegistry::new()),
                cache: ModuleCache::new(),
            }),
            current: None,
        }
    }

    /// Context backed by the filesystem loader.
    pub fn with_fs(config: MockConfig, evaluator: Arc<dyn ModuleEvaluator>) -> Self {
        let host: Arc<dyn HostLoader> = Arc::new(FsLoader::new(&config));
        Self::new(config, host, evaluator)
    }

    pub fn config(&self) -> &MockConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.inner.cache
    }

    pub fn transformer(&self) -> &Transformer {
        &self.inner.transformer
    }

    /// Evaluation this handle belongs to
    pub fn current(&self) -> Option<&CacheKey> {
        self.current.as_ref()
    }

    /// Declarative surface bound to one test file.
    pub fn api(&self, importer: impl Into<String>) -> MockApi {
        MockApi {
            ctx: self.clone(),
            importer: importer.into(),
        }
    }

    fn within(&self, key: CacheKey) -> Self {
        Self {
            inner: self.inner.clone(),
            current: Some(key),
        }
    }

    /// Resolve a specifier, giving missing modules a virtual id.
    pub fn resolve(&self, specifier: &str, importer: &str) -> MockResult<ResolvedModule> {
        self.inner.resolver.resolve_lenient(specifier, importer)
    }

    // ---- declarations ----

    /// Queue a mock declaration. It is applied before the next request.
    pub fn declare_mock(&self, specifier: &str, importer: &str, factory: Option<MockFactory>) {
        self.inner.registry.lock().enqueue(PendingDeclaration {
            specifier: specifier.to_string(),
            importer: importer.to_string(),
            action: PendingAction::Declare(factory),
        });
    }

    /// Queue removal of a mock.
    pub fn undeclare_mock(&self, specifier: &str, importer: &str) {
        self.inner.registry.lock().enqueue(PendingDeclaration {
            specifier: specifier.to_string(),
            importer: importer.to_string(),
            action: PendingAction::Undeclare,
        });
    }

    /// Declare a mock now. Queued declarations are applied first.
    pub fn declare_immediate_mock(
        &self,
        specifier: &str,
        importer: &str,
        factory: Option<MockFactory>,
    ) -> MockResult<MockDescriptor> {
        self.flush_pending()?;
        let module = self.resolve(specifier, importer)?;
        Ok(self.install(module, importer, factory))
    }

    /// Remove a mock now. Queued declarations are applied first.
    pub fn undeclare_immediate_mock(&self, specifier: &str, importer: &str) -> MockResult<()> {
        self.flush_pending()?;
        let module = self.resolve(specifier, importer)?;
        self.uninstall(&module.id);
        Ok(())
    }

    /// Apply queued declarations in order. A declaration that fails to
    /// resolve is dropped and its error returned.
    pub fn flush_pending(&self) -> MockResult<()> {
        loop {
            let next = self.inner.registry.lock().next_pending();
            let Some(declaration) = next else {
                return Ok(());
            };

            let module = self.resolve(&declaration.specifier, &declaration.importer)?;
            match declaration.action {
                PendingAction::Declare(factory) => {
                    self.install(module, &declaration.importer, factory);
                }
                PendingAction::Undeclare => self.uninstall(&module.id),
            }
        }
    }

    /// Factory wins, then an override file, then an automock.
    fn install(
        &self,
        module: ResolvedModule,
        importer: &str,
        factory: Option<MockFactory>,
    ) -> MockDescriptor {
        let source = match factory {
            Some(factory) => MockSource::Factory(factory),
            None => match self.inner.redirects.resolve_override(&module) {
                Some(path) => MockSource::Redirect(path),
                None => MockSource::Automock,
            },
        };
        self.inner.registry.lock().install(module, importer, source)
    }

    fn uninstall(&self, id: &ModuleId) {
        self.inner.registry.lock().remove(id);
        self.inner.cache.invalidate(&CacheKey::Mocked(id.clone()));
    }

    pub fn descriptor(&self, id: &ModuleId) -> Option<MockDescriptor> {
        self.inner.registry.lock().get(id).cloned()
    }

    pub fn mock_state(&self, id: &ModuleId) -> Option<MockState> {
        self.inner.registry.lock().state_of(id)
    }

    /// How `specifier` would currently be satisfied. Applies queued
    /// declarations first.
    pub fn mock_kind(&self, specifier: &str, importer: &str) -> MockResult<MockKind> {
        self.flush_pending()?;
        let module = self.resolve(specifier, importer)?;
        Ok(self.inner.registry.lock().kind_of(&module.id))
    }

    // ---- requests ----

    /// Registry-aware import: the active mock for the module if one is
    /// declared, else the real module.
    pub async fn import(&self, specifier: &str, importer: &str) -> MockResult<ModuleNamespace> {
        self.flush_pending()?;
        let module = self.resolve(specifier, importer)?;

        let descriptor = self.inner.registry.lock().activate(&module.id);
        match descriptor {
            Some(descriptor) => self.materialize(descriptor).await,
            None if module.exists => self.load_actual(module).await,
            None => Err(MockError::not_found(specifier, importer)),
        }
    }

    /// Registry-aware request by canonical id.
    pub async fn request(&self, id: &ModuleId) -> MockResult<ModuleNamespace> {
        let root = self.inner.config.root.to_string_lossy().into_owned();
        self.import(id.as_str(), &root).await
    }

    /// The real module, whatever the registry says.
    pub async fn import_actual(
        &self,
        specifier: &str,
        importer: &str,
    ) -> MockResult<ModuleNamespace> {
        self.flush_pending()?;
        let module = self.inner.resolver.resolve(specifier, importer)?;
        self.load_actual(module).await
    }

    /// The substitute for the module: its declared mock, or else an
    /// override file or automock built on the spot (not cached).
    pub async fn import_substituted(
        &self,
        specifier: &str,
        importer: &str,
    ) -> MockResult<ModuleNamespace> {
        self.flush_pending()?;
        let module = self.resolve(specifier, importer)?;

        let descriptor = self.inner.registry.lock().activate(&module.id);
        if let Some(descriptor) = descriptor {
            return self.materialize(descriptor).await;
        }

        match self.inner.redirects.resolve_override(&module) {
            Some(path) => self.load_override(&path).await,
            None if module.exists => {
                let real = self.load_actual(module).await?;
                Ok(automock(&real))
            }
            None => Err(MockError::not_found(specifier, importer)),
        }
    }

    /// Entry point of rewritten `import()` expressions.
    ///
    /// `target` is a resolved id for literal imports, the computed value
    /// otherwise; `literal` is the specifier as written. Framework
    /// specifiers bypass the registry. A target carrying
    /// [`SUBSTITUTE_SIGIL`] re-enters as [`import_substituted`](Self::import_substituted).
    pub async fn dynamic_import(
        &self,
        target: &str,
        importer: &str,
        literal: Option<&str>,
    ) -> MockResult<ModuleNamespace> {
        let result = if self.inner.config.is_internal_specifier(target) {
            tracing::trace!("'{}' is a framework module, not intercepted", target);
            self.import_actual(target, importer).await
        } else if let Some(rest) = target.strip_prefix(SUBSTITUTE_SIGIL) {
            self.import_substituted(rest, importer).await
        } else {
            self.import(target, importer).await
        };

        result.map_err(|err| match (err, literal) {
            (MockError::NotFound { importer, .. }, Some(literal)) => MockError::NotFound {
                specifier: literal.to_string(),
                importer,
            },
            (err, _) => err,
        })
    }

    /// Evaluate (or join the evaluation of) the real module.
    pub(crate) async fn load_actual(&self, module: ResolvedModule) -> MockResult<ModuleNamespace> {
        let key = CacheKey::Actual(module.id.clone());
        let ctx = self.within(key.clone());
        self.inner
            .cache
            .get_or_evaluate(key, self.current.as_ref(), move |namespace| {
                async move { ctx.evaluate_actual(module, namespace).await }.boxed()
            })
            .await
    }

    async fn evaluate_actual(
        &self,
        module: ResolvedModule,
        namespace: ModuleNamespace,
    ) -> MockResult<ModuleNamespace> {
        let code = match module.format {
            ModuleFormat::Builtin => None,
            ModuleFormat::Json => Some(self.inner.host.load(module.id.as_path()).await?),
            ModuleFormat::Esm | ModuleFormat::CommonJs => {
                let source = self.inner.host.load(module.id.as_path()).await?;
                let output = self
                    .inner
                    .transformer
                    .transform(&source, &module.id, &self.inner.resolver)
                    .await?;
                Some(output.code.clone())
            }
        };

        tracing::debug!("Evaluating {} ({:?})", module.id, module.format);
        let request = EvaluationRequest {
            id: module.id.clone(),
            kind: module.kind,
            format: module.format,
            code,
        };
        let result = self
            .inner
            .evaluator
            .evaluate(self.clone(), request, namespace)
            .await;
        match &result {
            Ok(namespace) => tracing::trace!("Evaluated {} ({} exports)", module.id, namespace.len()),
            Err(err) => tracing::debug!("Evaluation of {} failed: {}", module.id, err),
        }
        result
    }

    /// Evaluate (or join the evaluation of) a mock.
    async fn materialize(&self, descriptor: MockDescriptor) -> MockResult<ModuleNamespace> {
        let key = CacheKey::Mocked(descriptor.id().clone());
        let ctx = self.within(key.clone());
        self.inner
            .cache
            .get_or_evaluate(key, self.current.as_ref(), move |_| {
                async move { ctx.compute_mock(descriptor).await }.boxed()
            })
            .await
    }

    async fn compute_mock(&self, descriptor: MockDescriptor) -> MockResult<ModuleNamespace> {
        let id = descriptor.id().clone();
        tracing::debug!("Materializing {:?} mock for {}", descriptor.kind(), id);

        let namespace = match &descriptor.source {
            MockSource::Factory(factory) => {
                let scope = FactoryScope::new(
                    self.clone(),
                    descriptor.module.clone(),
                    descriptor.importer.clone(),
                );
                factory(scope).await.map_err(|err| match err {
                    MockError::NotFound { .. } | MockError::Factory { .. } | MockError::Hoist { .. } => {
                        err
                    }
                    other => MockError::factory(id.as_str(), other.to_string()),
                })?
            }
            MockSource::Redirect(path) => self.load_override(path).await?,
            MockSource::Automock => {
                if !descriptor.module.exists {
                    return Err(MockError::not_found(id.as_str(), descriptor.importer.as_str()));
                }
                let real = self.load_actual(descriptor.module.clone()).await?;
                automock(&real)
            }
        };

        self.inner
            .registry
            .lock()
            .mark_materialized(&id, descriptor.revision);
        Ok(namespace)
    }

    /// Override files are ordinary modules, evaluated and cached under
    /// their own id.
    async fn load_override(&self, path: &Path) -> MockResult<ModuleNamespace> {
        let specifier = path.to_string_lossy();
        let module = self.inner.resolver.resolve(&specifier, &specifier)?;
        self.load_actual(module).await
    }

    // ---- lifecycle ----

    /// Drop cached evaluations of `ids`.
    ///
    /// With `preserve_mocks` the registry is left alone and a cached mock
    /// survives unless it was computed from a superseded declaration.
    /// Without it the mocks of `ids` are removed as well.
    pub fn invalidate(&self, ids: &[ModuleId], preserve_mocks: bool) {
        for id in ids {
            self.inner.cache.invalidate(&CacheKey::Actual(id.clone()));
            self.inner.transformer.forget(id);

            let drop_mock = if preserve_mocks {
                self.inner.registry.lock().is_stale(id)
            } else {
                self.inner.registry.lock().remove(id);
                true
            };
            if drop_mock {
                self.inner.cache.invalidate(&CacheKey::Mocked(id.clone()));
            }
            tracing::debug!("Invalidated {} (preserve mocks: {})", id, preserve_mocks);
        }
    }

    /// Wait until no evaluation is in flight.
    pub async fn settle(&self) -> usize {
        self.inner.cache.settle().await
    }

    /// Forget all mocks, queued declarations and cached modules.
    pub fn reset(&self) {
        self.inner.registry.lock().clear();
        self.inner.cache.clear();
        self.inner.transformer.clear();
    }

    /// Settle in-flight work, then reset.
    pub async fn teardown(&self) {
        let rounds = self.settle().await;
        tracing::debug!("Context settled after {} rounds", rounds);
        self.reset();
    }
}

/// The declarative surface (`mocker.*`) bound to one test file
#[derive(Clone)]
pub struct MockApi {
    ctx: MockContext,
    importer: String,
}

impl MockApi {
    pub fn importer(&self) -> &str {
        &self.importer
    }

    pub fn declare_mock(&self, specifier: &str, factory: Option<MockFactory>) {
        self.ctx.declare_mock(specifier, &self.importer, factory);
    }

    pub fn declare_immediate_mock(
        &self,
        specifier: &str,
        factory: Option<MockFactory>,
    ) -> MockResult<MockDescriptor> {
        self.ctx
            .declare_immediate_mock(specifier, &self.importer, factory)
    }

    pub fn undeclare_mock(&self, specifier: &str) {
        self.ctx.undeclare_mock(specifier, &self.importer);
    }

    pub fn undeclare_immediate_mock(&self, specifier: &str) -> MockResult<()> {
        self.ctx.undeclare_immediate_mock(specifier, &self.importer)
    }

    pub async fn import_actual(&self, specifier: &str) -> MockResult<ModuleNamespace> {
        self.ctx.import_actual(specifier, &self.importer).await
    }

    pub async fn import_substituted(&self, specifier: &str) -> MockResult<ModuleNamespace> {
        self.ctx.import_substituted(specifier, &self.importer).await
    }

    pub async fn dynamic_import(
        &self,
        target: &str,
        literal: Option<&str>,
    ) -> MockResult<ModuleNamespace> {
        self.ctx.dynamic_import(target, &self.importer, literal).await
    }
}
