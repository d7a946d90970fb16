//! Otter module mocking.
//!
//! This crate provides the module substitution layer of the Otter test
//! runner: tests declare that a module should be replaced, and every later
//! import of that module gets the replacement instead.
//!
//! # Features
//!
//! - **Factory mocks**: A factory computes the replacement once per context
//! - **Overrides**: Hand-written files under `__overrides__` directories
//! - **Automocks**: Fakes generated from the real module's export shape
//! - **Hoisting**: Mock declarations run before the imports they affect
//! - **Single-flight cache**: One evaluation per module, cycle tolerant
//! - **Isolation**: Each test context owns its registry and module cache
//!
//! # Example
//!
//! ```no_run
//! use otter_mock::{MockConfig, MockContext, ModuleEvaluator, namespace_factory};
//! use otter_mock::{ExportValue, JsFunction, ModuleNamespace};
//! use std::sync::Arc;
//!
//! async fn run(evaluator: Arc<dyn ModuleEvaluator>) -> otter_mock::MockResult<()> {
//!     let ctx = MockContext::with_fs(MockConfig::discover(".")?, evaluator);
//!     let mocker = ctx.api("/project/math.test.ts");
//!
//!     mocker.declare_mock(
//!         "./math",
//!         Some(namespace_factory(|| {
//!             ModuleNamespace::from_entries([(
//!                 "add",
//!                 ExportValue::Function(JsFunction::native("add", 2, |_| Ok(42.into()))),
//!             )])
//!         })),
//!     );
//!
//!     let math = mocker.import_substituted("./math").await?;
//!     assert_eq!(math.get("add").unwrap().call(&[])?, ExportValue::from(42));
//!
//!     ctx.teardown().await;
//!     Ok(())
//! }
//! ```

pub mod automock;
pub mod builtins;
pub mod config;
pub mod context;
pub mod error;
pub mod hoist;
pub mod loader;
pub mod mock_fn;
pub mod module_cache;
pub mod package_cache;
pub mod redirect;
pub mod registry;
pub mod resolver;
pub mod transform;
pub mod value;

pub use automock::{FakeExport, automock, automock_value};
pub use config::{CONFIG_FILE_NAME, MockConfig};
pub use context::{EvaluationRequest, MockApi, MockContext, ModuleEvaluator, SUBSTITUTE_SIGIL};
pub use error::{MockError, MockResult};
pub use hoist::{RewriteOptions, RewriteOutput, collect_requests, rewrite};
pub use loader::{FsLoader, HostLoader, HostResolution, ModuleFormat};
pub use mock_fn::{MockCall, MockFn};
pub use module_cache::{CacheKey, CacheState, ModuleCache};
pub use package_cache::{PackageManifest, PackageMetadataCache, PackageType};
pub use redirect::RedirectResolver;
pub use registry::{
    FactoryScope, MockDescriptor, MockFactory, MockKind, MockRegistry, MockSource, MockState,
    PendingAction, PendingDeclaration, factory, namespace_factory,
};
pub use resolver::{ModuleId, ModuleKind, ResolvedModule, SpecifierResolver};
pub use transform::Transformer;
pub use value::{
    ExportValue, FunctionKind, JsArray, JsFunction, JsObject, ModuleNamespace, NativeFn, Symbol,
};
