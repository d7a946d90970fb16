#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use otter_mock::{
    EvaluationRequest, ExportValue, JsFunction, MockConfig, MockContext, MockError, MockFactory,
    MockResult, ModuleEvaluator, ModuleId, ModuleNamespace,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Temporary project tree
pub struct Project {
    _dir: TempDir,
    pub root: PathBuf,
}

impl Project {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        Self { _dir: dir, root }
    }

    pub fn write(&self, relative: &str, content: &str) -> String {
        let path = self.root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    pub fn path(&self, relative: &str) -> String {
        self.root.join(relative).to_string_lossy().into_owned()
    }

    pub fn id(&self, relative: &str) -> ModuleId {
        ModuleId::from_path(&self.root.join(relative))
    }

    pub fn context(&self) -> (MockContext, Arc<ScriptedEvaluator>) {
        let evaluator = ScriptedEvaluator::new(&self.root);
        let ctx = MockContext::with_fs(MockConfig::with_root(&self.root), evaluator.clone());
        (ctx, evaluator)
    }
}

type Script = Arc<
    dyn Fn(MockContext, EvaluationRequest, ModuleNamespace) -> BoxFuture<'static, MockResult<ModuleNamespace>>
        + Send
        + Sync,
>;

/// Stands in for the JS engine.
///
/// Modules with a registered script run it. Everything else is
/// interpreted statement by statement, understanding just enough of the
/// rewritten output: `mocker.declareMock("x"[, factory])`, awaited
/// `mocker.dynamicImport(...)` with optional destructuring,
/// `mocker.exportAll(...)`, `export { a as b }` and
/// `export const name = value;`.
pub struct ScriptedEvaluator {
    root: PathBuf,
    scripts: Mutex<HashMap<String, Script>>,
    factories: Mutex<HashMap<String, MockFactory>>,
    counts: Mutex<HashMap<String, usize>>,
    requests: Mutex<Vec<EvaluationRequest>>,
}

impl ScriptedEvaluator {
    pub fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            root: root.to_path_buf(),
            scripts: Mutex::default(),
            factories: Mutex::default(),
            counts: Mutex::default(),
            requests: Mutex::default(),
        })
    }

    pub fn script<F, Fut>(&self, key: &str, f: F)
    where
        F: Fn(MockContext, EvaluationRequest, ModuleNamespace) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MockResult<ModuleNamespace>> + Send + 'static,
    {
        let script: Script = Arc::new(move |ctx, request, ns| f(ctx, request, ns).boxed());
        self.scripts.lock().insert(key.to_string(), script);
    }

    /// Module whose evaluation just fills in exports.
    pub fn exports<F>(&self, key: &str, build: F)
    where
        F: Fn(&ModuleNamespace) + Send + Sync + 'static,
    {
        let build = Arc::new(build);
        self.script(key, move |_, _, ns| {
            let build = build.clone();
            async move {
                build(&ns);
                Ok(ns)
            }
        });
    }

    /// Factory used when interpreted code declares `specifier` with a factory argument.
    pub fn factory(&self, specifier: &str, factory: MockFactory) {
        self.factories.lock().insert(specifier.to_string(), factory);
    }

    /// Number of real evaluations of `key`
    pub fn count(&self, key: &str) -> usize {
        self.counts.lock().get(key).copied().unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<EvaluationRequest> {
        self.requests.lock().clone()
    }

    fn key(&self, id: &ModuleId) -> String {
        match id.as_path().strip_prefix(&self.root) {
            Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
            Err(_) => id.as_str().to_string(),
        }
    }

    async fn interpret(
        &self,
        ctx: MockContext,
        request: EvaluationRequest,
        ns: ModuleNamespace,
    ) -> MockResult<ModuleNamespace> {
        let importer = request.id.as_str().to_string();
        let code = request.code.unwrap_or_default();

        for line in code.lines().flat_map(|l| l.split("; ")).map(str::trim) {
            if let Some(rest) = line.strip_prefix("mocker.declareMock(") {
                let (specifier, tail) = first_string(rest)?;
                let factory = if tail.trim_start().starts_with(',') {
                    self.factories.lock().get(&specifier).cloned()
                } else {
                    None
                };
                ctx.declare_mock(&specifier, &importer, factory);
            } else if let Some(rest) = line.strip_prefix("mocker.undeclareMock(") {
                let (specifier, _) = first_string(rest)?;
                ctx.undeclare_mock(&specifier, &importer);
            } else if let Some(start) = line.find("mocker.dynamicImport(") {
                let args = call_args(&line[start + "mocker.dynamicImport(".len()..])?;
                let imported = ctx
                    .dynamic_import(&args[0], &args[1], args.get(2).map(String::as_str))
                    .await?;
                if line.starts_with("mocker.exportAll(") {
                    ns.export_all(&imported);
                } else {
                    bind(line, &imported, &ns);
                }
            } else if let Some(rest) = line.strip_prefix("export {") {
                let inner = rest.trim_end_matches(';').trim_end().trim_end_matches('}');
                for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let (local, exported) = part.split_once(" as ").unwrap_or((part, part));
                    let value = ns.get(local.trim()).unwrap_or(ExportValue::Undefined);
                    ns.set(exported.trim(), value);
                }
            } else if let Some(rest) = line.strip_prefix("export const ") {
                if let Some((name, value)) = rest.trim_end_matches(';').split_once(" = ") {
                    ns.set(name.trim(), literal_value(value.trim()));
                }
            }
        }
        Ok(ns)
    }
}

#[async_trait]
impl ModuleEvaluator for ScriptedEvaluator {
    async fn evaluate(
        &self,
        ctx: MockContext,
        request: EvaluationRequest,
        namespace: ModuleNamespace,
    ) -> MockResult<ModuleNamespace> {
        let key = self.key(&request.id);
        *self.counts.lock().entry(key.clone()).or_insert(0) += 1;
        self.requests.lock().push(request.clone());

        let script = self.scripts.lock().get(&key).cloned();
        match script {
            Some(script) => script(ctx, request, namespace).await,
            None => self.interpret(ctx, request, namespace).await,
        }
    }
}

/// First double-quoted string of `text` and the text after it.
fn first_string(text: &str) -> MockResult<(String, &str)> {
    let malformed = || MockError::evaluation("script", format!("no string literal in {text:?}"));
    let start = text.find('"').ok_or_else(malformed)?;
    let len = text[start + 1..].find('"').ok_or_else(malformed)?;
    let end = start + 1 + len + 1;
    let value = serde_json::from_str(&text[start..end]).map_err(|_| malformed())?;
    Ok((value, &text[end..]))
}

/// JSON string arguments of a call, up to its closing parenthesis.
fn call_args(text: &str) -> MockResult<Vec<String>> {
    let end = text
        .find(')')
        .ok_or_else(|| MockError::evaluation("script", "unterminated call"))?;
    serde_json::from_str(&format!("[{}]", &text[..end]))
        .map_err(|e| MockError::evaluation("script", e.to_string()))
}

/// `const { a, b: c } = ...` or `const ns = ...`
fn bind(line: &str, imported: &ModuleNamespace, ns: &ModuleNamespace) {
    let Some(rest) = line.strip_prefix("const ") else {
        return;
    };
    let Some((pattern, _)) = rest.split_once(" = ") else {
        return;
    };
    let pattern = pattern.trim();
    if let Some(inner) = pattern.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
        for part in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, local) = part
                .split_once(':')
                .map(|(k, l)| (k.trim(), l.trim()))
                .unwrap_or((part, part));
            ns.set(local, imported.get(key).unwrap_or(ExportValue::Undefined));
        }
    } else {
        ns.set(pattern, imported.to_value());
    }
}

fn literal_value(text: &str) -> ExportValue {
    match text.parse::<f64>() {
        Ok(n) => ExportValue::Number(n),
        Err(_) => ExportValue::from(text.trim_matches('"')),
    }
}

/// Native function returning a fixed number.
pub fn returns(name: &str, arity: usize, value: i32) -> ExportValue {
    ExportValue::Function(JsFunction::native(name, arity, move |_| Ok(ExportValue::from(value))))
}
