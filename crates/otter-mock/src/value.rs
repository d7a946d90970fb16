//! Reflected export values
//!
//! The host engine hands module exports to the mocking layer as
//! [`ExportValue`]s. Objects, arrays and functions are shared handles with
//! interior mutability, so the same value reachable from two places is the
//! same handle, and equality on them is identity like `===`.

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{MockError, MockResult};
use crate::mock_fn::{MockFn, MockOutcome};

pub type ObjectRef = Arc<JsObject>;
pub type ArrayRef = Arc<JsArray>;
pub type FunctionRef = Arc<JsFunction>;

/// Host callback backing a native function
pub type NativeFn = Arc<dyn Fn(&[ExportValue]) -> MockResult<ExportValue> + Send + Sync>;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);

/// A unique symbol. Copies compare equal; separately created symbols never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    id: u64,
    description: Option<String>,
}

impl Symbol {
    pub fn new(description: Option<&str>) -> Self {
        Self {
            id: NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed),
            description: description.map(str::to_string),
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// A reflected JS value
#[derive(Clone)]
pub enum ExportValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Symbol(Symbol),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(FunctionRef),
}

impl ExportValue {
    /// New object value from entries
    pub fn object<K: Into<String>>(entries: impl IntoIterator<Item = (K, ExportValue)>) -> Self {
        Self::Object(JsObject::from_entries(entries))
    }

    /// New array value
    pub fn array(items: Vec<ExportValue>) -> Self {
        Self::Array(JsArray::from_vec(items))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Array(_) | Self::Object(_) => "object",
            Self::Function(_) => "function",
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Call a function value.
    pub fn call(&self, args: &[ExportValue]) -> MockResult<ExportValue> {
        match self {
            Self::Function(f) => f.call(args),
            other => Err(MockError::Thrown(format!(
                "TypeError: {} is not a function",
                other.type_name()
            ))),
        }
    }
}

impl PartialEq for ExportValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for ExportValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Symbol(s) => write!(f, "Symbol({})", s.description().unwrap_or("")),
            Self::Array(a) => write!(f, "Array({})", a.len()),
            Self::Object(o) => write!(f, "Object {{ {} }}", o.keys().join(", ")),
            Self::Function(func) => fmt::Debug::fmt(&**func, f),
        }
    }
}

impl From<bool> for ExportValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for ExportValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for ExportValue {
    fn from(n: i32) -> Self {
        Self::Number(n as f64)
    }
}

impl From<&str> for ExportValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ExportValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<FunctionRef> for ExportValue {
    fn from(f: FunctionRef) -> Self {
        Self::Function(f)
    }
}

impl From<ObjectRef> for ExportValue {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<ArrayRef> for ExportValue {
    fn from(a: ArrayRef) -> Self {
        Self::Array(a)
    }
}

/// Ordered property bag
#[derive(Default)]
pub struct JsObject {
    properties: RwLock<IndexMap<String, ExportValue>>,
}

impl JsObject {
    pub fn new() -> ObjectRef {
        Arc::new(Self::default())
    }

    pub fn from_entries<K: Into<String>>(
        entries: impl IntoIterator<Item = (K, ExportValue)>,
    ) -> ObjectRef {
        let properties = entries.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Arc::new(Self {
            properties: RwLock::new(properties),
        })
    }

    pub fn get(&self, key: &str) -> Option<ExportValue> {
        self.properties.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: ExportValue) {
        self.properties.write().insert(key.into(), value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.properties.read().contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<ExportValue> {
        self.properties.write().shift_remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.properties.read().keys().cloned().collect()
    }

    pub fn entries(&self) -> Vec<(String, ExportValue)> {
        self.properties
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }
}

impl fmt::Debug for JsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsObject").field("keys", &self.keys()).finish()
    }
}

/// Array storage
#[derive(Default)]
pub struct JsArray {
    items: RwLock<Vec<ExportValue>>,
}

impl JsArray {
    pub fn new() -> ArrayRef {
        Arc::new(Self::default())
    }

    pub fn from_vec(items: Vec<ExportValue>) -> ArrayRef {
        Arc::new(Self {
            items: RwLock::new(items),
        })
    }

    pub fn get(&self, index: usize) -> Option<ExportValue> {
        self.items.read().get(index).cloned()
    }

    pub fn push(&self, value: ExportValue) {
        self.items.write().push(value);
    }

    pub fn to_vec(&self) -> Vec<ExportValue> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl fmt::Debug for JsArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsArray").field("len", &self.len()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Plain,
    /// Constructor with a prototype object
    Class,
}

pub enum FunctionBody {
    Native(NativeFn),
    Stub(Mutex<MockFn>),
}

/// A callable value with own properties and an optional prototype
pub struct JsFunction {
    name: String,
    arity: usize,
    kind: FunctionKind,
    properties: RwLock<IndexMap<String, ExportValue>>,
    prototype: Option<ObjectRef>,
    body: FunctionBody,
}

impl JsFunction {
    /// Plain function backed by a host callback
    pub fn native(
        name: impl Into<String>,
        arity: usize,
        f: impl Fn(&[ExportValue]) -> MockResult<ExportValue> + Send + Sync + 'static,
    ) -> FunctionRef {
        Arc::new(Self {
            name: name.into(),
            arity,
            kind: FunctionKind::Plain,
            properties: RwLock::default(),
            prototype: None,
            body: FunctionBody::Native(Arc::new(f)),
        })
    }

    /// Class constructor with the given prototype
    pub fn class(
        name: impl Into<String>,
        arity: usize,
        prototype: ObjectRef,
        constructor: impl Fn(&[ExportValue]) -> MockResult<ExportValue> + Send + Sync + 'static,
    ) -> FunctionRef {
        Arc::new(Self {
            name: name.into(),
            arity,
            kind: FunctionKind::Class,
            properties: RwLock::default(),
            prototype: Some(prototype),
            body: FunctionBody::Native(Arc::new(constructor)),
        })
    }

    /// Call-tracking stub with a fresh [`MockFn`]
    pub fn stub(
        name: impl Into<String>,
        arity: usize,
        kind: FunctionKind,
        prototype: Option<ObjectRef>,
    ) -> FunctionRef {
        Arc::new(Self {
            name: name.into(),
            arity,
            kind,
            properties: RwLock::default(),
            prototype,
            body: FunctionBody::Stub(Mutex::new(MockFn::new())),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    pub fn prototype(&self) -> Option<&ObjectRef> {
        self.prototype.as_ref()
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.body, FunctionBody::Stub(_))
    }

    pub fn get_property(&self, key: &str) -> Option<ExportValue> {
        self.properties.read().get(key).cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: ExportValue) {
        self.properties.write().insert(key.into(), value);
    }

    pub fn properties(&self) -> Vec<(String, ExportValue)> {
        self.properties
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Invoke the function. Stubs record the call before producing a result.
    pub fn call(&self, args: &[ExportValue]) -> MockResult<ExportValue> {
        match &self.body {
            FunctionBody::Native(f) => f(args),
            FunctionBody::Stub(state) => {
                // lock released before running a user implementation
                let outcome = state.lock().invoke(args);
                match outcome {
                    MockOutcome::Return(value) => Ok(value),
                    MockOutcome::Throw(message) => Err(MockError::Thrown(message)),
                    MockOutcome::Call(implementation) => implementation(args),
                }
            }
        }
    }

    /// Access the stub's call-tracking state; `None` for native functions.
    pub fn with_mock<R>(&self, f: impl FnOnce(&mut MockFn) -> R) -> Option<R> {
        match &self.body {
            FunctionBody::Stub(state) => Some(f(&mut state.lock())),
            FunctionBody::Native(_) => None,
        }
    }

    /// Number of recorded calls; `None` for native functions.
    pub fn call_count(&self) -> Option<usize> {
        self.with_mock(|mock| mock.call_count())
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match (&self.body, self.kind) {
            (FunctionBody::Stub(_), _) => "mock",
            (_, FunctionKind::Class) => "class",
            _ => "function",
        };
        write!(f, "[{} {}/{}]", tag, self.name, self.arity)
    }
}

/// Exports of one evaluated (or substituted) module.
///
/// Cloning yields another handle to the same namespace.
#[derive(Clone, Default)]
pub struct ModuleNamespace {
    exports: ObjectRef,
}

impl ModuleNamespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_object(exports: ObjectRef) -> Self {
        Self { exports }
    }

    pub fn from_entries<K: Into<String>>(
        entries: impl IntoIterator<Item = (K, ExportValue)>,
    ) -> Self {
        Self::from_object(JsObject::from_entries(entries))
    }

    pub fn get(&self, name: &str) -> Option<ExportValue> {
        self.exports.get(name)
    }

    pub fn set(&self, name: impl Into<String>, value: ExportValue) {
        self.exports.set(name, value);
    }

    pub fn has(&self, name: &str) -> bool {
        self.exports.has(name)
    }

    pub fn keys(&self) -> Vec<String> {
        self.exports.keys()
    }

    pub fn entries(&self) -> Vec<(String, ExportValue)> {
        self.exports.entries()
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Whether both handles refer to the same namespace object.
    pub fn ptr_eq(&self, other: &ModuleNamespace) -> bool {
        Arc::ptr_eq(&self.exports, &other.exports)
    }

    pub fn as_object(&self) -> &ObjectRef {
        &self.exports
    }

    pub fn to_value(&self) -> ExportValue {
        ExportValue::Object(self.exports.clone())
    }

    /// `export * from` semantics: copy every export of `other` except
    /// `default`, keeping names this namespace already has.
    pub fn export_all(&self, other: &ModuleNamespace) {
        if self.ptr_eq(other) {
            return;
        }
        for (name, value) in other.entries() {
            if name != "default" && !self.has(&name) {
                self.set(name, value);
            }
        }
    }
}

impl fmt::Debug for ModuleNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleNamespace")
            .field("exports", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_equality() {
        assert_eq!(ExportValue::from(1.0), ExportValue::from(1));
        assert_ne!(ExportValue::from(f64::NAN), ExportValue::from(f64::NAN));
        assert_ne!(ExportValue::Null, ExportValue::Undefined);
        assert_eq!(ExportValue::from("a"), ExportValue::String("a".into()));
    }

    #[test]
    fn test_reference_equality_is_identity() {
        let a = ExportValue::array(vec![]);
        let b = ExportValue::array(vec![]);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_export_all_skips_default_and_existing_names() {
        let barrel = ModuleNamespace::from_entries([("own", ExportValue::from(1))]);
        let other = ModuleNamespace::from_entries([
            ("own", ExportValue::from(2)),
            ("extra", ExportValue::from(3)),
            ("default", ExportValue::from(4)),
        ]);
        barrel.export_all(&other);
        assert_eq!(barrel.get("own"), Some(ExportValue::from(1)));
        assert_eq!(barrel.get("extra"), Some(ExportValue::from(3)));
        assert!(!barrel.has("default"));
    }

    #[test]
    fn test_symbols_are_unique() {
        let a = Symbol::new(Some("tag"));
        let b = Symbol::new(Some("tag"));
        assert_ne!(a, b);
        assert_eq!(ExportValue::Symbol(a.clone()), ExportValue::Symbol(a));
    }

    #[test]
    fn test_native_function_call() {
        let add = JsFunction::native("add", 2, |args| {
            let a = args.first().and_then(ExportValue::as_number).unwrap_or(0.0);
            let b = args.get(1).and_then(ExportValue::as_number).unwrap_or(0.0);
            Ok(ExportValue::from(a + b))
        });
        assert_eq!(
            add.call(&[ExportValue::from(2), ExportValue::from(3)]).unwrap(),
            ExportValue::from(5)
        );
        assert!(!add.is_mock());
        assert_eq!(add.call_count(), None);
    }

    #[test]
    fn test_stub_records_calls() {
        let stub = JsFunction::stub("square", 2, FunctionKind::Plain, None);
        assert!(stub.is_mock());
        stub.with_mock(|m| m.returns(ExportValue::from(9)));
        assert_eq!(stub.call(&[ExportValue::from(3)]).unwrap(), ExportValue::from(9));
        assert_eq!(stub.call_count(), Some(1));
    }

    #[test]
    fn test_stub_implementation_may_reenter() {
        let stub = JsFunction::stub("f", 0, FunctionKind::Plain, None);
        let inner = stub.clone();
        stub.with_mock(|m| {
            m.implementation(Arc::new(move |_| {
                Ok(ExportValue::from(inner.call_count().unwrap_or(0) as f64))
            }))
        });
        assert_eq!(stub.call(&[]).unwrap(), ExportValue::from(1));
    }

    #[test]
    fn test_calling_non_function_is_type_error() {
        let err = ExportValue::from(1).call(&[]).unwrap_err();
        assert!(matches!(err, MockError::Thrown(m) if m.contains("not a function")));
    }

    #[test]
    fn test_namespace_keeps_insertion_order() {
        let ns = ModuleNamespace::new();
        ns.set("b", ExportValue::from(1));
        ns.set("a", ExportValue::from(2));
        ns.set("default", ExportValue::Null);
        assert_eq!(ns.keys(), vec!["b", "a", "default"]);
        assert!(ns.has("a"));
        assert!(ns.ptr_eq(&ns.clone()));
        assert!(!ns.ptr_eq(&ModuleNamespace::new()));
    }
}
