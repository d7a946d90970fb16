//! Automatic fakes from a module's real exports
//!
//! Each export is classified into a [`FakeExport`] and rebuilt:
//! functions become call-tracking stubs with the same name and arity,
//! arrays become new empty arrays, plain objects are cloned member by
//! member, primitives and symbols are copied. Reference values are memoized
//! by identity, so aliases and self-references in the real graph map to
//! the same fake instead of recursing forever.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::{
    ExportValue, FunctionKind, FunctionRef, JsArray, JsFunction, JsObject, ModuleNamespace,
    ObjectRef, Symbol,
};

/// How a single export is faked
#[derive(Debug, Clone)]
pub enum FakeExport {
    /// Callable replaced with a stub of the same name and arity
    Stub {
        name: String,
        arity: usize,
        kind: FunctionKind,
        source: FunctionRef,
    },
    /// Object cloned member by member
    Clone(ObjectRef),
    /// Array replaced with a new empty array
    EmptyContainer,
    Symbol(Symbol),
    /// Copied as is
    Primitive(ExportValue),
}

impl FakeExport {
    pub fn classify(value: &ExportValue) -> Self {
        match value {
            ExportValue::Function(f) => Self::Stub {
                name: f.name().to_string(),
                arity: f.arity(),
                kind: f.kind(),
                source: f.clone(),
            },
            ExportValue::Object(o) => Self::Clone(o.clone()),
            ExportValue::Array(_) => Self::EmptyContainer,
            ExportValue::Symbol(s) => Self::Symbol(s.clone()),
            other => Self::Primitive(other.clone()),
        }
    }
}

/// Build a fake namespace with exactly the keys of `real`.
pub fn automock(real: &ModuleNamespace) -> ModuleNamespace {
    let mut mocker = Automocker::default();
    let fake = JsObject::new();
    mocker.remember(real.as_object(), ExportValue::Object(fake.clone()));
    mocker.fill_object(real.as_object(), &fake);
    tracing::trace!("Automocked {} exports", fake.len());
    ModuleNamespace::from_object(fake)
}

/// Fake a single value.
pub fn automock_value(value: &ExportValue) -> ExportValue {
    Automocker::default().mock_value(value)
}

#[derive(Default)]
struct Automocker {
    /// Real reference value address -> its fake
    seen: HashMap<usize, ExportValue>,
}

impl Automocker {
    fn remember<T>(&mut self, real: &Arc<T>, fake: ExportValue) {
        self.seen.insert(address_of(real), fake);
    }

    fn lookup(&self, value: &ExportValue) -> Option<ExportValue> {
        let address = match value {
            ExportValue::Object(o) => address_of(o),
            ExportValue::Array(a) => address_of(a),
            ExportValue::Function(f) => address_of(f),
            _ => return None,
        };
        self.seen.get(&address).cloned()
    }

    fn mock_value(&mut self, value: &ExportValue) -> ExportValue {
        if let Some(fake) = self.lookup(value) {
            return fake;
        }

        match FakeExport::classify(value) {
            FakeExport::Primitive(v) => v,
            FakeExport::Symbol(s) => ExportValue::Symbol(s),
            FakeExport::EmptyContainer => {
                let fake = ExportValue::Array(JsArray::new());
                if let ExportValue::Array(real) = value {
                    self.remember(real, fake.clone());
                }
                fake
            }
            FakeExport::Clone(real) => {
                let fake = JsObject::new();
                self.remember(&real, ExportValue::Object(fake.clone()));
                self.fill_object(&real, &fake);
                ExportValue::Object(fake)
            }
            FakeExport::Stub {
                name,
                arity,
                kind,
                source,
            } => self.mock_function(&source, name, arity, kind),
        }
    }

    fn mock_function(
        &mut self,
        source: &FunctionRef,
        name: String,
        arity: usize,
        kind: FunctionKind,
    ) -> ExportValue {
        // The prototype object exists before the stub so `prototype.constructor`
        // can point back at it.
        let mut pending_prototype = None;
        let prototype = match source.prototype() {
            Some(real) => match self.lookup(&ExportValue::Object(real.clone())) {
                Some(ExportValue::Object(done)) => Some(done),
                _ => {
                    let fake = JsObject::new();
                    self.remember(real, ExportValue::Object(fake.clone()));
                    pending_prototype = Some((real.clone(), fake.clone()));
                    Some(fake)
                }
            },
            None => None,
        };

        let stub = JsFunction::stub(name, arity, kind, prototype);
        self.remember(source, ExportValue::Function(stub.clone()));

        if let Some((real, fake)) = pending_prototype {
            self.fill_object(&real, &fake);
        }
        for (key, value) in source.properties() {
            let fake = self.mock_value(&value);
            stub.set_property(key, fake);
        }

        ExportValue::Function(stub)
    }

    fn fill_object(&mut self, real: &ObjectRef, fake: &ObjectRef) {
        for (key, value) in real.entries() {
            let mocked = self.mock_value(&value);
            fake.set(key, mocked);
        }
    }
}

fn address_of<T>(value: &Arc<T>) -> usize {
    Arc::as_ptr(value) as *const () as usize
}
