//! Call tracking for stub functions

use std::collections::VecDeque;

use crate::value::{ExportValue, NativeFn};

/// A recorded call to a stub.
#[derive(Debug, Clone)]
pub struct MockCall {
    /// Arguments passed to the call
    pub args: Vec<ExportValue>,
    /// Timestamp of the call
    pub timestamp_ms: u64,
}

/// Configured stub behavior.
#[derive(Clone, Default)]
pub struct MockBehavior {
    /// Values to return on successive calls, consumed front first
    pub return_values: VecDeque<ExportValue>,
    /// Value to return once the queue is empty
    pub return_value: Option<ExportValue>,
    /// Replacement implementation
    pub implementation: Option<NativeFn>,
    /// Error message to throw
    pub throws: Option<String>,
}

impl std::fmt::Debug for MockBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBehavior")
            .field("return_values", &self.return_values.len())
            .field("return_value", &self.return_value.is_some())
            .field("implementation", &self.implementation.is_some())
            .field("throws", &self.throws)
            .finish()
    }
}

/// What a stub call should do once the call is recorded.
pub(crate) enum MockOutcome {
    Return(ExportValue),
    Throw(String),
    Call(NativeFn),
}

/// Call-tracking state of one stub. Every stub owns its own instance, so
/// two automocks of the same module never share calls or behavior.
#[derive(Debug, Default)]
pub struct MockFn {
    /// All recorded calls
    pub calls: Vec<MockCall>,
    /// Behavior configuration
    pub behavior: MockBehavior,
}

impl MockFn {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call and decide its outcome.
    pub(crate) fn invoke(&mut self, args: &[ExportValue]) -> MockOutcome {
        self.record_call(args.to_vec());

        if let Some(message) = &self.behavior.throws {
            return MockOutcome::Throw(message.clone());
        }
        if let Some(value) = self.behavior.return_values.pop_front() {
            return MockOutcome::Return(value);
        }
        if let Some(implementation) = &self.behavior.implementation {
            return MockOutcome::Call(implementation.clone());
        }
        MockOutcome::Return(
            self.behavior
                .return_value
                .clone()
                .unwrap_or(ExportValue::Undefined),
        )
    }

    /// Record a call to this stub.
    pub fn record_call(&mut self, args: Vec<ExportValue>) {
        self.calls.push(MockCall {
            args,
            timestamp_ms: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        });
    }

    /// Return `value` from every call.
    pub fn returns(&mut self, value: ExportValue) {
        self.behavior.return_value = Some(value);
    }

    /// Queue a value for the next call only.
    pub fn returns_once(&mut self, value: ExportValue) {
        self.behavior.return_values.push_back(value);
    }

    /// Replace the stub's body.
    pub fn implementation(&mut self, implementation: NativeFn) {
        self.behavior.implementation = Some(implementation);
    }

    /// Make every call throw.
    pub fn throws(&mut self, message: impl Into<String>) {
        self.behavior.throws = Some(message.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }

    pub fn was_called(&self) -> bool {
        !self.calls.is_empty()
    }

    /// Whether any call received exactly `args` (`===` per argument).
    pub fn was_called_with(&self, args: &[ExportValue]) -> bool {
        self.calls.iter().any(|call| call.args == args)
    }

    pub fn last_call_args(&self) -> Option<&[ExportValue]> {
        self.calls.last().map(|call| call.args.as_slice())
    }

    /// Clear calls, keep behavior.
    pub fn reset_calls(&mut self) {
        self.calls.clear();
    }

    /// Clear calls and behavior.
    pub fn reset(&mut self) {
        self.calls.clear();
        self.behavior = MockBehavior::default();
    }
}
