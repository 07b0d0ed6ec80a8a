//! History of executed calls and the failed-assertion counter.

use crate::model::{ApiRequest, ApiResponse, Script};
use serde::Serialize;
use std::sync::Arc;

/// One assertion that did not hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssertionFailure {
    /// Plugin name or expression text of the failed assertion.
    pub assertion: String,
    pub message: String,
}

impl AssertionFailure {
    pub fn new(assertion: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            assertion: assertion.into(),
            message: message.into(),
        }
    }
}

/// Record of one executed script.
///
/// Built up by the executor, then handed to the ledger, after which
/// nothing can change it.
#[derive(Debug, Clone, Serialize)]
pub struct ApiCall {
    script: Arc<Script>,
    request: Option<ApiRequest>,
    response: Option<ApiResponse>,
    failed_assertions: Vec<AssertionFailure>,
    duration_ms: u64,
}

impl ApiCall {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            request: None,
            response: None,
            failed_assertions: Vec::new(),
            duration_ms: 0,
        }
    }

    pub fn with_request(mut self, request: Option<ApiRequest>) -> Self {
        self.request = request;
        self
    }

    pub fn with_response(mut self, response: Option<ApiResponse>) -> Self {
        self.response = response;
        self
    }

    pub fn with_failures(mut self, failures: Vec<AssertionFailure>) -> Self {
        self.failed_assertions = failures;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn script(&self) -> &Arc<Script> {
        &self.script
    }

    pub fn request(&self) -> Option<&ApiRequest> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&ApiResponse> {
        self.response.as_ref()
    }

    pub fn failed_assertions(&self) -> &[AssertionFailure] {
        &self.failed_assertions
    }

    pub fn passed(&self) -> bool {
        self.failed_assertions.is_empty()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }
}

/// Append-only call history plus the authoritative failed-assertion
/// counter.
///
/// The counter is not derived from the calls: failures are counted the
/// moment they are signalled.
#[derive(Debug, Clone, Default)]
pub struct CallLedger {
    calls: Vec<ApiCall>,
    failed_assertion_count: u64,
}

impl CallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, call: ApiCall) {
        self.calls.push(call);
    }

    pub fn calls(&self) -> &[ApiCall] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Add one to the counter and return the new value.
    pub fn increment(&mut self) -> u64 {
        self.failed_assertion_count += 1;
        self.failed_assertion_count
    }

    pub fn failed_assertion_count(&self) -> u64 {
        self.failed_assertion_count
    }

    pub fn reset_failed_assertion_count(&mut self) {
        self.failed_assertion_count = 0;
    }

    /// Sum of the failures recorded on each call.
    pub fn recorded_failures(&self) -> usize {
        self.calls.iter().map(|c| c.failed_assertions.len()).sum()
    }

    /// Drop all calls and zero the counter.
    pub fn reset(&mut self) {
        self.calls.clear();
        self.failed_assertion_count = 0;
    }
}
