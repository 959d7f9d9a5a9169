//! Scripted classifiers and capabilities for deterministic tests without
//! network calls.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use relay_core::{
    Capability, CapabilityError, Classifier, ClassifierError, ClassifyRequest, Context,
    HandlerOutput,
};

/// One pre-programmed classifier answer.
#[derive(Clone, Debug)]
pub enum MockClassification {
    Label(String),
    Error(String),
    Panic(String),
    Delay(Duration, Box<MockClassification>),
}

impl MockClassification {
    pub fn label(label: &str) -> Self {
        Self::Label(label.to_string())
    }
}

/// Classifier that answers from a script, cycling once it runs out.
pub struct ScriptedClassifier {
    script: Vec<MockClassification>,
    call_count: AtomicUsize,
    seen_history: Mutex<Vec<usize>>,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<MockClassification>) -> Self {
        Self {
            script,
            call_count: AtomicUsize::new(0),
            seen_history: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `label`.
    pub fn always(label: &str) -> Self {
        Self::new(vec![MockClassification::label(label)])
    }

    /// Answer each label in turn, then start over.
    pub fn cycle(labels: &[&str]) -> Self {
        Self::new(labels.iter().map(|l| MockClassification::label(l)).collect())
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// History length seen on each call.
    pub fn seen_history(&self) -> Vec<usize> {
        self.seen_history.lock().clone()
    }
}

#[async_trait]
impl Classifier for ScriptedClassifier {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify(&self, request: &ClassifyRequest<'_>) -> Result<String, ClassifierError> {
        let n = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.seen_history.lock().push(request.history.len());
        let Some(step) = self.script.get(n % self.script.len().max(1)).cloned() else {
            return Err(ClassifierError::Malformed("empty script".into()));
        };
        play_classification(step).await
    }
}

async fn play_classification(mut step: MockClassification) -> Result<String, ClassifierError> {
    loop {
        match step {
            MockClassification::Label(label) => return Ok(label),
            MockClassification::Error(msg) => return Err(ClassifierError::Request(msg)),
            MockClassification::Panic(msg) => panic!("{msg}"),
            MockClassification::Delay(delay, inner) => {
                tokio::time::sleep(delay).await;
                step = *inner;
            }
        }
    }
}

/// One pre-programmed capability invocation.
#[derive(Clone, Debug)]
pub enum MockInvocation {
    Output(HandlerOutput),
    Error(String),
    Panic(String),
    Delay(Duration, Box<MockInvocation>),
}

/// Capability that answers from a script, cycling once it runs out, and
/// records what it was called with.
pub struct MockCapability {
    name: String,
    description: String,
    script: Vec<MockInvocation>,
    calls: Mutex<Vec<(String, Context)>>,
}

impl MockCapability {
    pub fn new(name: &str, script: Vec<MockInvocation>) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Always finishes with `response` and no context.
    pub fn done(name: &str, response: &str) -> Self {
        Self::new(name, vec![MockInvocation::Output(HandlerOutput::done(response))])
    }

    /// Always returns `output`.
    pub fn returning(name: &str, output: HandlerOutput) -> Self {
        Self::new(name, vec![MockInvocation::Output(output)])
    }

    /// Always fails with `CapabilityError::Failed(message)`.
    pub fn failing(name: &str, message: &str) -> Self {
        Self::new(name, vec![MockInvocation::Error(message.to_string())])
    }

    pub fn panicking(name: &str, message: &str) -> Self {
        Self::new(name, vec![MockInvocation::Panic(message.to_string())])
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Inputs and contexts this capability was invoked with, in order.
    pub fn calls(&self) -> Vec<(String, Context)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Capability for MockCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, input: &str, context: &Context) -> Result<HandlerOutput, CapabilityError> {
        let step = {
            let mut calls = self.calls.lock();
            let n = calls.len();
            calls.push((input.to_string(), context.clone()));
            self.script.get(n % self.script.len().max(1)).cloned()
        };
        let Some(mut step) = step else {
            return Err(CapabilityError::Failed("empty script".into()));
        };
        loop {
            match step {
                MockInvocation::Output(out) => return Ok(out),
                MockInvocation::Error(msg) => return Err(CapabilityError::Failed(msg)),
                MockInvocation::Panic(msg) => panic!("{msg}"),
                MockInvocation::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    step = *inner;
                }
            }
        }
    }
}
