pub mod blocking;
pub mod error;
pub mod machine;
pub mod mock;
pub mod registry;
pub mod router;
pub mod workflow;

pub use blocking::BlockingOrchestrator;
pub use error::{RegistryError, WorkflowError};
pub use machine::{TurnState, WorkflowConfig, WorkflowMachine};
pub use registry::{CapabilityRegistry, RegistryBuilder};
pub use router::{IntentRouter, Route};
pub use workflow::Orchestrator;
