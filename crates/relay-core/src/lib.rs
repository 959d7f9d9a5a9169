pub mod capability;
pub mod classifier;
pub mod context;
pub mod envelope;
pub mod ids;

pub use capability::{Capability, CapabilityError, CapabilityInfo, HandlerOutput};
pub use classifier::{Classifier, ClassifierError, ClassifyRequest};
pub use context::{Context, HistoryEntry};
pub use envelope::WorkflowResult;
pub use ids::{SessionId, TurnId};
