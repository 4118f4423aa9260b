//! Conversation side of the hospital navigator: the triage backend gateway,
//! the workflow state machine that drives it, and the chat log it produces.

pub mod error;
pub mod gateway;
pub mod http_gateway;
pub mod messages;
pub mod observer;
pub mod state;
pub mod workflow;

pub use error::WorkflowError;
pub use gateway::{BackendGateway, MissingBackendGateway};
pub use http_gateway::{HttpBackendGateway, DEFAULT_API_BASE_URL};
pub use messages::{Message, MessageLog, MessageOptions, MessageUpdate, Sender};
pub use observer::{InputRejection, TracingObserver, WorkflowEvent, WorkflowObserver};
pub use state::{WorkflowState, WorkflowStep};
pub use workflow::{WorkflowData, WorkflowSession, WorkflowSnapshot, GREETING};
