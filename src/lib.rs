pub mod api;
pub mod compose;
pub mod config;
pub mod environment;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod logger;
pub mod probe;
pub mod runtime;
pub mod store;
pub mod templates;

pub use error::{ErrorKind, TankerError};
pub use environment::{Environment, EnvironmentStatus};
pub use lifecycle::{Acknowledgement, CreateEnvironment, LifecycleManager};

pub type Result<T> = std::result::Result<T, TankerError>;

// Convenience re-exports for the pluggable seams
pub use events::{EventBus, LifecycleEvent};
pub use runtime::ContainerRuntime;
pub use store::EnvironmentStore;
