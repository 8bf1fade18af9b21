pub mod cache;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gateway;
pub mod handle;
pub mod lifecycle;
pub mod protocol;
pub mod request;
pub mod runtime;
pub mod scope;

pub use cache::{HandlerCache, HandlerDescriptor, MirrorEntry, Resolution};
pub use config::{DaemonConfig, GatewayConfig, SandboxConfig};
pub use daemon::{DaemonStatus, DaemonSupervisor};
pub use error::{GatewayError, GatewayResult, MissingKind};
pub use gateway::{Gateway, Invocation, ObjectContext, TriggerOutcome, apply_trigger_action};
pub use handle::HandlerHandle;
pub use lifecycle::SandboxManager;
pub use protocol::{InvocationProtocol, InvocationRequest};
pub use request::{DeleteTarget, TriggerAction, sanitize_headers};
pub use runtime::{ContainerRuntime, Mount, NetworkPolicy, RuntimeError, SandboxSpec, StartOutcome};
#[cfg(feature = "docker")]
pub use runtime::DockerRuntime;
