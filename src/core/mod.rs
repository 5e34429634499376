//! 核心编排层：错误类型、消息协调、单轮对话、服务监管、关闭与运行时上下文

pub mod context;
pub mod coordinator;
pub mod error;
pub mod orchestrator;
pub mod shutdown;
pub mod supervisor;

pub use context::RuntimeContext;
pub use coordinator::{CoordinatorState, MessageCoordinator};
pub use error::{DispatchError, GhostError, ProvisionError, TransportError};
pub use orchestrator::{ChatSession, ReplySource, TurnOutcome};
pub use shutdown::{BrainServerCleanup, ExitTask, ExitTasks, ShutdownManager, ShutdownReason};
pub use supervisor::BrainSupervisor;
