// 客户端错误日志管道
pub mod batch;
pub mod boundary;
pub mod console;
pub mod context;
pub mod filter;
pub mod fingerprint;
pub mod hooks;
pub mod listeners;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod transport;

pub use batch::{BatchQueue, BatchSettings, BatchStats, FlushOutcome};
pub use boundary::{BoundaryFailure, ErrorBoundary};
pub use hooks::{spawn_monitored, PROMISE_SOURCE, WINDOW_SOURCE};
pub use listeners::{ListenerBus, ListenerId};
pub use scheduler::ScheduledTask;
pub use service::{ErrorLoggingService, LogOutcome, DEFAULT_SOURCE};
pub use store::{FileStorage, KeyValueStorage, LocalLogStore, MemoryStorage};
pub use transport::{HttpTransport, LogTransport, NullTransport};
