// 服务端错误收集
pub mod handlers;
pub mod server;
pub mod store;

pub use handlers::CollectorState;
pub use server::{create_app, start_server};
pub use store::{AuditLog, BatchSummary, CollectedError, ErrorStore};
