// Application-level persistence: applications, sessions, API keys, graph
// annotations, and the file-backed user directory. The engine's own rows
// (executions, resources, queue tasks) live behind the engine's store
// traits.

mod models;
mod repositories;
mod users;

pub use models::{
    AnnotationRow, ApiKeyRow, ApplicationRow, CreateAnnotation, CreateApiKey, CreateSession,
    SessionRow,
};
pub use repositories::Database;
pub use users::{hash_password, verify_password, User, UserDirectory};
