// Re-export needed modules for testing
pub mod chat; // The reliability layer: connection, sending, history, typing, receipts
pub mod errors;
pub mod models;

// Re-export main types for convenience
pub use chat::ChatClient;
pub use errors::{ChatError, NoticeBoard};
pub use models::*;
