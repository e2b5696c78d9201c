mod draft;
mod method;
mod operation;

pub use draft::{DraftDocument, SyncStatus};
pub use method::HttpMethod;
pub use operation::{MalformedOperation, NewOperation, OperationKind, PendingOperation, QueueEntry};
