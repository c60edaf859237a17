//! Immutable Record Store: in-memory record containers.
//!
//! [`Table`] holds mutable rows behind per-row locks; [`AppendOnlyLog`] holds
//! immutable history. Both implement [`RecordStore`], and the log rejects
//! every update and delete through it.

pub mod log;
pub mod table;
pub mod r#trait;

pub use log::{AppendOnlyLog, Sequenced};
pub use r#trait::RecordStore;
pub(crate) use r#trait::lock;
pub use table::{lock_all, Row, Table};
