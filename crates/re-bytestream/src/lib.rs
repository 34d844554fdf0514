//! The `ByteStream` Read/Write/QueryWriteStatus protocol logic, kept
//! independent of any particular transport so it can be unit tested
//! without spinning up a gRPC server.

pub mod query;
pub mod read;
pub mod write_session;

pub use query::{query_write_status, WriteStatus};
pub use read::read_chunks;
pub use write_session::{WriteOutcome, WriteSession};
