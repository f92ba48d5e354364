pub mod codec;
pub mod link;
pub mod protocol;

pub use codec::{CodecError, JsonLinesCodec};
pub use link::{BoxReader, BoxWriter, IpcLink};
pub use protocol::{CoordinatorMessage, ReadMode, Row, ViewerCounts, WorkerId, WorkerMessage};
