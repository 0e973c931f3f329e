//! Job board engine: HTTP transport, event stream, polling, cache and the
//! runtime that wires them to the core store.
mod api;
mod board;
mod cache;
mod config;
mod persist;
mod poller;
mod sink;
mod stream;
mod transport;

pub use api::{JobBoardClient, Repo, TriggerRequest, AI_REQUEST_TIMEOUT};
pub use board::{BoardError, BoardSettings, JobBoard};
pub use cache::{FileJobCache, JobCache, MemoryJobCache, CACHE_FILENAME};
pub use config::{normalize_base_url, Config, ConfigError};
pub use persist::{PersistError, StateDir};
pub use poller::{PollOutcome, PollScheduler, SnapshotSource};
pub use sink::{ChannelSink, EventSink};
pub use stream::{
    FrameDecoder, JobEventDecoder, JobStreamDecoder, StreamConnection, StreamSettings,
    StreamTarget, PING_FRAME,
};
pub use transport::{ReqwestTransport, RequestOptions, Transport, TransportSettings};
