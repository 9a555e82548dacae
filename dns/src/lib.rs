pub mod cache;
pub mod error;
pub mod forwarder;
pub mod message;
pub mod server;
pub mod wire;

pub use cache::{Cache, CacheEntry, CacheStats};
pub use error::{ForwardError, ParseError, ServerError};
pub use forwarder::{Forwarder, ForwarderConfig, SelectionPolicy};
pub use message::{Class, Query, Question, Record, RecordType, Response, ResponseCode, Transport};
pub use server::{Config, Server, Stats};
