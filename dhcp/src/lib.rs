pub mod error;
pub mod handler;
pub mod lease_manager;
pub mod model;
pub mod net;
pub mod packet;
pub mod security;
pub mod server;
pub mod store;

pub use error::{LeaseError, PacketError, RequestError, ServerError};
pub use handler::{HandlerConfig, PacketHandler};
pub use lease_manager::LeaseManager;
pub use model::{Lease, LeaseKind, LeaseState, Mac, MessageType, PoolConfig, RecentEvent, Request, Reservation, Response, Statistics};
pub use security::Security;
pub use server::{Config, Server};
pub use store::{InMemoryStore, Store};
