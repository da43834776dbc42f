pub mod connection;
pub mod protocol;
pub mod rooms;
pub mod server;

pub use connection::{ClientType, Connection, MAX_PAYLOAD, Scope};
pub use rooms::{RoomIndex, RoomKind};
pub use server::RealtimeServer;
