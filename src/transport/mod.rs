pub mod fabric;

pub use fabric::{ConnectionFabric, ConnectionId};
