pub mod error;
pub mod registry;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use registry::SessionRegistry;
pub use types::{ClientHandle, Fingerprint, JoinGrant, SessionRecord};
