pub mod backend;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod identity;
pub mod remote;
pub mod session;
pub mod view;

pub use backend::{Backend, PushFeed};
pub use config::ClientConfig;
pub use engine::{Effect, Phase, RoomEvent, RoomState, Transition, reduce};
pub use error::{BackendError, ChatError};
pub use remote::RemoteBackend;
pub use session::{RoomOptions, RoomSession};
pub use view::RoomSnapshot;
