pub mod event;
pub mod session;

pub use event::{CloseReason, SessionState, StreamEvent};
pub use session::{SessionConfig, StreamSession};
