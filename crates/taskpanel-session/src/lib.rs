/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public session crate surface (types, transport seam, WAMP client, mock)
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod mock;
pub mod session;
pub mod types;
pub mod wamp;

// Re-export commonly used types from session
pub use session::{EventCallback, Result, Session, SessionError, SessionTransport, callback_id};

// Re-export all types
pub use types::*;

// Re-export the concrete transports
pub use mock::{MockSession, RecordedCall, RecordedSubscription};
pub use wamp::{WampMessage, WampSession};
