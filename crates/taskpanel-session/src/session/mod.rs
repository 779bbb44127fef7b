/*
[INPUT]:  Transport implementations and engine error sources
[OUTPUT]: Session handle, transport seam, unified error type
[POS]:    Session layer - boundary to the compute engine
[UPDATE]: When transport primitives or error variants change
*/

pub mod error;
pub mod transport;

pub use error::{Result, SessionError};
pub use transport::{EventCallback, Session, SessionTransport, callback_id};
