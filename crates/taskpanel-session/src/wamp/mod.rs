/*
[INPUT]:  Router URL, realm, and WAMP frames
[OUTPUT]: SessionTransport over a WAMP basic-profile WebSocket
[POS]:    WAMP layer - concrete engine connection
[UPDATE]: When adding WAMP roles or changing connection logic
*/

pub mod client;
pub mod message;

pub use client::WampSession;
pub use message::WampMessage;
