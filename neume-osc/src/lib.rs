pub mod message;
pub mod response;

pub use message::{TimeTag, Timestamp, WireArg, WireBundle, WireMessage, WirePacket};
pub use response::{decode, DecodeError, Response};
