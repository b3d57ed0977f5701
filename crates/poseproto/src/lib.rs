//! poseproto - wire vocabulary for the posecast broadcast channel
//!
//! One channel, N publishers/subscribers, present-value only. A client sends
//! `publish` frames carrying a delimited pose payload; the relay answers with
//! `deliver` frames tagged with the publisher's relay-assigned id.
//!
//! - `id`: `ConnectionId`, the relay-assigned peer identifier
//! - `codec`: `PoseVector` and the delimited text payload codec
//! - `frame`: JSON frames exchanged over the WebSocket

pub mod codec;
pub mod frame;
pub mod id;

pub use codec::{PayloadError, PoseCodec, PoseVector};
pub use frame::{ClientFrame, FrameError, RelayFrame};
pub use id::ConnectionId;
