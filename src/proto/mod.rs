//! Wire protocol: framing and typed messages.
//!
//! Inbound bytes go through [`FrameDecoder`] into raw frames, then
//! [`Request::decode`] turns each frame into a typed request. Replies are
//! encoded with [`encode_reply`].

mod codec;
mod messages;

pub use codec::{encode, encode_reply, FrameDecoder, DEFAULT_MAX_FRAME_BYTES};
pub use messages::{
    CreateRequest, DeleteRequest, GetDataRequest, GetRequest, ListEntry, ListRequest, ObjectBody,
    Rejected, Reply, Request, RequestBody, RequestKind, UnsubRequest,
};
