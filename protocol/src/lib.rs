pub mod frames;
pub mod message;

pub use frames::ControlFrame;
pub use frames::FrameDecodeError;
pub use frames::InboundFrame;
pub use frames::OutboundPayload;
pub use frames::decode_inbound;
pub use message::Message;
pub use message::Role;
