//! Speex packet framing for symphonia.
//!
//! The perceptual transform lives behind [`engine::SpeexEngine`]; this crate
//! handles everything around it: the stream header and comment packets,
//! splitting multi-frame packets, headerless RTP streams, PCM accumulation
//! on the encode side and sample-accurate timestamps in both directions.

pub mod bits;
pub mod clock;
pub mod comment;
pub mod config;
mod consts;
pub mod dec;
pub mod enc;
pub mod engine;
pub mod errors;
pub mod header;
pub mod negotiate;
pub mod packet;
pub mod packetizer;
pub mod stereo;

#[cfg(test)]
mod mock;

pub use config::EncoderConfig;
pub use consts::{Mode, SPEEX_HEADER_SIZE, SPEEX_MAGIC, VENDOR_STRING};
pub use dec::{SpeexDecoder, CODEC_TYPE_SPEEX, CODEC_TYPE_SPEEX_RTP};
pub use enc::SpeexEncoder;
pub use errors::{Error, HeaderError, Result};
pub use header::CodecHeader;
pub use packet::{DecodedFrame, FramePacket, PacketFlags};
pub use packetizer::SpeexPacketizer;
