//! The seam to the speech codec engine that performs the actual transform.
//!
//! The framing code never looks inside a frame: it hands the engine a
//! [`BitCursor`] positioned on the frame and a PCM buffer, and measures how
//! many bits were consumed.

use crate::bits::BitCursor;
use crate::errors::Result;

/// Mode metadata published by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModeInfo {
    pub name: &'static str,
    /// PCM samples per channel in one frame.
    pub frame_size: usize,
    pub bitstream_version: i32,
    pub sample_rate: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeStatus {
    Ok,
    /// Terminator or too few bits left for another frame.
    EndOfStream,
    Corrupted,
}

impl DecodeStatus {
    /// Map the engine's native return code.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => DecodeStatus::Ok,
            -1 => DecodeStatus::EndOfStream,
            _ => DecodeStatus::Corrupted,
        }
    }
}

/// Encoder controls, applied once at construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum EncoderCtl {
    Complexity(i32),
    Vbr(bool),
    Quality(i32),
    VbrQuality(f32),
    VbrMaxBitrate(i32),
    Vad(bool),
    Dtx(bool),
}

pub trait FrameDecoder: Send {
    /// Decode one frame from `bits` into `pcm`; mono output fills
    /// `pcm[..frame_size]`.
    fn decode(&mut self, bits: &mut BitCursor, pcm: &mut [i16]) -> DecodeStatus;
}

pub trait FrameEncoder: Send {
    fn ctl(&mut self, ctl: EncoderCtl) -> Result<()>;

    /// Encode one mono frame of `frame_size` samples, appending to `bits`.
    fn encode(&mut self, pcm: &[i16], bits: &mut BitCursor) -> Result<()>;
}

pub trait SpeexEngine: Send {
    fn query_mode(&self, mode: i32) -> Option<ModeInfo>;

    fn init_decoder(&self, mode: i32) -> Result<Box<dyn FrameDecoder>>;

    fn init_encoder(&self, mode: i32) -> Result<Box<dyn FrameEncoder>>;
}
