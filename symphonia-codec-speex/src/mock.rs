//! A tiny variable-bitrate engine for exercising the framing code.
//!
//! Each frame is a 5-bit submode (1), the 16-bit frame mean, a 3-bit filler
//! count `k` and `3 * k` filler bits, so frame lengths vary and are rarely
//! byte aligned. A submode of 15 reads as a terminator.

use std::sync::{Arc, Mutex};

use crate::bits::BitCursor;
use crate::engine::{DecodeStatus, EncoderCtl, FrameDecoder, FrameEncoder, ModeInfo, SpeexEngine};
use crate::errors::{Error, Result};

pub const TOY_BITSTREAM_VERSION: i32 = 4;

const MODES: [ModeInfo; 3] = [
    ModeInfo {
        name: "narrowband",
        frame_size: 160,
        bitstream_version: TOY_BITSTREAM_VERSION,
        sample_rate: 8000,
    },
    ModeInfo {
        name: "wideband",
        frame_size: 320,
        bitstream_version: TOY_BITSTREAM_VERSION,
        sample_rate: 16000,
    },
    ModeInfo {
        name: "ultra-wideband",
        frame_size: 640,
        bitstream_version: TOY_BITSTREAM_VERSION,
        sample_rate: 32000,
    },
];

pub fn filler_count(mean: i16) -> usize {
    (mean as u16 % 8) as usize
}

/// Bits one frame with this mean occupies.
pub fn frame_bits(mean: i16) -> usize {
    5 + 16 + 3 + 3 * filler_count(mean)
}

/// Append one frame as the toy encoder would.
pub fn pack_frame(bits: &mut BitCursor, mean: i16) {
    bits.pack(1, 5);
    bits.pack(mean as u16 as u32, 16);
    let k = filler_count(mean);
    bits.pack(k as u32, 3);
    for _ in 0..k {
        bits.pack(0b101, 3);
    }
}

#[derive(Clone, Default)]
pub struct ToyEngine {
    pub ctls: Arc<Mutex<Vec<EncoderCtl>>>,
    pub refuse_encoder: bool,
}

impl SpeexEngine for ToyEngine {
    fn query_mode(&self, mode: i32) -> Option<ModeInfo> {
        usize::try_from(mode).ok().and_then(|m| MODES.get(m)).copied()
    }

    fn init_decoder(&self, mode: i32) -> Result<Box<dyn FrameDecoder>> {
        let info = self
            .query_mode(mode)
            .ok_or_else(|| Error::Engine(format!("no mode {}", mode)))?;
        Ok(Box::new(ToyDecoder {
            frame_size: info.frame_size,
        }))
    }

    fn init_encoder(&self, mode: i32) -> Result<Box<dyn FrameEncoder>> {
        if self.refuse_encoder {
            return Err(Error::Engine("encoder refused".to_string()));
        }
        let info = self
            .query_mode(mode)
            .ok_or_else(|| Error::Engine(format!("no mode {}", mode)))?;
        Ok(Box::new(ToyEncoder {
            frame_size: info.frame_size,
            ctls: self.ctls.clone(),
        }))
    }
}

struct ToyDecoder {
    frame_size: usize,
}

impl FrameDecoder for ToyDecoder {
    fn decode(&mut self, bits: &mut BitCursor, pcm: &mut [i16]) -> DecodeStatus {
        if bits.remaining() < 5 {
            return DecodeStatus::EndOfStream;
        }
        match bits.unpack(5) {
            1 => {}
            15 => return DecodeStatus::EndOfStream,
            _ => return DecodeStatus::Corrupted,
        }
        let mean = bits.unpack(16) as u16 as i16;
        let k = bits.unpack(3) as usize;
        bits.skip(3 * k);
        pcm[..self.frame_size].fill(mean);
        DecodeStatus::Ok
    }
}

struct ToyEncoder {
    frame_size: usize,
    ctls: Arc<Mutex<Vec<EncoderCtl>>>,
}

impl FrameEncoder for ToyEncoder {
    fn ctl(&mut self, ctl: EncoderCtl) -> Result<()> {
        if let Ok(mut ctls) = self.ctls.lock() {
            ctls.push(ctl);
        }
        Ok(())
    }

    fn encode(&mut self, pcm: &[i16], bits: &mut BitCursor) -> Result<()> {
        let pcm = &pcm[..self.frame_size];
        let sum: i64 = pcm.iter().map(|s| *s as i64).sum();
        pack_frame(bits, (sum / pcm.len() as i64) as i16);
        Ok(())
    }
}
