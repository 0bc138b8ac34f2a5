use std::num::NonZeroUsize;

use bitflags::bitflags;
use symphonia_core::audio::{AudioBuffer, Channels, Signal, SignalSpec};
use symphonia_core::formats::Packet;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        /// First packet of the stream
        const FIRST = 0b0001;
        /// Last packet of the stream
        const LAST = 0b0010;
    }
}

/// One container-level packet. Timestamps are in microseconds, 0 is unset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FramePacket {
    pub data: Box<[u8]>,
    pub pts: u64,
    pub dur: u64,
    /// Frame count declared by the container, when it differs from the header.
    pub frames: Option<NonZeroUsize>,
    pub flags: PacketFlags,
}

impl FramePacket {
    pub fn new(data: impl Into<Box<[u8]>>, pts: u64) -> Self {
        Self {
            data: data.into(),
            pts,
            ..Default::default()
        }
    }

    pub fn with_frames(mut self, frames: usize) -> Self {
        self.frames = NonZeroUsize::new(frames);
        self
    }

    pub fn with_flags(mut self, flags: PacketFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn buf(&self) -> &[u8] {
        &self.data
    }

    pub fn into_packet(self, track_id: u32) -> Packet {
        Packet::new_from_boxed_slice(track_id, self.pts, self.dur, self.data)
    }
}

impl From<Packet> for FramePacket {
    fn from(packet: Packet) -> Self {
        Self {
            pts: packet.ts,
            dur: packet.dur,
            data: packet.data,
            ..Default::default()
        }
    }
}

/// One decoded frame of interleaved 16-bit PCM.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    pub samples: Vec<i16>,
    pub channels: usize,
    pub rate: u32,
    pub start: u64,
    pub end: u64,
}

impl DecodedFrame {
    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    /// Raw native-endian PCM bytes.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.samples)
    }

    /// Copy into a planar symphonia buffer laid out as `layout`.
    pub fn to_audio_buffer(&self, layout: Channels) -> AudioBuffer<i16> {
        let frames = self.frames();
        let mut buf = AudioBuffer::new(frames as u64, SignalSpec::new(self.rate, layout));
        buf.render_reserved(Some(frames));
        let planes = layout.count().min(self.channels);
        for ch in 0..planes {
            let plane = buf.chan_mut(ch);
            for (i, sample) in plane.iter_mut().enumerate() {
                *sample = self.samples[i * self.channels + ch];
            }
        }
        buf
    }
}
