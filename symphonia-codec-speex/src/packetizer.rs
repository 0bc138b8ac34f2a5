use std::num::NonZeroUsize;

use log::{debug, error, warn};
use symphonia_core::codecs::CodecParameters;

use crate::bits::BitCursor;
use crate::dec::{alloc_pcm, Stream, CODEC_TYPE_SPEEX};
use crate::engine::{DecodeStatus, SpeexEngine};
use crate::errors::{Error, HeaderError, Result};
use crate::header::CodecHeader;
use crate::negotiate::{HeaderNegotiation, Negotiated, Offer};
use crate::packet::{FramePacket, PacketFlags};

/// Bits of a partially split packet, waiting for the next call.
struct PendingRemainder {
    data: Vec<u8>,
    offset: usize,
    frames_left: usize,
    last: bool,
}

/// Re-packetizes a Speex stream into one frame per packet.
///
/// Header packets are absorbed; the framed header segments are available
/// from [`SpeexPacketizer::header_bytes`] for the output format.
pub struct SpeexPacketizer {
    engine: Box<dyn SpeexEngine>,
    negotiation: HeaderNegotiation,
    stream: Option<Stream>,
    bits: BitCursor,
    scratch: Vec<i16>,
    pending: Option<PendingRemainder>,
    params: CodecParameters,
}

impl SpeexPacketizer {
    pub fn try_new(params: &CodecParameters, engine: Box<dyn SpeexEngine>) -> Result<Self> {
        if params.codec != CODEC_TYPE_SPEEX {
            return Err(Error::Config(format!(
                "cannot packetize codec type {:?}",
                params.codec
            )));
        }
        Ok(Self {
            engine,
            negotiation: HeaderNegotiation::new(params.extra_data.as_deref()),
            stream: None,
            bits: BitCursor::new(),
            scratch: vec![],
            pending: None,
            params: params.clone(),
        })
    }

    /// Feed one packet; returns its first output packet, if any.
    ///
    /// When the packet held several frames, the rest are fetched with
    /// [`SpeexPacketizer::next_pending`] before the next call.
    pub fn packetize(&mut self, packet: FramePacket) -> Result<Option<FramePacket>> {
        match self.negotiation.offer(packet.buf(), self.engine.as_ref())? {
            Offer::Header => return Ok(None),
            Offer::Negotiated { stream, audio } => {
                self.start(*stream)?;
                if !audio {
                    return Ok(Some(Self::extra_header(packet)));
                }
            }
            Offer::ExtraHeader => return Ok(Some(Self::extra_header(packet))),
            Offer::Audio => {}
        }

        if self.pending.take().is_some() {
            warn!("dropping unsplit frames of the previous packet");
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::Header(HeaderError::Missing))?;

        if packet.pts != 0 && packet.pts != stream.clock.get() {
            stream.clock.set(packet.pts);
        }
        if !stream.clock.is_started() {
            debug!("no timestamp yet, dropping packet");
            return Ok(None);
        }

        let frames = match packet.frames {
            Some(frames) => frames.get(),
            None => stream.header.packet_frames(),
        };
        if frames <= 1 {
            let mut packet = packet;
            packet.pts = stream.clock.get();
            packet.dur = stream.clock.advance(stream.header.frame_len() as u64) - packet.pts;
            packet.frames = None;
            return Ok(Some(packet));
        }

        self.bits.read_from(packet.buf());
        let first = packet.flags.contains(PacketFlags::FIRST);
        let last = packet.flags.contains(PacketFlags::LAST);
        self.split_frame(frames, first, last)
    }

    /// The next single-frame packet split from the last input packet.
    pub fn next_pending(&mut self) -> Result<Option<FramePacket>> {
        let Some(pending) = self.pending.take() else {
            return Ok(None);
        };
        self.bits.read_from_offset(&pending.data, pending.offset);
        self.split_frame(pending.frames_left, false, pending.last)
    }

    /// Feed one packet and collect every output packet it yields.
    pub fn packetize_all(&mut self, packet: FramePacket) -> Result<Vec<FramePacket>> {
        let mut out = vec![];
        if let Some(first) = self.packetize(packet)? {
            out.push(first);
        }
        while let Some(next) = self.next_pending()? {
            out.push(next);
        }
        Ok(out)
    }

    fn extra_header(mut packet: FramePacket) -> FramePacket {
        packet.dur = 0;
        packet
    }

    fn start(&mut self, negotiated: Negotiated) -> Result<()> {
        let stream = match Stream::new(negotiated.header, self.engine.as_ref()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("cannot initialise the decoder: {}", e);
                self.negotiation.reset();
                return Err(e);
            }
        };
        self.scratch = alloc_pcm(stream.header.frame_len() * stream.header.channel_count())?;

        let mut params = stream.header.codec_params();
        params
            .for_codec(CODEC_TYPE_SPEEX)
            .with_extra_data(self.negotiation.header_bytes().into());
        self.params = params;
        self.stream = Some(stream);
        Ok(())
    }

    /// Cut the frame at the cursor into its own packet, `frames` counting
    /// the frames left in the input packet including this one.
    fn split_frame(&mut self, frames: usize, first: bool, last: bool) -> Result<Option<FramePacket>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::Header(HeaderError::Missing))?;

        let start = self.bits.position();
        let before = self.bits.remaining();
        if let Some(stereo) = stream.stereo.as_mut() {
            stereo.read_inband(&mut self.bits);
        }
        match stream.decoder.decode(&mut self.bits, &mut self.scratch) {
            DecodeStatus::Ok => {}
            DecodeStatus::EndOfStream => return Ok(None),
            DecodeStatus::Corrupted => {
                error!("cannot split corrupted packet");
                return Err(Error::CodecTransform("corrupted frame".to_string()));
            }
        }
        let after = self.bits.remaining();
        if after < 0 {
            error!("frame overruns its packet");
            return Err(Error::Framing(format!(
                "frame needs more than the {} bits left in the packet",
                before
            )));
        }

        // round up, leaving room for at least one terminator bit
        let frame_bits = (before - after) as usize;
        let nbytes = (frame_bits + (8 - frame_bits % 8)) / 8;
        let data = self.bits.frame_bytes(start, start + frame_bits, nbytes);

        let more = after > 7 && frames > 1;
        if more {
            let (data, offset) = self.bits.unread_bytes();
            self.pending = Some(PendingRemainder {
                data,
                offset,
                frames_left: frames - 1,
                last,
            });
        }

        let mut flags = PacketFlags::empty();
        flags.set(PacketFlags::FIRST, first);
        flags.set(PacketFlags::LAST, last && !more);

        let pts = stream.clock.get();
        let dur = stream.clock.advance(stream.header.frame_len() as u64) - pts;
        Ok(Some(FramePacket {
            data: data.into(),
            pts,
            dur,
            frames: NonZeroUsize::new(1),
            flags,
        }))
    }

    /// Framed header segments, `[u16 BE length][payload]` twice.
    pub fn header_bytes(&self) -> &[u8] {
        self.negotiation.header_bytes()
    }

    pub fn header(&self) -> Option<&CodecHeader> {
        self.stream.as_ref().map(|s| &s.header)
    }

    pub fn codec_params(&self) -> &CodecParameters {
        &self.params
    }
}
