use std::num::NonZeroUsize;

use log::{debug, error, warn};
use symphonia_core::codecs::{decl_codec_type, CodecParameters, CodecType};
use symphonia_core::meta::{Metadata, MetadataLog};

use crate::bits::BitCursor;
use crate::clock::PresentationClock;
use crate::consts::Mode;
use crate::engine::{DecodeStatus, FrameDecoder, SpeexEngine};
use crate::errors::{Error, HeaderError, Result};
use crate::header::CodecHeader;
use crate::negotiate::{HeaderNegotiation, Negotiated, Offer};
use crate::packet::{DecodedFrame, FramePacket};
use crate::stereo::StereoFold;

/// Speex packets preceded by the header and comment packets.
pub const CODEC_TYPE_SPEEX: CodecType = decl_codec_type(b"spx");
/// Speex frames carried over RTP, one frame per packet, no header exchange.
pub const CODEC_TYPE_SPEEX_RTP: CodecType = decl_codec_type(b"spxr");

pub(crate) fn alloc_pcm(len: usize) -> Result<Vec<i16>> {
    let mut pcm = Vec::new();
    pcm.try_reserve_exact(len)?;
    pcm.resize(len, 0);
    Ok(pcm)
}

/// Per-stream decoding state, built once the header is known.
pub(crate) struct Stream {
    pub(crate) header: CodecHeader,
    pub(crate) decoder: Box<dyn FrameDecoder>,
    pub(crate) clock: PresentationClock,
    pub(crate) stereo: Option<StereoFold>,
}

impl Stream {
    pub(crate) fn new(header: CodecHeader, engine: &dyn SpeexEngine) -> Result<Self> {
        let decoder = engine.init_decoder(header.mode)?;
        let stereo = (header.channels == 2).then(StereoFold::new);
        Ok(Self {
            clock: PresentationClock::new(header.sample_rate()),
            header,
            decoder,
            stereo,
        })
    }

    /// Decode one frame at the cursor, without touching the clock.
    fn decode_frame(&mut self, bits: &mut BitCursor) -> Result<Option<Vec<i16>>> {
        let frame_size = self.header.frame_len();
        let mut pcm = alloc_pcm(frame_size * self.header.channel_count())?;

        if let Some(stereo) = self.stereo.as_mut() {
            stereo.read_inband(bits);
        }

        match self.decoder.decode(bits, &mut pcm) {
            DecodeStatus::Ok => {}
            DecodeStatus::EndOfStream => return Ok(None),
            DecodeStatus::Corrupted => {
                error!("decoding error: corrupted stream?");
                return Err(Error::CodecTransform("corrupted frame".to_string()));
            }
        }
        if bits.remaining() < 0 {
            warn!("decoding overflow: corrupted stream?");
        }

        let channels = self.header.channel_count();
        if let Some(stereo) = self.stereo.as_mut() {
            stereo.unfold(&mut pcm, frame_size);
        } else if channels > 2 {
            // spread mono to every channel, last frame first
            for i in (0..frame_size).rev() {
                let sample = pcm[i];
                pcm[i * channels..(i + 1) * channels].fill(sample);
            }
        }
        Ok(Some(pcm))
    }

    fn stamp(&mut self, samples: Vec<i16>) -> DecodedFrame {
        let start = self.clock.get();
        let end = self.clock.advance(self.header.frame_len() as u64);
        DecodedFrame {
            samples,
            channels: self.header.channel_count(),
            rate: self.header.sample_rate(),
            start,
            end,
        }
    }
}

enum FrameSource {
    /// Header and comment packets first, then audio packets.
    Framed(HeaderNegotiation),
    /// Bare frames; the header is synthesised from the transport rate,
    /// 0 meaning the narrowband mode rate.
    Headerless { rate: u32 },
}

/// Speex decoder producing timestamped PCM frames.
pub struct SpeexDecoder {
    engine: Box<dyn SpeexEngine>,
    source: FrameSource,
    stream: Option<Stream>,
    bits: BitCursor,
    params: CodecParameters,
    metadata: MetadataLog,
}

impl SpeexDecoder {
    /// Build a decoder for `spx` or `spxr` streams.
    ///
    /// For `spx`, `extra_data` may already hold the framed header segments.
    /// For `spxr`, `sample_rate` is the RTP clock rate.
    pub fn try_new(params: &CodecParameters, engine: Box<dyn SpeexEngine>) -> Result<Self> {
        let source = if params.codec == CODEC_TYPE_SPEEX {
            FrameSource::Framed(HeaderNegotiation::new(params.extra_data.as_deref()))
        } else if params.codec == CODEC_TYPE_SPEEX_RTP {
            FrameSource::Headerless {
                rate: params.sample_rate.unwrap_or(0),
            }
        } else {
            return Err(Error::Config(format!(
                "unsupported codec type {:?}",
                params.codec
            )));
        };

        Ok(Self {
            engine,
            source,
            stream: None,
            bits: BitCursor::new(),
            params: params.clone(),
            metadata: MetadataLog::default(),
        })
    }

    /// Decode one packet, appending every decoded frame to `out`.
    ///
    /// Returns the number of frames appended. On error, frames decoded from
    /// the packet before the failure are still in `out`.
    pub fn decode(&mut self, packet: &FramePacket, out: &mut Vec<DecodedFrame>) -> Result<usize> {
        let offer = match &mut self.source {
            FrameSource::Framed(negotiation) => {
                negotiation.offer(packet.buf(), self.engine.as_ref())?
            }
            FrameSource::Headerless { rate } => {
                let rate = *rate;
                return self.decode_headerless(rate, packet, out);
            }
        };

        match offer {
            Offer::Header | Offer::ExtraHeader => Ok(0),
            Offer::Negotiated { stream, audio } => {
                self.start(*stream)?;
                if audio {
                    self.decode_packet(packet, out)
                } else {
                    Ok(0)
                }
            }
            Offer::Audio => self.decode_packet(packet, out),
        }
    }

    fn start(&mut self, negotiated: Negotiated) -> Result<()> {
        let stream = match Stream::new(negotiated.header, self.engine.as_ref()) {
            Ok(stream) => stream,
            Err(e) => {
                error!("cannot initialise the decoder: {}", e);
                if let FrameSource::Framed(negotiation) = &mut self.source {
                    negotiation.reset();
                }
                return Err(e);
            }
        };

        let mut params = stream.header.codec_params();
        params.for_codec(self.params.codec);
        if let FrameSource::Framed(negotiation) = &self.source {
            params.with_extra_data(negotiation.header_bytes().into());
        }
        self.params = params;
        self.metadata.push(negotiated.metadata);
        self.stream = Some(stream);
        Ok(())
    }

    fn decode_packet(&mut self, packet: &FramePacket, out: &mut Vec<DecodedFrame>) -> Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::Header(HeaderError::Missing))?;

        if packet.pts != 0 && packet.pts != stream.clock.get() {
            stream.clock.set(packet.pts);
        }
        if !stream.clock.is_started() {
            debug!("no timestamp yet, dropping packet");
            return Ok(0);
        }

        let frames = packet
            .frames
            .map(NonZeroUsize::get)
            .unwrap_or_else(|| stream.header.packet_frames());
        if stream.header.frame_len() == 0 {
            return Ok(0);
        }

        self.bits.read_from(packet.buf());
        let mut produced = 0;
        for _ in 0..frames {
            match stream.decode_frame(&mut self.bits)? {
                Some(pcm) => {
                    out.push(stream.stamp(pcm));
                    produced += 1;
                }
                None => break,
            }
        }
        Ok(produced)
    }

    fn decode_headerless(
        &mut self,
        rate: u32,
        packet: &FramePacket,
        out: &mut Vec<DecodedFrame>,
    ) -> Result<usize> {
        if packet.pts == 0 {
            return Ok(0);
        }

        if self.stream.is_none() {
            let mode = Mode::Narrowband.id();
            let info = self
                .engine
                .query_mode(mode)
                .ok_or(Error::Header(HeaderError::UnknownMode(mode)))?;
            let rate = if rate == 0 { info.sample_rate } else { rate };
            let mut header = CodecHeader::new(rate, 1, mode, &info);
            header.vbr = true;

            let mut stream = Stream::new(header, self.engine.as_ref())?;
            stream.clock.set(packet.pts);
            debug!("headerless speex stream at {} Hz", rate);

            let mut params = stream.header.codec_params();
            params.for_codec(self.params.codec);
            self.params = params;
            self.stream = Some(stream);
        }

        let stream = self
            .stream
            .as_mut()
            .ok_or(Error::Header(HeaderError::Missing))?;
        self.bits.read_from(packet.buf());
        match stream.decode_frame(&mut self.bits)? {
            Some(pcm) => {
                out.push(stream.stamp(pcm));
                Ok(1)
            }
            None => {
                error!("decoding error: corrupted stream?");
                Err(Error::CodecTransform("no frame in packet".to_string()))
            }
        }
    }

    /// Forget timing and stereo state, e.g. after a seek. The header stays.
    pub fn reset(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            stream.clock.set(0);
            if let Some(stereo) = stream.stereo.as_mut() {
                *stereo = StereoFold::new();
            }
        }
        self.bits.reset();
    }

    /// Output stream parameters; complete once the header is known.
    pub fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    pub fn header(&self) -> Option<&CodecHeader> {
        self.stream.as_ref().map(|s| &s.header)
    }

    pub fn metadata(&mut self) -> Metadata<'_> {
        self.metadata.metadata()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::comment::build_comments;
    use crate::header::push_segment;
    use crate::mock::{pack_frame, ToyEngine};

    fn stream_header(mode: i32, channels: u32, fpp: i32) -> CodecHeader {
        let info = ToyEngine::default().query_mode(mode).unwrap();
        let mut header = CodecHeader::new(info.sample_rate, channels, mode, &info);
        header.vbr = true;
        header.frames_per_packet = fpp;
        header
    }

    fn audio(means: &[i16]) -> Vec<u8> {
        let mut bits = BitCursor::new();
        for mean in means {
            pack_frame(&mut bits, *mean);
        }
        bits.insert_terminator();
        bits.to_bytes()
    }

    fn framed_decoder() -> SpeexDecoder {
        let _ = pretty_env_logger::try_init();
        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_SPEEX);
        SpeexDecoder::try_new(&params, Box::new(ToyEngine::default())).unwrap()
    }

    fn negotiate(decoder: &mut SpeexDecoder, header: &CodecHeader) {
        let mut out = vec![];
        let comments = build_comments("unit", &[("TITLE", "test")]);
        for pkt in [header.to_bytes(), comments] {
            assert_eq!(decoder.decode(&FramePacket::new(pkt, 0), &mut out), Ok(0));
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_header_negotiation() {
        let mut decoder = framed_decoder();
        negotiate(&mut decoder, &stream_header(1, 1, 1));
        assert!(decoder.header().is_none());

        let mut out = vec![];
        let n = decoder
            .decode(&FramePacket::new(audio(&[-7]), 20_000), &mut out)
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(out[0].samples, vec![-7; 320]);
        assert_eq!((out[0].start, out[0].end), (20_000, 40_000));
        assert_eq!(decoder.header().unwrap().rate, 16000);
        assert_eq!(decoder.codec_params().sample_rate, Some(16000));
        assert!(decoder.codec_params().extra_data.is_some());

        let mut metadata = decoder.metadata();
        let rev = metadata.skip_to_latest().unwrap();
        let mode = rev.tags().iter().find(|t| t.key == "Mode").unwrap();
        assert_eq!(mode.value.to_string(), "wideband VBR");
    }

    #[test]
    fn test_header_from_extra_data() {
        let header = stream_header(0, 1, 2);
        let mut extra = vec![];
        push_segment(&mut extra, &header.to_bytes()).unwrap();
        push_segment(&mut extra, &build_comments("unit", &[])).unwrap();

        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_SPEEX).with_extra_data(extra.into());
        let mut decoder = SpeexDecoder::try_new(&params, Box::new(ToyEngine::default())).unwrap();

        let mut out = vec![];
        let pkt = FramePacket::new(audio(&[1, 2]), 1_000);
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(2));
        assert_eq!(out[1].samples[0], 2);
        assert_eq!(out[1].start, 21_000);
    }

    #[test]
    fn test_truncated_header_resets_negotiation() {
        let mut extra = vec![];
        push_segment(&mut extra, &stream_header(0, 1, 1).to_bytes()).unwrap();
        extra.extend_from_slice(&[0x01, 0x00, 0, 0]);

        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_SPEEX).with_extra_data(extra.into());
        let mut decoder = SpeexDecoder::try_new(&params, Box::new(ToyEngine::default())).unwrap();

        let mut out = vec![];
        let pkt = FramePacket::new(audio(&[3]), 1_000);
        assert!(matches!(
            decoder.decode(&pkt, &mut out),
            Err(Error::Header(HeaderError::Truncated { .. }))
        ));
        assert!(out.is_empty());
        assert!(decoder.header().is_none());

        // negotiation starts over from in-band header packets
        negotiate(&mut decoder, &stream_header(0, 1, 1));
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(1));
        assert_eq!(out[0].samples[0], 3);
    }

    #[test]
    fn test_reject_bad_headers() {
        let mut too_many_channels = stream_header(0, 1, 1);
        too_many_channels.channels = 6;
        let mut newer = stream_header(0, 1, 1);
        newer.bitstream_version += 1;
        let mut short_frames = stream_header(0, 1, 1);
        short_frames.frame_size = 80;
        let mut long_frames = stream_header(0, 1, 1);
        long_frames.frame_size = 16000;

        for (header, expected) in [
            (
                short_frames,
                HeaderError::FrameSizeMismatch {
                    found: 80,
                    expected: 160,
                },
            ),
            (
                long_frames,
                HeaderError::FrameSizeMismatch {
                    found: 16000,
                    expected: 160,
                },
            ),
            (too_many_channels, HeaderError::InvalidChannels(6)),
            (
                newer,
                HeaderError::NewerBitstream {
                    found: 5,
                    supported: 4,
                },
            ),
        ] {
            let mut decoder = framed_decoder();
            negotiate(&mut decoder, &header);
            let mut out = vec![];
            assert_eq!(
                decoder.decode(&FramePacket::new(audio(&[1]), 1_000), &mut out),
                Err(Error::Header(expected))
            );
            assert!(out.is_empty());
            assert!(decoder.header().is_none());
        }
    }

    #[test]
    fn test_oversized_comment_block() {
        let mut decoder = framed_decoder();
        let mut out = vec![];
        let cover = "a".repeat(70_000);
        let comments = build_comments("unit", &[("TITLE", "kept"), ("COVERART", &cover)]);
        for pkt in [stream_header(0, 1, 1).to_bytes(), comments] {
            assert_eq!(decoder.decode(&FramePacket::new(pkt, 0), &mut out), Ok(0));
        }

        assert_eq!(decoder.decode(&FramePacket::new(audio(&[4]), 1_000), &mut out), Ok(1));
        assert_eq!(out[0].samples[0], 4);

        let mut metadata = decoder.metadata();
        let rev = metadata.skip_to_latest().unwrap();
        let title = rev.tags().iter().find(|t| t.key == "TITLE").unwrap();
        assert_eq!(title.value.to_string(), "kept");
    }

    #[test]
    fn test_alloc_failure() {
        assert!(matches!(alloc_pcm(usize::MAX), Err(Error::Allocation(_))));
        assert_eq!(alloc_pcm(4).unwrap(), vec![0; 4]);
    }

    #[test]
    fn test_wait_for_first_timestamp() {
        let mut decoder = framed_decoder();
        negotiate(&mut decoder, &stream_header(1, 1, 1));

        let mut out = vec![];
        assert_eq!(decoder.decode(&FramePacket::new(audio(&[1]), 0), &mut out), Ok(0));
        assert!(out.is_empty());

        assert_eq!(decoder.decode(&FramePacket::new(audio(&[2]), 40_000), &mut out), Ok(1));
        // untimed packets continue from the clock
        assert_eq!(decoder.decode(&FramePacket::new(audio(&[3]), 0), &mut out), Ok(1));
        let stamps: Vec<_> = out.iter().map(|f| (f.start, f.end)).collect();
        assert_eq!(stamps, vec![(40_000, 60_000), (60_000, 80_000)]);
    }

    #[test]
    fn test_contiguous_timestamps() {
        let mut decoder = framed_decoder();
        negotiate(&mut decoder, &stream_header(0, 1, 3));

        let mut out = vec![];
        let pkt = FramePacket::new(audio(&[1, 2, 3]), 1_000_000);
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(3));
        // matching timestamp, no reset
        let pkt = FramePacket::new(audio(&[4, 5, 6]), 1_060_000);
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(3));
        for pair in out.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert_eq!(pair[1].end - pair[1].start, 20_000);
        }

        // a discontinuity resets the clock
        let pkt = FramePacket::new(audio(&[7, 8, 9]), 5_000_000);
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(3));
        assert_eq!(out[6].start, 5_000_000);
        assert_eq!(out[8].end, 5_060_000);
        let means: Vec<_> = out.iter().map(|f| f.samples[0]).collect();
        assert_eq!(means, (1..=9).collect::<Vec<i16>>());
    }

    #[test]
    fn test_declared_frame_count() {
        let mut decoder = framed_decoder();
        negotiate(&mut decoder, &stream_header(0, 1, 1));

        let mut out = vec![];
        let pkt = FramePacket::new(audio(&[10, 11]), 1_000).with_frames(2);
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(2));

        // fewer frames than declared ends at the terminator
        let pkt = FramePacket::new(audio(&[12]), 0).with_frames(4);
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(1));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_stereo() {
        let mut decoder = framed_decoder();
        negotiate(&mut decoder, &stream_header(0, 2, 1));

        let mut pcm = vec![300i16; 320];
        let mut bits = BitCursor::new();
        StereoFold::fold(&mut pcm, 160, &mut bits);
        pack_frame(&mut bits, pcm[0]);
        bits.insert_terminator();

        let mut out = vec![];
        let pkt = FramePacket::new(bits.to_bytes(), 1_000);
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(1));
        assert_eq!(out[0].channels, 2);
        assert_eq!(out[0].frames(), 160);
        assert!(out[0].samples.iter().all(|s| *s == 300));
    }

    #[test]
    fn test_multichannel_spreads_mono() {
        let mut decoder = framed_decoder();
        negotiate(&mut decoder, &stream_header(0, 3, 1));

        let mut out = vec![];
        assert_eq!(decoder.decode(&FramePacket::new(audio(&[-9]), 1_000), &mut out), Ok(1));
        assert_eq!(out[0].channels, 3);
        assert_eq!(out[0].frames(), 160);
        assert_eq!(out[0].samples, vec![-9; 480]);
        assert_eq!((out[0].start, out[0].end), (1_000, 21_000));
    }

    #[test]
    fn test_corrupted_frame_then_next_packet() {
        let mut decoder = framed_decoder();
        negotiate(&mut decoder, &stream_header(0, 1, 2));

        let mut bits = BitCursor::new();
        pack_frame(&mut bits, 5);
        bits.pack(3, 5);
        bits.pack(0, 16);

        let mut out = vec![];
        let pkt = FramePacket::new(bits.to_bytes(), 1_000);
        assert!(matches!(
            decoder.decode(&pkt, &mut out),
            Err(Error::CodecTransform(_))
        ));
        assert_eq!(out.len(), 1);

        let pkt = FramePacket::new(audio(&[6, 7]), 0);
        assert_eq!(decoder.decode(&pkt, &mut out), Ok(2));
        assert_eq!(out[2].samples[0], 7);
        assert_eq!(out[2].end, 61_000);
    }

    #[test]
    fn test_extra_headers_skipped() {
        let mut decoder = framed_decoder();
        let mut header = stream_header(0, 1, 1);
        header.extra_headers = 2;
        negotiate(&mut decoder, &header);

        let mut out = vec![];
        for extra in [b"first".to_vec(), b"second".to_vec()] {
            assert_eq!(decoder.decode(&FramePacket::new(extra, 1_000), &mut out), Ok(0));
        }
        assert_eq!(decoder.decode(&FramePacket::new(audio(&[4]), 1_000), &mut out), Ok(1));
        assert_eq!(out[0].start, 1_000);
    }

    #[test]
    fn test_headerless() {
        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_SPEEX_RTP).with_sample_rate(8000);
        let mut decoder = SpeexDecoder::try_new(&params, Box::new(ToyEngine::default())).unwrap();

        let mut out = vec![];
        assert_eq!(decoder.decode(&FramePacket::new(audio(&[9]), 0), &mut out), Ok(0));
        assert!(out.is_empty());
        assert!(decoder.header().is_none());

        assert_eq!(decoder.decode(&FramePacket::new(audio(&[9]), 160_000), &mut out), Ok(1));
        let header = decoder.header().unwrap();
        assert_eq!((header.mode, header.channels, header.rate), (0, 1, 8000));
        assert!(header.vbr);
        assert_eq!(header.frames_per_packet, 1);

        // the clock is only taken from the first timestamp
        assert_eq!(decoder.decode(&FramePacket::new(audio(&[8]), 999), &mut out), Ok(1));
        assert_eq!(decoder.decode(&FramePacket::new(audio(&[7]), 0), &mut out), Ok(0));
        let stamps: Vec<_> = out.iter().map(|f| (f.start, f.end)).collect();
        assert_eq!(stamps, vec![(160_000, 180_000), (180_000, 200_000)]);

        assert!(matches!(
            decoder.decode(&FramePacket::new(vec![0xf0], 1_000), &mut out),
            Err(Error::CodecTransform(_))
        ));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_unsupported_codec() {
        let params = CodecParameters::new();
        assert!(matches!(
            SpeexDecoder::try_new(&params, Box::new(ToyEngine::default())),
            Err(Error::Config(_))
        ));
    }
}
