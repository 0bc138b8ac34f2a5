use std::num::NonZeroUsize;

use log::debug;
use symphonia_core::codecs::CodecParameters;

use crate::bits::BitCursor;
use crate::clock::{samples_to_us, PresentationClock};
use crate::comment::build_comments;
use crate::config::EncoderConfig;
use crate::consts::VENDOR_STRING;
use crate::dec::CODEC_TYPE_SPEEX;
use crate::engine::{EncoderCtl, FrameEncoder, SpeexEngine};
use crate::errors::{Error, Result};
use crate::header::{push_segment, CodecHeader};
use crate::packet::{FramePacket, PacketFlags};
use crate::stereo::StereoFold;

/// Speex encoder: slices interleaved PCM into frames and groups the
/// encoded frames into packets.
pub struct SpeexEncoder {
    encoder: Box<dyn FrameEncoder>,
    header: CodecHeader,
    channels: usize,
    frame_len: usize,
    frames_per_packet: usize,
    bits: BitCursor,
    /// Interleaved samples short of a whole frame, carried to the next call.
    delay: Vec<i16>,
    frame: Vec<i16>,
    frames_in_packet: usize,
    clock: PresentationClock,
    extra_data: Vec<u8>,
    started: bool,
}

impl SpeexEncoder {
    pub fn new(
        engine: &dyn SpeexEngine,
        config: &EncoderConfig,
        rate: u32,
        channels: usize,
    ) -> Result<Self> {
        config.validate()?;
        if !(1..=2).contains(&channels) {
            return Err(Error::Config(format!(
                "cannot encode {} channels, only mono or stereo",
                channels
            )));
        }
        if rate == 0 {
            return Err(Error::Config("sample rate must not be 0".to_string()));
        }

        let mode = config.mode.id();
        let info = engine
            .query_mode(mode)
            .ok_or_else(|| Error::Engine(format!("mode {} is not available", mode)))?;

        let mut header = CodecHeader::new(rate, channels as u32, mode, &info);
        header.vbr = !config.cbr;
        header.frames_per_packet = config.frames_per_packet as i32;

        let mut encoder = engine.init_encoder(mode)?;
        encoder.ctl(EncoderCtl::Complexity(config.complexity))?;
        encoder.ctl(EncoderCtl::Vbr(!config.cbr))?;
        if config.cbr {
            encoder.ctl(EncoderCtl::Quality(config.quality as i32))?;
            encoder.ctl(EncoderCtl::Vad(config.vad))?;
        } else {
            encoder.ctl(EncoderCtl::VbrQuality(config.quality))?;
            if config.max_bitrate > 0 {
                encoder.ctl(EncoderCtl::VbrMaxBitrate(config.max_bitrate))?;
            }
        }
        encoder.ctl(EncoderCtl::Dtx(config.dtx))?;

        let mut extra_data = vec![];
        push_segment(&mut extra_data, &header.to_bytes())?;
        push_segment(
            &mut extra_data,
            &build_comments(VENDOR_STRING, &[("ENCODER", VENDOR_STRING)]),
        )?;

        let frame_samples = info.frame_size * channels;
        let mut delay = vec![];
        delay.try_reserve_exact(frame_samples)?;
        let mut frame = vec![];
        frame.try_reserve_exact(frame_samples)?;

        debug!(
            "encoding: {} mode, frame size {}, channels {}, sample rate {}",
            info.name, info.frame_size, channels, rate
        );

        Ok(Self {
            encoder,
            header,
            channels,
            frame_len: info.frame_size,
            frames_per_packet: config.frames_per_packet,
            bits: BitCursor::new(),
            delay,
            frame,
            frames_in_packet: 0,
            clock: PresentationClock::new(rate),
            extra_data,
            started: false,
        })
    }

    /// Encode a block of interleaved samples whose first sample plays at
    /// `start` microseconds. Returns every packet completed by this block.
    pub fn encode(&mut self, pcm: &[i16], start: u64) -> Result<Vec<FramePacket>> {
        if pcm.len() % self.channels != 0 {
            return Err(Error::Framing(format!(
                "{} samples do not split into {} channels",
                pcm.len(),
                self.channels
            )));
        }

        // the open packet and the delay buffer started before `start`
        let buffered = self.delay.len() / self.channels + self.frames_in_packet * self.frame_len;
        let pts = start.saturating_sub(samples_to_us(buffered as u64, self.clock.rate()));
        self.clock.set(pts);

        let frame_samples = self.frame_len * self.channels;
        let mut input = pcm;
        let mut out = vec![];
        while self.delay.len() + input.len() >= frame_samples {
            let take = frame_samples - self.delay.len();
            self.frame.clear();
            self.frame.extend_from_slice(&self.delay);
            self.frame.extend_from_slice(&input[..take]);
            self.delay.clear();
            input = &input[take..];

            if let Some(packet) = self.encode_frame()? {
                out.push(packet);
            }
        }
        self.delay.extend_from_slice(input);
        Ok(out)
    }

    /// Encode what is left: delayed samples are padded with silence to a
    /// whole frame, and a short packet declares its frame count.
    pub fn flush(&mut self) -> Result<Vec<FramePacket>> {
        let mut out = vec![];
        if !self.delay.is_empty() {
            self.frame.clear();
            self.frame.extend_from_slice(&self.delay);
            self.frame.resize(self.frame_len * self.channels, 0);
            self.delay.clear();
            if let Some(packet) = self.encode_frame()? {
                out.push(packet);
            }
        }
        if self.frames_in_packet > 0 {
            out.push(self.finish_packet());
        }
        if let Some(last) = out.last_mut() {
            last.flags |= PacketFlags::LAST;
        }
        Ok(out)
    }

    fn encode_frame(&mut self) -> Result<Option<FramePacket>> {
        if self.channels == 2 {
            StereoFold::fold(&mut self.frame, self.frame_len, &mut self.bits);
        }
        self.encoder
            .encode(&self.frame[..self.frame_len], &mut self.bits)?;

        self.frames_in_packet += 1;
        if self.frames_in_packet < self.frames_per_packet {
            return Ok(None);
        }
        Ok(Some(self.finish_packet()))
    }

    fn finish_packet(&mut self) -> FramePacket {
        let frames = self.frames_in_packet;
        self.frames_in_packet = 0;

        self.bits.insert_terminator();
        let data = self.bits.to_bytes();
        self.bits.reset();

        let pts = self.clock.get();
        let dur = self.clock.advance((frames * self.frame_len) as u64) - pts;

        let mut flags = PacketFlags::empty();
        if !self.started {
            flags |= PacketFlags::FIRST;
            self.started = true;
        }

        FramePacket {
            data: data.into(),
            pts,
            dur,
            frames: if frames < self.frames_per_packet {
                NonZeroUsize::new(frames)
            } else {
                None
            },
            flags,
        }
    }

    pub fn header(&self) -> &CodecHeader {
        &self.header
    }

    /// Framed header and comment segments for the output format.
    pub fn extra_data(&self) -> &[u8] {
        &self.extra_data
    }

    /// Samples per channel in one frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn codec_params(&self) -> CodecParameters {
        let mut params = self.header.codec_params();
        params
            .for_codec(CODEC_TYPE_SPEEX)
            .with_extra_data(self.extra_data.clone().into_boxed_slice());
        params
    }
}
