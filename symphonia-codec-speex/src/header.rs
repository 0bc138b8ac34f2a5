use std::io::Cursor;

use binrw::BinRead;
use byteorder::{BigEndian, ReadBytesExt};
use log::{debug, error};
use symphonia_core::audio::Channels;
use symphonia_core::codecs::CodecParameters;

use crate::consts::{
    Mode, MAX_CHANNELS, SPEEX_HEADER_SIZE, SPEEX_MAGIC, SPEEX_MAX_VERSION_ID, SPEEX_VERSION_LEN,
    SPEEX_VERSION_STRING,
};
use crate::engine::{ModeInfo, SpeexEngine};
use crate::errors::{Error, HeaderError, Result};

/// Native 80-byte stream header layout.
#[derive(BinRead, Clone, Debug)]
#[br(little, magic = b"Speex   ")]
struct RawHeader {
    version: [u8; SPEEX_VERSION_LEN],
    version_id: i32,
    _header_size: i32,
    rate: i32,
    mode: i32,
    mode_bitstream_version: i32,
    nb_channels: i32,
    bitrate: i32,
    frame_size: i32,
    vbr: i32,
    frames_per_packet: i32,
    extra_headers: i32,
    _reserved1: i32,
    _reserved2: i32,
}

/// Stream-wide codec parameters, as carried by the first header packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodecHeader {
    pub version: String,
    pub version_id: i32,
    pub rate: i32,
    pub mode: i32,
    pub bitstream_version: i32,
    pub channels: i32,
    /// Nominal bitrate, -1 when unknown.
    pub bitrate: i32,
    pub frame_size: i32,
    pub vbr: bool,
    pub frames_per_packet: i32,
    pub extra_headers: i32,
}

impl CodecHeader {
    /// A fresh header for `mode`, one frame per packet, CBR.
    pub fn new(rate: u32, channels: u32, mode: i32, info: &ModeInfo) -> Self {
        Self {
            version: SPEEX_VERSION_STRING.to_string(),
            version_id: 1,
            rate: rate as i32,
            mode,
            bitstream_version: info.bitstream_version,
            channels: channels as i32,
            bitrate: -1,
            frame_size: info.frame_size as i32,
            vbr: false,
            frames_per_packet: 1,
            extra_headers: 0,
        }
    }

    /// Read the native layout without judging the values.
    pub fn from_bytes(data: &[u8]) -> std::result::Result<Self, HeaderError> {
        if data.len() < SPEEX_HEADER_SIZE {
            return Err(HeaderError::Malformed(format!(
                "header too small: {} bytes",
                data.len()
            )));
        }

        let raw = RawHeader::read(&mut Cursor::new(data))
            .map_err(|e| HeaderError::Malformed(e.to_string()))?;

        let version_len = raw
            .version
            .iter()
            .position(|c| *c == 0)
            .unwrap_or(SPEEX_VERSION_LEN);

        Ok(Self {
            version: String::from_utf8_lossy(&raw.version[..version_len]).into_owned(),
            version_id: raw.version_id,
            rate: raw.rate,
            mode: raw.mode,
            bitstream_version: raw.mode_bitstream_version,
            channels: raw.nb_channels,
            bitrate: raw.bitrate,
            frame_size: raw.frame_size,
            vbr: raw.vbr != 0,
            frames_per_packet: raw.frames_per_packet,
            extra_headers: raw.extra_headers,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut version = [0u8; SPEEX_VERSION_LEN];
        let len = self.version.len().min(SPEEX_VERSION_LEN);
        version[..len].copy_from_slice(&self.version.as_bytes()[..len]);

        let mut out = Vec::with_capacity(SPEEX_HEADER_SIZE);
        out.extend_from_slice(SPEEX_MAGIC);
        out.extend_from_slice(&version);
        for field in [
            self.version_id,
            SPEEX_HEADER_SIZE as i32,
            self.rate,
            self.mode,
            self.bitstream_version,
            self.channels,
            self.bitrate,
            self.frame_size,
            self.vbr as i32,
            self.frames_per_packet,
            self.extra_headers,
            0,
            0,
        ] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }

    /// Parse and check the header against what `engine` supports.
    ///
    /// The returned header has its frame size and frames-per-packet
    /// normalised: a zero frame size takes the mode's, a zero frame count
    /// means one frame per packet. Any other frame size must be the mode's.
    pub fn parse(
        data: &[u8],
        engine: &dyn SpeexEngine,
    ) -> std::result::Result<(Self, ModeInfo), HeaderError> {
        let header = Self::from_bytes(data)?;
        header.validate(engine)
    }

    pub fn validate(
        mut self,
        engine: &dyn SpeexEngine,
    ) -> std::result::Result<(Self, ModeInfo), HeaderError> {
        let info = match engine.query_mode(self.mode) {
            Some(info) => info,
            None => {
                error!("mode number {} does not exist in this engine", self.mode);
                return Err(HeaderError::UnknownMode(self.mode));
            }
        };

        if self.version_id > SPEEX_MAX_VERSION_ID {
            error!("unsupported bit-stream version id {}", self.version_id);
            return Err(HeaderError::UnsupportedVersion(self.version_id));
        }

        if info.bitstream_version < self.bitstream_version {
            error!("stream encoded with a newer version of the codec");
            return Err(HeaderError::NewerBitstream {
                found: self.bitstream_version,
                supported: info.bitstream_version,
            });
        }
        if info.bitstream_version > self.bitstream_version {
            error!("stream encoded with an older version of the codec");
            return Err(HeaderError::OlderBitstream {
                found: self.bitstream_version,
                supported: info.bitstream_version,
            });
        }

        if self.channels <= 0 || self.channels > MAX_CHANNELS {
            error!(
                "invalid number of channels (not between 1 and 5): {}",
                self.channels
            );
            return Err(HeaderError::InvalidChannels(self.channels));
        }

        if self.rate <= 0 {
            error!("invalid sample rate {}", self.rate);
            return Err(HeaderError::InvalidRate(self.rate));
        }

        if self.frame_size <= 0 {
            self.frame_size = info.frame_size as i32;
        }
        if self.frame_size != info.frame_size as i32 {
            error!(
                "frame size {} does not match the {} mode's {}",
                self.frame_size, info.name, info.frame_size
            );
            return Err(HeaderError::FrameSizeMismatch {
                found: self.frame_size,
                expected: info.frame_size as i32,
            });
        }
        if self.frames_per_packet <= 0 {
            self.frames_per_packet = 1;
        }

        debug!(
            "speex {} Hz audio using {} mode ({}{})",
            self.rate,
            info.name,
            if self.channels == 1 { "mono" } else { "stereo" },
            if self.vbr { ", VBR" } else { "" }
        );

        Ok((self, info))
    }

    /// The mode as a known enum value, if it is one.
    pub fn speex_mode(&self) -> Option<Mode> {
        Mode::from_id(self.mode)
    }

    pub fn sample_rate(&self) -> u32 {
        self.rate.max(0) as u32
    }

    pub fn channel_count(&self) -> usize {
        self.channels.max(0) as usize
    }

    pub fn frame_len(&self) -> usize {
        self.frame_size.max(0) as usize
    }

    pub fn packet_frames(&self) -> usize {
        self.frames_per_packet.max(1) as usize
    }

    pub fn channel_layout(&self) -> Option<Channels> {
        let layout = match self.channels {
            1 => Channels::FRONT_CENTRE,
            2 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT,
            3 => Channels::FRONT_LEFT | Channels::FRONT_RIGHT | Channels::FRONT_CENTRE,
            4 => {
                Channels::FRONT_LEFT
                    | Channels::FRONT_RIGHT
                    | Channels::REAR_LEFT
                    | Channels::REAR_RIGHT
            }
            5 => {
                Channels::FRONT_LEFT
                    | Channels::FRONT_RIGHT
                    | Channels::FRONT_CENTRE
                    | Channels::REAR_LEFT
                    | Channels::REAR_RIGHT
            }
            _ => return None,
        };
        Some(layout)
    }

    /// Output stream parameters for decoded PCM.
    pub fn codec_params(&self) -> CodecParameters {
        let mut params = CodecParameters::new();
        params
            .with_sample_rate(self.sample_rate())
            .with_max_frames_per_packet((self.frame_len() * self.packet_frames()) as u64);
        if let Some(channels) = self.channel_layout() {
            params.with_channels(channels);
        }
        params
    }
}

/// Append one `[u16 big-endian length][payload]` header segment.
pub fn push_segment(buf: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
    let len = u16::try_from(payload.len()).map_err(|_| {
        Error::Framing(format!(
            "header segment of {} bytes does not fit a 16-bit length",
            payload.len()
        ))
    })?;
    buf.try_reserve(payload.len() + 2)?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(())
}

/// Split framed header data into the stream header and the comment block.
pub fn split_segments(data: &[u8]) -> std::result::Result<(&[u8], &[u8]), HeaderError> {
    let mut rest = data;
    let header = next_segment(&mut rest)?;
    let comments = next_segment(&mut rest)?;
    Ok((header, comments))
}

fn next_segment<'a>(rest: &mut &'a [u8]) -> std::result::Result<&'a [u8], HeaderError> {
    let declared = rest.read_u16::<BigEndian>().map_err(|_| HeaderError::Truncated {
        declared: 2,
        available: rest.len(),
    })? as usize;
    if declared > rest.len() {
        error!("header data corrupted");
        return Err(HeaderError::Truncated {
            declared,
            available: rest.len(),
        });
    }
    let data: &'a [u8] = *rest;
    let (segment, tail) = data.split_at(declared);
    *rest = tail;
    Ok(segment)
}
