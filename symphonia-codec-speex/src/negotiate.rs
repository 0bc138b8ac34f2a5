use log::{debug, error, warn};
use symphonia_core::meta::MetadataRevision;

use crate::comment::parse_comments;
use crate::engine::{ModeInfo, SpeexEngine};
use crate::errors::{Error, Result};
use crate::header::{push_segment, split_segments, CodecHeader};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NegotiationState {
    /// Nothing received yet.
    #[default]
    AwaitingHeaderBytes,
    /// Stream header buffered, comment block expected.
    AwaitingHeaderPacket,
    /// Both segments buffered, parsed when the next packet arrives.
    ParsingHeader,
    Ready,
}

/// Outcome of a validated header exchange.
#[derive(Clone, Debug)]
pub struct Negotiated {
    pub header: CodecHeader,
    pub info: ModeInfo,
    pub metadata: MetadataRevision,
}

/// What a packet turned out to be.
#[derive(Debug)]
pub enum Offer {
    /// Went into the header buffer.
    Header,
    /// Headers were parsed on this packet's arrival; `audio` tells whether
    /// the packet itself carries audio or is an extra header.
    Negotiated {
        stream: Box<Negotiated>,
        audio: bool,
    },
    ExtraHeader,
    Audio,
}

/// Collects the framed header segments in front of the audio packets.
#[derive(Clone, Debug, Default)]
pub struct HeaderNegotiation {
    state: NegotiationState,
    buf: Vec<u8>,
    extra_left: usize,
}

impl HeaderNegotiation {
    /// Start negotiation, optionally from framed header data delivered
    /// out-of-band by the container.
    pub fn new(extra_data: Option<&[u8]>) -> Self {
        match extra_data {
            Some(data) if !data.is_empty() => Self {
                state: NegotiationState::ParsingHeader,
                buf: data.to_vec(),
                extra_left: 0,
            },
            _ => Self::default(),
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// The framed header segments received so far.
    pub fn header_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Drop everything and wait for a new stream header.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.extra_left = 0;
        self.state = NegotiationState::AwaitingHeaderBytes;
    }

    pub fn offer(&mut self, data: &[u8], engine: &dyn SpeexEngine) -> Result<Offer> {
        match self.state {
            NegotiationState::AwaitingHeaderBytes | NegotiationState::AwaitingHeaderPacket => {
                if !data.is_empty() {
                    let mut data = data;
                    if self.state == NegotiationState::AwaitingHeaderPacket
                        && data.len() > usize::from(u16::MAX)
                    {
                        warn!(
                            "comment block of {} bytes truncated to {}",
                            data.len(),
                            u16::MAX
                        );
                        data = &data[..usize::from(u16::MAX)];
                    }
                    push_segment(&mut self.buf, data)?;
                    self.state = match self.state {
                        NegotiationState::AwaitingHeaderBytes => {
                            NegotiationState::AwaitingHeaderPacket
                        }
                        _ => NegotiationState::ParsingHeader,
                    };
                }
                Ok(Offer::Header)
            }
            NegotiationState::ParsingHeader => {
                let stream = match self.parse(engine) {
                    Ok(stream) => stream,
                    Err(e) => {
                        self.reset();
                        return Err(e);
                    }
                };
                self.state = NegotiationState::Ready;
                self.extra_left = stream.header.extra_headers.max(0) as usize;
                let audio = !self.take_extra_header();
                Ok(Offer::Negotiated {
                    stream: Box::new(stream),
                    audio,
                })
            }
            NegotiationState::Ready => {
                if self.take_extra_header() {
                    Ok(Offer::ExtraHeader)
                } else {
                    Ok(Offer::Audio)
                }
            }
        }
    }

    fn take_extra_header(&mut self) -> bool {
        if self.extra_left == 0 {
            return false;
        }
        self.extra_left -= 1;
        debug!("skipping extra header packet, {} left", self.extra_left);
        true
    }

    fn parse(&self, engine: &dyn SpeexEngine) -> Result<Negotiated> {
        let (header, comments) = split_segments(&self.buf)?;
        let (header, info) = CodecHeader::parse(header, engine).map_err(|e| {
            error!("cannot read Speex header: {}", e);
            Error::Header(e)
        })?;
        let metadata = parse_comments(comments, info.name, header.vbr);
        Ok(Negotiated {
            header,
            info,
            metadata,
        })
    }
}
