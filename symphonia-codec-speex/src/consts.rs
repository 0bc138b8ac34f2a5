use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;
use serde::{Deserialize, Serialize};

pub const SPEEX_MAGIC: &[u8; 8] = b"Speex   ";
pub const SPEEX_VERSION_STRING: &str = "1.2.1";
pub const SPEEX_VERSION_LEN: usize = 20;
pub const SPEEX_HEADER_SIZE: usize = 80;
/// Highest header version id a decoder accepts.
pub const SPEEX_MAX_VERSION_ID: i32 = 1;

/// Channel counts a stream header may declare.
pub const MAX_CHANNELS: i32 = 5;

/// In-band request code and stereo request id, 5 and 4 bits on the wire.
pub const INBAND_STEREO_MARKER: u32 = 14;
pub const INBAND_STEREO_ID: u32 = 9;

pub const VENDOR_STRING: &str = concat!("symphonia-codec-speex ", env!("CARGO_PKG_VERSION"));

/// Speex operating modes, by header mode id.
#[repr(i32)]
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, FromPrimitive, Hash, PartialEq, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// 8 kHz
    #[default]
    Narrowband = 0,
    /// 16 kHz
    Wideband = 1,
    /// 32 kHz
    UltraWideband = 2,
}

impl Mode {
    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        Self::from_i32(id)
    }
}
