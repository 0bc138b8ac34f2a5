use serde::{Deserialize, Serialize};

use crate::consts::Mode;
use crate::errors::{Error, Result};

/// Encoder settings, fixed for the lifetime of one stream.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EncoderConfig {
    pub mode: Mode,
    /// 0 (low) to 10 (high)
    pub quality: f32,
    /// 1 to 10
    pub complexity: i32,
    /// VBR ceiling in bit/s, 0 for none
    pub max_bitrate: i32,
    pub cbr: bool,
    pub vad: bool,
    pub dtx: bool,
    pub frames_per_packet: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Narrowband,
            quality: 8.0,
            complexity: 3,
            max_bitrate: 0,
            cbr: false,
            vad: true,
            dtx: false,
            frames_per_packet: 1,
        }
    }
}

impl EncoderConfig {
    pub fn from_yaml(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_frames_per_packet(mut self, frames: usize) -> Self {
        self.frames_per_packet = frames;
        self
    }

    pub fn with_cbr(mut self, cbr: bool) -> Self {
        self.cbr = cbr;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=10.0).contains(&self.quality) {
            return Err(Error::Config(format!(
                "quality {} is not between 0 and 10",
                self.quality
            )));
        }
        if !(1..=10).contains(&self.complexity) {
            return Err(Error::Config(format!(
                "complexity {} is not between 1 and 10",
                self.complexity
            )));
        }
        if self.max_bitrate < 0 {
            return Err(Error::Config(format!(
                "negative max bitrate {}",
                self.max_bitrate
            )));
        }
        if self.frames_per_packet == 0 || self.frames_per_packet > i32::MAX as usize {
            return Err(Error::Config(format!(
                "invalid frames per packet {}",
                self.frames_per_packet
            )));
        }
        Ok(())
    }
}
