use crate::bits::BitCursor;
use crate::consts::{INBAND_STEREO_ID, INBAND_STEREO_MARKER};

const E_RATIO_QUANT: [f32; 4] = [0.25, 0.315, 0.397, 0.5];
const E_RATIO_QUANT_BOUNDS: [f32; 3] = [0.2825, 0.356, 0.4485];

/// In-band stereo parameters: 5-bit marker, 4-bit id, sign, exponent, ratio.
const INBAND_STEREO_BITS: usize = 5 + 4 + 1 + 5 + 2;

/// Left/right reconstruction state of one stereo stream.
///
/// The encoder downmixes to mono and sends the channel balance and energy
/// ratio in-band; the decoder keeps the last received parameters and smooths
/// the per-channel gains across frames.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StereoFold {
    balance: f32,
    e_ratio: f32,
    smooth_left: f32,
    smooth_right: f32,
}

impl Default for StereoFold {
    fn default() -> Self {
        Self {
            balance: 1.0,
            e_ratio: 0.5,
            smooth_left: 1.0,
            smooth_right: 1.0,
        }
    }
}

impl StereoFold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Is the cursor sitting on an in-band stereo parameter block?
    pub fn has_inband(bits: &BitCursor) -> bool {
        bits.peek(9) == Some((INBAND_STEREO_MARKER << 4) | INBAND_STEREO_ID)
    }

    /// Consume an in-band stereo block if one is next, updating the parameters.
    pub fn read_inband(&mut self, bits: &mut BitCursor) -> bool {
        if !Self::has_inband(bits) || bits.remaining() < INBAND_STEREO_BITS as isize {
            return false;
        }
        bits.skip(9);
        let sign = if bits.unpack(1) == 1 { -1.0 } else { 1.0 };
        let dexp = bits.unpack(5) as f32;
        self.balance = (sign * 0.25 * dexp).exp();
        self.e_ratio = E_RATIO_QUANT[bits.unpack(2) as usize];
        true
    }

    /// Expand the mono samples in `pcm[..frame_size]` into interleaved
    /// left/right samples filling `pcm[..2 * frame_size]`.
    pub fn unfold(&mut self, pcm: &mut [i16], frame_size: usize) {
        debug_assert!(pcm.len() >= 2 * frame_size);
        let e_right = 1.0 / (self.e_ratio * (1.0 + self.balance)).sqrt();
        let e_left = self.balance.sqrt() * e_right;

        for i in (0..frame_size).rev() {
            let mono = pcm[i] as f32;
            self.smooth_left = self.smooth_left * 0.98 + e_left * 0.02;
            self.smooth_right = self.smooth_right * 0.98 + e_right * 0.02;
            pcm[2 * i] = (self.smooth_left * mono) as i16;
            pcm[2 * i + 1] = (self.smooth_right * mono) as i16;
        }
    }

    /// Downmix the interleaved `pcm[..2 * frame_size]` into mono samples in
    /// `pcm[..frame_size]` and write the in-band parameters to `bits`.
    pub fn fold(pcm: &mut [i16], frame_size: usize, bits: &mut BitCursor) {
        debug_assert!(pcm.len() >= 2 * frame_size);
        let mut e_left = 0f32;
        let mut e_right = 0f32;
        let mut e_tot = 0f32;

        for i in 0..frame_size {
            let left = pcm[2 * i] as f32;
            let right = pcm[2 * i + 1] as f32;
            e_left += left * left;
            e_right += right * right;
            let mono = 0.5 * (left + right);
            pcm[i] = mono as i16;
            e_tot += mono * mono;
        }

        let balance = (e_left + 1.0) / (e_right + 1.0);
        let e_ratio = e_tot / (1.0 + e_left + e_right);

        bits.pack(INBAND_STEREO_MARKER, 5);
        bits.pack(INBAND_STEREO_ID, 4);

        let balance = 4.0 * balance.ln();
        bits.pack(if balance > 0.0 { 0 } else { 1 }, 1);
        let dexp = (0.5 + balance.abs()).floor().min(31.0);
        bits.pack(dexp as u32, 5);

        let ratio_idx = E_RATIO_QUANT_BOUNDS
            .iter()
            .take_while(|bound| e_ratio > **bound)
            .count();
        bits.pack(ratio_idx as u32, 2);
    }
}
