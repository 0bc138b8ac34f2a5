use bitvec::prelude::*;

/// Pack MSB-first bits into bytes, the last byte padded with zero bits.
fn pack_msb0(bits: &BitSlice<u8, Msb0>) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.load_be::<u8>() << (8 - chunk.len()))
        .collect()
}

/// Bit buffer shared between the framing code and the codec engine.
///
/// Bits are written at the end of the buffer and read from an independent
/// read position, most significant bit first, like the engine's native
/// bit-packing. Reading past the end sets an overflow flag and yields zeros.
#[derive(Clone, Debug, Default)]
pub struct BitCursor {
    bits: BitVec<u8, Msb0>,
    pos: usize,
    overflow: bool,
}

impl BitCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the content with `data` and read from its first bit.
    pub fn read_from(&mut self, data: &[u8]) {
        self.read_from_offset(data, 0);
    }

    /// Replace the content with `data` and read from bit `offset`.
    pub fn read_from_offset(&mut self, data: &[u8], offset: usize) {
        self.bits.clear();
        self.bits.extend_from_raw_slice(data);
        self.pos = offset.min(self.bits.len());
        self.overflow = false;
    }

    /// Read `nb_bits` (at most 32) as an unsigned big-endian value.
    pub fn unpack(&mut self, nb_bits: usize) -> u32 {
        debug_assert!(nb_bits <= 32);
        if nb_bits == 0 {
            return 0;
        }
        if self.pos + nb_bits > self.bits.len() {
            self.overflow = true;
        }
        if self.overflow {
            return 0;
        }
        let value = self.bits[self.pos..self.pos + nb_bits].load_be::<u32>();
        self.pos += nb_bits;
        value
    }

    /// Look at the next `nb_bits` without consuming them.
    pub fn peek(&self, nb_bits: usize) -> Option<u32> {
        if nb_bits == 0 || nb_bits > 32 || self.overflow {
            return None;
        }
        self.bits
            .get(self.pos..self.pos + nb_bits)
            .map(|bits| bits.load_be::<u32>())
    }

    pub fn skip(&mut self, nb_bits: usize) {
        if self.pos + nb_bits > self.bits.len() {
            self.overflow = true;
        } else {
            self.pos += nb_bits;
        }
    }

    /// Append the low `nb_bits` of `value`, most significant first.
    pub fn pack(&mut self, value: u32, nb_bits: usize) {
        debug_assert!(nb_bits <= 32);
        for shift in (0..nb_bits).rev() {
            self.bits.push((value >> shift) & 1 == 1);
        }
    }

    /// Unread bits, or -1 once a read ran past the end.
    pub fn remaining(&self) -> isize {
        if self.overflow {
            -1
        } else {
            self.bits.len() as isize - self.pos as isize
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn nbytes(&self) -> usize {
        (self.bits.len() + 7) / 8
    }

    pub fn overflowed(&self) -> bool {
        self.overflow
    }

    pub fn rewind(&mut self) {
        self.pos = 0;
        self.overflow = false;
    }

    pub fn reset(&mut self) {
        self.bits.clear();
        self.rewind();
    }

    /// Pad the written bits to a byte boundary with a 0 bit followed by 1 bits.
    pub fn insert_terminator(&mut self) {
        if self.bits.len() % 8 != 0 {
            self.bits.push(false);
        }
        while self.bits.len() % 8 != 0 {
            self.bits.push(true);
        }
    }

    /// Copy out everything written so far, zero padded to whole bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        pack_msb0(&self.bits)
    }

    /// Copy bits `start..end` realigned to bit 0 into exactly `nbytes` bytes,
    /// the spare tail filled with the terminator pattern.
    pub fn frame_bytes(&self, start: usize, end: usize, nbytes: usize) -> Vec<u8> {
        let end = end.min(self.bits.len());
        let start = start.min(end);
        let mut frame: BitVec<u8, Msb0> = BitVec::with_capacity(nbytes * 8);
        frame.extend_from_bitslice(&self.bits[start..end]);
        frame.truncate(nbytes * 8);
        if frame.len() < nbytes * 8 {
            frame.push(false);
        }
        frame.resize(nbytes * 8, true);
        pack_msb0(&frame)
    }

    /// The unread tail as whole bytes plus the bit offset of the read position
    /// inside the first of them.
    pub fn unread_bytes(&self) -> (Vec<u8>, usize) {
        let pos = self.pos.min(self.bits.len());
        let first = (pos / 8) * 8;
        (pack_msb0(&self.bits[first..]), pos - first)
    }

    pub fn as_bitslice(&self) -> &BitSlice<u8, Msb0> {
        &self.bits
    }
}
