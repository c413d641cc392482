//! Inbound frame codec: raw pass-through or streaming inflate.

use bytes::{Buf, Bytes};
use flate2::{Decompress, FlushDecompress, Status};

use super::{WriteMode, CRC_SIZE, SYNC_TRAILER};
use crate::checksum::Crc32;
use crate::error::{BlipError, Result};

/// Inbound codec for one connection direction.
///
/// Every REQ/RES/ERR frame payload ends with a 4-byte big-endian CRC32
/// of the plaintext so far. For compressed frames the sender spliced it
/// over the deflate sync-flush marker, so the inflater strips it, feeds
/// the remainder plus a synthetic `00 00 FF FF` through inflate, and
/// verifies the stripped value against its own accumulator.
pub struct Inflater {
    z: Decompress,
    crc: Crc32,
    /// How many synthetic trailer bytes have been fed for the current
    /// frame; the output budget may force draining across several calls.
    trailer_fed: usize,
}

impl Inflater {
    /// Create an inflater for raw deflate (no zlib header).
    pub fn new() -> Self {
        Self {
            z: Decompress::new(false),
            crc: Crc32::new(),
            trailer_fed: 0,
        }
    }

    /// Current plaintext checksum.
    pub fn checksum(&self) -> u32 {
        self.crc.value()
    }

    /// Decode part of a frame payload, appending at most `max_out`
    /// plaintext bytes to `output` and advancing `input` past whatever
    /// was consumed.
    ///
    /// `input` must be the (remainder of the) payload of exactly one
    /// frame; the trailing 4 bytes are the checksum and are consumed
    /// last, once all plaintext has been produced. The caller loops
    /// until the input view is empty.
    pub fn write(
        &mut self,
        input: &mut Bytes,
        output: &mut Vec<u8>,
        max_out: usize,
        mode: WriteMode,
    ) -> Result<()> {
        if input.len() < CRC_SIZE {
            return Err(BlipError::BadFrame("payload shorter than checksum"));
        }
        match mode {
            WriteMode::Raw => self.write_raw(input, output, max_out),
            _ => self.write_inflated(input, output, max_out),
        }
    }

    fn write_raw(&mut self, input: &mut Bytes, output: &mut Vec<u8>, max_out: usize) -> Result<()> {
        let data_len = input.len() - CRC_SIZE;
        let take = data_len.min(max_out);
        let chunk = input.split_to(take);
        self.crc.update(&chunk);
        output.extend_from_slice(&chunk);

        if input.len() == CRC_SIZE {
            self.verify_trailer(input)?;
        }
        Ok(())
    }

    fn write_inflated(
        &mut self,
        input: &mut Bytes,
        output: &mut Vec<u8>,
        max_out: usize,
    ) -> Result<()> {
        let mut remaining = max_out;

        // Feed the compressed data, leaving the checksum untouched.
        while input.len() > CRC_SIZE && remaining > 0 {
            let data_end = input.len() - CRC_SIZE;
            let (consumed, produced) = self.step(&input[..data_end], output, remaining)?;
            input.advance(consumed);
            remaining -= produced;
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        // Once the data is gone, restore the sync-flush marker the
        // sender overwrote, then drain whatever inflate still holds.
        if input.len() == CRC_SIZE {
            while self.trailer_fed < SYNC_TRAILER.len() && remaining > 0 {
                let (consumed, produced) =
                    self.step(&SYNC_TRAILER[self.trailer_fed..], output, remaining)?;
                self.trailer_fed += consumed;
                remaining -= produced;
                if consumed == 0 && produced == 0 {
                    break;
                }
            }
            if self.trailer_fed == SYNC_TRAILER.len() {
                while remaining > 0 {
                    let avail = remaining;
                    let (_, produced) = self.step(&[], output, avail)?;
                    remaining -= produced;
                    if produced < avail {
                        // Fully drained with budget to spare: the frame
                        // is complete and the checksum can be judged.
                        self.trailer_fed = 0;
                        self.verify_trailer(input)?;
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn verify_trailer(&mut self, input: &mut Bytes) -> Result<()> {
        debug_assert_eq!(input.len(), CRC_SIZE);
        let expected = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
        input.advance(CRC_SIZE);
        if expected != self.crc.value() {
            return Err(BlipError::ChecksumMismatch);
        }
        Ok(())
    }

    /// One zlib call appending at most `avail` bytes to `output`.
    /// Returns (input consumed, output produced).
    fn step(&mut self, input: &[u8], output: &mut Vec<u8>, avail: usize) -> Result<(usize, usize)> {
        let start = output.len();
        output.resize(start + avail, 0);
        let before_in = self.z.total_in();
        let before_out = self.z.total_out();
        let status = self
            .z
            .decompress(input, &mut output[start..], FlushDecompress::None)
            .map_err(|e| BlipError::Codec(e.to_string()))?;
        let consumed = (self.z.total_in() - before_in) as usize;
        let produced = (self.z.total_out() - before_out) as usize;
        output.truncate(start + produced);
        self.crc.update(&output[start..]);
        match status {
            Status::StreamEnd => Err(BlipError::Codec("unexpected deflate stream end".into())),
            _ => Ok((consumed, produced)),
        }
    }
}

impl Default for Inflater {
    fn default() -> Self {
        Self::new()
    }
}
