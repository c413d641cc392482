//! Outbound frame codec: raw pass-through or streaming deflate.

use bytes::{Buf, Bytes};
use flate2::{Compress, Compression, FlushCompress};

use super::{WriteMode, CRC_SIZE, SYNC_TRAILER};
use crate::checksum::Crc32;
use crate::error::{BlipError, Result};

/// Headroom reserved so a sync flush always fits after the last chunk.
const FLUSH_HEADROOM: usize = 12;

/// Stop consuming input once the remaining output budget drops this low;
/// pathological tiny tail writes are not worth another zlib call.
const MIN_SPARE: usize = 100;

/// Worst-case deflate output for `len` input bytes (zlib's compressBound).
fn deflate_bound(len: usize) -> usize {
    len + (len >> 12) + (len >> 14) + (len >> 25) + 13
}

/// Bytes of `deflate_bound` slack on top of the input length.
fn bound_overhead(len: usize) -> usize {
    deflate_bound(len) - len
}

/// Outbound codec for one connection direction.
///
/// Uses raw deflate (no zlib header) so a sync flush ends each frame in
/// the `00 00 FF FF` marker that gets overwritten with the checksum.
pub struct Deflater {
    z: Compress,
    crc: Crc32,
    /// Input consumed since the last flush. zlib may buffer consumed
    /// bytes internally, so output budgeting has to bound the flush of
    /// everything taken so far, not just the current chunk.
    unflushed: usize,
}

impl Deflater {
    /// Create a deflater with the given zlib level (0–9).
    pub fn new(level: u32) -> Self {
        Self {
            z: Compress::new(Compression::new(level.min(9)), false),
            crc: Crc32::new(),
            unflushed: 0,
        }
    }

    /// Current plaintext checksum.
    pub fn checksum(&self) -> u32 {
        self.crc.value()
    }

    /// Consume as much of `input` as fits and append one frame's worth of
    /// encoded payload (including the 4-byte checksum trailer) to
    /// `output`, never appending more than `max_out` bytes.
    ///
    /// The input view advances past whatever was consumed; the caller
    /// keeps calling until it is empty, producing one frame per call.
    pub fn write(
        &mut self,
        input: &mut Bytes,
        output: &mut Vec<u8>,
        max_out: usize,
        mode: WriteMode,
    ) -> Result<()> {
        match mode {
            WriteMode::Raw => self.write_raw(input, output, max_out),
            WriteMode::NoFlush => {
                self.consume(input, output, max_out)?;
                Ok(())
            }
            WriteMode::SyncFlush => self.write_flushed(input, output, max_out, FlushCompress::Sync),
            WriteMode::Finish => self.write_flushed(input, output, max_out, FlushCompress::Finish),
        }
    }

    fn write_raw(&mut self, input: &mut Bytes, output: &mut Vec<u8>, max_out: usize) -> Result<()> {
        if max_out <= CRC_SIZE {
            return Err(BlipError::Codec("output budget too small".into()));
        }
        let take = input.len().min(max_out - CRC_SIZE);
        let chunk = input.split_to(take);
        self.crc.update(&chunk);
        output.extend_from_slice(&chunk);
        output.extend_from_slice(&self.crc.value().to_be_bytes());
        Ok(())
    }

    fn write_flushed(
        &mut self,
        input: &mut Bytes,
        output: &mut Vec<u8>,
        max_out: usize,
        flush: FlushCompress,
    ) -> Result<()> {
        let len_before = input.len();
        let mut remaining = self.consume(input, output, max_out)?;
        if !input.is_empty() && input.len() == len_before {
            return Err(BlipError::Codec(
                "output budget too small for compressed frame".into(),
            ));
        }

        // Flush the frame boundary. One call normally suffices; loop in
        // case the produced bytes exactly filled the allowance.
        loop {
            if remaining == 0 {
                return Err(BlipError::Codec("output budget exhausted mid-flush".into()));
            }
            let avail = remaining;
            let (_, produced) = self.step(&[], output, avail, flush)?;
            remaining -= produced;
            if produced < avail {
                break;
            }
        }
        self.unflushed = 0;

        if matches!(flush, FlushCompress::Sync) {
            // Splice the running checksum over the sync-flush marker.
            let len = output.len();
            if len < CRC_SIZE || output[len - CRC_SIZE..] != SYNC_TRAILER {
                return Err(BlipError::Codec("sync flush missing trailer".into()));
            }
            output[len - CRC_SIZE..].copy_from_slice(&self.crc.value().to_be_bytes());
        }
        Ok(())
    }

    /// Compress input chunks without flushing, keeping enough of the
    /// budget in reserve that a flush of everything consumed since the
    /// last one is guaranteed to fit. Returns the unused budget.
    ///
    /// The tiny-tail stop only applies after the first chunk, so small
    /// frame budgets still make forward progress.
    fn consume(&mut self, input: &mut Bytes, output: &mut Vec<u8>, budget: usize) -> Result<usize> {
        let mut remaining = budget;
        let mut first = true;
        while !input.is_empty() && (first || remaining > MIN_SPARE) {
            first = false;
            let allowance = remaining.saturating_sub(FLUSH_HEADROOM);
            let mut chunk_len = input.len();
            if deflate_bound(self.unflushed + chunk_len) > allowance {
                let max_total = allowance.saturating_sub(bound_overhead(allowance));
                chunk_len = chunk_len.min(max_total.saturating_sub(self.unflushed));
                if chunk_len == 0 {
                    break;
                }
            }
            let (consumed, produced) =
                self.step(&input[..chunk_len], output, remaining, FlushCompress::None)?;
            self.crc.update(&input[..consumed]);
            input.advance(consumed);
            self.unflushed += consumed;
            remaining -= produced;
            if consumed == 0 && produced == 0 {
                break;
            }
        }
        Ok(remaining)
    }

    /// One zlib call appending at most `avail` bytes to `output`.
    /// Returns (input consumed, output produced).
    fn step(
        &mut self,
        input: &[u8],
        output: &mut Vec<u8>,
        avail: usize,
        flush: FlushCompress,
    ) -> Result<(usize, usize)> {
        let start = output.len();
        output.resize(start + avail, 0);
        let before_in = self.z.total_in();
        let before_out = self.z.total_out();
        // A short buffer surfaces as consumed/produced counts, not as an
        // error; only real zlib failures come back as Err.
        self.z
            .compress(input, &mut output[start..], flush)
            .map_err(|e| BlipError::Codec(e.to_string()))?;
        let consumed = (self.z.total_in() - before_in) as usize;
        let produced = (self.z.total_out() - before_out) as usize;
        output.truncate(start + produced);
        Ok((consumed, produced))
    }
}
