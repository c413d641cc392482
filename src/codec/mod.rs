//! Streaming frame codecs.
//!
//! One [`Deflater`] and one [`Inflater`] exist per connection direction;
//! every REQ/RES/ERR frame payload passes through them in transmission
//! order, whether or not the message is compressed. Both keep a rolling
//! CRC32 over the plaintext, which is what makes the per-frame checksum
//! trailer cheap: the sender appends (raw) or splices (compressed) the
//! current accumulator value, and the receiver verifies against its own.
//!
//! The compressed path exploits a zlib property: a sync flush always
//! ends the emitted block in the four bytes `00 00 FF FF`. The sender
//! overwrites that marker with the big-endian CRC; the receiver strips
//! the last four bytes of a compressed frame, inflates the rest plus a
//! synthetic marker, and then checks the stripped value.
//!
//! ACK frames never touch the codecs, so the two directions stay in
//! lockstep even with interleaved messages.

mod deflater;
mod inflater;

pub use deflater::Deflater;
pub use inflater::Inflater;

/// How a codec write should treat the input it consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Pass plaintext through untouched; checksum trailer still applies.
    Raw,
    /// Compress without flushing; no frame boundary is produced.
    NoFlush,
    /// Compress and sync-flush, splicing the CRC over the flush trailer.
    /// This is the per-frame default.
    SyncFlush,
    /// Compress and finish the deflate stream.
    Finish,
}

/// Size of the per-frame checksum trailer.
pub(crate) const CRC_SIZE: usize = 4;

/// The marker a zlib sync flush leaves at the end of its output.
pub(crate) const SYNC_TRAILER: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn deflate_all(
        deflater: &mut Deflater,
        plaintext: &[u8],
        frame_cap: usize,
        mode: WriteMode,
    ) -> Vec<Vec<u8>> {
        let mut input = Bytes::copy_from_slice(plaintext);
        let mut frames = Vec::new();
        while !input.is_empty() {
            let mut frame = Vec::new();
            deflater
                .write(&mut input, &mut frame, frame_cap, mode)
                .unwrap();
            frames.push(frame);
        }
        frames
    }

    fn inflate_all(inflater: &mut Inflater, frames: &[Vec<u8>], mode: WriteMode) -> Vec<u8> {
        let mut plain = Vec::new();
        for frame in frames {
            let mut input = Bytes::copy_from_slice(frame);
            while !input.is_empty() {
                inflater.write(&mut input, &mut plain, 8192, mode).unwrap();
            }
        }
        plain
    }

    #[test]
    fn test_raw_roundtrip_single_frame() {
        let mut deflater = Deflater::new(6);
        let mut inflater = Inflater::new();
        let body = b"hello, frame".to_vec();

        let frames = deflate_all(&mut deflater, &body, 1024, WriteMode::Raw);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), body.len() + CRC_SIZE);

        let plain = inflate_all(&mut inflater, &frames, WriteMode::Raw);
        assert_eq!(plain, body);
    }

    #[test]
    fn test_raw_roundtrip_many_small_frames() {
        let mut deflater = Deflater::new(6);
        let mut inflater = Inflater::new();
        let body: Vec<u8> = (0..=255u8).cycle().take(1000).collect();

        let frames = deflate_all(&mut deflater, &body, 16, WriteMode::Raw);
        assert!(frames.len() > 50);
        for frame in &frames {
            assert!(frame.len() <= 16);
        }

        let plain = inflate_all(&mut inflater, &frames, WriteMode::Raw);
        assert_eq!(plain, body);
    }

    #[test]
    fn test_compressed_roundtrip() {
        let mut deflater = Deflater::new(6);
        let mut inflater = Inflater::new();
        let body = b"a compressible phrase. ".repeat(200);

        let frames = deflate_all(&mut deflater, &body, 4096, WriteMode::SyncFlush);
        let wire: usize = frames.iter().map(Vec::len).sum();
        assert!(wire < body.len(), "deflate should shrink {} < {}", wire, body.len());

        let plain = inflate_all(&mut inflater, &frames, WriteMode::SyncFlush);
        assert_eq!(plain, body);
    }

    #[test]
    fn test_compressed_roundtrip_small_output_budget() {
        let mut deflater = Deflater::new(6);
        let mut inflater = Inflater::new();
        let body = b"tiny output budgets force the inflater to drain over several calls "
            .repeat(400);

        let frames = deflate_all(&mut deflater, &body, 2048, WriteMode::SyncFlush);

        // Drain with a 64-byte budget per call.
        let mut plain = Vec::new();
        for frame in &frames {
            let mut input = Bytes::copy_from_slice(frame);
            while !input.is_empty() {
                inflater
                    .write(&mut input, &mut plain, 64, WriteMode::SyncFlush)
                    .unwrap();
            }
        }
        assert_eq!(plain, body);
    }

    #[test]
    fn test_interleaved_raw_and_compressed_frames() {
        // Messages on one connection may mix compression, but both sides
        // see the frames in the same order, so the checksums agree.
        let mut deflater = Deflater::new(6);
        let mut inflater = Inflater::new();

        let first = b"raw payload".to_vec();
        let second = b"compressed payload, compressed payload".to_vec();

        let raw_frames = deflate_all(&mut deflater, &first, 4096, WriteMode::Raw);
        let def_frames = deflate_all(&mut deflater, &second, 4096, WriteMode::SyncFlush);

        assert_eq!(
            inflate_all(&mut inflater, &raw_frames, WriteMode::Raw),
            first
        );
        assert_eq!(
            inflate_all(&mut inflater, &def_frames, WriteMode::SyncFlush),
            second
        );
    }

    #[test]
    fn test_corrupted_raw_frame_fails_checksum() {
        let mut deflater = Deflater::new(6);
        let body = b"payload under test".to_vec();
        let mut frames = deflate_all(&mut deflater, &body, 1024, WriteMode::Raw);
        frames[0][3] ^= 0x01;

        let mut inflater = Inflater::new();
        let mut input = Bytes::copy_from_slice(&frames[0]);
        let mut plain = Vec::new();
        let mut result = Ok(());
        while !input.is_empty() {
            result = inflater.write(&mut input, &mut plain, 8192, WriteMode::Raw);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(crate::BlipError::ChecksumMismatch)));
    }

    #[test]
    fn test_corrupted_crc_trailer_fails_checksum() {
        let mut deflater = Deflater::new(6);
        let body = b"payload under test".to_vec();
        let mut frames = deflate_all(&mut deflater, &body, 1024, WriteMode::Raw);
        let last = frames[0].len() - 1;
        frames[0][last] ^= 0x80;

        let mut inflater = Inflater::new();
        let mut input = Bytes::copy_from_slice(&frames[0]);
        let mut plain = Vec::new();
        let mut result = Ok(());
        while !input.is_empty() {
            result = inflater.write(&mut input, &mut plain, 8192, WriteMode::Raw);
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(crate::BlipError::ChecksumMismatch)));
    }
}
