//! Per-unit zlib codec for compressed data pages.
//!
//! Payload is cut into units of at most [`UNIT_SIZE`] uncompressed
//! bytes. Each unit is deflated independently; when deflation does not
//! shrink the unit it is stored raw, signalled by a stored length equal
//! to the uncompressed length.

use std::io::Write;

use common::{EngineError, EngineResult};
use flate2::Compression;
use flate2::write::{ZlibDecoder, ZlibEncoder};

/// Uncompressed size of every unit except the last one of a value.
pub const UNIT_SIZE: usize = 2000;

/// Compress one unit. Returns the stored bytes; equal length to the
/// input means the unit is stored raw.
pub fn compress_unit(unit: &[u8]) -> EngineResult<Vec<u8>> {
    debug_assert!(unit.len() <= UNIT_SIZE);

    let mut encoder = ZlibEncoder::new(Vec::with_capacity(unit.len()), Compression::default());
    let compressed = encoder
        .write_all(unit)
        .and_then(|_| encoder.finish())
        .map_err(map_compress_error)?;

    if compressed.len() >= unit.len() {
        // No gain: store raw. The reader dispatches on the stored
        // length being equal to the uncompressed length.
        Ok(unit.to_vec())
    } else {
        Ok(compressed)
    }
}

/// Expand one stored unit back to `uncompressed_len` bytes.
pub fn uncompress_unit(stored: &[u8], uncompressed_len: usize) -> EngineResult<Vec<u8>> {
    if stored.len() == uncompressed_len {
        return Ok(stored.to_vec());
    }
    if stored.len() > uncompressed_len {
        return Err(EngineError::BadArgument);
    }

    let mut decoder = ZlibDecoder::new(Vec::with_capacity(uncompressed_len));
    let out = decoder
        .write_all(stored)
        .and_then(|_| decoder.finish())
        .map_err(|_| EngineError::BadArgument)?;
    if out.len() != uncompressed_len {
        return Err(EngineError::BadArgument);
    }
    Ok(out)
}

fn map_compress_error(e: std::io::Error) -> EngineError {
    if e.kind() == std::io::ErrorKind::OutOfMemory {
        EngineError::MemoryExhaust
    } else {
        EngineError::Lob(format!("zlib compress failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compressible_data_shrinks() {
        let unit = vec![b'a'; UNIT_SIZE];
        let stored = compress_unit(&unit).unwrap();
        assert!(stored.len() < unit.len());
        assert_eq!(uncompress_unit(&stored, unit.len()).unwrap(), unit);
    }

    #[test]
    fn incompressible_data_falls_back_to_raw() {
        // A short already-dense unit gains nothing from deflate.
        let unit: Vec<u8> = (0..64u8).collect();
        let stored = compress_unit(&unit).unwrap();
        assert_eq!(stored, unit);
        assert_eq!(uncompress_unit(&stored, unit.len()).unwrap(), unit);
    }

    #[test]
    fn corrupt_unit_is_bad_argument() {
        let garbage = vec![0x01, 0x02, 0x03];
        assert!(matches!(
            uncompress_unit(&garbage, 500),
            Err(EngineError::BadArgument)
        ));
    }

    proptest! {
        #[test]
        fn round_trip_any_unit(data in proptest::collection::vec(any::<u8>(), 0..=UNIT_SIZE)) {
            let stored = compress_unit(&data).unwrap();
            prop_assert_eq!(uncompress_unit(&stored, data.len()).unwrap(), data);
        }
    }
}
