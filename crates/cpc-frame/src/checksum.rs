//! Frame checksum: reflected CRC-32 (polynomial 0xEDB88320), bit-compatible
//! with zlib's `crc32`.

/// CRC-32 of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
