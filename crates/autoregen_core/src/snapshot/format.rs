//! # Snapshot File Format
//!
//! ```text
//! [4 bytes: magic "ARSN"]
//! [4 bytes: version]
//! [2 bytes: volume name length]
//! [N bytes: volume name, UTF-8]
//! [8 bytes: capture time, unix ms]
//! [8 bytes: cell count]
//!
//! Frame format (repeated until cell count is reached):
//! [4 bytes: cells in frame]
//! [4 bytes: compressed length]
//! [N bytes: LZ4 block, size-prepended]
//!
//! Cell format (15 bytes, inside a frame):
//! [4 bytes: x] [4 bytes: y] [4 bytes: z] [2 bytes: type id] [1 byte: aux]
//!
//! [4 bytes: CRC32 of everything above]
//! ```
//!
//! All integers little endian. Frames bound the memory needed to encode
//! or decode very large volumes.

use std::collections::HashMap;
use std::io::{self, Write};

use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::address::{CellAddress, VolumeId};
use crate::cell::CellRecord;
use crate::error::SnapshotError;
use crate::snapshot::Snapshot;

/// Magic bytes identifying a snapshot file.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"ARSN";

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Maximum cells per compressed frame.
pub const FRAME_CELLS: usize = 65_536;

/// Writer that checksums everything passing through it.
struct CrcWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
}

impl<W: Write> CrcWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn finish(mut self) -> io::Result<W> {
        let crc = self.hasher.finalize();
        self.inner.write_all(&crc.to_le_bytes())?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Encodes a snapshot into `out`, returning the writer once the trailer is written.
///
/// # Errors
///
/// Returns error if the name is longer than `u16::MAX` bytes or the writer fails.
pub fn encode<W: Write>(snapshot: &Snapshot, out: W) -> io::Result<W> {
    let name = snapshot.volume().as_str().as_bytes();
    let name_len = u16::try_from(name.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "volume name too long"))?;

    let mut w = CrcWriter::new(out);
    w.write_all(SNAPSHOT_MAGIC)?;
    w.write_all(&SNAPSHOT_VERSION.to_le_bytes())?;
    w.write_all(&name_len.to_le_bytes())?;
    w.write_all(name)?;
    w.write_all(&snapshot.captured_at_ms().to_le_bytes())?;
    w.write_all(&(snapshot.len() as u64).to_le_bytes())?;

    let mut frame = Vec::with_capacity(FRAME_CELLS * CellRecord::ENCODED_LEN);
    let mut frame_cells = 0usize;
    for (address, record) in snapshot.iter() {
        frame.extend_from_slice(&address.x.to_le_bytes());
        frame.extend_from_slice(&address.y.to_le_bytes());
        frame.extend_from_slice(&address.z.to_le_bytes());
        frame.extend_from_slice(&record.type_id.to_le_bytes());
        frame.push(record.aux);
        frame_cells += 1;

        if frame_cells == FRAME_CELLS {
            write_frame(&mut w, &frame, frame_cells)?;
            frame.clear();
            frame_cells = 0;
        }
    }
    if frame_cells > 0 {
        write_frame(&mut w, &frame, frame_cells)?;
    }

    w.finish()
}

fn write_frame<W: Write>(w: &mut W, raw: &[u8], cells: usize) -> io::Result<()> {
    let compressed = compress_prepend_size(raw);
    // Both bounded by FRAME_CELLS * 15 plus LZ4 overhead
    let cells = u32::try_from(cells).map_err(|_| io::Error::other("frame too large"))?;
    let len = u32::try_from(compressed.len()).map_err(|_| io::Error::other("frame too large"))?;
    w.write_all(&cells.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&compressed)
}

/// Bounds-checked little-endian reader over the file bytes.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self.pos.checked_add(n).ok_or(SnapshotError::Truncated(self.pos))?;
        let slice = self.data.get(self.pos..end).ok_or(SnapshotError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, SnapshotError> {
        self.array().map(u16::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        self.array().map(u32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64, SnapshotError> {
        self.array().map(u64::from_le_bytes)
    }
}

/// Decodes and validates a complete snapshot file.
///
/// Any inconsistency rejects the whole file; nothing partial is returned.
///
/// # Errors
///
/// Returns the first structural problem found.
pub fn decode(bytes: &[u8]) -> Result<Snapshot, SnapshotError> {
    if bytes.len() < 4 || &bytes[..4] != SNAPSHOT_MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let body_len = bytes.len().checked_sub(4).ok_or(SnapshotError::Truncated(0))?;
    let (body, trailer) = bytes.split_at(body_len);
    let mut trailer_bytes = [0u8; 4];
    trailer_bytes.copy_from_slice(trailer);
    let stored = u32::from_le_bytes(trailer_bytes);
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(SnapshotError::ChecksumMismatch { stored, computed });
    }

    let mut cur = Cursor { data: body, pos: 4 };
    let version = cur.u32()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let name_len = usize::from(cur.u16()?);
    let name = std::str::from_utf8(cur.take(name_len)?)
        .map_err(|_| SnapshotError::InvalidVolumeName)?;
    let volume = VolumeId::from(name);
    let captured_at_ms = cur.u64()?;
    let declared = cur.u64()?;

    let mut cells: HashMap<CellAddress, CellRecord> = HashMap::new();
    let mut actual = 0u64;
    while cur.pos < body.len() {
        let frame_cells = cur.u32()? as usize;
        let compressed_len = cur.u32()? as usize;
        let compressed = cur.take(compressed_len)?;

        if frame_cells == 0 || frame_cells > FRAME_CELLS {
            return Err(SnapshotError::CorruptFrame(format!(
                "frame declares {frame_cells} cells"
            )));
        }
        let expected_raw = frame_cells * CellRecord::ENCODED_LEN;
        // Check the prepended size before lz4 allocates for it
        if compressed.len() < 4 {
            return Err(SnapshotError::CorruptFrame("frame shorter than its size prefix".into()));
        }
        let mut prefix = [0u8; 4];
        prefix.copy_from_slice(&compressed[..4]);
        if u32::from_le_bytes(prefix) as usize != expected_raw {
            return Err(SnapshotError::CorruptFrame(format!(
                "frame size prefix disagrees with {frame_cells} cells"
            )));
        }

        let raw = decompress_size_prepended(compressed)
            .map_err(|e| SnapshotError::CorruptFrame(e.to_string()))?;
        if raw.len() != expected_raw {
            return Err(SnapshotError::CorruptFrame(format!(
                "frame decompressed to {} bytes, expected {expected_raw}",
                raw.len()
            )));
        }

        for chunk in raw.chunks_exact(CellRecord::ENCODED_LEN) {
            let address = CellAddress::new(
                i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
                i32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]),
                i32::from_le_bytes([chunk[8], chunk[9], chunk[10], chunk[11]]),
            );
            let record = CellRecord::with_aux(u16::from_le_bytes([chunk[12], chunk[13]]), chunk[14]);
            if cells.insert(address, record).is_some() {
                return Err(SnapshotError::DuplicateCell(address));
            }
        }
        actual += frame_cells as u64;
        if actual > declared {
            return Err(SnapshotError::CountMismatch { declared, actual });
        }
    }

    if actual != declared {
        return Err(SnapshotError::CountMismatch { declared, actual });
    }

    Ok(Snapshot::from_cells(volume, captured_at_ms, cells))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(count: i32) -> Snapshot {
        let cells = (0..count)
            .map(|i| {
                (
                    CellAddress::new(i % 40 - 20, i / 1600, (i / 40) % 40 - 20),
                    CellRecord::with_aux((i % 7 + 1) as u16, (i % 3) as u8),
                )
            })
            .collect();
        Snapshot::from_cells(VolumeId::from("world"), 1_700_000_000_000, cells)
    }

    fn encoded(snapshot: &Snapshot) -> Vec<u8> {
        encode(snapshot, Vec::new()).unwrap()
    }

    /// Rewrites the CRC trailer so structural checks are reached.
    fn reseal(bytes: &mut Vec<u8>) {
        let body_len = bytes.len() - 4;
        bytes.truncate(body_len);
        let crc = crc32fast::hash(bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
    }

    #[test]
    fn test_roundtrip_multiple_frames() {
        let snapshot = sample(FRAME_CELLS as i32 * 2 + 17);
        let decoded = decode(&encoded(&snapshot)).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_empty_snapshot_roundtrip() {
        let snapshot = Snapshot::from_cells(VolumeId::from("void"), 5, HashMap::new());
        let decoded = decode(&encoded(&snapshot)).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded.volume().as_str(), "void");
    }

    #[test]
    fn test_rejects_bad_magic() {
        let mut bytes = encoded(&sample(10));
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(SnapshotError::BadMagic)));
    }

    #[test]
    fn test_rejects_flipped_bit() {
        let mut bytes = encoded(&sample(100));
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;
        assert!(matches!(decode(&bytes), Err(SnapshotError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_rejects_truncation() {
        let bytes = encoded(&sample(100));
        let mut cut = bytes[..bytes.len() - 20].to_vec();
        reseal(&mut cut);
        assert!(decode(&cut).is_err());
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut bytes = encoded(&sample(3));
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        reseal(&mut bytes);
        assert!(matches!(decode(&bytes), Err(SnapshotError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_rejects_count_mismatch() {
        let mut bytes = encoded(&sample(3));
        // magic + version + name_len + "world" + captured
        let count_at = 4 + 4 + 2 + 5 + 8;
        bytes[count_at..count_at + 8].copy_from_slice(&4u64.to_le_bytes());
        reseal(&mut bytes);
        assert!(matches!(
            decode(&bytes),
            Err(SnapshotError::CountMismatch { declared: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_rejects_empty_file() {
        assert!(matches!(decode(&[]), Err(SnapshotError::BadMagic)));
    }
}
