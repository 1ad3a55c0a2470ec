//! Append-only commit log persisting write transactions.
//!
//! Each committed write transaction becomes one frame:
//!
//! ```text
//! [payload length: u32 LE][crc32 of payload: u32 LE][payload]
//! ```
//!
//! The payload is a count followed by the transaction's operations in order.
//! On open, frames are replayed front to back. The first frame that is cut
//! short or fails its checksum marks a torn tail from an interrupted commit;
//! it and everything after it is truncated.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use objdb_codec::{ByteReader, ByteWriter};
use std::collections::BTreeMap;
use tracing::{debug, warn};

const HEADER_SIZE: usize = 8;

const OP_PUT: u8 = 1;
const OP_ERASE: u8 = 2;
const OP_ERASE_PREFIX: u8 = 3;
const OP_COMMIT_ULONG: u8 = 4;

/// One mutation recorded by a write transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Erase { key: Vec<u8> },
    ErasePrefix { prefix: Vec<u8> },
    CommitUlong(u64),
}

/// State rebuilt from a commit log.
#[derive(Debug, Default)]
pub(crate) struct Replayed {
    pub entries: BTreeMap<Vec<u8>, Vec<u8>>,
    pub commit_ulong: u64,
    pub frames: u64,
}

impl LogOp {
    pub(crate) fn apply(&self, entries: &mut BTreeMap<Vec<u8>, Vec<u8>>, ulong: &mut u64) {
        match self {
            Self::Put { key, value } => {
                entries.insert(key.clone(), value.clone());
            }
            Self::Erase { key } => {
                entries.remove(key);
            }
            Self::ErasePrefix { prefix } => {
                entries.retain(|key, _| !key.starts_with(prefix));
            }
            Self::CommitUlong(value) => *ulong = *value,
        }
    }

    fn encode(&self, writer: &mut ByteWriter) {
        match self {
            Self::Put { key, value } => {
                writer.write_u8(OP_PUT);
                writer.write_bytes(key);
                writer.write_bytes(value);
            }
            Self::Erase { key } => {
                writer.write_u8(OP_ERASE);
                writer.write_bytes(key);
            }
            Self::ErasePrefix { prefix } => {
                writer.write_u8(OP_ERASE_PREFIX);
                writer.write_bytes(prefix);
            }
            Self::CommitUlong(value) => {
                writer.write_u8(OP_COMMIT_ULONG);
                writer.write_vuint(*value);
            }
        }
    }

    fn decode(reader: &mut ByteReader<'_>) -> StorageResult<Self> {
        let op = match reader.read_u8()? {
            OP_PUT => Self::Put {
                key: reader.read_bytes()?.to_vec(),
                value: reader.read_bytes()?.to_vec(),
            },
            OP_ERASE => Self::Erase {
                key: reader.read_bytes()?.to_vec(),
            },
            OP_ERASE_PREFIX => Self::ErasePrefix {
                prefix: reader.read_bytes()?.to_vec(),
            },
            OP_COMMIT_ULONG => Self::CommitUlong(reader.read_vuint()?),
            other => {
                return Err(StorageError::Corrupted(format!(
                    "unknown commit log operation {other}"
                )))
            }
        };
        Ok(op)
    }
}

/// Writer and replayer for commit log frames.
pub(crate) struct CommitLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl CommitLog {
    /// Replays `backend`, truncating a torn tail, and returns the log ready
    /// for appending together with the rebuilt state.
    pub(crate) fn open(
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> StorageResult<(Self, Replayed)> {
        let size = backend.size()?;
        let mut state = Replayed::default();
        let mut offset = 0u64;

        while offset < size {
            match read_frame(backend.as_ref(), offset, size)? {
                Some((payload, next)) => {
                    let mut reader = ByteReader::new(&payload);
                    let count = reader.read_vuint()?;
                    for _ in 0..count {
                        LogOp::decode(&mut reader)?.apply(&mut state.entries, &mut state.commit_ulong);
                    }
                    state.frames += 1;
                    offset = next;
                }
                None => {
                    warn!(offset, size, "discarding torn commit log tail");
                    backend.truncate(offset)?;
                    break;
                }
            }
        }

        debug!(frames = state.frames, keys = state.entries.len(), "commit log replayed");
        Ok((
            Self {
                backend,
                sync_on_commit,
            },
            state,
        ))
    }

    /// Appends one frame holding `ops`.
    pub(crate) fn append(&mut self, ops: &[LogOp]) -> StorageResult<()> {
        let mut writer = ByteWriter::new();
        writer.write_vuint(ops.len() as u64);
        for op in ops {
            op.encode(&mut writer);
        }
        let payload = writer.into_bytes();
        let length = u32::try_from(payload.len())
            .map_err(|_| StorageError::Corrupted("commit frame exceeds 4 GiB".into()))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&length.to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        let start = self.backend.size()?;
        let written = self.backend.append(&frame).and_then(|offset| {
            if self.sync_on_commit {
                self.backend.sync()?;
            } else {
                self.backend.flush()?;
            }
            Ok(offset)
        });
        let offset = match written {
            Ok(offset) => offset,
            Err(err) => {
                warn!(offset = start, error = %err, "commit frame failed, rolling the log back");
                self.backend.truncate(start)?;
                return Err(err);
            }
        };
        debug!(offset, len = payload.len(), ops = ops.len(), "commit frame appended");
        Ok(())
    }
}

/// Reads the frame at `offset`, returning its payload and the next offset,
/// or `None` if the frame is incomplete or fails its checksum.
fn read_frame(
    backend: &dyn StorageBackend,
    offset: u64,
    size: u64,
) -> StorageResult<Option<(Vec<u8>, u64)>> {
    if offset + HEADER_SIZE as u64 > size {
        return Ok(None);
    }
    let header = backend.read_at(offset, HEADER_SIZE)?;
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

    let payload_start = offset + HEADER_SIZE as u64;
    let next = payload_start + u64::from(length);
    if next > size {
        return Ok(None);
    }
    let payload = backend.read_at(payload_start, length as usize)?;
    if crc32fast::hash(&payload) != expected_crc {
        warn!(offset, expected = expected_crc, "commit frame checksum mismatch");
        return Ok(None);
    }
    Ok(Some((payload, next)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryBackend;

    fn put(key: &[u8], value: &[u8]) -> LogOp {
        LogOp::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    #[test]
    fn frames_replay_in_order() {
        let backend = InMemoryBackend::new();
        {
            let (mut log, state) = CommitLog::open(Box::new(backend.clone()), true).unwrap();
            assert_eq!(state.frames, 0);
            log.append(&[put(b"a", b"1"), put(b"b", b"2")]).unwrap();
            log.append(&[
                LogOp::Erase { key: b"a".to_vec() },
                LogOp::CommitUlong(9),
            ])
            .unwrap();
        }

        let (_, state) = CommitLog::open(Box::new(backend), true).unwrap();
        assert_eq!(state.frames, 2);
        assert_eq!(state.commit_ulong, 9);
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries.get(b"b".as_slice()), Some(&b"2".to_vec()));
    }

    #[test]
    fn erase_prefix_replays() {
        let backend = InMemoryBackend::new();
        {
            let (mut log, _) = CommitLog::open(Box::new(backend.clone()), false).unwrap();
            log.append(&[put(b"x1", b""), put(b"x2", b""), put(b"y", b"")])
                .unwrap();
            log.append(&[LogOp::ErasePrefix {
                prefix: b"x".to_vec(),
            }])
            .unwrap();
        }
        let (_, state) = CommitLog::open(Box::new(backend), false).unwrap();
        assert_eq!(state.entries.keys().cloned().collect::<Vec<_>>(), vec![b"y".to_vec()]);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let backend = InMemoryBackend::new();
        {
            let (mut log, _) = CommitLog::open(Box::new(backend.clone()), true).unwrap();
            log.append(&[put(b"kept", b"1")]).unwrap();
        }
        let good_len = backend.data().len();
        {
            let (mut log, _) = CommitLog::open(Box::new(backend.clone()), true).unwrap();
            log.append(&[put(b"lost", b"2")]).unwrap();
        }
        let mut torn = backend.data();
        torn.truncate(torn.len() - 3);

        let damaged = InMemoryBackend::with_data(torn);
        let (_, state) = CommitLog::open(Box::new(damaged.clone()), true).unwrap();
        assert_eq!(state.frames, 1);
        assert!(state.entries.contains_key(b"kept".as_slice()));
        assert!(!state.entries.contains_key(b"lost".as_slice()));
        assert_eq!(damaged.data().len(), good_len);
    }

    /// Shares a buffer with an `InMemoryBackend` and fails on demand.
    struct FailingBackend {
        inner: InMemoryBackend,
        fail_sync: bool,
        partial_append: bool,
    }

    impl StorageBackend for FailingBackend {
        fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
            self.inner.read_at(offset, len)
        }

        fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
            if self.partial_append {
                self.inner.append(&data[..data.len() / 2])?;
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.inner.append(data)
        }

        fn flush(&mut self) -> StorageResult<()> {
            self.inner.flush()
        }

        fn size(&self) -> StorageResult<u64> {
            self.inner.size()
        }

        fn sync(&mut self) -> StorageResult<()> {
            if self.fail_sync {
                return Err(StorageError::Io(std::io::Error::other("sync failed")));
            }
            self.inner.sync()
        }

        fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
            self.inner.truncate(new_size)
        }
    }

    #[test]
    fn failed_sync_rolls_the_frame_back() {
        let shared = InMemoryBackend::new();
        {
            let (mut log, _) = CommitLog::open(Box::new(shared.clone()), true).unwrap();
            log.append(&[put(b"kept", b"1")]).unwrap();
        }
        let good_len = shared.data().len();

        let failing = FailingBackend {
            inner: shared.clone(),
            fail_sync: true,
            partial_append: false,
        };
        let (mut log, _) = CommitLog::open(Box::new(failing), true).unwrap();
        assert!(matches!(
            log.append(&[put(b"failed", b"2")]),
            Err(StorageError::Io(_))
        ));
        assert_eq!(shared.data().len(), good_len);

        let (_, state) = CommitLog::open(Box::new(shared), true).unwrap();
        assert_eq!(state.frames, 1);
        assert!(!state.entries.contains_key(b"failed".as_slice()));
    }

    #[test]
    fn partial_append_does_not_hide_later_frames() {
        let shared = InMemoryBackend::new();
        let failing = FailingBackend {
            inner: shared.clone(),
            fail_sync: false,
            partial_append: true,
        };
        let (mut log, _) = CommitLog::open(Box::new(failing), true).unwrap();
        assert!(log.append(&[put(b"torn", b"1")]).is_err());
        assert!(shared.data().is_empty());

        let (mut log, _) = CommitLog::open(Box::new(shared.clone()), true).unwrap();
        log.append(&[put(b"after", b"2")]).unwrap();
        let (_, state) = CommitLog::open(Box::new(shared), true).unwrap();
        assert_eq!(state.frames, 1);
        assert!(state.entries.contains_key(b"after".as_slice()));
    }

    #[test]
    fn checksum_mismatch_stops_replay() {
        let backend = InMemoryBackend::new();
        {
            let (mut log, _) = CommitLog::open(Box::new(backend.clone()), true).unwrap();
            log.append(&[put(b"k", b"v")]).unwrap();
        }
        let mut bytes = backend.data();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let (_, state) =
            CommitLog::open(Box::new(InMemoryBackend::with_data(bytes)), true).unwrap();
        assert_eq!(state.frames, 0);
        assert!(state.entries.is_empty());
    }
}
