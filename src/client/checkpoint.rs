use bytes::Bytes;

/// Number of entity bytes already handed to the caller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ByteCheckpoint(u64);

/// Offset of an attempt's output within the entity.
///
/// Every attempt starts at zero, so a retry replays bytes the caller already has.
#[derive(Debug, Default)]
pub(crate) struct AttemptCursor(u64);

impl ByteCheckpoint {
    pub(crate) fn delivered(&self) -> u64 {
        self.0
    }

    /// Passes on the part of `chunk` past the checkpoint and advances it.
    pub(crate) fn admit(&mut self, cursor: &mut AttemptCursor, chunk: Bytes) -> Option<Bytes> {
        let start = cursor.0;
        let end = start + chunk.len() as u64;
        cursor.0 = end;
        if end <= self.0 {
            return None;
        }
        let skip = self.0.saturating_sub(start) as usize;
        self.0 = end;
        Some(chunk.slice(skip..))
    }
}
