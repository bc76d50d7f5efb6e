//! Staging of long multi-axis moves into bounded steps.

use crate::ProtocolError;

/// Largest distance an axis covers in one step.
pub const CHUNK_SIZE: u32 = 100;

/// Waypoints from `start` to `end`, at most `size` apart. The first entry is
/// `start`, the last is exactly `end`.
pub fn axis_waypoints(start: i32, end: i32, size: u32) -> Result<Vec<i32>, ProtocolError> {
    if size == 0 {
        return Err(ProtocolError::ZeroChunkSize);
    }
    Ok(waypoints(start, end, size))
}

// size must be non-zero
fn waypoints(start: i32, end: i32, size: u32) -> Vec<i32> {
    let size = size as i64;
    let end_wide = end as i64;
    let mut queue = vec![start];
    let mut last = start as i64;

    if end_wide > last {
        while last < end_wide {
            last = if end_wide - last < size {
                end_wide
            } else {
                last + size
            };
            queue.push(last as i32);
        }
    } else {
        while last > end_wide {
            last = if last - end_wide < size {
                end_wide
            } else {
                last - size
            };
            queue.push(last as i32);
        }
    }
    queue
}

/// Per-step tuples for a lockstep move. Consumed once.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    queues: Vec<Vec<i32>>,
    step: usize,
    len: usize,
}

impl ChunkPlan {
    /// Padded per-axis waypoint lists.
    pub fn axes(&self) -> &[Vec<i32>] {
        &self.queues
    }
}

impl Iterator for ChunkPlan {
    type Item = Vec<i32>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.step >= self.len {
            return None;
        }
        let tuple = self.queues.iter().map(|q| q[self.step]).collect();
        self.step += 1;
        Some(tuple)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.len - self.step;
        (left, Some(left))
    }
}

impl ExactSizeIterator for ChunkPlan {}

/// Plan a move with the default [`CHUNK_SIZE`].
pub fn chunk(pairs: &[(i32, i32)]) -> ChunkPlan {
    build(pairs, CHUNK_SIZE)
}

pub fn chunk_with_size(pairs: &[(i32, i32)], size: u32) -> Result<ChunkPlan, ProtocolError> {
    if size == 0 {
        return Err(ProtocolError::ZeroChunkSize);
    }
    Ok(build(pairs, size))
}

fn build(pairs: &[(i32, i32)], size: u32) -> ChunkPlan {
    let mut queues: Vec<Vec<i32>> = pairs
        .iter()
        .map(|&(start, end)| waypoints(start, end, size))
        .collect();

    let len = queues.iter().map(Vec::len).max().unwrap_or(0);

    // shorter axes hold at their destination
    for queue in queues.iter_mut() {
        if let Some(&last) = queue.last() {
            queue.resize(len, last);
        }
    }

    ChunkPlan {
        queues,
        step: 0,
        len,
    }
}
