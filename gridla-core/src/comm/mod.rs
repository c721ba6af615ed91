//! Collective communication.
//!
//! Everything above this module talks to other processes only through
//! [`Comm`]. A `Comm` is a group of world ranks plus a context id that keeps
//! its traffic apart from every other communicator; the actual bytes move
//! through an object-safe [`Transport`].
//!
//! Messages between a pair of ranks on one communicator are delivered in send
//! order and sends never block, so every collective is written as "send
//! everything, then receive everything". All members must call the same
//! collectives in the same order.

pub mod thread;

pub use thread::{spmd, ThreadTransport};

use crate::error::{LaError, LaResult};
use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Type-erased message body.
pub type Payload = Box<dyn Any + Send>;

/// Point-to-point message layer between world ranks.
pub trait Transport: Send + Sync {
    /// Number of world ranks.
    fn world_size(&self) -> usize;

    /// Buffered send from world rank `src` to world rank `dest`.
    fn send(&self, ctx: u64, src: usize, dest: usize, msg: Payload) -> LaResult<()>;

    /// Blocking receive on world rank `dest` of the next message from `src`.
    fn recv(&self, ctx: u64, src: usize, dest: usize) -> LaResult<Payload>;

    /// Fail every pending and future receive.
    fn abort(&self, reason: &str);
}

const WORLD_CTX: u64 = 0x9e37_79b9_7f4a_7c15;

fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn child_ctx(parent: u64, seq: u64, color: u64) -> u64 {
    mix(mix(parent ^ mix(seq)) ^ color)
}

/// A communicator: an ordered group of world ranks.
#[derive(Clone)]
pub struct Comm {
    transport: Arc<dyn Transport>,
    members: Arc<Vec<usize>>,
    rank: usize,
    ctx: u64,
    splits: Arc<AtomicU64>,
}

impl std::fmt::Debug for Comm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Comm")
            .field("rank", &self.rank)
            .field("size", &self.members.len())
            .field("ctx", &format_args!("{:#x}", self.ctx))
            .finish()
    }
}

impl Comm {
    /// The communicator containing every world rank, as seen from `rank`.
    pub fn world(transport: Arc<dyn Transport>, rank: usize) -> Self {
        let size = transport.world_size();
        Self {
            transport,
            members: Arc::new((0..size).collect()),
            rank,
            ctx: WORLD_CTX,
            splits: Arc::new(AtomicU64::new(0)),
        }
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    /// World rank of this process.
    #[inline]
    pub fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    /// World rank of member `rank`.
    #[inline]
    pub fn world_rank_of(&self, rank: usize) -> usize {
        self.members[rank]
    }

    /// Rank in `self` of member `rank` of `other`, if it belongs to both.
    pub fn translate(&self, other: &Comm, rank: usize) -> Option<usize> {
        let world = other.members.get(rank)?;
        self.members.iter().position(|m| m == world)
    }

    /// Whether both handles name the same group and context.
    pub fn congruent(&self, other: &Comm) -> bool {
        self.ctx == other.ctx && self.members == other.members
    }

    /// Single-member communicator holding only this process. Not collective.
    pub fn self_comm(&self) -> Comm {
        let world = self.world_rank();
        Comm {
            transport: Arc::clone(&self.transport),
            members: Arc::new(vec![world]),
            rank: 0,
            ctx: child_ctx(self.ctx, u64::MAX, world as u64),
            splits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Partition by `color`; members are ordered by `(key, old rank)`.
    ///
    /// Collective. Processes passing `None` get no communicator back.
    pub fn split(&self, color: Option<usize>, key: usize) -> LaResult<Option<Comm>> {
        let seq = self.splits.fetch_add(1, Ordering::Relaxed);
        let all = self.all_gather((color, key))?;
        let Some(color) = color else {
            return Ok(None);
        };
        let mut group: Vec<(usize, usize)> = all
            .iter()
            .enumerate()
            .filter(|(_, (c, _))| *c == Some(color))
            .map(|(r, (_, k))| (*k, r))
            .collect();
        group.sort_unstable();
        let members: Vec<usize> = group.iter().map(|&(_, r)| self.members[r]).collect();
        let rank = group
            .iter()
            .position(|&(_, r)| r == self.rank)
            .ok_or_else(|| LaError::Comm("split lost the calling rank".to_string()))?;
        Ok(Some(Comm {
            transport: Arc::clone(&self.transport),
            members: Arc::new(members),
            rank,
            ctx: child_ctx(self.ctx, seq, color as u64),
            splits: Arc::new(AtomicU64::new(0)),
        }))
    }

    fn check_rank(&self, rank: usize) -> LaResult<()> {
        if rank >= self.size() {
            return Err(LaError::Comm(format!(
                "rank {} out of range for communicator of size {}",
                rank,
                self.size()
            )));
        }
        Ok(())
    }

    /// Buffered typed send to member `dest`.
    pub fn send<T: Send + 'static>(&self, dest: usize, value: T) -> LaResult<()> {
        self.check_rank(dest)?;
        self.transport
            .send(self.ctx, self.world_rank(), self.members[dest], Box::new(value))
    }

    /// Blocking typed receive from member `src`.
    pub fn recv<T: Send + 'static>(&self, src: usize) -> LaResult<T> {
        self.check_rank(src)?;
        let msg = self
            .transport
            .recv(self.ctx, self.members[src], self.world_rank())?;
        msg.downcast::<T>().map(|b| *b).map_err(|_| {
            LaError::Comm(format!(
                "message from rank {} has unexpected type (wanted {})",
                src,
                std::any::type_name::<T>()
            ))
        })
    }

    /// Send to `dest` and receive from `src` in one step.
    pub fn send_recv<T: Send + 'static>(&self, value: T, dest: usize, src: usize) -> LaResult<T> {
        self.send(dest, value)?;
        self.recv(src)
    }

    /// Every member's value, in rank order.
    pub fn all_gather<T: Clone + Send + 'static>(&self, value: T) -> LaResult<Vec<T>> {
        for dest in 0..self.size() {
            self.send(dest, value.clone())?;
        }
        (0..self.size()).map(|src| self.recv(src)).collect()
    }

    /// All-gather of equally sized portions, concatenated in rank order.
    pub fn all_gather_portions<T: Clone + Send + 'static>(
        &self,
        portion: &[T],
    ) -> LaResult<Vec<T>> {
        let parts = self.all_gather(portion.to_vec())?;
        let len = portion.len();
        if parts.iter().any(|p| p.len() != len) {
            return Err(LaError::Comm(
                "all_gather_portions requires equal portion sizes".to_string(),
            ));
        }
        Ok(parts.into_iter().flatten().collect())
    }

    /// All-gather of variable-length portions.
    pub fn all_gather_v<T: Clone + Send + 'static>(&self, portion: &[T]) -> LaResult<Vec<Vec<T>>> {
        self.all_gather(portion.to_vec())
    }

    /// Member `r` receives `parts[r]`; returns what each member sent here.
    pub fn all_to_all<T: Send + 'static>(&self, parts: Vec<T>) -> LaResult<Vec<T>> {
        if parts.len() != self.size() {
            return Err(LaError::DimensionMismatch {
                expected: self.size(),
                actual: parts.len(),
            });
        }
        for (dest, part) in parts.into_iter().enumerate() {
            self.send(dest, part)?;
        }
        (0..self.size()).map(|src| self.recv(src)).collect()
    }

    /// Root's value on every member. Non-root inputs are ignored.
    pub fn broadcast<T: Clone + Send + 'static>(&self, value: T, root: usize) -> LaResult<T> {
        self.check_rank(root)?;
        if self.rank == root {
            for dest in 0..self.size() {
                if dest != root {
                    self.send(dest, value.clone())?;
                }
            }
            Ok(value)
        } else {
            self.recv(root)
        }
    }

    /// Every member's value at `root`; `None` elsewhere.
    pub fn gather<T: Send + 'static>(&self, value: T, root: usize) -> LaResult<Option<Vec<T>>> {
        self.check_rank(root)?;
        self.send(root, value)?;
        if self.rank == root {
            let all = (0..self.size()).map(|src| self.recv(src)).collect::<LaResult<_>>()?;
            Ok(Some(all))
        } else {
            Ok(None)
        }
    }

    /// Fold every member's value with `op` in rank order, on every member.
    pub fn all_reduce<T, Op>(&self, value: T, op: Op) -> LaResult<T>
    where
        T: Clone + Send + 'static,
        Op: Fn(T, T) -> T,
    {
        let mut all = self.all_gather(value)?.into_iter();
        let first = all
            .next()
            .ok_or_else(|| LaError::Comm("all_reduce over an empty communicator".to_string()))?;
        Ok(all.fold(first, op))
    }

    /// Element-wise sum of equally sized vectors.
    pub fn all_reduce_sum<T>(&self, values: Vec<T>) -> LaResult<Vec<T>>
    where
        T: Copy + std::ops::AddAssign + Send + 'static,
    {
        self.all_reduce(values, |mut acc, next| {
            for (a, b) in acc.iter_mut().zip(next) {
                *a += b;
            }
            acc
        })
    }

    /// Member `r` receives the element-wise sum of every member's `parts[r]`.
    pub fn reduce_scatter_sum<T>(&self, parts: Vec<Vec<T>>) -> LaResult<Vec<T>>
    where
        T: Copy + std::ops::AddAssign + Send + 'static,
    {
        let mut received = self.all_to_all(parts)?.into_iter();
        let mut acc = received.next().unwrap_or_default();
        for part in received {
            if part.len() != acc.len() {
                return Err(LaError::DimensionMismatch {
                    expected: acc.len(),
                    actual: part.len(),
                });
            }
            for (a, b) in acc.iter_mut().zip(part) {
                *a += b;
            }
        }
        Ok(acc)
    }

    pub fn barrier(&self) -> LaResult<()> {
        self.all_gather(()).map(|_| ())
    }

    /// Abort the whole job.
    pub fn abort(&self, reason: &str) {
        self.transport.abort(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collectives_over_threads() {
        let results = spmd(4, |comm| {
            let r = comm.rank();
            let gathered = comm.all_gather(r * 10)?;
            assert_eq!(gathered, vec![0, 10, 20, 30]);

            let parts: Vec<usize> = (0..comm.size()).map(|d| 100 * r + d).collect();
            let got = comm.all_to_all(parts)?;
            assert_eq!(got, (0..4).map(|s| 100 * s + r).collect::<Vec<_>>());

            let b = comm.broadcast(if r == 2 { 7usize } else { 0 }, 2)?;
            assert_eq!(b, 7);

            let sum = comm.all_reduce(r as f64, |a, b| a + b)?;
            assert_eq!(sum, 6.0);

            let right = comm.send_recv(r, (r + 1) % 4, (r + 3) % 4)?;
            assert_eq!(right, (r + 3) % 4);

            let g = comm.gather(r, 0)?;
            if r == 0 {
                assert_eq!(g, Some(vec![0, 1, 2, 3]));
            } else {
                assert!(g.is_none());
            }
            comm.barrier()?;
            Ok(())
        });
        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    }

    #[test]
    fn test_split_orders_by_key() {
        let results = spmd(4, |comm| {
            let r = comm.rank();
            let sub = comm.split(Some(r % 2), 10 - r)?.ok_or_else(|| LaError::logic("no comm"))?;
            assert_eq!(sub.size(), 2);
            // larger world rank has the smaller key
            let expected = if r >= 2 { 0 } else { 1 };
            assert_eq!(sub.rank(), expected);
            let sum = sub.all_reduce(r, |a, b| a + b)?;
            assert_eq!(sum, if r % 2 == 0 { 2 } else { 4 });
            let none = comm.split(if r == 0 { Some(0) } else { None }, 0)?;
            assert_eq!(none.is_some(), r == 0);
            Ok(())
        });
        assert!(results.iter().all(|r| r.is_ok()), "{:?}", results);
    }

    #[test]
    fn test_reduce_scatter_sum() {
        let results = spmd(3, |comm| {
            let parts = (0..3).map(|d| vec![d as f64, 1.0]).collect();
            let mine = comm.reduce_scatter_sum(parts)?;
            Ok(mine)
        });
        for (r, res) in results.into_iter().enumerate() {
            assert_eq!(res.unwrap(), vec![3.0 * r as f64, 3.0]);
        }
    }

    #[test]
    fn test_failure_aborts_peers() {
        let results = spmd(2, |comm| {
            if comm.rank() == 0 {
                return Err(LaError::logic("boom"));
            }
            comm.recv::<usize>(0)
        });
        assert_eq!(results[0], Err(LaError::logic("boom")));
        assert!(matches!(results[1], Err(LaError::Aborted(_))));
    }
}
