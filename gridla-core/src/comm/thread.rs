//! Shared-memory transport: one OS thread per rank.

use super::{Comm, Payload, Transport};
use crate::error::{LaError, LaResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Mailbox {
    queues: Mutex<HashMap<(u64, usize), VecDeque<Payload>>>,
    ready: Condvar,
}

/// In-process message fabric with one mailbox per world rank.
pub struct ThreadTransport {
    boxes: Vec<Mailbox>,
    aborted: AtomicBool,
    reason: Mutex<String>,
}

impl ThreadTransport {
    pub fn new(size: usize) -> Self {
        Self {
            boxes: (0..size).map(|_| Mailbox::default()).collect(),
            aborted: AtomicBool::new(false),
            reason: Mutex::new(String::new()),
        }
    }

    fn aborted_error(&self) -> LaError {
        LaError::Aborted(self.reason.lock().clone())
    }

    fn mailbox(&self, rank: usize) -> LaResult<&Mailbox> {
        self.boxes
            .get(rank)
            .ok_or_else(|| LaError::Comm(format!("no world rank {}", rank)))
    }
}

impl Transport for ThreadTransport {
    fn world_size(&self) -> usize {
        self.boxes.len()
    }

    fn send(&self, ctx: u64, src: usize, dest: usize, msg: Payload) -> LaResult<()> {
        if self.aborted.load(Ordering::Acquire) {
            return Err(self.aborted_error());
        }
        let mailbox = self.mailbox(dest)?;
        let mut queues = mailbox.queues.lock();
        queues.entry((ctx, src)).or_default().push_back(msg);
        mailbox.ready.notify_all();
        Ok(())
    }

    fn recv(&self, ctx: u64, src: usize, dest: usize) -> LaResult<Payload> {
        let mailbox = self.mailbox(dest)?;
        let mut queues = mailbox.queues.lock();
        loop {
            if let Some(msg) = queues.get_mut(&(ctx, src)).and_then(|q| q.pop_front()) {
                return Ok(msg);
            }
            if self.aborted.load(Ordering::Acquire) {
                drop(queues);
                return Err(self.aborted_error());
            }
            mailbox.ready.wait(&mut queues);
        }
    }

    fn abort(&self, reason: &str) {
        {
            let mut r = self.reason.lock();
            if r.is_empty() {
                *r = reason.to_string();
            }
        }
        self.aborted.store(true, Ordering::Release);
        for mailbox in &self.boxes {
            let _queues = mailbox.queues.lock();
            mailbox.ready.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `f` as an SPMD job over `p` threads, each given the world communicator.
///
/// Returns each rank's result in rank order. An error or panic on any rank
/// aborts the fabric, so peers blocked in a receive fail with
/// [`LaError::Aborted`] rather than hanging.
pub fn spmd<R, F>(p: usize, f: F) -> Vec<LaResult<R>>
where
    R: Send,
    F: Fn(Comm) -> LaResult<R> + Sync,
{
    let transport = Arc::new(ThreadTransport::new(p));
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..p)
            .map(|rank| {
                let transport = Arc::clone(&transport);
                let f = &f;
                scope.spawn(move || {
                    let comm = Comm::world(transport.clone(), rank);
                    match catch_unwind(AssertUnwindSafe(|| f(comm))) {
                        Ok(Ok(v)) => Ok(v),
                        Ok(Err(e)) => {
                            transport.abort(&format!("rank {} failed: {}", rank, e));
                            Err(e)
                        }
                        Err(payload) => {
                            let msg = format!("rank {} panicked: {}", rank, panic_message(&*payload));
                            transport.abort(&msg);
                            Err(LaError::Aborted(msg))
                        }
                    }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join()
                    .unwrap_or_else(|_| Err(LaError::Aborted("rank thread died".to_string())))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_per_pair() {
        let t = ThreadTransport::new(2);
        for i in 0..3usize {
            t.send(1, 0, 1, Box::new(i)).unwrap();
        }
        t.send(2, 0, 1, Box::new(99usize)).unwrap();
        let other = t.recv(2, 0, 1).unwrap().downcast::<usize>().unwrap();
        assert_eq!(*other, 99);
        for i in 0..3usize {
            let got = t.recv(1, 0, 1).unwrap().downcast::<usize>().unwrap();
            assert_eq!(*got, i);
        }
    }

    #[test]
    fn test_abort_wakes_receivers() {
        let t = ThreadTransport::new(1);
        t.abort("stop");
        assert_eq!(t.recv(0, 0, 0).err(), Some(LaError::Aborted("stop".to_string())));
        assert!(t.send(0, 0, 0, Box::new(())).is_err());
    }

    #[test]
    fn test_panic_becomes_abort() {
        let results = spmd(2, |comm| {
            if comm.rank() == 1 {
                panic!("rank one gave up");
            }
            comm.recv::<u8>(1)
        });
        assert!(matches!(&results[1], Err(LaError::Aborted(m)) if m.contains("gave up")));
        assert!(matches!(results[0], Err(LaError::Aborted(_))));
    }
}
