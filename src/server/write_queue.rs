//! Per-connection ordered write queue.
//!
//! Each dispatched request reserves a slot at the tail of the queue, in the
//! order frames were read off the wire. Handlers fill their slot whenever they
//! finish; the drain writes the head slot once it is filled and only then
//! moves on. A slow head therefore holds back faster successors, which is
//! what keeps responses in request order under pipelining.
//!
//! ```text
//!  reader ──reserve()──► [slot 0][slot 1][slot 2] ──drain──► transport
//!                            ▲       ▲       ▲
//!  handlers ──fill()─────────┴───────┴───────┘  (any order)
//! ```
//!
//! Slots are one-shot `may` channels, so a drain waiting on an unfilled head
//! parks its coroutine instead of blocking a worker thread.
//!
//! A [`bounded`](WriteQueue::bounded) queue caps how many slots may be
//! reserved but not yet taken up by the drain. Once the cap is reached,
//! `reserve` parks the reader until the drain moves past the head slot, so a
//! stuck handler stops the connection from reading instead of piling up
//! slots and handler coroutines.

use may::sync::mpsc;
use std::fmt;
use std::io::{self, Write};
use tracing::debug;

/// Reserved position in a connection's outbound order.
pub struct WriteTask {
    position: u64,
    seq_num: u32,
    frame: mpsc::Receiver<Vec<u8>>,
    close_after_flush: bool,
}

impl WriteTask {
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    #[must_use]
    pub fn closes_connection(&self) -> bool {
        self.close_after_flush
    }
}

/// Producer half of a reserved slot; filled exactly once.
pub struct ResponseSlot {
    position: u64,
    seq_num: u32,
    tx: mpsc::Sender<Vec<u8>>,
}

impl ResponseSlot {
    #[must_use]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[must_use]
    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    /// Fill the slot with a complete response frame.
    ///
    /// Returns `false` if the queue was abandoned (connection gone); the frame
    /// is discarded in that case.
    pub fn fill(self, frame: Vec<u8>) -> bool {
        self.tx.send(frame).is_ok()
    }
}

impl fmt::Debug for ResponseSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseSlot")
            .field("position", &self.position)
            .field("seq_num", &self.seq_num)
            .finish()
    }
}

/// The drain has stopped; no further slots can be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

/// Reservation side of the queue, owned by the connection's read loop.
pub struct WriteQueue {
    tx: mpsc::Sender<WriteTask>,
    next_position: u64,
    /// One token per slot that may still be reserved; `None` when unbounded
    credits: Option<mpsc::Receiver<()>>,
}

impl WriteQueue {
    /// Create a queue and the drain that empties it.
    #[must_use]
    pub fn channel() -> (WriteQueue, WriteQueueDrain) {
        let (tx, rx) = mpsc::channel();
        (
            WriteQueue {
                tx,
                next_position: 0,
                credits: None,
            },
            WriteQueueDrain { rx, credits: None },
        )
    }

    /// Create a queue holding at most `max_in_flight` slots the drain has not
    /// yet reached. `0` means unbounded.
    #[must_use]
    pub fn bounded(max_in_flight: usize) -> (WriteQueue, WriteQueueDrain) {
        if max_in_flight == 0 {
            return Self::channel();
        }
        let (credit_tx, credit_rx) = mpsc::channel();
        for _ in 0..max_in_flight {
            if credit_tx.send(()).is_err() {
                break;
            }
        }
        let (tx, rx) = mpsc::channel();
        (
            WriteQueue {
                tx,
                next_position: 0,
                credits: Some(credit_rx),
            },
            WriteQueueDrain {
                rx,
                credits: Some(credit_tx),
            },
        )
    }

    /// Reserve the next slot in arrival order.
    pub fn reserve(&mut self, seq_num: u32) -> Result<ResponseSlot, QueueClosed> {
        self.push(seq_num, false)
    }

    /// Reserve a slot after which the drain closes the connection.
    pub fn reserve_final(&mut self, seq_num: u32) -> Result<ResponseSlot, QueueClosed> {
        self.push(seq_num, true)
    }

    /// Number of slots reserved so far.
    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.next_position
    }

    fn push(&mut self, seq_num: u32, close_after_flush: bool) -> Result<ResponseSlot, QueueClosed> {
        self.acquire_credit()?;
        let (tx, rx) = mpsc::channel();
        let position = self.next_position;
        let task = WriteTask {
            position,
            seq_num,
            frame: rx,
            close_after_flush,
        };
        self.tx.send(task).map_err(|_| QueueClosed)?;
        self.next_position += 1;
        Ok(ResponseSlot {
            position,
            seq_num,
            tx,
        })
    }

    fn acquire_credit(&self) -> Result<(), QueueClosed> {
        let Some(credits) = &self.credits else {
            return Ok(());
        };
        if credits.try_recv().is_ok() {
            return Ok(());
        }
        debug!(
            reserved = self.next_position,
            "Pipelining limit reached; waiting for the writer"
        );
        credits.recv().map_err(|_| QueueClosed)
    }
}

/// Why the drain stopped.
#[derive(Debug)]
pub enum DrainOutcome {
    /// The reservation side was dropped and every slot was flushed.
    Finished,
    /// A close-after-flush slot was written.
    CloseRequested,
    /// The connection was closed underneath the drain.
    Closed {
        /// Filled slots that were never written
        discarded: usize,
    },
    /// The transport rejected a write.
    WriteFailed {
        error: io::Error,
        /// Slots abandoned behind the failed one, the failed one included
        discarded: usize,
    },
}

/// Result of running a drain to completion.
#[derive(Debug)]
pub struct DrainReport {
    pub written: u64,
    pub outcome: DrainOutcome,
}

/// Consumer side of the queue, run by the connection's writer coroutine.
pub struct WriteQueueDrain {
    rx: mpsc::Receiver<WriteTask>,
    credits: Option<mpsc::Sender<()>>,
}

impl WriteQueueDrain {
    /// Write slots to `sink` strictly in reservation order.
    ///
    /// Each frame goes out with a single `write_all` + `flush`, so two
    /// responses never interleave. `is_closed` is checked before every write;
    /// once it reports true, remaining slots are dropped unwritten.
    pub fn run<W: Write>(self, mut sink: W, is_closed: impl Fn() -> bool) -> DrainReport {
        let mut written = 0;
        for task in self.rx.iter() {
            let frame = task.frame.recv();
            self.release_credit();
            let frame = match frame {
                Ok(frame) => frame,
                Err(_) => {
                    debug!(
                        position = task.position,
                        seq_num = task.seq_num,
                        "Write slot abandoned before it was filled"
                    );
                    continue;
                }
            };

            if is_closed() {
                return DrainReport {
                    written,
                    outcome: DrainOutcome::Closed {
                        discarded: 1 + self.abandon_rest(),
                    },
                };
            }

            if let Err(error) = sink.write_all(&frame).and_then(|()| sink.flush()) {
                return DrainReport {
                    written,
                    outcome: DrainOutcome::WriteFailed {
                        error,
                        discarded: 1 + self.abandon_rest(),
                    },
                };
            }
            written += 1;

            if task.close_after_flush {
                self.abandon_rest();
                return DrainReport {
                    written,
                    outcome: DrainOutcome::CloseRequested,
                };
            }
        }
        DrainReport {
            written,
            outcome: DrainOutcome::Finished,
        }
    }

    fn release_credit(&self) {
        if let Some(credits) = &self.credits {
            // Fails only once the reservation side is gone.
            credits.send(()).ok();
        }
    }

    fn abandon_rest(&self) -> usize {
        let mut abandoned = 0;
        while self.rx.try_recv().is_ok() {
            abandoned += 1;
        }
        abandoned
    }
}
