//! Command queues.
//!
//! Producers append to two ingress buffers. The send loop periodically moves
//! them into its working buffers and frames packets from the head. The
//! realtime queue always drains before the normal queue.

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::{Buf, BytesMut};
use lhylink_frame::{next_packet, Packet};
use tracing::trace;

use crate::notify::Notifier;

/// Which working buffer a packet was framed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Realtime,
    Normal,
}

/// Identity of a buffer head. Stays the same across repeated peeks until
/// the head is consumed or the buffers are cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadId {
    queue: Queue,
    epoch: u64,
    seq: u64,
}

impl HeadId {
    pub fn queue(&self) -> Queue {
        self.queue
    }
}

/// A packet framed from the head of a working buffer, not yet consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedPacket {
    pub queue: Queue,
    pub packet: Packet,
    epoch: u64,
    seq: u64,
}

impl QueuedPacket {
    pub fn id(&self) -> HeadId {
        HeadId {
            queue: self.queue,
            epoch: self.epoch,
            seq: self.seq,
        }
    }
}

#[derive(Default)]
struct Working {
    realtime: BytesMut,
    normal: BytesMut,
    /// Bumped by every clear so stale heads are never consumed.
    epoch: u64,
    /// Packets consumed per queue.
    realtime_seq: u64,
    normal_seq: u64,
}

/// Thread-safe ingress and working buffers.
pub struct CommandBuffers {
    incoming: Mutex<BytesMut>,
    preempt: Mutex<BytesMut>,
    working: Mutex<Working>,
    notifier: Arc<dyn Notifier>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CommandBuffers {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            incoming: Mutex::new(BytesMut::new()),
            preempt: Mutex::new(BytesMut::new()),
            working: Mutex::new(Working::default()),
            notifier,
        }
    }

    /// Append to the normal queue.
    pub fn enqueue(&self, bytes: &[u8]) {
        lock(&self.incoming).extend_from_slice(bytes);
        self.publish();
    }

    /// Append to the realtime queue.
    pub fn enqueue_priority(&self, bytes: &[u8]) {
        lock(&self.preempt).extend_from_slice(bytes);
        self.publish();
    }

    /// Total bytes outstanding across all four buffers.
    pub fn len(&self) -> usize {
        let working = lock(&self.working);
        let ingress = lock(&self.incoming).len() + lock(&self.preempt).len();
        ingress + working.realtime.len() + working.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything queued.
    pub fn clear(&self) {
        lock(&self.incoming).clear();
        lock(&self.preempt).clear();
        {
            let mut working = lock(&self.working);
            working.realtime.clear();
            working.normal.clear();
            working.epoch = working.epoch.wrapping_add(1);
        }
        self.publish();
    }

    /// Move ingress bytes into the working buffers.
    ///
    /// The working lock is held for the whole move so `len` never observes
    /// bytes in flight between buffers.
    pub fn drain_ingress(&self) {
        let mut working = lock(&self.working);
        let preempt = lock(&self.preempt).split();
        let incoming = lock(&self.incoming).split();
        if preempt.is_empty() && incoming.is_empty() {
            return;
        }
        working.realtime.unsplit(preempt);
        working.normal.unsplit(incoming);
        trace!(
            realtime = working.realtime.len(),
            normal = working.normal.len(),
            "drained ingress buffers"
        );
    }

    /// True when the realtime working buffer holds anything.
    pub fn has_realtime(&self) -> bool {
        !lock(&self.working).realtime.is_empty()
    }

    /// Frame the next packet without consuming it.
    ///
    /// The realtime queue is tried first. A partial realtime line does not
    /// block the normal queue, which is only tried when `allow_normal`.
    pub fn peek(&self, allow_normal: bool) -> Option<QueuedPacket> {
        let working = lock(&self.working);
        if let Some(packet) = next_packet(&working.realtime) {
            return Some(QueuedPacket {
                queue: Queue::Realtime,
                packet,
                epoch: working.epoch,
                seq: working.realtime_seq,
            });
        }
        if !allow_normal {
            return None;
        }
        next_packet(&working.normal).map(|packet| QueuedPacket {
            queue: Queue::Normal,
            packet,
            epoch: working.epoch,
            seq: working.normal_seq,
        })
    }

    /// Remove a previously peeked packet from its buffer.
    ///
    /// Returns `false` if the buffers were cleared since the peek.
    pub fn consume(&self, head: &QueuedPacket) -> bool {
        {
            let mut working = lock(&self.working);
            if working.epoch != head.epoch {
                return false;
            }
            let working = &mut *working;
            let (buf, seq) = match head.queue {
                Queue::Realtime => (&mut working.realtime, &mut working.realtime_seq),
                Queue::Normal => (&mut working.normal, &mut working.normal_seq),
            };
            let consumed = head.packet.consumed.min(buf.len());
            buf.advance(consumed);
            *seq = seq.wrapping_add(1);
        }
        self.publish();
        true
    }

    fn publish(&self) {
        self.notifier.buffer_changed(self.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{ChannelNotifier, ControllerEvent, NullNotifier};

    fn buffers() -> CommandBuffers {
        CommandBuffers::new(Arc::new(NullNotifier))
    }

    #[test]
    fn realtime_is_framed_first() {
        let buffers = buffers();
        buffers.enqueue(b"AAA\n");
        buffers.enqueue_priority(b"BBB\n");
        buffers.drain_ingress();

        let head = buffers.peek(true).unwrap();
        assert_eq!(head.queue, Queue::Realtime);
        assert_eq!(&head.packet.payload.unwrap()[..3], b"BBB");
        assert!(buffers.consume(&head));

        let head = buffers.peek(true).unwrap();
        assert_eq!(head.queue, Queue::Normal);
        assert_eq!(&head.packet.payload.unwrap()[..3], b"AAA");
    }

    #[test]
    fn normal_queue_held_when_not_allowed() {
        let buffers = buffers();
        buffers.enqueue(b"AAA\n");
        buffers.drain_ingress();
        assert!(buffers.peek(false).is_none());
        assert!(buffers.peek(true).is_some());
    }

    #[test]
    fn partial_realtime_does_not_block_normal() {
        let buffers = buffers();
        buffers.enqueue_priority(b"PN");
        buffers.enqueue(b"AAA\n");
        buffers.drain_ingress();
        assert_eq!(buffers.peek(true).unwrap().queue, Queue::Normal);
    }

    #[test]
    fn len_counts_ingress_and_working() {
        let buffers = buffers();
        buffers.enqueue(b"AB\n");
        buffers.drain_ingress();
        buffers.enqueue(b"CD\n");
        buffers.enqueue_priority(b"E\n");
        assert_eq!(buffers.len(), 8);

        let head = buffers.peek(true).unwrap();
        buffers.consume(&head);
        assert_eq!(buffers.len(), 5);
    }

    #[test]
    fn clear_invalidates_outstanding_heads() {
        let buffers = buffers();
        buffers.enqueue(b"AAA\nBBB\n");
        buffers.drain_ingress();
        let head = buffers.peek(true).unwrap();

        buffers.clear();
        assert!(buffers.is_empty());
        assert!(!buffers.consume(&head));

        buffers.enqueue(b"CCC\n");
        buffers.drain_ingress();
        assert!(!buffers.consume(&head));
        assert_eq!(buffers.len(), 4);
    }

    #[test]
    fn head_identity_changes_only_on_consume_or_clear() {
        let buffers = buffers();
        buffers.enqueue(b"AAA\nAAA\n");
        buffers.drain_ingress();

        let first = buffers.peek(true).unwrap();
        assert_eq!(buffers.peek(true).unwrap().id(), first.id());

        buffers.enqueue_priority(b"B\n");
        buffers.drain_ingress();
        let realtime = buffers.peek(true).unwrap();
        assert_ne!(realtime.id(), first.id());
        assert!(buffers.consume(&realtime));
        assert_eq!(buffers.peek(true).unwrap().id(), first.id());

        assert!(buffers.consume(&first));
        let second = buffers.peek(true).unwrap();
        assert_eq!(second.packet, first.packet);
        assert_ne!(second.id(), first.id());

        buffers.clear();
        buffers.enqueue(b"AAA\n");
        buffers.drain_ingress();
        assert_ne!(buffers.peek(true).unwrap().id(), second.id());
    }

    #[test]
    fn every_mutation_publishes_size() {
        let (notifier, rx) = ChannelNotifier::new();
        let buffers = CommandBuffers::new(Arc::new(notifier));
        buffers.enqueue(b"AB\n");
        buffers.enqueue_priority(b"C\n");
        buffers.clear();

        let sizes: Vec<_> = rx
            .try_iter()
            .filter_map(|event| match event {
                ControllerEvent::Buffer { pending } => Some(pending),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![3, 5, 0]);
    }
}
