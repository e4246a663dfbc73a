//! Bounded event queue shared by interrupt/poll producers and the
//! application consumer.
//!
//! Storage is a fixed `heapless::Deque` of [`Event`] slots guarded by a
//! critical-section mutex. The lock is held for exactly one slot copy and
//! index update, never across consumer processing. A full queue rejects the
//! newest event and counts the drop; queued events keep their order.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use heapless::Deque;

use crate::config::APP_QUEUE_MAX;
use crate::error::QueueFull;
use crate::event::Event;

pub struct EventQueue<const N: usize = APP_QUEUE_MAX> {
    slots: Mutex<CriticalSectionRawMutex, RefCell<Deque<Event, N>>>,
    /// Raised on every successful enqueue.
    ready: Signal<CriticalSectionRawMutex, ()>,
    /// Events rejected because the queue was full.
    dropped: AtomicU32,
}

impl<const N: usize> EventQueue<N> {
    /// Create an empty queue. Usable in a `static`.
    pub const fn new() -> Self {
        Self {
            slots: Mutex::new(RefCell::new(Deque::new())),
            ready: Signal::new(),
            dropped: AtomicU32::new(0),
        }
    }

    /// Copy `event` into the next free slot.
    ///
    /// Safe to call from interrupt context. Never blocks.
    pub fn enqueue(&self, event: Event) -> Result<(), QueueFull> {
        let pushed = self
            .slots
            .lock(|slots| slots.borrow_mut().push_back(event).is_ok());

        if pushed {
            self.ready.signal(());
            Ok(())
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            Err(QueueFull)
        }
    }

    /// Pop the oldest event, if any.
    pub fn dequeue(&self) -> Option<Event> {
        self.slots.lock(|slots| slots.borrow_mut().pop_front())
    }

    /// Wait until a producer has enqueued something since the last wait.
    ///
    /// The queue may still be empty on return if another consumer pass
    /// already drained it.
    pub async fn wait(&self) {
        self.ready.wait().await
    }

    pub fn len(&self) -> usize {
        self.slots.lock(|slots| slots.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Total number of events dropped since creation (wraps).
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<const N: usize> Default for EventQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ANY_PAYLOAD_LEN, AUDIO_START};

    #[test]
    fn new_queue_is_empty() {
        let queue: EventQueue = EventQueue::new();
        assert!(queue.is_empty());
        assert_eq!(queue.capacity(), 44);
        assert_eq!(queue.dequeue(), None);
        assert_eq!(queue.dropped(), 0);
    }

    #[test]
    fn dequeue_returns_enqueue_order() {
        let queue: EventQueue = EventQueue::new();
        for i in 0..44u8 {
            queue.enqueue(Event::key(i, i % 2 == 0, i as u32)).unwrap();
        }
        for i in 0..44u8 {
            assert_eq!(queue.dequeue(), Some(Event::key(i, i % 2 == 0, i as u32)));
        }
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn key_then_button_scenario() {
        let queue: EventQueue = EventQueue::new();
        let key = Event::key(5, true, 100);
        let button = Event::button(2, true, 101);
        queue.enqueue(key).unwrap();
        queue.enqueue(button).unwrap();

        assert_eq!(queue.dequeue(), Some(key));
        assert_eq!(queue.dequeue(), Some(button));
        assert!(queue.is_empty());
    }

    #[test]
    fn full_queue_rejects_newest_and_keeps_existing() {
        let queue: EventQueue = EventQueue::new();
        for i in 0..44u8 {
            queue.enqueue(Event::key(i, true, 0)).unwrap();
        }

        assert_eq!(queue.enqueue(Event::info(AUDIO_START, 1)), Err(QueueFull));
        assert_eq!(queue.len(), 44);
        assert_eq!(queue.dropped(), 1);

        for i in 0..44u8 {
            assert_eq!(queue.dequeue(), Some(Event::key(i, true, 0)));
        }
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn space_is_reusable_after_dequeue() {
        let queue: EventQueue<2> = EventQueue::new();
        queue.enqueue(Event::key(1, true, 0)).unwrap();
        queue.enqueue(Event::key(2, true, 0)).unwrap();
        assert!(queue.enqueue(Event::key(3, true, 0)).is_err());

        assert_eq!(queue.dequeue(), Some(Event::key(1, true, 0)));
        queue.enqueue(Event::key(4, true, 0)).unwrap();

        assert_eq!(queue.dequeue(), Some(Event::key(2, true, 0)));
        assert_eq!(queue.dequeue(), Some(Event::key(4, true, 0)));
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn payload_variants_survive_queueing() {
        let queue: EventQueue = EventQueue::new();
        let any = Event::Any {
            code: 0x7E,
            data: [9; ANY_PAYLOAD_LEN],
            stamp: 77,
        };
        let user = Event::UserDefine {
            data: [0xDE, 0xAD, 0xBE, 0xEF],
            stamp: 78,
        };
        queue.enqueue(any).unwrap();
        queue.enqueue(user).unwrap();
        assert_eq!(queue.dequeue(), Some(any));
        assert_eq!(queue.dequeue(), Some(user));
    }

    #[test]
    fn concurrent_producers_keep_their_order() {
        use std::sync::atomic::AtomicUsize;
        use std::thread;
        use std::vec::Vec;

        const PRODUCERS: u8 = 4;
        const PER_PRODUCER: u32 = 500;

        let queue: EventQueue = EventQueue::new();
        let finished = AtomicUsize::new(0);

        let (accepted, received) = thread::scope(|s| {
            let producers: Vec<_> = (0..PRODUCERS)
                .map(|id| {
                    let queue = &queue;
                    let finished = &finished;
                    s.spawn(move || {
                        let mut accepted = 0u32;
                        for seq in 0..PER_PRODUCER {
                            if queue.enqueue(Event::key(id, true, seq)).is_ok() {
                                accepted += 1;
                            }
                            if seq % 16 == 0 {
                                thread::yield_now();
                            }
                        }
                        finished.fetch_add(1, Ordering::SeqCst);
                        accepted
                    })
                })
                .collect();

            let consumer = s.spawn(|| {
                let mut received = Vec::new();
                loop {
                    let done = finished.load(Ordering::SeqCst) == usize::from(PRODUCERS);
                    match queue.dequeue() {
                        Some(event) => received.push(event),
                        None if done => break,
                        None => thread::yield_now(),
                    }
                }
                received
            });

            let accepted: u32 = producers.into_iter().map(|p| p.join().unwrap()).sum();
            (accepted, consumer.join().unwrap())
        });

        assert_eq!(received.len(), accepted as usize);
        assert_eq!(
            accepted + queue.dropped(),
            u32::from(PRODUCERS) * PER_PRODUCER
        );

        // Per producer: strictly increasing sequence, so ordered and unique.
        let mut last: [Option<u32>; PRODUCERS as usize] = [None; PRODUCERS as usize];
        for event in &received {
            let Event::Key { index, stamp, .. } = *event else {
                panic!("unexpected event {:?}", event);
            };
            let slot = &mut last[usize::from(index)];
            if let Some(prev) = *slot {
                assert!(stamp > prev, "producer {index}: {stamp} after {prev}");
            }
            *slot = Some(stamp);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn enqueue_raises_ready_signal() {
        let queue: EventQueue = EventQueue::new();
        assert!(!queue.ready.signaled());
        queue.enqueue(Event::key(0, true, 0)).unwrap();
        assert!(queue.ready.signaled());
    }
}
