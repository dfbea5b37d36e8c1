//! Lock-Free Bounded Queue Implementation

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Lock-free SPSC queue with `N` slots, of which `N - 1` are usable.
///
/// One slot is always kept free so that `read == write` unambiguously means
/// empty. Both indices wrap modulo `N`; the element count is derived from
/// their difference and never stored.
pub struct BoundedQueue<T, const N: usize> {
    /// Pre-allocated storage
    slots: Box<[UnsafeCell<Option<T>>]>,
    /// Read position, only advanced by the consumer
    read: AtomicUsize,
    /// Write position, only advanced by the producer
    write: AtomicUsize,
}

// SAFETY: the producer only touches the slot at `write`, which is never
// inside the readable range [read, write); the consumer only touches the
// slot at `read` once `write` has been observed past it. Index stores use
// Release and the opposite side loads them with Acquire, so slot contents
// are handed over with the index. Pushing and popping through `&self` is
// only reachable from `&mut BoundedQueue` or from the unique writer/reader
// halves produced by `split`.
unsafe impl<T: Send, const N: usize> Sync for BoundedQueue<T, N> {}

impl<T, const N: usize> BoundedQueue<T, N> {
    /// Create an empty queue
    pub fn new() -> Self {
        assert!(N > 1, "BoundedQueue requires N > 1");
        let slots: Vec<UnsafeCell<Option<T>>> = (0..N).map(|_| UnsafeCell::new(None)).collect();
        Self {
            slots: slots.into_boxed_slice(),
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    /// Maximum number of values the queue can hold at once (`N - 1`)
    pub const fn write_capacity(&self) -> usize {
        N - 1
    }

    /// Number of values written and pending read
    pub fn size(&self) -> usize {
        let read = self.read.load(Ordering::Acquire);
        let write = self.write.load(Ordering::Acquire);
        if read <= write {
            write - read
        } else {
            write + N - read
        }
    }

    /// Number of slots that can currently be written
    pub fn num_free(&self) -> usize {
        self.write_capacity() - self.size()
    }

    /// Check if no further value fits
    pub fn full(&self) -> bool {
        self.num_free() == 0
    }

    /// Check if there is nothing to read
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Write a value. The caller must have checked that space exists.
    pub fn write(&mut self, value: T) {
        // SAFETY: `&mut self` excludes any other producer or consumer.
        unsafe { self.push(value) }
    }

    /// Write a value if there is room, returning false (and dropping
    /// nothing) otherwise
    pub fn maybe_write(&mut self, value: T) -> bool {
        if self.full() {
            return false;
        }
        self.write(value);
        true
    }

    /// Read the oldest value.
    ///
    /// # Panics
    /// Panics if the queue is empty; check `size()` first or use `try_read`.
    pub fn read(&mut self) -> T {
        match self.try_read() {
            Some(value) => value,
            None => panic!("read from an empty BoundedQueue"),
        }
    }

    /// Read the oldest value if there is one
    pub fn try_read(&mut self) -> Option<T> {
        // SAFETY: `&mut self` excludes any other producer or consumer.
        unsafe { self.pop() }
    }

    /// Read until empty. Single-threaded use only.
    pub fn clear(&mut self) {
        while self.try_read().is_some() {}
    }

    /// Split into a producer half and a consumer half that can be moved to
    /// different threads
    pub fn split(self) -> (QueueWriter<T, N>, QueueReader<T, N>) {
        let queue = Arc::new(self);
        (
            QueueWriter {
                queue: Arc::clone(&queue),
            },
            QueueReader { queue },
        )
    }

    /// # Safety
    /// Caller must be the only producer.
    unsafe fn push(&self, value: T) {
        debug_assert!(!self.full(), "write into a full BoundedQueue");
        let write = self.write.load(Ordering::Relaxed);
        *self.slots[write].get() = Some(value);
        self.write.store((write + 1) % N, Ordering::Release);
    }

    /// # Safety
    /// Caller must be the only consumer.
    unsafe fn pop(&self) -> Option<T> {
        let read = self.read.load(Ordering::Relaxed);
        if read == self.write.load(Ordering::Acquire) {
            return None;
        }
        let value = (*self.slots[read].get()).take();
        self.read.store((read + 1) % N, Ordering::Release);
        value
    }
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half of a split [`BoundedQueue`]
pub struct QueueWriter<T, const N: usize> {
    queue: Arc<BoundedQueue<T, N>>,
}

impl<T, const N: usize> QueueWriter<T, N> {
    /// Write a value. The caller must have checked that space exists.
    pub fn write(&mut self, value: T) {
        // SAFETY: the writer half is unique and not cloneable.
        unsafe { self.queue.push(value) }
    }

    /// Write a value if there is room
    pub fn maybe_write(&mut self, value: T) -> bool {
        if self.queue.full() {
            return false;
        }
        self.write(value);
        true
    }

    /// Values pending read, as seen by the producer
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    /// Free slots, as seen by the producer
    pub fn num_free(&self) -> usize {
        self.queue.num_free()
    }

    /// Check if no further value fits
    pub fn full(&self) -> bool {
        self.queue.full()
    }
}

/// Consumer half of a split [`BoundedQueue`]
pub struct QueueReader<T, const N: usize> {
    queue: Arc<BoundedQueue<T, N>>,
}

impl<T, const N: usize> QueueReader<T, N> {
    /// Read the oldest value.
    ///
    /// # Panics
    /// Panics if the queue is empty.
    pub fn read(&mut self) -> T {
        match self.try_read() {
            Some(value) => value,
            None => panic!("read from an empty BoundedQueue"),
        }
    }

    /// Read the oldest value if there is one
    pub fn try_read(&mut self) -> Option<T> {
        // SAFETY: the reader half is unique and not cloneable.
        unsafe { self.queue.pop() }
    }

    /// Read every value that was pending when the call was made. Values
    /// written concurrently are left for the next drain.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        let pending = self.queue.size();
        (0..pending).map_while(move |_| self.try_read())
    }

    /// Discard every value that was pending when the call was made
    pub fn clear(&mut self) {
        self.drain().for_each(drop);
    }

    /// Values pending read, as seen by the consumer
    pub fn size(&self) -> usize {
        self.queue.size()
    }

    /// Check if there is nothing to read
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::thread;

    #[test]
    fn test_write_and_read() {
        let mut queue: BoundedQueue<u32, 8> = BoundedQueue::new();

        for i in 0..5 {
            queue.write(i * 100);
        }

        assert_eq!(queue.size(), 5);
        assert_eq!(queue.num_free(), 2);
        assert_eq!(queue.read(), 0);
        assert_eq!(queue.read(), 100);
        assert_eq!(queue.size(), 3);
    }

    #[test]
    fn test_full_rejects_without_overwrite() {
        let mut queue: BoundedQueue<u32, 4> = BoundedQueue::new();

        assert!(queue.maybe_write(1));
        assert!(queue.maybe_write(2));
        assert!(queue.maybe_write(3));
        assert!(queue.full());

        // Oldest value must survive a rejected write
        assert!(!queue.maybe_write(4));
        assert_eq!(queue.size(), 3);
        assert_eq!(queue.read(), 1);
    }

    #[test]
    fn test_wraps_around() {
        let mut queue: BoundedQueue<usize, 3> = BoundedQueue::new();

        for i in 0..20 {
            queue.write(i);
            queue.write(i + 1000);
            assert_eq!(queue.read(), i);
            assert_eq!(queue.read(), i + 1000);
            assert!(queue.is_empty());
        }
    }

    #[test]
    fn test_clear() {
        let mut queue: BoundedQueue<String, 8> = BoundedQueue::new();
        queue.write("a".to_string());
        queue.write("b".to_string());
        queue.clear();

        assert!(queue.is_empty());
        assert_eq!(queue.num_free(), 7);
        assert!(queue.try_read().is_none());
    }

    #[test]
    #[should_panic(expected = "empty")]
    fn test_read_empty_panics() {
        let mut queue: BoundedQueue<u8, 2> = BoundedQueue::new();
        queue.read();
    }

    #[test]
    fn test_split_drain_takes_snapshot() {
        let queue: BoundedQueue<u32, 8> = BoundedQueue::new();
        let (mut writer, mut reader) = queue.split();

        writer.write(1);
        writer.write(2);
        let drained: Vec<u32> = reader.drain().collect();
        assert_eq!(drained, vec![1, 2]);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_cross_thread_order_preserved() {
        const COUNT: u64 = 20_000;
        let queue: BoundedQueue<u64, 16> = BoundedQueue::new();
        let (mut writer, mut reader) = queue.split();

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                while !writer.maybe_write(i) {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0;
        while expected < COUNT {
            match reader.try_read() {
                Some(value) => {
                    assert_eq!(value, expected);
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }

        producer.join().unwrap();
        assert!(reader.is_empty());
    }

    proptest! {
        #[test]
        fn prop_matches_fifo_model(ops in proptest::collection::vec(proptest::option::of(any::<u16>()), 0..200)) {
            let mut queue: BoundedQueue<u16, 5> = BoundedQueue::new();
            let mut model: VecDeque<u16> = VecDeque::new();

            for op in ops {
                match op {
                    Some(value) => {
                        let was_full = queue.full();
                        let before = queue.size();
                        let accepted = queue.maybe_write(value);
                        prop_assert_eq!(accepted, !was_full);
                        if accepted {
                            model.push_back(value);
                        } else {
                            prop_assert_eq!(queue.size(), before);
                        }
                    }
                    None => {
                        prop_assert_eq!(queue.try_read(), model.pop_front());
                    }
                }

                prop_assert!(queue.size() <= queue.write_capacity());
                prop_assert_eq!(queue.size() + queue.num_free(), 4);
                prop_assert_eq!(queue.size(), model.len());
            }
        }
    }
}
