use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

pub const DEFAULT_CAPACITY: usize = 200;

/// One received line, terminator already stripped. Cloning shares the text.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Line(Arc<str>);

impl Line {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for Line {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Line {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Line {
    fn from(text: &str) -> Self {
        Line(Arc::from(text))
    }
}

impl From<String> for Line {
    fn from(text: String) -> Self {
        Line(Arc::from(text))
    }
}

impl PartialEq<&str> for Line {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl fmt::Debug for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
struct Inner {
    lines: VecDeque<Line>,
    total_appended: u64,
}

/// Bounded FIFO of the most recent lines, shared between connection tasks (writers) and the
/// render loop (reader).
///
/// The lock is held only for the push/evict or for cloning the line handles into a snapshot,
/// never across I/O.
///
/// ```
/// # use dashterm::buffer::LineBuffer;
/// let buffer = LineBuffer::new(2);
/// buffer.append("one");
/// buffer.append("two");
/// buffer.append("three");
/// assert_eq!(buffer.snapshot(), vec!["two", "three"]);
/// ```
#[derive(Debug)]
pub struct LineBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl LineBuffer {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                lines: VecDeque::with_capacity(capacity),
                total_appended: 0,
            }),
        }
    }

    pub fn with_lines<I, L>(capacity: usize, lines: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<Line>,
    {
        let buffer = Self::new(capacity);
        for line in lines {
            buffer.append(line);
        }
        buffer
    }

    pub fn append(&self, line: impl Into<Line>) {
        let line = line.into();
        let mut inner = self.inner.lock();
        if inner.lines.len() >= self.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(line);
        inner.total_appended = inner.total_appended.saturating_add(1);
    }

    /// Point-in-time copy, oldest first.
    pub fn snapshot(&self) -> Vec<Line> {
        let inner = self.inner.lock();
        inner.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lines ever appended, including evicted ones.
    pub fn total_appended(&self) -> u64 {
        self.inner.lock().total_appended
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Barrier;
    use std::thread;

    #[test_timeout::timeout]
    fn evicts_oldest_when_full() {
        let buffer = LineBuffer::new(3);
        for i in 1..=5 {
            buffer.append(format!("line {i}"));
        }
        assert_eq!(buffer.snapshot(), vec!["line 3", "line 4", "line 5"]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.total_appended(), 5);
    }

    #[test_timeout::timeout]
    fn default_capacity_retains_last_two_hundred() {
        let buffer = LineBuffer::default();
        for i in 1..=201 {
            buffer.append(format!("{i}"));
        }
        let snapshot = buffer.snapshot();
        assert_eq!(snapshot.len(), 200);
        assert_eq!(snapshot.first().map(Line::as_str), Some("2"));
        assert_eq!(snapshot.last().map(Line::as_str), Some("201"));
    }

    #[test_timeout::timeout]
    fn zero_capacity_keeps_latest_line() {
        let buffer = LineBuffer::new(0);
        buffer.append("a");
        buffer.append("b");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.snapshot(), vec!["b"]);
    }

    #[test_timeout::timeout]
    fn seeded_lines_obey_capacity() {
        let buffer = LineBuffer::with_lines(2, ["banner", "usage", "rule"]);
        assert_eq!(buffer.snapshot(), vec!["usage", "rule"]);
    }

    #[test_timeout::timeout]
    fn snapshot_is_independent_of_later_appends() {
        let buffer = LineBuffer::new(4);
        buffer.append("before");
        let snapshot = buffer.snapshot();
        buffer.append("after");
        assert_eq!(snapshot, vec!["before"]);
        assert_eq!(buffer.snapshot(), vec!["before", "after"]);
    }

    #[test_timeout::timeout]
    fn concurrent_snapshots_see_whole_lines_in_order() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 500;

        let buffer = Arc::new(LineBuffer::new(WRITERS * PER_WRITER));
        let barrier = Arc::new(Barrier::new(WRITERS + 1));

        let writers: Vec<_> = (0..WRITERS)
            .map(|writer| {
                let buffer = Arc::clone(&buffer);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for seq in 0..PER_WRITER {
                        buffer.append(format!("{writer}:{seq}"));
                    }
                })
            })
            .collect();

        barrier.wait();
        let mut previous_len = 0;
        for _ in 0..200 {
            let snapshot = buffer.snapshot();
            assert!(snapshot.len() >= previous_len, "snapshot lost lines");
            previous_len = snapshot.len();

            let mut last_seq = vec![None::<usize>; WRITERS];
            for line in &snapshot {
                let (writer, seq) = line.split_once(':').expect("whole line");
                let writer: usize = writer.parse().expect("writer id");
                let seq: usize = seq.parse().expect("sequence");
                if let Some(prev) = last_seq[writer] {
                    assert_eq!(seq, prev + 1, "lines from one writer out of order");
                } else {
                    assert_eq!(seq, 0, "first line from a writer missing");
                }
                last_seq[writer] = Some(seq);
            }
        }

        for writer in writers {
            writer.join().expect("writer thread");
        }
        assert_eq!(buffer.len(), WRITERS * PER_WRITER);
    }

    proptest! {
        #[test]
        fn retains_exactly_last_capacity_lines(
            capacity in 1usize..32,
            extra in 0usize..64,
        ) {
            let buffer = LineBuffer::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                buffer.append(i.to_string());
            }
            let expected: Vec<String> = (extra..total).map(|i| i.to_string()).collect();
            let actual: Vec<String> = buffer.snapshot().iter().map(|l| l.to_string()).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn never_exceeds_capacity(capacity in 1usize..16, appends in 0usize..64) {
            let buffer = LineBuffer::new(capacity);
            for i in 0..appends {
                buffer.append(i.to_string());
                prop_assert!(buffer.len() <= capacity);
            }
            prop_assert_eq!(buffer.len(), appends.min(capacity));
        }
    }
}
