//! Single-slot latest-value exchange between pollers and the tick loop.
//!
//! A poller owns a [`SnapshotCell`] and overwrites it on every successful
//! read; consumers hold [`SnapshotReader`]s and copy out whatever is current.
//! There is no queue: a slow reader sees a stale value, a fast writer simply
//! replaces the previous one. Both sides go through `tokio::sync::watch`, so a
//! reader never observes a partially written snapshot.

use tokio::sync::watch;

/// Writer side of a latest-value cell.
#[derive(Debug)]
pub struct SnapshotCell<T> {
    tx: watch::Sender<T>,
}

impl<T: Clone> SnapshotCell<T> {
    /// Create a cell holding `initial`.
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Replace the current value. Never blocks on readers.
    pub fn publish(&self, value: T) {
        self.tx.send_replace(value);
    }

    /// Modify the current value in place.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.tx.send_modify(f);
    }

    /// Copy of the current value.
    pub fn latest(&self) -> T {
        self.tx.borrow().clone()
    }

    /// New read handle.
    pub fn reader(&self) -> SnapshotReader<T> {
        SnapshotReader {
            rx: self.tx.subscribe(),
        }
    }
}

/// Read side of a latest-value cell.
#[derive(Debug, Clone)]
pub struct SnapshotReader<T> {
    rx: watch::Receiver<T>,
}

impl<T: Clone> SnapshotReader<T> {
    /// Copy of the most recently published value, possibly stale.
    pub fn latest(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Wait until a new value is published. Returns false once the cell is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_latest_value_wins() {
        let cell = SnapshotCell::new(0u32);
        let reader = cell.reader();

        cell.publish(1);
        cell.publish(2);
        cell.publish(3);

        assert_eq!(reader.latest(), 3);
        assert_eq!(cell.latest(), 3);
    }

    #[test]
    fn test_update_in_place() {
        let cell = SnapshotCell::new(vec![1.0, 2.0]);
        cell.update(|v| v[1] = 5.0);
        assert_eq!(cell.reader().latest(), vec![1.0, 5.0]);
    }

    #[test]
    fn test_reader_never_sees_torn_value() {
        let cell = Arc::new(SnapshotCell::new([0u64; 8]));
        let reader = cell.reader();

        let writer = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                for i in 1..=5_000u64 {
                    cell.publish([i; 8]);
                }
            })
        };

        for _ in 0..5_000 {
            let value = reader.latest();
            assert!(value.iter().all(|v| *v == value[0]));
        }
        writer.join().unwrap();
        assert_eq!(reader.latest(), [5_000; 8]);
    }

    #[tokio::test]
    async fn test_changed_wakes_reader() {
        let cell = SnapshotCell::new(0u8);
        let mut reader = cell.reader();
        cell.publish(9);
        assert!(reader.changed().await);
        assert_eq!(reader.latest(), 9);
    }
}
