//! Bounded concurrency for the enrichment stages.
//!
//! Items are processed in consecutive groups of a fixed width. All items in a group run
//! concurrently on the current task, and the whole group is awaited before the next one starts,
//! with a fixed delay in between to be gentle with the remote site.

use anyhow::Result;
use futures::future::join_all;
use std::{future::Future, ops::Range, time::Duration};
use tracing::{debug, error};

#[derive(Debug, Clone)]
pub struct Batcher {
    width: usize,
    delay: Duration,
}

impl Batcher {
    pub fn new(width: usize, delay: Duration) -> Self {
        Self {
            width: width.max(1),
            delay,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Index ranges of the groups `len` items are split into
    pub fn groups(&self, len: usize) -> Vec<Range<usize>> {
        (0..len)
            .step_by(self.width)
            .map(|start| start..(start + self.width).min(len))
            .collect()
    }

    /// Run `f` over all items. If `f` fails for an item, the original item is kept in its place,
    /// so the output always has the same length and order as the input.
    pub async fn run<T, F, Fut>(&self, items: Vec<T>, f: F) -> Vec<T>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let groups = self.groups(items.len());
        let num_groups = groups.len();
        let mut out = Vec::with_capacity(items.len());
        let mut items = items.into_iter();

        for (n, range) in groups.into_iter().enumerate() {
            let group: Vec<T> = items.by_ref().take(range.len()).collect();
            let results = join_all(group.iter().cloned().map(&f)).await;

            for ((index, res), original) in range.clone().zip(results).zip(group) {
                match res {
                    Ok(v) => out.push(v),
                    Err(err) => {
                        error!(index, err = %err, "Failed to process item, keeping original");
                        out.push(original);
                    }
                }
            }

            if n + 1 < num_groups {
                debug!(
                    "Processed batch {}/{}, waiting {:?}",
                    n + 1,
                    num_groups,
                    self.delay
                );
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::cell::Cell;

    #[test]
    fn group_sizes() {
        let b = Batcher::new(3, Duration::ZERO);
        let sizes: Vec<usize> = b.groups(7).iter().map(|r| r.len()).collect();
        assert_eq!(vec![3, 3, 1], sizes);
        assert_eq!(vec![0..3, 3..6, 6..7], b.groups(7));
        assert!(b.groups(0).is_empty());
    }

    #[test]
    fn zero_width_is_one() {
        let b = Batcher::new(0, Duration::ZERO);
        assert_eq!(1, b.width());
        assert_eq!(4, b.groups(4).len());
    }

    #[tokio::test]
    async fn failed_item_keeps_original() {
        let b = Batcher::new(3, Duration::ZERO);
        let out = b
            .run((0..7).collect(), |x: usize| async move {
                if x == 5 {
                    bail!("item {x} exploded");
                }
                Ok(x * 10)
            })
            .await;
        assert_eq!(vec![0, 10, 20, 30, 40, 5, 60], out);
    }

    #[tokio::test]
    async fn concurrency_bounded_by_width() {
        let in_flight = Cell::new(0usize);
        let max_seen = Cell::new(0usize);
        let b = Batcher::new(3, Duration::ZERO);

        let out = b
            .run((0..7).collect(), |x: usize| {
                let in_flight = &in_flight;
                let max_seen = &max_seen;
                async move {
                    in_flight.set(in_flight.get() + 1);
                    max_seen.set(max_seen.get().max(in_flight.get()));
                    tokio::task::yield_now().await;
                    in_flight.set(in_flight.get() - 1);
                    Ok(x)
                }
            })
            .await;

        assert_eq!((0..7).collect::<Vec<_>>(), out);
        assert_eq!(3, max_seen.get());
        assert_eq!(0, in_flight.get());
    }

    #[tokio::test(start_paused = true)]
    async fn delay_only_between_groups() {
        let b = Batcher::new(3, Duration::from_secs(1));
        let start = tokio::time::Instant::now();
        let out = b
            .run((0..7).collect(), |x: usize| async move { Ok(x) })
            .await;
        let elapsed = start.elapsed();
        assert_eq!(7, out.len());
        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "{elapsed:?}");
    }
}
