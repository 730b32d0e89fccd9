//! A generic bounded, retry-capable, batch-processed work queue. The
//! discovery, evaluation and underwrite stages are all built on it.

use {
    futures::{stream, StreamExt},
    std::{collections::VecDeque, mem, time::Duration},
    tokio::time::Instant,
};

pub mod discover;
pub mod eval;
pub mod underwrite;

/// The per-stage processing logic plugged into a [`ProcessingQueue`].
#[async_trait::async_trait]
pub trait OrderHandler: Send + Sync {
    type Order: Send + Sync + Clone;
    type Result: Send + Sync;
    type Error: std::error::Error + Send + Sync;

    /// How many orders this stage processes concurrently.
    const MAX_CONCURRENT_ORDERS: usize;

    /// Invoked once when an order enters the queue.
    async fn on_order_init(&self, _order: &mut Self::Order) {}

    /// Processes one order. `Ok(Some(result))` completes the order,
    /// `Ok(None)` rejects it (handled, but not moving on), `Err` consults
    /// [`Self::on_order_failure`] for a retry decision.
    async fn handle_order(
        &self,
        order: &Self::Order,
        retry_count: u32,
    ) -> Result<Option<Self::Result>, Self::Error>;

    /// Whether a failed order should be retried.
    async fn on_order_failure(
        &self,
        order: &Self::Order,
        retry_count: u32,
        error: &Self::Error,
    ) -> bool;

    /// Invoked when an order leaves the queue for good.
    async fn on_order_completion(
        &self,
        _order: &Self::Order,
        _success: bool,
        _result: Option<&Self::Result>,
        _retry_count: u32,
    ) {
    }
}

/// The three-way partition of orders that left the queue since the last
/// call to [`ProcessingQueue::get_finished_orders`].
#[derive(Debug)]
pub struct FinishedOrders<O, R> {
    /// Orders processed successfully, with their results.
    pub completed: Vec<(O, R)>,
    /// Orders the handler declined: handled, dropped on purpose.
    pub rejected: Vec<O>,
    /// Orders that kept erroring until the retry budget ran out.
    pub failed: Vec<O>,
}

impl<O, R> Default for FinishedOrders<O, R> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            rejected: Vec::new(),
            failed: Vec::new(),
        }
    }
}

struct QueuedOrder<O> {
    order: O,
    retry_count: u32,
    retry_at: Option<Instant>,
}

pub struct ProcessingQueue<H: OrderHandler> {
    handler: H,
    retry_interval: Duration,
    max_tries: u32,
    pending: VecDeque<QueuedOrder<H::Order>>,
    retrying: Vec<QueuedOrder<H::Order>>,
    finished: FinishedOrders<H::Order, H::Result>,
}

impl<H: OrderHandler> ProcessingQueue<H> {
    pub fn new(handler: H, retry_interval: Duration, max_tries: u32) -> Self {
        Self {
            handler,
            retry_interval,
            max_tries: max_tries.max(1),
            pending: VecDeque::new(),
            retrying: Vec::new(),
            finished: FinishedOrders::default(),
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Orders still owned by the queue (pending or awaiting a retry slot).
    pub fn size(&self) -> usize {
        self.pending.len() + self.retrying.len()
    }

    pub async fn add_orders(&mut self, orders: impl IntoIterator<Item = H::Order>) {
        for mut order in orders {
            self.handler.on_order_init(&mut order).await;
            self.pending.push_back(QueuedOrder {
                order,
                retry_count: 0,
                retry_at: None,
            });
        }
    }

    /// Runs one processing round: all pending orders plus any due retries,
    /// `MAX_CONCURRENT_ORDERS` at a time.
    pub async fn process_orders(&mut self) {
        let now = Instant::now();
        let (due, later): (Vec<_>, Vec<_>) = mem::take(&mut self.retrying)
            .into_iter()
            .partition(|entry| entry.retry_at.map_or(true, |at| at <= now));
        self.retrying = later;

        let batch: Vec<_> = self.pending.drain(..).chain(due).collect();
        if batch.is_empty() {
            return;
        }

        let handler = &self.handler;
        let outcomes: Vec<_> = stream::iter(batch)
            .map(|entry| async move {
                let result = handler.handle_order(&entry.order, entry.retry_count).await;
                (entry, result)
            })
            .buffer_unordered(H::MAX_CONCURRENT_ORDERS.max(1))
            .collect()
            .await;

        for (entry, result) in outcomes {
            match result {
                Ok(Some(result)) => {
                    self.handler
                        .on_order_completion(&entry.order, true, Some(&result), entry.retry_count)
                        .await;
                    self.finished.completed.push((entry.order, result));
                }
                Ok(None) => {
                    self.handler
                        .on_order_completion(&entry.order, false, None, entry.retry_count)
                        .await;
                    self.finished.rejected.push(entry.order);
                }
                Err(error) => {
                    let retry = self
                        .handler
                        .on_order_failure(&entry.order, entry.retry_count, &error)
                        .await;
                    if retry && entry.retry_count + 1 < self.max_tries {
                        self.retrying.push(QueuedOrder {
                            order: entry.order,
                            retry_count: entry.retry_count + 1,
                            retry_at: Some(Instant::now() + self.retry_interval),
                        });
                    } else {
                        if retry {
                            tracing::warn!(
                                tries = entry.retry_count + 1,
                                ?error,
                                "dropping order after exhausting retries"
                            );
                        }
                        self.handler
                            .on_order_completion(&entry.order, false, None, entry.retry_count)
                            .await;
                        self.finished.failed.push(entry.order);
                    }
                }
            }
        }
    }

    pub fn get_finished_orders(&mut self) -> FinishedOrders<H::Order, H::Result> {
        mem::take(&mut self.finished)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicU32, Ordering},
    };

    #[derive(Debug, thiserror::Error)]
    #[error("boom")]
    struct Boom;

    /// Succeeds on the configured attempt, errors before it. Odd inputs are
    /// rejected outright.
    struct FlakyHandler {
        succeed_on_try: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl OrderHandler for FlakyHandler {
        type Error = Boom;
        type Order = u32;
        type Result = u32;

        const MAX_CONCURRENT_ORDERS: usize = 4;

        async fn handle_order(&self, order: &u32, retry_count: u32) -> Result<Option<u32>, Boom> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if order % 2 == 1 {
                return Ok(None);
            }
            if retry_count < self.succeed_on_try {
                return Err(Boom);
            }
            Ok(Some(order * 10))
        }

        async fn on_order_failure(&self, _: &u32, _: u32, _: &Boom) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn partitions_completed_and_rejected() {
        let mut queue = ProcessingQueue::new(
            FlakyHandler {
                succeed_on_try: 0,
                calls: AtomicU32::new(0),
            },
            Duration::from_millis(1),
            3,
        );
        queue.add_orders([2, 3, 4]).await;
        queue.process_orders().await;

        let mut finished = queue.get_finished_orders();
        finished.completed.sort();
        assert_eq!(finished.completed, vec![(2, 20), (4, 40)]);
        assert_eq!(finished.rejected, vec![3]);
        assert!(finished.failed.is_empty());
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let mut queue = ProcessingQueue::new(
            FlakyHandler {
                succeed_on_try: 2,
                calls: AtomicU32::new(0),
            },
            Duration::from_millis(1),
            5,
        );
        queue.add_orders([2]).await;

        queue.process_orders().await;
        assert_eq!(queue.size(), 1);

        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.process_orders().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.process_orders().await;

        assert_eq!(queue.get_finished_orders().completed, vec![(2, 20)]);
        assert_eq!(queue.handler().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn drops_to_failed_after_max_tries() {
        let mut queue = ProcessingQueue::new(
            FlakyHandler {
                succeed_on_try: u32::MAX,
                calls: AtomicU32::new(0),
            },
            Duration::from_millis(1),
            2,
        );
        queue.add_orders([2]).await;

        queue.process_orders().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.process_orders().await;

        assert_eq!(queue.get_finished_orders().failed, vec![2]);
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.handler().calls.load(Ordering::SeqCst), 2);
    }
}
