//! Live progress grid fed by replica liveness channels.
//!
//! # Toyota Way: Visual Management (目で見る管理)
//! One refreshed line shows every replica's height and tip size.
//!
//! The monitor waits on all open liveness channels at once. A `true`
//! signal re-renders the grid from fresh replica snapshots; a closed
//! channel leaves the active set for good. The monitor ends when the
//! active set is empty.

use std::fmt::Write as _;
use std::future::Future;
use std::io::Write;
use std::pin::Pin;

use drover_core::{ReplicaId, ReplicaPool, ReportReceiver};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::Serialize;

use crate::error::Result;

type PendingSignal = Pin<Box<dyn Future<Output = (ReplicaId, Option<bool>, ReportReceiver)> + Send>>;

/// Wait for the next value on one liveness channel, handing the receiver back.
fn arm(id: ReplicaId, mut receiver: ReportReceiver) -> PendingSignal {
    Box::pin(async move {
        let signal = receiver.recv().await;
        (id, signal, receiver)
    })
}

/// What the monitor observed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitorSummary {
    /// Sources the monitor started with.
    pub sources: usize,
    /// Signals received, `true` and `false` alike.
    pub signals: u64,
    /// Grid renders performed.
    pub renders: u64,
    /// Replicas in the order their channels closed.
    pub closed: Vec<ReplicaId>,
    /// Active-set size after each event, starting with the initial size.
    pub active: Vec<usize>,
}

/// Fan-in progress monitor over a dynamic set of liveness channels.
pub struct ProgressMonitor<W> {
    pool: ReplicaPool,
    sources: Vec<(ReplicaId, ReportReceiver)>,
    sink: W,
}

impl<W: Write + Send> ProgressMonitor<W> {
    /// Creates a monitor over explicit sources.
    #[must_use]
    pub fn new(pool: ReplicaPool, sources: Vec<(ReplicaId, ReportReceiver)>, sink: W) -> Self {
        Self {
            pool,
            sources,
            sink,
        }
    }

    /// Creates a monitor by taking every replica's liveness channel.
    ///
    /// Replicas whose channel was already taken are not monitored.
    #[must_use]
    pub fn from_pool(pool: ReplicaPool, sink: W) -> Self {
        let sources = pool
            .iter()
            .filter_map(|replica| replica.take_report().map(|rx| (replica.id(), rx)))
            .collect();
        Self::new(pool, sources, sink)
    }

    /// Returns the number of sources the monitor will wait on.
    #[must_use]
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Runs until every source has closed.
    ///
    /// # Errors
    /// Returns an error if the sink cannot be written.
    pub async fn run(&mut self) -> Result<MonitorSummary> {
        let mut pending: FuturesUnordered<PendingSignal> = self
            .sources
            .drain(..)
            .map(|(id, rx)| arm(id, rx))
            .collect();

        let mut summary = MonitorSummary {
            sources: pending.len(),
            active: vec![pending.len()],
            ..MonitorSummary::default()
        };
        tracing::debug!(sources = summary.sources, "progress monitor started");

        self.sink.write_all(render_header(self.pool.len()).as_bytes())?;
        self.sink.flush()?;

        while let Some((id, signal, receiver)) = pending.next().await {
            match signal {
                Some(produced) => {
                    summary.signals += 1;
                    if produced {
                        self.sink.write_all(render_grid(&self.pool).as_bytes())?;
                        self.sink.flush()?;
                        summary.renders += 1;
                    }
                    pending.push(arm(id, receiver));
                }
                None => {
                    tracing::debug!(replica = %id, remaining = pending.len(), "liveness channel closed");
                    summary.closed.push(id);
                }
            }
            summary.active.push(pending.len());
        }

        self.sink.write_all(b"\n")?;
        self.sink.flush()?;
        tracing::debug!(renders = summary.renders, "progress monitor finished");
        Ok(summary)
    }

    /// Consumes the monitor, returning its sink.
    pub fn into_sink(self) -> W {
        self.sink
    }
}

/// Prefix of every grid line.
const ROW_PREFIX: &str = "Height(Txs):";
/// Header indent, so labels sit over the height digits.
const HEADER_INDENT: usize = 14;
/// Fixed column width shared by labels and cells.
const CELL_WIDTH: usize = 10;

/// Renders the grid header line.
#[must_use]
pub fn render_header(replicas: usize) -> String {
    let mut line = " ".repeat(HEADER_INDENT);
    for index in 0..replicas {
        let _ = write!(line, "{:<CELL_WIDTH$}", format!("node{index}"));
    }
    line.push('\n');
    line
}

/// Renders one carriage-return refreshed grid line from current snapshots.
///
/// Each cell is `height(tip transactions)` in a fixed-width column; a
/// replica at height zero renders blank.
#[must_use]
pub fn render_grid(pool: &ReplicaPool) -> String {
    let mut line = format!("\r{ROW_PREFIX}");
    for replica in pool.iter() {
        let height = replica.height();
        if height == 0 {
            line.push_str(&" ".repeat(CELL_WIDTH));
        } else {
            let tip = format!("({})", replica.tip_transactions().unwrap_or(0));
            let _ = write!(line, "{height:3}{tip:<7}");
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{MockReplica, mock_pool};
    use drover_core::{CompletionBarrier, Replica};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[test]
    fn test_header() {
        assert_eq!(
            render_header(3),
            format!("{}node0     node1     node2     \n", " ".repeat(14))
        );
        assert_eq!(render_header(0), format!("{}\n", " ".repeat(14)));
    }

    #[test]
    fn test_grid_blank_for_height_zero() {
        let (pool, _mocks) = mock_pool(2, MockReplica::new);
        assert_eq!(render_grid(&pool), format!("\rHeight(Txs):{}", " ".repeat(20)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_grid_shows_height_and_tip() {
        let (pool, mocks) = mock_pool(2, |id| {
            if id.index() == 0 {
                MockReplica::new(id).finish_after(12).block_size(7)
            } else {
                MockReplica::new(id)
            }
        });
        let (barrier, mut guards) = CompletionBarrier::new(1);
        mocks[0].start(guards.remove(0)).await.unwrap();
        barrier.wait().await;

        let grid = render_grid(&pool);
        assert_eq!(grid, format!("\rHeight(Txs): 12(7)    {}", " ".repeat(10)));
    }

    #[tokio::test]
    async fn test_closed_sources_shrink_active_set() {
        let (pool, _mocks) = mock_pool(3, MockReplica::new);
        let mut senders = Vec::new();
        let mut sources = Vec::new();
        for i in 0..3 {
            let (tx, rx) = mpsc::channel(4);
            senders.push(tx);
            sources.push((ReplicaId::new(i), rx));
        }

        let mut monitor = ProgressMonitor::new(pool, sources, Vec::new());
        assert_eq!(monitor.source_count(), 3);

        senders[1].send(true).await.unwrap();
        senders[2].send(false).await.unwrap();
        drop(senders.remove(2));
        drop(senders.remove(1));
        drop(senders.remove(0));

        let summary = monitor.run().await.unwrap();
        assert_eq!(summary.sources, 3);
        assert_eq!(summary.signals, 2);
        assert_eq!(summary.renders, 1);
        assert_eq!(summary.closed.len(), 3);
        assert_eq!(summary.active.first(), Some(&3));
        assert_eq!(summary.active.last(), Some(&0));
        assert!(summary.active.windows(2).all(|w| w[1] <= w[0]));

        let output = String::from_utf8(monitor.into_sink()).unwrap();
        assert!(output.starts_with(&render_header(3)));
        assert_eq!(output.matches('\r').count(), 1);
    }

    #[tokio::test]
    async fn test_no_sources_finishes_immediately() {
        let (pool, _mocks) = mock_pool(0, MockReplica::new);
        let mut monitor = ProgressMonitor::new(pool, Vec::new(), std::io::sink());
        let summary = monitor.run().await.unwrap();
        assert_eq!(summary.sources, 0);
        assert_eq!(summary.active, vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_follows_replicas_until_all_terminate() {
        let (pool, mocks) = mock_pool(3, |id| {
            MockReplica::new(id).finish_after(2 + id.index() as u64 * 3)
        });
        let (barrier, guards) = CompletionBarrier::new(3);

        let mut monitor = ProgressMonitor::from_pool(pool.clone(), Vec::new());
        assert_eq!(monitor.source_count(), 3);
        assert!(pool[0].take_report().is_none());

        for (mock, guard) in mocks.iter().zip(guards) {
            mock.start(guard).await.unwrap();
        }

        let summary = tokio::time::timeout(Duration::from_secs(5), monitor.run())
            .await
            .unwrap()
            .unwrap();
        barrier.wait().await;

        assert_eq!(summary.closed.len(), 3);
        // The longest-lived replica closes last.
        assert_eq!(summary.closed.last(), Some(&ReplicaId::new(2)));
        assert_eq!(summary.signals, 2 + 5 + 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_source_is_not_an_error() {
        let (pool, mocks) = mock_pool(2, |id| MockReplica::new(id).run_forever());
        let (_barrier, guards) = CompletionBarrier::new(2);
        let mut monitor = ProgressMonitor::from_pool(pool, std::io::sink());
        for (mock, guard) in mocks.iter().zip(guards) {
            mock.start(guard).await.unwrap();
        }

        let handle = tokio::spawn(async move { monitor.run().await });
        tokio::time::sleep(Duration::from_millis(55)).await;
        mocks[1].stop();
        tokio::time::sleep(Duration::from_millis(55)).await;
        mocks[0].stop();
        mocks[0].stop();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.closed, vec![ReplicaId::new(1), ReplicaId::new(0)]);
    }
}
