//! In-process fan-out transport between replicas.
//!
//! Every replica owns one inbox. Publishing delivers a copy of the
//! transaction to every inbox that is still open, the publisher's own
//! included. A replica that terminates drops its inbox, after which
//! deliveries to it are silently discarded.

use std::sync::Arc;

use drover_core::Transaction;
use tokio::sync::mpsc;

/// Receiving end of a replica's inbox.
pub type Inbox = mpsc::UnboundedReceiver<Transaction>;

/// Shared fan-out transport.
#[derive(Debug, Clone)]
pub struct Fabric {
    peers: Arc<[mpsc::UnboundedSender<Transaction>]>,
}

impl Fabric {
    /// Creates a fabric for `replicas` replicas and returns their inboxes,
    /// indexed by replica position.
    #[must_use]
    pub fn new(replicas: usize) -> (Self, Vec<Inbox>) {
        let (senders, inboxes): (Vec<_>, Vec<_>) =
            (0..replicas).map(|_| mpsc::unbounded_channel()).unzip();

        (
            Self {
                peers: senders.into(),
            },
            inboxes,
        )
    }

    /// Returns the number of attached replicas.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Returns true if no replicas are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns the number of inboxes still open.
    #[must_use]
    pub fn open_inboxes(&self) -> usize {
        self.peers.iter().filter(|peer| !peer.is_closed()).count()
    }

    /// Delivers `tx` to every open inbox. Returns the number of deliveries.
    pub fn publish(&self, tx: &Transaction) -> u64 {
        self.peers
            .iter()
            .filter(|peer| peer.send(tx.clone()).is_ok())
            .count() as u64
    }
}
