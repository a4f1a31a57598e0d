use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::ledger::{summarize_group, GroupSummary};
use crate::settlement::Threshold;
use crate::store::{LedgerStore, StoreError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    GroupCreated { group_id: String },
    MembershipChanged { group_id: String },
    ReceiptAdded { group_id: String, receipt_id: String },
}

impl LedgerEvent {
    pub fn group_id(&self) -> &str {
        match self {
            LedgerEvent::GroupCreated { group_id }
            | LedgerEvent::MembershipChanged { group_id }
            | LedgerEvent::ReceiptAdded { group_id, .. } => group_id,
        }
    }
}

/// Fan-out of data-layer changes to whoever needs to recompute.
#[derive(Clone)]
pub struct LedgerEvents {
    sender: broadcast::Sender<LedgerEvent>,
}

impl LedgerEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        LedgerEvents { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LedgerEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            tracing::debug!(group_id = event.group_id(), "no subscribers for ledger event");
        }
    }
}

/// Recomputes one group's settlement from the current store snapshot.
pub async fn refresh_summary(
    store: &dyn LedgerStore,
    group_id: &str,
    threshold: Threshold,
) -> Result<Option<GroupSummary>, StoreError> {
    let Some(group) = store.find_group(group_id).await? else {
        return Ok(None);
    };
    let receipts = store.receipts_for_group(group_id).await?;
    let summary = summarize_group(&group, &receipts, threshold);
    for warning in &summary.warnings {
        tracing::warn!(group_id, ?warning, "group ledger has anomalies");
    }
    tracing::info!(
        group_id,
        members = summary.balances.len(),
        receipts = receipts.len(),
        transfers = summary.transfers.len(),
        "settlement recomputed"
    );
    Ok(Some(summary))
}

/// Runs until every sender is gone.
pub async fn watch_settlements(
    mut receiver: broadcast::Receiver<LedgerEvent>,
    store: Arc<dyn LedgerStore>,
    threshold: Threshold,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if let Err(err) = refresh_summary(store.as_ref(), event.group_id(), threshold).await
                {
                    tracing::error!(group_id = event.group_id(), %err, "settlement refresh failed");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "settlement watcher fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
