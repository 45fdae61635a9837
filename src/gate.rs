//! Decides whether accumulated changes are worth a bulk export.

use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::{export::ExportBundle, store::PositionStore, telegram::NotifySink};

/// State carried between poll ticks. One per tracked unit, owned by the scheduler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    /// The log changed since the last successful bulk export.
    pub pending_updates: bool,
    /// Fingerprint of the last bundle the sink accepted.
    pub last_sent_hash: Option<String>,
    /// Cadence checks performed so far.
    pub check_count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GateOutcome {
    NothingPending,
    Unchanged,
    Sent { hash: String },
    Failed,
}

/// Sends the current export bundle when the log changed and differs from what was last sent.
/// On failure the session is left untouched so the next cadence hit retries.
pub async fn maybe_send_bulk_export<S: NotifySink>(
    session: &mut Session,
    store: &PositionStore,
    sink: &S,
    export_dir: &Path,
) -> GateOutcome {
    if !session.pending_updates {
        debug!("No pending updates, skipping bulk export");
        return GateOutcome::NothingPending;
    }

    let bundle = match store.load().await.and_then(|fixes| ExportBundle::render(&fixes)) {
        Ok(bundle) => bundle,
        Err(err) => {
            error!("Could not prepare the bulk export: {:?}", err);
            return GateOutcome::Failed;
        }
    };

    let hash = bundle.content_hash();
    if session.last_sent_hash.as_deref() == Some(hash.as_str()) {
        info!("Export content unchanged since last send, skipping");
        return GateOutcome::Unchanged;
    }

    if let Err(err) = bundle.write_to(export_dir).await {
        warn!("Could not refresh export files: {:?}", err);
    }

    match sink.send_bulk_export(&bundle).await {
        Ok(()) => {
            info!(hash = %hash, "Bulk export sent");
            session.last_sent_hash = Some(hash.clone());
            session.pending_updates = false;
            GateOutcome::Sent { hash }
        }
        Err(err) => {
            warn!(error = %err, "Bulk export failed, will retry on the next check");
            GateOutcome::Failed
        }
    }
}
