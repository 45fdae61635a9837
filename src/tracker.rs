//! The poll cycle: fetch, dedup, resolve, append, and the cadence check that follows it.

use std::{collections::HashSet, path::PathBuf, time::Duration};

use tokio::time::{self, MissedTickBehavior};
use tokio_stream::{wrappers::IntervalStream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::{
    dto::{Fix, FixKey, VendorPosition},
    export::ExportBundle,
    gate::{maybe_send_bulk_export, GateOutcome, Session},
    geocoder::Geocoder,
    resolver::{AddressCache, AddressResolver},
    store::{merge, FixIndex, PositionStore},
    telegram::NotifySink,
    telematics::{latest_position, TelematicsError, TelematicsSource},
    util::config::FetchMode,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// New fixes were persisted and the pending flag raised.
    Appended { new_fixes: usize },
    /// Everything fetched was already recorded.
    Skipped,
    /// Credentials rejected; nothing changed.
    Unauthorized,
    /// Transport or parsing failure while fetching; nothing changed.
    FetchFailed,
    /// The log could not be read or rewritten; nothing changed, the next tick retries.
    StoreFailed,
}

pub struct Tracker<T, G, S> {
    store: PositionStore,
    source: T,
    resolver: AddressResolver<G>,
    sink: S,
    fetch_mode: FetchMode,
    notify_cadence: u64,
    export_dir: PathBuf,
}

impl<T, G, S> Tracker<T, G, S>
where
    T: TelematicsSource,
    G: Geocoder,
    S: NotifySink,
{
    pub fn new(
        store: PositionStore,
        source: T,
        resolver: AddressResolver<G>,
        sink: S,
        fetch_mode: FetchMode,
        notify_cadence: u64,
        export_dir: PathBuf,
    ) -> Self {
        Tracker {
            store,
            source,
            resolver,
            sink,
            fetch_mode,
            notify_cadence: notify_cadence.max(1),
            export_dir,
        }
    }

    /// One poll cycle. Never fails: every error ends the cycle without touching the log.
    pub async fn run_poll_cycle(&self, session: &mut Session) -> CycleOutcome {
        let positions = match self.source.fetch_recent().await {
            Ok(positions) => positions,
            Err(TelematicsError::Unauthorized) => {
                error!("{}", TelematicsError::Unauthorized);
                return CycleOutcome::Unauthorized;
            }
            Err(err) => {
                warn!(error = %err, "Fetching positions failed");
                return CycleOutcome::FetchFailed;
            }
        };

        let positions: Vec<VendorPosition> = match self.fetch_mode {
            FetchMode::Latest => latest_position(positions).into_iter().collect(),
            FetchMode::Recent => positions,
        };
        info!("Found {} positions", positions.len());

        let existing = match self.store.load().await {
            Ok(existing) => existing,
            Err(err) => {
                error!("Could not load the position log: {:?}", err);
                return CycleOutcome::StoreFailed;
            }
        };
        debug!("Found {} existing positions", existing.len());

        let new_fixes = self.collect_new_fixes(&existing, positions).await;
        if new_fixes.is_empty() {
            info!("No new positions");
            return CycleOutcome::Skipped;
        }

        for fix in &new_fixes {
            info!(
                timestamp = %fix.timestamp,
                street = %fix.address.street,
                locality = %fix.address.locality,
                region = %fix.address.region,
                "New position"
            );
        }

        let count = new_fixes.len();
        let merged = merge(existing, new_fixes);
        if let Err(err) = self.store.persist(&merged).await {
            error!("Could not persist the position log: {:?}", err);
            return CycleOutcome::StoreFailed;
        }

        session.pending_updates = true;
        info!("Log updated, {} new positions saved", count);

        self.refresh_exports(&merged).await;

        CycleOutcome::Appended { new_fixes: count }
    }

    async fn collect_new_fixes(
        &self,
        existing: &[Fix],
        positions: Vec<VendorPosition>,
    ) -> Vec<Fix> {
        let known = FixIndex::new(existing);
        let mut cache = AddressCache::from_fixes(existing);
        debug!("{} known addresses", cache.len());
        let mut batch_keys: HashSet<FixKey> = HashSet::new();
        let mut new_fixes: Vec<Fix> = Vec::new();

        for position in positions {
            let timestamp = position.timestamp.as_str();
            let recorded = known
                .find_by_key(position.lat, position.lon, Some(timestamp))
                .is_some();
            let key = FixKey::new(position.lat, position.lon, timestamp);
            if recorded || !batch_keys.insert(key) {
                debug!(timestamp = %position.timestamp, "Position already recorded");
                continue;
            }

            let address = self
                .resolver
                .resolve(&mut cache, position.lat, position.lon)
                .await;
            new_fixes.push(position.into_fix(address));
        }

        new_fixes
    }

    async fn refresh_exports(&self, fixes: &[Fix]) {
        let result = match ExportBundle::render(fixes) {
            Ok(bundle) => bundle.write_to(&self.export_dir).await,
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            warn!("Could not write export files: {:?}", err);
        }
    }

    /// Counts a check and consults the notification gate on every `notify_cadence`-th one.
    pub async fn notify_check(&self, session: &mut Session) -> Option<GateOutcome> {
        session.check_count += 1;

        if session.check_count % self.notify_cadence == 0 {
            Some(self.maybe_send_bulk_export(session).await)
        } else {
            None
        }
    }

    pub async fn maybe_send_bulk_export(&self, session: &mut Session) -> GateOutcome {
        maybe_send_bulk_export(session, &self.store, &self.sink, &self.export_dir).await
    }

    /// A scheduler tick: the poll cycle, then the cadence check whatever the cycle did.
    pub async fn tick(&self, session: &mut Session) -> (CycleOutcome, Option<GateOutcome>) {
        let outcome = self.run_poll_cycle(session).await;
        let gate = self.notify_check(session).await;
        (outcome, gate)
    }
}

/// Runs ticks forever on a fixed interval. The first tick fires immediately.
pub async fn start_server<T, G, S>(
    tracker: Tracker<T, G, S>,
    poll_interval: Duration,
) -> anyhow::Result<()>
where
    T: TelematicsSource,
    G: Geocoder,
    S: NotifySink,
{
    info!(
        "Starting vehicle monitoring every {} seconds",
        poll_interval.as_secs()
    );

    let mut session = Session::default();
    let mut interval = time::interval(poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut stream = IntervalStream::new(interval);

    while stream.next().await.is_some() {
        let (outcome, gate) = tracker.tick(&mut session).await;
        log_tick(&outcome, gate.as_ref(), session.check_count);
    }

    Ok(())
}

fn log_tick(outcome: &CycleOutcome, gate: Option<&GateOutcome>, check_count: u64) {
    match outcome {
        CycleOutcome::Appended { new_fixes } => {
            debug!(new_fixes, check_count, "Tick appended positions")
        }
        other => debug!(outcome = ?other, check_count, "Tick done"),
    }

    match gate {
        Some(GateOutcome::Sent { hash }) => debug!(hash = %hash, "Gate sent the bulk export"),
        Some(other) => debug!(gate = ?other, "Gate consulted"),
        None => {}
    }
}
