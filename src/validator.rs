//! Online license validator.
//!
//! The `Validator` is the primary online-mode API. Create one at startup,
//! share it by `Arc`, and hand it to the [`crate::policy::FeatureChecker`] as
//! its entitlement source.
//!
//! Held state is one immutable [`LicenseSnapshot`]. Every change builds a new
//! snapshot and swaps it in whole, so readers never observe a torn license.
//! Writers (key changes, revalidation commits) are serialized by a single
//! mutex and commit only if the snapshot generation they started from is
//! still current.

use crate::client::http::{pricing_url, HttpLicenseServer, LicenseServer};
use crate::clock::{Clock, SystemClock};
use crate::config::ValidatorConfig;
use crate::crypto::codec::{decode_public_key, parse_license_key, parse_license_key_allow_expired};
use crate::crypto::digest::{entitlement_nonce, key_fingerprint};
use crate::license::License;
use crate::policy::access::{EntitlementConfirmation, EntitlementSource};
use crate::store::LicenseKeyStore;
use crate::tier::Tier;
use crate::TierwardenError;
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lifecycle state of the held license.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorStatus {
    /// No license key installed.
    Unlicensed,
    /// Key verified and honored.
    Active,
    /// Signature valid but past `expires_at`; gated as Free.
    Expired,
    /// Server unreachable for longer than the grace period; gated as Free.
    GraceExpired,
    /// Server refused the key; gated as Free.
    Revoked,
}

impl ValidatorStatus {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorStatus::Unlicensed => "unlicensed",
            ValidatorStatus::Active => "active",
            ValidatorStatus::Expired => "expired",
            ValidatorStatus::GraceExpired => "grace_expired",
            ValidatorStatus::Revoked => "revoked",
        }
    }
}

impl fmt::Display for ValidatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one revalidation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// Nothing to revalidate.
    NoKey,
    /// Server confirmed the key.
    Confirmed {
        /// Whether a renewed key replaced the held one.
        renewed: bool,
    },
    /// Server refused the key; downgraded to Free.
    Revoked,
    /// Server unreachable, still inside the grace period.
    GraceRetained,
    /// Server unreachable past the grace period; downgraded to Free.
    GraceExpired,
    /// A newer key was installed while the server call was in flight.
    Superseded,
}

/// Immutable view of the validator's held state.
#[derive(Clone)]
pub struct LicenseSnapshot {
    license: Arc<License>,
    raw_key: Option<String>,
    status: ValidatorStatus,
    last_validated: Option<DateTime<Utc>>,
    confirmation: Option<EntitlementConfirmation>,
    generation: u64,
}

impl LicenseSnapshot {
    fn unlicensed(generation: u64) -> Self {
        Self {
            license: Arc::new(License::free()),
            raw_key: None,
            status: ValidatorStatus::Unlicensed,
            last_validated: None,
            confirmation: None,
            generation,
        }
    }

    /// Held license. Free after a downgrade.
    pub fn license(&self) -> &Arc<License> {
        &self.license
    }

    /// Status recorded at the last state change.
    pub fn status(&self) -> ValidatorStatus {
        self.status
    }

    /// Last time the key was verified locally or confirmed by the server.
    pub fn last_validated(&self) -> Option<DateTime<Utc>> {
        self.last_validated
    }

    /// Last entitlement confirmation.
    pub fn confirmation(&self) -> Option<&EntitlementConfirmation> {
        self.confirmation.as_ref()
    }

    /// Monotonic counter bumped on every state change.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a raw key is installed (even if currently downgraded).
    pub fn has_key(&self) -> bool {
        self.raw_key.is_some()
    }

    /// Loggable fingerprint of the installed key.
    pub fn key_fingerprint(&self) -> Option<String> {
        self.raw_key.as_deref().map(key_fingerprint)
    }
}

impl fmt::Debug for LicenseSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseSnapshot")
            .field("license", &self.license)
            .field("key", &self.key_fingerprint())
            .field("status", &self.status)
            .field("last_validated", &self.last_validated)
            .field("generation", &self.generation)
            .finish()
    }
}

/// State only touched while holding the write lock.
#[derive(Default)]
struct WriteState {
    /// Highest sequence accepted per customer. Persisted through the key
    /// store and kept across `clear_license_key`.
    high_water: BTreeMap<String, u64>,
}

struct Shared {
    config: ValidatorConfig,
    verifying_key: VerifyingKey,
    server: Arc<dyn LicenseServer>,
    store: Arc<dyn LicenseKeyStore>,
    clock: Arc<dyn Clock>,
    state: RwLock<Arc<LicenseSnapshot>>,
    writes: Mutex<WriteState>,
    stopped: AtomicBool,
}

struct BackgroundTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Online license validator with background revalidation.
pub struct Validator {
    shared: Arc<Shared>,
    task: tokio::sync::Mutex<Option<BackgroundTask>>,
}

impl Validator {
    /// Create a validator.
    ///
    /// Accepted key sequences are restored from the store; an unreadable
    /// sequence record is discarded with a warning.
    ///
    /// # Errors
    /// * `ConfigError` - invalid configuration or embedded key
    /// * `StoreIO` - the sequence record could not be read
    pub fn new(
        config: ValidatorConfig,
        server: Arc<dyn LicenseServer>,
        store: Arc<dyn LicenseKeyStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, TierwardenError> {
        config.validate()?;
        let verifying_key = decode_public_key(config.public_key_hex)?;
        let high_water = match store.load_sequences() {
            Ok(sequences) => sequences,
            Err(e @ TierwardenError::Malformed(_)) => {
                warn!(error = %e, "Discarding unreadable sequence record");
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                verifying_key,
                server,
                store,
                clock,
                state: RwLock::new(Arc::new(LicenseSnapshot::unlicensed(0))),
                writes: Mutex::new(WriteState { high_water }),
                stopped: AtomicBool::new(false),
            }),
            task: tokio::sync::Mutex::new(None),
        })
    }

    /// Create a validator talking to the configured server over HTTPS, using
    /// the system clock.
    pub fn online(
        config: ValidatorConfig,
        store: Arc<dyn LicenseKeyStore>,
    ) -> Result<Self, TierwardenError> {
        let server = Arc::new(HttpLicenseServer::new(&config)?);
        Self::new(config, server, store, Arc::new(SystemClock))
    }

    /// Install a new license key.
    ///
    /// The key is verified, persisted, then swapped in; the background task
    /// is (re)started. An expired key with a valid signature is accepted and
    /// gated as Free. On any error the held state is unchanged.
    ///
    /// # Errors
    /// * `ValidatorStopped` - `stop()` was called without `restart()`
    /// * `MissingLicense` - empty key
    /// * `Malformed` / `InvalidSignature` / `InvalidPayload` - bad key
    /// * `StaleSequence` - older issue than one already accepted
    /// * `StoreIO` - persisting the key failed
    pub async fn set_license_key(&self, raw_key: &str) -> Result<Arc<License>, TierwardenError> {
        if self.shared.is_stopped() {
            return Err(TierwardenError::ValidatorStopped);
        }
        let license = self.shared.install(raw_key, true)?;
        self.respawn_task().await;
        Ok(license)
    }

    /// Restore the persisted key at boot.
    ///
    /// Returns `Ok(None)` when nothing is stored. A stored key that no
    /// longer verifies is discarded with a warning.
    pub async fn load_persisted(&self) -> Result<Option<Arc<License>>, TierwardenError> {
        if self.shared.is_stopped() {
            return Err(TierwardenError::ValidatorStopped);
        }
        let Some(raw_key) = self.shared.store.load_key()? else {
            return Ok(None);
        };

        match self.shared.install(&raw_key, false) {
            Ok(license) => {
                self.respawn_task().await;
                Ok(Some(license))
            }
            Err(e @ TierwardenError::StoreIO(_)) => Err(e),
            Err(e) => {
                warn!(
                    key = %key_fingerprint(&raw_key),
                    error = %e,
                    "Discarding persisted license key"
                );
                Ok(None)
            }
        }
    }

    /// Release the key: best-effort server deactivation, then clear the
    /// persisted key and reset to Free.
    pub async fn clear_license_key(&self) -> Result<(), TierwardenError> {
        self.halt_task().await;

        if let Some(raw_key) = self.snapshot().raw_key.clone() {
            let server = Arc::clone(&self.shared.server);
            let fingerprint = key_fingerprint(&raw_key);
            match tokio::task::spawn_blocking(move || server.deactivate(&raw_key)).await {
                Ok(Ok(())) => debug!(key = %fingerprint, "License deactivated on server"),
                Ok(Err(e)) => warn!(key = %fingerprint, error = %e, "Server deactivation failed"),
                Err(e) => warn!(key = %fingerprint, error = %e, "Deactivation task failed"),
            }
        }

        self.shared.clear()
    }

    /// Current license. Never blocks on the network.
    pub fn get_license(&self) -> Arc<License> {
        Arc::clone(&self.snapshot().license)
    }

    /// Tier to gate on right now (Free when expired or downgraded).
    pub fn current_tier(&self) -> Tier {
        self.get_license()
            .effective_tier(self.shared.clock.now_utc())
    }

    /// Current status, accounting for expiry since the last state change.
    pub fn status(&self) -> ValidatorStatus {
        let snapshot = self.snapshot();
        match snapshot.status {
            ValidatorStatus::Active if snapshot.license.is_expired(self.shared.clock.now_utc()) => {
                ValidatorStatus::Expired
            }
            status => status,
        }
    }

    /// Full held state.
    pub fn snapshot(&self) -> Arc<LicenseSnapshot> {
        self.shared.snapshot()
    }

    /// Run one revalidation pass against the server.
    ///
    /// This is the body of each background tick. It blocks on the network;
    /// from async code call it through `spawn_blocking`.
    pub fn revalidate(&self) -> RevalidationOutcome {
        self.shared.revalidate()
    }

    /// Stop the background task and wait for it to finish. Idempotent.
    pub async fn stop(&self) {
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.halt_task().await;
        debug!("Validator stopped");
    }

    /// Re-arm after `stop()` so `set_license_key` works again.
    pub fn restart(&self) {
        self.shared.stopped.store(false, Ordering::SeqCst);
        debug!("Validator restarted");
    }

    /// Whether `stop()` is in effect.
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Whether the background task is running.
    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// License server base URL, for the pricing proxy.
    pub fn server_url(&self) -> &str {
        self.shared.server.server_url()
    }

    /// Pricing endpoint for a product.
    pub fn pricing_url(&self, product: &str) -> String {
        pricing_url(self.server_url(), product)
    }

    /// Active configuration.
    pub fn config(&self) -> &ValidatorConfig {
        &self.shared.config
    }

    async fn respawn_task(&self) {
        let mut slot = self.task.lock().await;
        if let Some(old) = slot.take() {
            shutdown_task(old).await;
        }
        // stop() may have landed while we were installing.
        if self.shared.is_stopped() {
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_revalidation_loop(
            Arc::clone(&self.shared),
            shutdown_rx,
        ));
        *slot = Some(BackgroundTask { shutdown, handle });
    }

    async fn halt_task(&self) {
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            shutdown_task(task).await;
        }
    }
}

impl Drop for Validator {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            let _ = task.shutdown.send(());
        }
    }
}

impl EntitlementSource for Validator {
    fn confirmation(&self) -> Option<EntitlementConfirmation> {
        let snapshot = self.snapshot();
        let now = self.shared.clock.now_utc();
        let Some(mut confirmation) = snapshot.confirmation.clone() else {
            return Some(EntitlementConfirmation::unlicensed(now));
        };
        // A license that expired after confirmation no longer vouches for its tier.
        confirmation.tier = confirmation.tier.min(snapshot.license.effective_tier(now));
        Some(confirmation)
    }
}

async fn shutdown_task(task: BackgroundTask) {
    let _ = task.shutdown.send(());
    if let Err(e) = task.handle.await {
        warn!(error = %e, "Revalidation task ended abnormally");
    }
}

/// One periodic task per validator; the first tick fires one interval after
/// (re)start.
async fn run_revalidation_loop(shared: Arc<Shared>, mut shutdown: oneshot::Receiver<()>) {
    let period = shared.config.revalidation_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let worker = Arc::clone(&shared);
                match tokio::task::spawn_blocking(move || worker.revalidate()).await {
                    Ok(outcome) => debug!(?outcome, "Background revalidation finished"),
                    Err(e) => warn!(error = %e, "Background revalidation panicked"),
                }
            }
        }
    }

    debug!("Revalidation task exiting");
}

fn confirm(raw_key: &str, tier: Tier, at: DateTime<Utc>) -> EntitlementConfirmation {
    EntitlementConfirmation {
        tier,
        nonce: entitlement_nonce(raw_key, tier.as_str(), at),
        confirmed_at: at,
    }
}

impl Shared {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Arc<LicenseSnapshot> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn lock_writes(&self) -> MutexGuard<'_, WriteState> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in a new snapshot. Caller must hold the write lock.
    fn commit(&self, mut next: LicenseSnapshot) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        next.generation = state.generation + 1;
        *state = Arc::new(next);
    }

    fn install(&self, raw_key: &str, persist: bool) -> Result<Arc<License>, TierwardenError> {
        let raw_key = raw_key.trim();
        if raw_key.is_empty() {
            return Err(TierwardenError::MissingLicense);
        }

        let now = self.clock.now_utc();
        let (license, status) =
            match parse_license_key(raw_key, &self.verifying_key, self.clock.as_ref()) {
                Ok(license) => (license, ValidatorStatus::Active),
                Err(TierwardenError::Expired {
                    expires_at,
                    license,
                }) => {
                    warn!(%expires_at, "Accepting expired license key, gating as free");
                    (*license, ValidatorStatus::Expired)
                }
                Err(e) => return Err(e),
            };

        let mut writes = self.lock_writes();
        if let Some(&current) = writes.high_water.get(license.customer_id()) {
            if license.sequence() < current {
                return Err(TierwardenError::StaleSequence {
                    presented: license.sequence(),
                    current,
                });
            }
        }

        self.record_sequence(&mut writes, &license)?;
        if persist {
            self.store.save_key(raw_key)?;
        }

        let license = Arc::new(license);
        let tier = license.effective_tier(now);
        self.commit(LicenseSnapshot {
            license: Arc::clone(&license),
            raw_key: Some(raw_key.to_string()),
            status,
            last_validated: Some(now),
            confirmation: Some(confirm(raw_key, tier, now)),
            generation: 0,
        });

        info!(
            key = %key_fingerprint(raw_key),
            customer_id = license.customer_id(),
            tier = tier.as_str(),
            %status,
            "License key installed"
        );
        Ok(license)
    }

    /// Raise the customer's high-water mark to the license's sequence,
    /// persisting before the in-memory map changes.
    fn record_sequence(
        &self,
        writes: &mut WriteState,
        license: &License,
    ) -> Result<(), TierwardenError> {
        let current = writes.high_water.get(license.customer_id()).copied();
        if current.is_some_and(|current| current >= license.sequence()) {
            return Ok(());
        }

        let mut next = writes.high_water.clone();
        next.insert(license.customer_id().to_string(), license.sequence());
        self.store.save_sequences(&next)?;
        writes.high_water = next;
        Ok(())
    }

    fn clear(&self) -> Result<(), TierwardenError> {
        let _writes = self.lock_writes();
        self.store.clear_key()?;
        self.commit(LicenseSnapshot::unlicensed(0));
        info!("License key cleared");
        Ok(())
    }

    fn revalidate(&self) -> RevalidationOutcome {
        let started = self.snapshot();
        let Some(raw_key) = started.raw_key.clone() else {
            return RevalidationOutcome::NoKey;
        };

        match self.server.activate(&raw_key) {
            Ok(response) if response.valid => {
                self.apply_confirmed(&started, &raw_key, response.license_key)
            }
            Ok(response) => {
                warn!(
                    key = %key_fingerprint(&raw_key),
                    message = response.message.as_deref().unwrap_or(""),
                    "License server refused key, downgrading to free"
                );
                self.apply_downgrade(&started, &raw_key, ValidatorStatus::Revoked)
            }
            Err(e) if e.is_transient() => self.apply_unreachable(&started, &raw_key, e),
            Err(e) => {
                // Not a reachability problem, so no grace.
                warn!(
                    key = %key_fingerprint(&raw_key),
                    error = %e,
                    "License check failed permanently, downgrading to free"
                );
                self.apply_downgrade(&started, &raw_key, ValidatorStatus::Revoked)
            }
        }
    }

    fn apply_confirmed(
        &self,
        started: &LicenseSnapshot,
        raw_key: &str,
        renewed_key: Option<String>,
    ) -> RevalidationOutcome {
        let now = self.clock.now_utc();
        let current =
            match parse_license_key_allow_expired(raw_key, &self.verifying_key, self.clock.as_ref())
            {
                Ok(license) => license,
                Err(e) => {
                    warn!(error = %e, "Held license key no longer verifies");
                    return self.apply_downgrade(started, raw_key, ValidatorStatus::Revoked);
                }
            };

        let renewal = renewed_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty() && key != raw_key)
            .and_then(|key| self.verify_renewal(&current, key));

        let mut writes = self.lock_writes();
        if self.snapshot().generation != started.generation {
            return RevalidationOutcome::Superseded;
        }

        let (license, key, renewed) = match renewal {
            Some((license, key)) => match self.store.save_key(&key) {
                Ok(()) => (license, key, true),
                Err(e) => {
                    warn!(error = %e, "Failed to persist renewed key, keeping current");
                    (current, raw_key.to_string(), false)
                }
            },
            None => (current, raw_key.to_string(), false),
        };

        if let Err(e) = self.record_sequence(&mut writes, &license) {
            warn!(error = %e, "Failed to persist accepted sequence");
        }

        let status = if license.is_expired(now) {
            ValidatorStatus::Expired
        } else {
            ValidatorStatus::Active
        };
        let tier = license.effective_tier(now);
        let confirmation = confirm(&key, tier, now);
        self.commit(LicenseSnapshot {
            license: Arc::new(license),
            raw_key: Some(key),
            status,
            last_validated: Some(now),
            confirmation: Some(confirmation),
            generation: 0,
        });

        info!(tier = tier.as_str(), renewed, "License revalidated");
        RevalidationOutcome::Confirmed { renewed }
    }

    /// A renewed key is only taken if it verifies, belongs to the same
    /// customer and does not go back in sequence.
    fn verify_renewal(&self, current: &License, key: String) -> Option<(License, String)> {
        match parse_license_key_allow_expired(&key, &self.verifying_key, self.clock.as_ref()) {
            Ok(license)
                if license.customer_id() == current.customer_id()
                    && license.sequence() >= current.sequence() =>
            {
                Some((license, key))
            }
            Ok(license) => {
                warn!(
                    customer_id = license.customer_id(),
                    sequence = license.sequence(),
                    "Ignoring renewed key for another customer or older issue"
                );
                None
            }
            Err(e) => {
                warn!(error = %e, "Ignoring renewed key that does not verify");
                None
            }
        }
    }

    fn apply_unreachable(
        &self,
        started: &LicenseSnapshot,
        raw_key: &str,
        error: TierwardenError,
    ) -> RevalidationOutcome {
        let now = self.clock.now_utc();
        let elapsed = started
            .last_validated
            .and_then(|at| (now - at).to_std().ok())
            .unwrap_or_default();
        let within_grace = started.last_validated.is_some() && elapsed <= self.config.grace_period;

        // Already downgraded: stay there, only the confirmation is refreshed.
        if matches!(
            started.status,
            ValidatorStatus::Revoked | ValidatorStatus::GraceExpired
        ) {
            debug!(error = %error, status = %started.status, "License server still unreachable");
            return self.apply_downgrade(started, raw_key, started.status);
        }

        if within_grace {
            warn!(
                error = %error,
                elapsed_secs = elapsed.as_secs(),
                "License server unreachable, keeping license within grace period"
            );
            return RevalidationOutcome::GraceRetained;
        }

        warn!(
            error = %error,
            elapsed_secs = elapsed.as_secs(),
            "License server unreachable past grace period, downgrading to free"
        );
        self.apply_downgrade(started, raw_key, ValidatorStatus::GraceExpired)
    }

    /// Gate as Free but keep the raw key, so a later confirmation restores
    /// the licensed tier.
    fn apply_downgrade(
        &self,
        started: &LicenseSnapshot,
        raw_key: &str,
        status: ValidatorStatus,
    ) -> RevalidationOutcome {
        let now = self.clock.now_utc();
        let _writes = self.lock_writes();
        if self.snapshot().generation != started.generation {
            return RevalidationOutcome::Superseded;
        }

        self.commit(LicenseSnapshot {
            license: Arc::new(License::free()),
            raw_key: Some(raw_key.to_string()),
            status,
            last_validated: started.last_validated,
            confirmation: Some(confirm(raw_key, Tier::Free, now)),
            generation: 0,
        });

        match status {
            ValidatorStatus::Revoked => RevalidationOutcome::Revoked,
            _ => RevalidationOutcome::GraceExpired,
        }
    }
}
