//! Public tracking API.
//!
//! A [`Tracker`] is an explicitly constructed instance that owns its queue,
//! retry counter and timer handles. Tracking calls are synchronous and only
//! enqueue; delivery happens on the async runtime captured by [`Tracker::init`].

use crate::collector::probe::{element_info, BrowserContext, EnvironmentProbe, UiElement};
use crate::collector::types::{CustomData, EventRecord, EventType, TransactionInfo, WalletType};
use crate::collector::user_agent::UserAgentTable;
use crate::config::BatchConfig;
use crate::core::batcher::{Batcher, DrainReport, FlushOutcome};
use crate::delivery::{create_shared_log, DeliveryStats, SharedDeliveryLog};
use crate::transport::Transport;
use chrono::Utc;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle;
use uuid::Uuid;

/// Attribute marking the script element that carries the credentials.
pub const MARKER_ATTRIBUTE: &str = "data-web3-funnel";
pub const WEBSITE_ID_ATTRIBUTE: &str = "data-website-id";
pub const API_KEY_ATTRIBUTE: &str = "data-api-key";

/// Tracker errors.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// `init` was called outside a tokio runtime
    #[error("tracker must be initialized inside a tokio runtime")]
    NoRuntime,
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

/// Page visibility as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub website_id: String,
    pub api_key: String,
    pub batch: BatchConfig,
    /// Queue a page view as part of `init`
    pub track_initial_page_view: bool,
    pub user_agents: UserAgentTable,
}

impl TrackerConfig {
    pub fn new(website_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            website_id: website_id.into(),
            api_key: api_key.into(),
            batch: BatchConfig::default(),
            track_initial_page_view: true,
            user_agents: UserAgentTable::default(),
        }
    }

    pub fn with_batch(mut self, batch: BatchConfig) -> Self {
        self.batch = batch;
        self
    }

    pub fn without_initial_page_view(mut self) -> Self {
        self.track_initial_page_view = false;
        self
    }
}

/// Credentials found on the marker script element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptAttributes {
    pub website_id: String,
    pub api_key: String,
}

impl ScriptAttributes {
    /// Read the marker element's attributes. Returns `None` unless the
    /// marker is present and both credentials are non-empty.
    pub fn from_attributes<'a, I>(attributes: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut marked = false;
        let mut website_id = None;
        let mut api_key = None;

        for (name, value) in attributes {
            match name {
                MARKER_ATTRIBUTE => marked = true,
                WEBSITE_ID_ATTRIBUTE if !value.is_empty() => website_id = Some(value.to_string()),
                API_KEY_ATTRIBUTE if !value.is_empty() => api_key = Some(value.to_string()),
                _ => {}
            }
        }

        if !marked {
            return None;
        }
        Some(Self {
            website_id: website_id?,
            api_key: api_key?,
        })
    }
}

/// Web3 funnel event tracker.
pub struct Tracker<T: Transport> {
    website_id: String,
    api_key: String,
    user_id: String,
    session_id: String,
    track_initial_page_view: bool,
    initialized: AtomicBool,
    context: Mutex<BrowserContext>,
    probe: EnvironmentProbe,
    batcher: Arc<Batcher<T>>,
    log: SharedDeliveryLog,
}

impl<T: Transport> Tracker<T> {
    /// Create a tracker with default batching for the given site.
    pub fn new(website_id: impl Into<String>, api_key: impl Into<String>, transport: T) -> Self {
        Self::with_config(TrackerConfig::new(website_id, api_key), transport)
    }

    /// Create a tracker. User and session ids are generated here and live as
    /// long as the instance.
    pub fn with_config(config: TrackerConfig, transport: T) -> Self {
        Self::with_log(config, transport, create_shared_log())
    }

    /// Create a tracker that reports into an existing delivery log.
    pub fn with_log(config: TrackerConfig, transport: T, log: SharedDeliveryLog) -> Self {
        Self {
            website_id: config.website_id,
            api_key: config.api_key,
            user_id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4().to_string(),
            track_initial_page_view: config.track_initial_page_view,
            initialized: AtomicBool::new(false),
            context: Mutex::new(BrowserContext::default()),
            probe: EnvironmentProbe::new(config.user_agents),
            batcher: Batcher::new(config.batch, transport, log.clone()),
            log,
        }
    }

    /// Start the periodic flush timer and queue the initial page view.
    ///
    /// Calling this again is a no-op with a warning.
    pub fn init(&self) -> Result<(), TrackerError> {
        let runtime = Handle::try_current().map_err(|_| TrackerError::NoRuntime)?;

        if self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(website_id = %self.website_id, "Web3 funnel tracker already initialized");
            return Ok(());
        }

        self.batcher.start(runtime);
        if self.track_initial_page_view {
            self.track_page_view();
        }

        tracing::info!(
            website_id = %self.website_id,
            session_id = %self.session_id,
            "Web3 funnel tracker initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn website_id(&self) -> &str {
        &self.website_id
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Replace the host page snapshot used by page views.
    pub fn update_context(&self, context: BrowserContext) {
        *self.context.lock().unwrap_or_else(PoisonError::into_inner) = context;
    }

    pub fn context(&self) -> BrowserContext {
        self.context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn probe(&self) -> &EnvironmentProbe {
        &self.probe
    }

    pub fn transport(&self) -> &T {
        self.batcher.transport()
    }

    /// A record of `event_type` carrying this tracker's ids.
    pub fn record(&self, event_type: EventType) -> EventRecord {
        EventRecord::new(event_type, self.user_id.clone(), self.session_id.clone())
    }

    /// Queue a record. The timestamp is set to the time of queueing.
    pub fn enqueue(&self, mut record: EventRecord) {
        record.timestamp = Utc::now();
        self.batcher.enqueue(record);
    }

    pub fn track_page_view(&self) {
        let context = self.context();
        let record = self
            .record(EventType::PageView)
            .with_page(self.probe.page_info(&context))
            .with_performance(self.probe.performance_metrics(&context))
            .with_device_info(self.probe.device_info(&context));
        self.enqueue(record);
    }

    /// Track a wallet connection; the wallet type defaults to `other`.
    pub fn track_wallet_connect(&self, wallet_address: &str, wallet_type: Option<WalletType>) {
        let record = self.record(EventType::WalletConnect).with_wallet(
            Some(wallet_address.to_string()),
            Some(wallet_type.unwrap_or_default()),
        );
        self.enqueue(record);
    }

    pub fn track_wallet_disconnect(&self, wallet_address: Option<&str>) {
        let record = self
            .record(EventType::WalletDisconnect)
            .with_wallet(wallet_address.map(str::to_string), None);
        self.enqueue(record);
    }

    pub fn track_transaction_start(&self, transaction: TransactionInfo) {
        let record = self
            .record(EventType::TransactionStart)
            .with_transaction(transaction);
        self.enqueue(record);
    }

    pub fn track_transaction_complete(&self, transaction: TransactionInfo) {
        let record = self
            .record(EventType::TransactionComplete)
            .with_transaction(transaction);
        self.enqueue(record);
    }

    /// Track a failed transaction; the error message lands in
    /// `customData.error`.
    pub fn track_transaction_failed(&self, transaction: TransactionInfo, error: Option<&str>) {
        let mut custom_data = CustomData::new();
        custom_data.insert(
            "error".to_string(),
            Value::String(error.unwrap_or("Unknown error").to_string()),
        );
        let record = self
            .record(EventType::TransactionFailed)
            .with_transaction(transaction)
            .with_custom_data(custom_data);
        self.enqueue(record);
    }

    pub fn track_button_click(&self, element: Option<&UiElement>, custom_data: CustomData) {
        let record = self
            .record(EventType::ButtonClick)
            .with_element(element_info(element))
            .with_custom_data(custom_data);
        self.enqueue(record);
    }

    pub fn track_form_submit(&self, form: Option<&UiElement>, custom_data: CustomData) {
        let record = self
            .record(EventType::FormSubmit)
            .with_element(element_info(form))
            .with_custom_data(custom_data);
        self.enqueue(record);
    }

    /// Track a named custom event; the name is stored as
    /// `customData.eventName` ahead of the caller's fields.
    pub fn track_custom_event(&self, event_name: &str, custom_data: CustomData) {
        let mut data = CustomData::new();
        data.insert(
            "eventName".to_string(),
            Value::String(event_name.to_string()),
        );
        data.extend(custom_data);
        let record = self
            .record(EventType::CustomEvent)
            .with_custom_data(data);
        self.enqueue(record);
    }

    /// Wallet provider account change: the first account is a connect,
    /// an empty list is a disconnect.
    pub fn on_accounts_changed(&self, accounts: &[String]) {
        match accounts.first() {
            Some(account) => self.track_wallet_connect(account, Some(WalletType::Metamask)),
            None => self.track_wallet_disconnect(None),
        }
    }

    /// Hidden pages flush without waiting; the call may never complete.
    pub fn on_visibility_change(&self, visibility: Visibility) {
        if visibility == Visibility::Hidden {
            self.batcher.flush_detached();
        }
    }

    /// Best-effort flush before the page goes away.
    pub fn on_unload(&self) {
        self.batcher.flush_detached();
    }

    /// Flush one batch and wait for the outcome.
    pub async fn flush(&self) -> FlushOutcome {
        self.batcher.flush().await
    }

    /// Start a flush and return immediately.
    pub fn flush_detached(&self) {
        self.batcher.flush_detached();
    }

    /// Flush until the queue is empty or a batch fails.
    pub async fn drain(&self) -> DrainReport {
        self.batcher.drain().await
    }

    pub fn queue_len(&self) -> usize {
        self.batcher.len()
    }

    pub fn pending(&self) -> Vec<EventRecord> {
        self.batcher.pending()
    }

    pub fn retry_count(&self) -> u32 {
        self.batcher.retry_count()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.log.stats()
    }

    pub fn delivery_log(&self) -> &SharedDeliveryLog {
        &self.log
    }

    /// Cancel the periodic timer and any scheduled retry.
    pub fn shutdown(&self) {
        self.batcher.stop();
    }

    /// Drain what can be delivered, then tear down. Records that could not
    /// be delivered are dropped and counted.
    pub async fn close(self) -> DeliveryStats {
        let report = self.batcher.drain().await;
        self.batcher.stop();
        self.batcher.discard();
        tracing::debug!(
            delivered = report.delivered,
            remaining = report.remaining,
            "Tracker closed"
        );
        self.log.stats()
    }
}

impl<T: Transport> Drop for Tracker<T> {
    fn drop(&mut self) {
        self.batcher.stop();
    }
}

#[cfg(feature = "http")]
impl Tracker<crate::transport::HttpTransport> {
    /// Build a tracker that posts to `base_url` with the configured key.
    pub fn connect(config: TrackerConfig, base_url: &str) -> Result<Self, TrackerError> {
        let transport = crate::transport::HttpTransport::new(
            crate::transport::TransportConfig::new(base_url, config.api_key.clone()),
        )?;
        Ok(Self::with_config(config, transport))
    }

    /// Initialize from the marker script element's attributes. Returns
    /// `Ok(None)` when the page carries no usable marker.
    pub fn auto_init<'a, I>(attributes: I, base_url: &str) -> Result<Option<Self>, TrackerError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let Some(script) = ScriptAttributes::from_attributes(attributes) else {
            return Ok(None);
        };
        let tracker = Self::connect(TrackerConfig::new(script.website_id, script.api_key), base_url)?;
        tracker.init()?;
        Ok(Some(tracker))
    }
}
