//! Event record types for the Web3 funnel tracker.
//!
//! Field names follow the ingest API's JSON shape (camelCase on the wire).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Open key-value payload attached to an event.
pub type CustomData = serde_json::Map<String, serde_json::Value>;

/// The fixed set of event kinds the ingest API accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WalletConnect,
    WalletDisconnect,
    TransactionStart,
    TransactionComplete,
    TransactionFailed,
    PageView,
    ButtonClick,
    FormSubmit,
    CustomEvent,
}

impl EventType {
    /// All event types, in declaration order.
    pub const ALL: [EventType; 9] = [
        EventType::WalletConnect,
        EventType::WalletDisconnect,
        EventType::TransactionStart,
        EventType::TransactionComplete,
        EventType::TransactionFailed,
        EventType::PageView,
        EventType::ButtonClick,
        EventType::FormSubmit,
        EventType::CustomEvent,
    ];

    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WalletConnect => "wallet_connect",
            EventType::WalletDisconnect => "wallet_disconnect",
            EventType::TransactionStart => "transaction_start",
            EventType::TransactionComplete => "transaction_complete",
            EventType::TransactionFailed => "transaction_failed",
            EventType::PageView => "page_view",
            EventType::ButtonClick => "button_click",
            EventType::FormSubmit => "form_submit",
            EventType::CustomEvent => "custom_event",
        }
    }

    /// Parse a wire name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wallet provider that produced a connect event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    Metamask,
    Walletconnect,
    Coinbase,
    Phantom,
    #[default]
    Other,
}

impl WalletType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletType::Metamask => "metamask",
            WalletType::Walletconnect => "walletconnect",
            WalletType::Coinbase => "coinbase",
            WalletType::Phantom => "phantom",
            WalletType::Other => "other",
        }
    }
}

/// On-chain transaction status as reported by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
}

/// Current navigation context of the page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
    pub path: String,
}

/// The UI element that triggered an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_name: Option<String>,
    /// Text content, truncated to the first 100 characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ElementInfo {
    /// True when nothing is known about the element.
    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.class_name.is_none() && self.tag_name.is_none() && self.text.is_none()
    }
}

/// Transaction details for the transaction lifecycle events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TransactionStatus>,
}

/// Page timing relative to navigation start, in milliseconds.
///
/// All fields are absent when the host has no performance API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_content_loaded: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_contentful_paint: Option<f64>,
}

impl PerformanceMetrics {
    pub fn is_empty(&self) -> bool {
        self.load_time.is_none()
            && self.dom_content_loaded.is_none()
            && self.first_contentful_paint.is_none()
    }
}

/// Browser, OS and device class derived from the user agent.
///
/// Fields missing from a payload fall back to `Unknown` / `desktop`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(alias = "name")]
    pub browser: String,
    #[serde(alias = "version")]
    pub browser_version: String,
    pub os: String,
    pub device_type: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            browser: UNKNOWN.to_string(),
            browser_version: UNKNOWN.to_string(),
            os: UNKNOWN.to_string(),
            device_type: DESKTOP.to_string(),
        }
    }
}

/// Fallback for any device field the user agent did not reveal.
pub const UNKNOWN: &str = "Unknown";

/// Device class assumed when no OS rule says otherwise.
pub const DESKTOP: &str = "desktop";

/// One captured interaction, the unit moved through the queue.
///
/// `event_type`, `user_id`, `session_id` and `timestamp` are always present;
/// everything else depends on the event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub event_type: EventType,
    pub user_id: String,
    pub session_id: String,
    /// Capture time, assigned when the record is queued
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<PageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<ElementInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<TransactionInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wallet_type: Option<WalletType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<PerformanceMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<CustomData>,
}

impl EventRecord {
    /// Create a bare record stamped with the current time.
    pub fn new(
        event_type: EventType,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            user_id: user_id.into(),
            session_id: session_id.into(),
            timestamp: Utc::now(),
            page: None,
            element: None,
            transaction: None,
            wallet_address: None,
            wallet_type: None,
            performance: None,
            device_info: None,
            custom_data: None,
        }
    }

    pub fn with_page(mut self, page: PageInfo) -> Self {
        self.page = Some(page);
        self
    }

    /// Attach element info; an empty element is dropped.
    pub fn with_element(mut self, element: ElementInfo) -> Self {
        if !element.is_empty() {
            self.element = Some(element);
        }
        self
    }

    pub fn with_transaction(mut self, transaction: TransactionInfo) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn with_wallet(mut self, address: Option<String>, wallet_type: Option<WalletType>) -> Self {
        self.wallet_address = address;
        self.wallet_type = wallet_type;
        self
    }

    /// Attach performance metrics; empty metrics are dropped.
    pub fn with_performance(mut self, performance: PerformanceMetrics) -> Self {
        if !performance.is_empty() {
            self.performance = Some(performance);
        }
        self
    }

    pub fn with_device_info(mut self, device_info: DeviceInfo) -> Self {
        self.device_info = Some(device_info);
        self
    }

    pub fn with_custom_data(mut self, custom_data: CustomData) -> Self {
        self.custom_data = Some(custom_data);
        self
    }
}
