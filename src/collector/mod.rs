//! Event capture for the Web3 funnel tracker.
//!
//! This module holds the event record model and the environment probe that
//! derives page, device, performance and element fragments from a snapshot
//! of the host page.

pub mod probe;
pub mod types;
pub mod user_agent;

// Re-export commonly used types
pub use probe::{
    element_info, BrowserContext, EnvironmentProbe, NavigationTiming, PaintEntry, UiElement,
};
pub use types::{
    CustomData, DeviceInfo, ElementInfo, EventRecord, EventType, PageInfo, PerformanceMetrics,
    TransactionInfo, TransactionStatus, WalletType,
};
pub use user_agent::{BrowserRule, OsRule, UserAgentTable};
