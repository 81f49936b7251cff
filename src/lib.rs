//! Web3 Funnel - batched event tracking for decentralized applications.
//!
//! This library captures user interactions in a dApp (page views, wallet
//! connections, transactions, clicks, form submissions, custom events),
//! enriches them with page, device and performance context, and delivers
//! them in batches to an ingest API with at-least-once intent.
//!
//! # Delivery Guarantees
//!
//! - **Order preserved**: Records reach the API in the order they were queued
//! - **No silent loss**: A rejected batch goes back to the front of the queue
//! - **Bounded retries**: Linear backoff (1s, 2s, 3s) before waiting for the next timer tick
//! - **Non-blocking calls**: Tracking never waits on the network
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Web3 Funnel                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │   Tracker   │──▶│    Queue    │──▶│   Batcher   │       │
//! │  │ (track_*)   │   │   (FIFO)    │   │(size/timer) │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! │         ▲                                    │              │
//! │         │                                    ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐       │
//! │  │    Probe    │   │  Delivery   │◀──│  Transport  │──▶ API │
//! │  │(page/device)│   │    Log      │   │   (HTTP)    │       │
//! │  └─────────────┘   └─────────────┘   └─────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use web3_funnel::{Tracker, TrackerConfig, WalletType};
//!
//! # async fn demo() -> Result<(), web3_funnel::TrackerError> {
//! let config = TrackerConfig::new("my-website-id", "my-api-key");
//! let tracker = Tracker::connect(config, "https://analytics.example.io/api/v1")?;
//! tracker.init()?;
//!
//! tracker.track_wallet_connect("0x52908400098527886E0F7030069857D2E4169EE7", Some(WalletType::Metamask));
//!
//! // Deliver whatever is left before exiting
//! tracker.close().await;
//! # Ok(())
//! # }
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod delivery;
pub mod logging;
pub mod transport;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use collector::{
    BrowserContext, CustomData, DeviceInfo, ElementInfo, EnvironmentProbe, EventRecord,
    EventType, PageInfo, PerformanceMetrics, TransactionInfo, TransactionStatus, UiElement,
    UserAgentTable, WalletType,
};
pub use config::{BatchConfig, Config, ConfigError};
pub use core::{FlushOutcome, ScriptAttributes, Tracker, TrackerConfig, TrackerError, Visibility};
pub use delivery::{DeliveryLog, DeliveryStats, SharedDeliveryLog};
pub use transport::{Transport, TransportConfig, TransportError};

// HTTP transport re-exports (when enabled)
#[cfg(feature = "http")]
pub use transport::{register_website, HttpTransport, RegisterRequest, Registration};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
