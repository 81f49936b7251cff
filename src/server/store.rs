//! In-memory storage and aggregation for the reference backend.

use crate::collector::types::{EventRecord, EventType, WalletType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;
use uuid::Uuid;

/// Default page size for event listings.
pub const DEFAULT_PAGE_LIMIT: usize = 50;
/// Largest page size a listing may request.
pub const MAX_PAGE_LIMIT: usize = 1000;
/// Pages listed in a website analytics overview.
pub const TOP_PAGES_LIMIT: usize = 10;
/// Events returned by the dashboard activity feed.
pub const RECENT_EVENTS_LIMIT: usize = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Website with this domain already exists")]
    DuplicateDomain,
    #[error("Website not found")]
    UnknownWebsite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebsiteStatus {
    Active,
    Inactive,
    Suspended,
}

/// Contact details of a website owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Owner {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
}

/// Which event families a site wants tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackedEvents {
    pub wallet_connections: bool,
    pub transactions: bool,
    pub page_views: bool,
    pub clicks: bool,
    pub custom_events: bool,
}

impl Default for TrackedEvents {
    fn default() -> Self {
        Self {
            wallet_connections: true,
            transactions: true,
            page_views: true,
            clicks: true,
            custom_events: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    #[serde(rename = "anonymizeIPs")]
    pub anonymize_ips: bool,
    #[serde(rename = "respectDNT")]
    pub respect_dnt: bool,
    #[serde(rename = "cookieConsent")]
    pub cookie_consent: bool,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            anonymize_ips: false,
            respect_dnt: true,
            cookie_consent: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CustomTracking {
    pub funnel_steps: Vec<String>,
    pub conversion_goals: Vec<String>,
    pub excluded_paths: Vec<String>,
}

/// Per-site tracking configuration. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WebsiteSettings {
    pub tracking_enabled: bool,
    pub track_events: TrackedEvents,
    pub privacy: PrivacySettings,
    pub custom_tracking: CustomTracking,
}

impl Default for WebsiteSettings {
    fn default() -> Self {
        Self {
            tracking_enabled: true,
            track_events: TrackedEvents::default(),
            privacy: PrivacySettings::default(),
            custom_tracking: CustomTracking::default(),
        }
    }
}

/// Changes applied by `PUT /websites/update`. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebsiteUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the description
    pub description: Option<Option<String>>,
    pub owner: Option<Owner>,
    pub settings: Option<WebsiteSettings>,
    pub status: Option<WebsiteStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteStats {
    pub total_events: u64,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// A registered site and its credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Website {
    pub website_id: String,
    pub name: String,
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub settings: WebsiteSettings,
    #[serde(skip_serializing)]
    pub api_key: String,
    pub status: WebsiteStatus,
    pub stats: WebsiteStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An accepted event as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    pub event_id: String,
    pub website_id: String,
    #[serde(flatten)]
    pub record: EventRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    pub total_clicks: u64,
    pub total_transactions: u64,
    pub wallet_connections: u64,
}

impl Engagement {
    fn update(&mut self, event_type: EventType) {
        match event_type {
            EventType::ButtonClick => self.total_clicks += 1,
            EventType::TransactionComplete => self.total_transactions += 1,
            EventType::WalletConnect => self.wallet_connections += 1,
            _ => {}
        }
    }
}

/// Per-session rollup, created on the first event of a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub website_id: String,
    pub user_id: String,
    pub start_time: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub engagement: Engagement,
    pub events: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet_type: Option<WalletType>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filters and paging for event listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventQuery {
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub wallet_address: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<StoredEvent>,
    pub pagination: Pagination,
}

/// Time bucket width for stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    Hour,
    #[default]
    Day,
    Week,
    Month,
}

impl GroupBy {
    fn format(self) -> &'static str {
        match self {
            GroupBy::Hour => "%Y-%m-%d-%H",
            GroupBy::Day => "%Y-%m-%d",
            GroupBy::Week => "%Y-%U",
            GroupBy::Month => "%Y-%m",
        }
    }

    /// Bucket key for `timestamp`.
    pub fn key(self, timestamp: &DateTime<Utc>) -> String {
        timestamp.format(self.format()).to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub group_by: GroupBy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountBucket {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub event_type_stats: Vec<CountBucket>,
    pub time_stats: Vec<CountBucket>,
    pub unique_users: usize,
    pub unique_sessions: usize,
    pub wallet_stats: Vec<CountBucket>,
    pub total_events: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_events: usize,
    pub unique_users: usize,
    pub unique_sessions: usize,
    pub wallet_connections: usize,
    pub transactions: usize,
    /// Transactions per wallet connection, in percent with two decimals
    pub conversion_rate: f64,
    /// Events in the 24 hours before the request, ignoring the date range
    pub recent_events: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopPage {
    #[serde(rename = "_id")]
    pub url: String,
    pub count: usize,
    pub title: Option<String>,
}

/// Dashboard overview for one website.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsiteAnalytics {
    pub overview: Overview,
    pub event_type_breakdown: Vec<CountBucket>,
    pub top_pages: Vec<TopPage>,
}

/// Latest events and per-type counts over a site's whole history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentActivity {
    pub total_events: usize,
    pub recent_events: Vec<StoredEvent>,
    pub event_type_counts: Vec<CountBucket>,
}

/// Receipt for one stored event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
}

/// All backend state.
#[derive(Debug, Default)]
pub struct Store {
    websites: HashMap<String, Website>,
    api_keys: HashMap<String, String>,
    events: Vec<StoredEvent>,
    sessions: HashMap<String, Session>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a site and issue a 64-hex-character API key.
    pub fn register(
        &mut self,
        name: &str,
        domain: &str,
        description: Option<String>,
    ) -> Result<Website, StoreError> {
        if self.websites.values().any(|w| w.domain == domain) {
            return Err(StoreError::DuplicateDomain);
        }

        let now = Utc::now();
        let website = Website {
            website_id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            domain: domain.to_string(),
            description,
            owner: None,
            settings: WebsiteSettings::default(),
            api_key: generate_api_key(),
            status: WebsiteStatus::Active,
            stats: WebsiteStats::default(),
            created_at: now,
            updated_at: now,
        };

        self.api_keys
            .insert(website.api_key.clone(), website.website_id.clone());
        self.websites
            .insert(website.website_id.clone(), website.clone());
        Ok(website)
    }

    /// Look up an active site by API key.
    pub fn authenticate(&self, api_key: &str) -> Option<&Website> {
        self.api_keys
            .get(api_key)
            .and_then(|id| self.websites.get(id))
            .filter(|w| w.status == WebsiteStatus::Active)
    }

    pub fn website(&self, website_id: &str) -> Option<&Website> {
        self.websites.get(website_id)
    }

    /// Apply an update and return the changed site.
    pub fn update(
        &mut self,
        website_id: &str,
        update: WebsiteUpdate,
    ) -> Result<Website, StoreError> {
        let website = self
            .websites
            .get_mut(website_id)
            .ok_or(StoreError::UnknownWebsite)?;

        if let Some(name) = update.name {
            website.name = name;
        }
        if let Some(description) = update.description {
            website.description = description;
        }
        if let Some(owner) = update.owner {
            website.owner = Some(owner);
        }
        if let Some(settings) = update.settings {
            website.settings = settings;
        }
        if let Some(status) = update.status {
            website.status = status;
        }
        website.updated_at = Utc::now();
        Ok(website.clone())
    }

    /// Replace a site's API key. The old key stops authenticating.
    pub fn regenerate_api_key(&mut self, website_id: &str) -> Result<String, StoreError> {
        let website = self
            .websites
            .get_mut(website_id)
            .ok_or(StoreError::UnknownWebsite)?;

        let api_key = generate_api_key();
        self.api_keys.remove(&website.api_key);
        self.api_keys.insert(api_key.clone(), website_id.to_string());
        website.api_key = api_key.clone();
        website.updated_at = Utc::now();
        Ok(api_key)
    }

    /// Soft delete: the site and its events stay, its key stops working.
    pub fn suspend(&mut self, website_id: &str) -> Result<(), StoreError> {
        self.update(
            website_id,
            WebsiteUpdate {
                status: Some(WebsiteStatus::Suspended),
                ..WebsiteUpdate::default()
            },
        )
        .map(|_| ())
    }

    pub fn session(&self, session_id: &str) -> Option<&Session> {
        self.sessions.get(session_id)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Store already-validated records for a site. Wallet addresses are
    /// lowercased; sessions and site stats are updated.
    pub fn insert(
        &mut self,
        website_id: &str,
        records: Vec<EventRecord>,
        user_agent: Option<&str>,
    ) -> Result<Vec<Accepted>, StoreError> {
        let count = records.len() as u64;
        let website = self
            .websites
            .get_mut(website_id)
            .ok_or(StoreError::UnknownWebsite)?;
        let now = Utc::now();
        website.stats.total_events += count;
        website.stats.last_event_at = Some(now);
        website.updated_at = now;

        let mut accepted = Vec::with_capacity(records.len());
        for mut record in records {
            if let Some(address) = record.wallet_address.as_mut() {
                *address = address.to_lowercase();
            }
            let event_id = Uuid::new_v4().to_string();
            self.touch_session(website_id, &event_id, &record);

            accepted.push(Accepted {
                event_id: event_id.clone(),
                timestamp: record.timestamp,
            });
            self.events.push(StoredEvent {
                event_id,
                website_id: website_id.to_string(),
                record,
                user_agent: user_agent.map(str::to_string),
            });
        }
        Ok(accepted)
    }

    fn touch_session(&mut self, website_id: &str, event_id: &str, record: &EventRecord) {
        let session = self
            .sessions
            .entry(record.session_id.clone())
            .or_insert_with(|| Session {
                session_id: record.session_id.clone(),
                website_id: website_id.to_string(),
                user_id: record.user_id.clone(),
                start_time: record.timestamp,
                last_activity: record.timestamp,
                engagement: Engagement::default(),
                events: Vec::new(),
                wallet_address: None,
                wallet_type: None,
            });

        session.engagement.update(record.event_type);
        session.events.push(event_id.to_string());
        session.last_activity = session.last_activity.max(record.timestamp);
        if record.wallet_address.is_some() {
            session.wallet_address = record.wallet_address.clone();
        }
        if record.wallet_type.is_some() {
            session.wallet_type = record.wallet_type;
        }
    }

    /// Filtered, sorted, paginated listing of a site's events.
    pub fn query(&self, website_id: &str, query: &EventQuery) -> EventPage {
        let wallet = query.wallet_address.as_deref().map(str::to_lowercase);
        let mut matched: Vec<&StoredEvent> = self
            .events_in_range(website_id, query.start_date, query.end_date)
            .filter(|e| {
                query
                    .event_type
                    .as_deref()
                    .map_or(true, |t| e.record.event_type.as_str() == t)
            })
            .filter(|e| query.user_id.as_deref().map_or(true, |u| e.record.user_id == u))
            .filter(|e| {
                query
                    .session_id
                    .as_deref()
                    .map_or(true, |s| e.record.session_id == s)
            })
            .filter(|e| {
                wallet
                    .as_deref()
                    .map_or(true, |w| e.record.wallet_address.as_deref() == Some(w))
            })
            .collect();

        match query.sort_order {
            SortOrder::Asc => matched.sort_by_key(|e| e.record.timestamp),
            SortOrder::Desc => matched.sort_by(|a, b| b.record.timestamp.cmp(&a.record.timestamp)),
        }

        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);
        let total = matched.len();

        let events = matched
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();

        EventPage {
            events,
            pagination: Pagination {
                page,
                limit,
                total,
                pages: total.div_ceil(limit),
            },
        }
    }

    /// Aggregate counts over a site's events.
    pub fn stats(&self, website_id: &str, query: &StatsQuery) -> EventStats {
        let mut by_type: HashMap<&'static str, usize> = HashMap::new();
        let mut by_time: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_wallet: HashMap<Option<&'static str>, usize> = HashMap::new();
        let mut users = HashSet::new();
        let mut sessions = HashSet::new();
        let mut total = 0;

        for event in self.events_in_range(website_id, query.start_date, query.end_date) {
            let record = &event.record;
            total += 1;
            *by_type.entry(record.event_type.as_str()).or_default() += 1;
            *by_time
                .entry(query.group_by.key(&record.timestamp))
                .or_default() += 1;
            users.insert(record.user_id.as_str());
            sessions.insert(record.session_id.as_str());

            if record.event_type == EventType::WalletConnect {
                *by_wallet
                    .entry(record.wallet_type.map(|w| w.as_str()))
                    .or_default() += 1;
            }
        }

        EventStats {
            event_type_stats: by_count(
                by_type
                    .into_iter()
                    .map(|(id, count)| (Some(id.to_string()), count)),
            ),
            time_stats: by_time
                .into_iter()
                .map(|(id, count)| CountBucket {
                    id: Some(id),
                    count,
                })
                .collect(),
            unique_users: users.len(),
            unique_sessions: sessions.len(),
            wallet_stats: by_count(
                by_wallet
                    .into_iter()
                    .map(|(id, count)| (id.map(str::to_string), count)),
            ),
            total_events: total,
        }
    }

    /// Overview, type breakdown and top pages for a site.
    pub fn analytics(
        &self,
        website_id: &str,
        query: &AnalyticsQuery,
        now: DateTime<Utc>,
    ) -> WebsiteAnalytics {
        let mut by_type: HashMap<&'static str, usize> = HashMap::new();
        let mut pages: HashMap<&str, (usize, Option<&str>)> = HashMap::new();
        let mut users = HashSet::new();
        let mut sessions = HashSet::new();
        let mut total = 0;
        let mut wallet_connections = 0;
        let mut transactions = 0;

        for event in self.events_in_range(website_id, query.start_date, query.end_date) {
            let record = &event.record;
            total += 1;
            *by_type.entry(record.event_type.as_str()).or_default() += 1;
            users.insert(record.user_id.as_str());
            sessions.insert(record.session_id.as_str());

            match record.event_type {
                EventType::WalletConnect => wallet_connections += 1,
                EventType::TransactionComplete | EventType::TransactionFailed => transactions += 1,
                EventType::PageView => {
                    if let Some(page) = record.page.as_ref().filter(|p| !p.url.is_empty()) {
                        let entry = pages.entry(page.url.as_str()).or_insert((0, None));
                        entry.0 += 1;
                        if entry.1.is_none() && !page.title.is_empty() {
                            entry.1 = Some(page.title.as_str());
                        }
                    }
                }
                _ => {}
            }
        }

        let conversion_rate = if wallet_connections > 0 {
            let percent = transactions as f64 / wallet_connections as f64 * 100.0;
            (percent * 100.0).round() / 100.0
        } else {
            0.0
        };

        let since = now - chrono::Duration::hours(24);
        let recent_events = self.events_in_range(website_id, Some(since), None).count();

        let mut top_pages: Vec<TopPage> = pages
            .into_iter()
            .map(|(url, (count, title))| TopPage {
                url: url.to_string(),
                count,
                title: title.map(str::to_string),
            })
            .collect();
        top_pages.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.url.cmp(&b.url)));
        top_pages.truncate(TOP_PAGES_LIMIT);

        WebsiteAnalytics {
            overview: Overview {
                total_events: total,
                unique_users: users.len(),
                unique_sessions: sessions.len(),
                wallet_connections,
                transactions,
                conversion_rate,
                recent_events,
            },
            event_type_breakdown: by_count(
                by_type
                    .into_iter()
                    .map(|(id, count)| (Some(id.to_string()), count)),
            ),
            top_pages,
        }
    }

    /// The latest stored events, newest first, with per-type counts.
    pub fn recent_activity(&self, website_id: &str) -> RecentActivity {
        let mut by_type: HashMap<&'static str, usize> = HashMap::new();
        let mut total = 0;
        for event in self.events_in_range(website_id, None, None) {
            total += 1;
            *by_type.entry(event.record.event_type.as_str()).or_default() += 1;
        }

        RecentActivity {
            total_events: total,
            recent_events: self
                .events
                .iter()
                .rev()
                .filter(|e| e.website_id == website_id)
                .take(RECENT_EVENTS_LIMIT)
                .cloned()
                .collect(),
            event_type_counts: by_count(
                by_type
                    .into_iter()
                    .map(|(id, count)| (Some(id.to_string()), count)),
            ),
        }
    }

    fn events_in_range(
        &self,
        website_id: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> impl Iterator<Item = &StoredEvent> + '_ {
        let website_id = website_id.to_string();
        self.events.iter().filter(move |e| {
            e.website_id == website_id
                && start.map_or(true, |s| e.record.timestamp >= s)
                && end.map_or(true, |t| e.record.timestamp <= t)
        })
    }
}

/// Buckets sorted by count, largest first.
fn by_count(buckets: impl Iterator<Item = (Option<String>, usize)>) -> Vec<CountBucket> {
    let mut buckets: Vec<CountBucket> = buckets
        .map(|(id, count)| CountBucket { id, count })
        .collect();
    buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.id.cmp(&b.id)));
    buckets
}

fn generate_api_key() -> String {
    format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, hour, 15, 0).unwrap()
    }

    fn record(event_type: EventType, user: &str, session: &str, hour: u32) -> EventRecord {
        let mut record = EventRecord::new(event_type, user, session);
        record.timestamp = at(hour);
        record
    }

    fn store_with_site() -> (Store, Website) {
        let mut store = Store::new();
        let site = store.register("Demo", "demo.xyz", None).unwrap();
        (store, site)
    }

    #[test]
    fn test_register_issues_hex_key() {
        let (store, site) = store_with_site();
        assert_eq!(site.api_key.len(), 64);
        assert!(site.api_key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            store.authenticate(&site.api_key).unwrap().website_id,
            site.website_id
        );
        assert!(store.authenticate("nope").is_none());
    }

    #[test]
    fn test_duplicate_domain_rejected() {
        let (mut store, _) = store_with_site();
        assert_eq!(
            store.register("Other", "demo.xyz", None).unwrap_err(),
            StoreError::DuplicateDomain
        );
    }

    #[test]
    fn test_insert_updates_rollups() {
        let (mut store, site) = store_with_site();
        let mut connect = record(EventType::WalletConnect, "u1", "s1", 9);
        connect.wallet_address = Some("0xABCDEF0000000000000000000000000000000001".to_string());
        connect.wallet_type = Some(WalletType::Phantom);

        let accepted = store
            .insert(
                &site.website_id,
                vec![
                    record(EventType::PageView, "u1", "s1", 9),
                    record(EventType::ButtonClick, "u1", "s1", 9),
                    connect,
                    record(EventType::TransactionComplete, "u1", "s1", 10),
                ],
                Some("test-agent"),
            )
            .unwrap();
        assert_eq!(accepted.len(), 4);
        assert_eq!(accepted[0].timestamp, at(9));

        let session = store.session("s1").unwrap();
        assert_eq!(
            session.engagement,
            Engagement {
                total_clicks: 1,
                total_transactions: 1,
                wallet_connections: 1,
            }
        );
        assert_eq!(session.events.len(), 4);
        assert_eq!(session.start_time, at(9));
        assert_eq!(session.last_activity, at(10));
        assert_eq!(
            session.wallet_address.as_deref(),
            Some("0xabcdef0000000000000000000000000000000001")
        );

        let website = store.website(&site.website_id).unwrap();
        assert_eq!(website.stats.total_events, 4);
        assert!(website.stats.last_event_at.is_some());
    }

    #[test]
    fn test_query_filters_and_pages() {
        let (mut store, site) = store_with_site();
        let records = (0..7)
            .map(|h| record(EventType::PageView, "u1", "s1", h))
            .chain([record(EventType::ButtonClick, "u2", "s2", 12)])
            .collect();
        store.insert(&site.website_id, records, None).unwrap();

        let page = store.query(
            &site.website_id,
            &EventQuery {
                event_type: Some("page_view".to_string()),
                limit: Some(3),
                page: Some(3),
                sort_order: SortOrder::Asc,
                ..EventQuery::default()
            },
        );
        assert_eq!(
            page.pagination,
            Pagination {
                page: 3,
                limit: 3,
                total: 7,
                pages: 3
            }
        );
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].record.timestamp, at(6));

        let newest = store.query(&site.website_id, &EventQuery::default());
        assert_eq!(newest.events[0].record.event_type, EventType::ButtonClick);

        let ranged = store.query(
            &site.website_id,
            &EventQuery {
                start_date: Some(at(2)),
                end_date: Some(at(4)),
                ..EventQuery::default()
            },
        );
        assert_eq!(ranged.pagination.total, 3);
    }

    #[test]
    fn test_query_is_scoped_to_website() {
        let (mut store, site) = store_with_site();
        let other = store.register("Other", "other.xyz", None).unwrap();
        store
            .insert(&other.website_id, vec![record(EventType::PageView, "u", "s", 1)], None)
            .unwrap();
        assert_eq!(
            store
                .query(&site.website_id, &EventQuery::default())
                .pagination
                .total,
            0
        );
    }

    #[test]
    fn test_stats_aggregation() {
        let (mut store, site) = store_with_site();
        let mut metamask = record(EventType::WalletConnect, "u2", "s2", 10);
        metamask.wallet_type = Some(WalletType::Metamask);
        store
            .insert(
                &site.website_id,
                vec![
                    record(EventType::PageView, "u1", "s1", 9),
                    record(EventType::PageView, "u1", "s1", 9),
                    record(EventType::PageView, "u2", "s2", 10),
                    metamask,
                ],
                None,
            )
            .unwrap();

        let stats = store.stats(
            &site.website_id,
            &StatsQuery {
                group_by: GroupBy::Hour,
                ..StatsQuery::default()
            },
        );
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.unique_sessions, 2);
        assert_eq!(
            stats.event_type_stats[0],
            CountBucket {
                id: Some("page_view".to_string()),
                count: 3
            }
        );
        assert_eq!(
            stats.time_stats,
            vec![
                CountBucket {
                    id: Some("2024-03-05-09".to_string()),
                    count: 2
                },
                CountBucket {
                    id: Some("2024-03-05-10".to_string()),
                    count: 2
                },
            ]
        );
        assert_eq!(
            stats.wallet_stats,
            vec![CountBucket {
                id: Some("metamask".to_string()),
                count: 1
            }]
        );
    }

    fn page_view(user: &str, url: &str, title: &str, hour: u32) -> EventRecord {
        let mut record = record(EventType::PageView, user, &format!("s-{user}"), hour);
        record.page = Some(crate::collector::types::PageInfo {
            url: url.to_string(),
            title: title.to_string(),
            path: String::new(),
        });
        record
    }

    #[test]
    fn test_update_changes_only_given_fields() {
        let (mut store, site) = store_with_site();
        let updated = store
            .update(
                &site.website_id,
                WebsiteUpdate {
                    description: Some(Some("Swaps".to_string())),
                    owner: Some(Owner {
                        email: Some("ops@demo.xyz".to_string()),
                        ..Owner::default()
                    }),
                    ..WebsiteUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Demo");
        assert_eq!(updated.description.as_deref(), Some("Swaps"));
        assert_eq!(updated.owner.unwrap().email.as_deref(), Some("ops@demo.xyz"));
        assert!(updated.settings.tracking_enabled);
        assert!(updated.updated_at >= site.updated_at);

        let inactive = store
            .update(
                &site.website_id,
                WebsiteUpdate {
                    status: Some(WebsiteStatus::Inactive),
                    ..WebsiteUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(inactive.status, WebsiteStatus::Inactive);
        assert!(store.authenticate(&site.api_key).is_none());

        assert_eq!(
            store.update("missing", WebsiteUpdate::default()).unwrap_err(),
            StoreError::UnknownWebsite
        );
    }

    #[test]
    fn test_regenerate_api_key_revokes_old_key() {
        let (mut store, site) = store_with_site();
        let key = store.regenerate_api_key(&site.website_id).unwrap();
        assert_ne!(key, site.api_key);
        assert_eq!(key.len(), 64);
        assert!(store.authenticate(&site.api_key).is_none());
        assert_eq!(
            store.authenticate(&key).unwrap().website_id,
            site.website_id
        );
    }

    #[test]
    fn test_suspend_keeps_events() {
        let (mut store, site) = store_with_site();
        store
            .insert(&site.website_id, vec![record(EventType::PageView, "u", "s", 1)], None)
            .unwrap();
        store.suspend(&site.website_id).unwrap();

        assert!(store.authenticate(&site.api_key).is_none());
        let website = store.website(&site.website_id).unwrap();
        assert_eq!(website.status, WebsiteStatus::Suspended);
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn test_website_analytics() {
        let (mut store, site) = store_with_site();
        let mut connect_a = record(EventType::WalletConnect, "u1", "s-u1", 9);
        connect_a.wallet_type = Some(WalletType::Metamask);
        let connect_b = record(EventType::WalletConnect, "u2", "s-u2", 9);
        store
            .insert(
                &site.website_id,
                vec![
                    page_view("u1", "https://demo.xyz/", "Home", 8),
                    page_view("u2", "https://demo.xyz/", "Home", 8),
                    page_view("u2", "https://demo.xyz/swap", "Swap", 9),
                    connect_a,
                    connect_b,
                    record(EventType::TransactionComplete, "u1", "s-u1", 10),
                    record(EventType::TransactionFailed, "u2", "s-u2", 23),
                ],
                None,
            )
            .unwrap();

        let now = at(12);
        let all = store.analytics(&site.website_id, &AnalyticsQuery::default(), now);
        assert_eq!(
            all.overview,
            Overview {
                total_events: 7,
                unique_users: 2,
                unique_sessions: 2,
                wallet_connections: 2,
                transactions: 2,
                conversion_rate: 100.0,
                recent_events: 7,
            }
        );
        assert_eq!(
            all.event_type_breakdown[0],
            CountBucket {
                id: Some("page_view".to_string()),
                count: 3
            }
        );
        assert_eq!(
            all.top_pages,
            vec![
                TopPage {
                    url: "https://demo.xyz/".to_string(),
                    count: 2,
                    title: Some("Home".to_string()),
                },
                TopPage {
                    url: "https://demo.xyz/swap".to_string(),
                    count: 1,
                    title: Some("Swap".to_string()),
                },
            ]
        );

        // The range narrows the overview but not the last-24h count.
        let morning = store.analytics(
            &site.website_id,
            &AnalyticsQuery {
                start_date: Some(at(9)),
                end_date: Some(at(10)),
            },
            now + chrono::Duration::hours(32),
        );
        assert_eq!(morning.overview.total_events, 4);
        assert_eq!(morning.overview.transactions, 1);
        assert_eq!(morning.overview.conversion_rate, 50.0);
        assert_eq!(morning.overview.recent_events, 1);
    }

    #[test]
    fn test_conversion_rate_rounds_to_two_decimals() {
        let (mut store, site) = store_with_site();
        let records = (0..3)
            .map(|n| record(EventType::WalletConnect, &format!("u{n}"), "s", 1))
            .chain([record(EventType::TransactionComplete, "u0", "s", 2)])
            .collect();
        store.insert(&site.website_id, records, None).unwrap();

        let analytics = store.analytics(&site.website_id, &AnalyticsQuery::default(), at(3));
        assert_eq!(analytics.overview.conversion_rate, 33.33);
    }

    #[test]
    fn test_recent_activity_newest_first() {
        let (mut store, site) = store_with_site();
        let records = (0..(RECENT_EVENTS_LIMIT + 5))
            .map(|n| record(EventType::ButtonClick, &format!("u{n}"), "s", 1))
            .collect();
        store.insert(&site.website_id, records, None).unwrap();

        let activity = store.recent_activity(&site.website_id);
        assert_eq!(activity.total_events, RECENT_EVENTS_LIMIT + 5);
        assert_eq!(activity.recent_events.len(), RECENT_EVENTS_LIMIT);
        assert_eq!(
            activity.recent_events[0].record.user_id,
            format!("u{}", RECENT_EVENTS_LIMIT + 4)
        );
        assert_eq!(
            activity.event_type_counts,
            vec![CountBucket {
                id: Some("button_click".to_string()),
                count: RECENT_EVENTS_LIMIT + 5
            }]
        );
    }

    #[test]
    fn test_group_by_keys() {
        let ts = at(9);
        assert_eq!(GroupBy::Hour.key(&ts), "2024-03-05-09");
        assert_eq!(GroupBy::Day.key(&ts), "2024-03-05");
        assert_eq!(GroupBy::Week.key(&ts), "2024-09");
        assert_eq!(GroupBy::Month.key(&ts), "2024-03");
    }
}
