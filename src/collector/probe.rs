//! Environment probe: turns host facts into event payload fragments.
//!
//! There is no DOM here, so the embedding host hands over a
//! [`BrowserContext`] snapshot and the probe derives the page, device,
//! performance and element fragments from it. Every function is pure and
//! degrades to defaults instead of failing.

use crate::collector::types::{DeviceInfo, ElementInfo, PageInfo, PerformanceMetrics};
use crate::collector::user_agent::UserAgentTable;
use serde::{Deserialize, Serialize};

/// Maximum number of characters of element text attached to an event.
pub const ELEMENT_TEXT_LIMIT: usize = 100;

const FIRST_CONTENTFUL_PAINT: &str = "first-contentful-paint";

/// Navigation timing marks, in milliseconds since the time origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationTiming {
    pub navigation_start: f64,
    pub dom_content_loaded_event_end: f64,
    pub load_event_end: f64,
}

/// A paint timing entry (`first-paint`, `first-contentful-paint`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaintEntry {
    pub name: String,
    pub start_time: f64,
}

/// Snapshot of what the host page knows about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserContext {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    /// Explicit path; derived from `url` when absent
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// `None` when the host has no performance API
    #[serde(default)]
    pub timing: Option<NavigationTiming>,
    #[serde(default)]
    pub paint_entries: Vec<PaintEntry>,
}

/// A UI element that triggered an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiElement {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub class_name: String,
    #[serde(default)]
    pub tag_name: String,
    #[serde(default)]
    pub text_content: Option<String>,
}

/// Derives event fragments from a [`BrowserContext`].
#[derive(Debug, Clone, Default)]
pub struct EnvironmentProbe {
    user_agents: UserAgentTable,
}

impl EnvironmentProbe {
    pub fn new(user_agents: UserAgentTable) -> Self {
        Self { user_agents }
    }

    /// The user-agent rules in use.
    pub fn user_agents(&self) -> &UserAgentTable {
        &self.user_agents
    }

    /// URL, title and path of the current page.
    pub fn page_info(&self, context: &BrowserContext) -> PageInfo {
        let url = context.url.clone().unwrap_or_default();
        let path = context
            .path
            .clone()
            .unwrap_or_else(|| path_from_url(&url));
        PageInfo {
            title: context.title.clone().unwrap_or_default(),
            url,
            path,
        }
    }

    /// Browser, OS and device class from the user agent.
    pub fn device_info(&self, context: &BrowserContext) -> DeviceInfo {
        match context.user_agent.as_deref() {
            Some(ua) => self.user_agents.classify(ua),
            None => DeviceInfo::default(),
        }
    }

    /// Load and DOM-ready times relative to navigation start, plus the first
    /// contentful paint. Empty when there is no timing data.
    pub fn performance_metrics(&self, context: &BrowserContext) -> PerformanceMetrics {
        let Some(timing) = context.timing.as_ref() else {
            return PerformanceMetrics::default();
        };

        let since_start = |mark: f64| {
            // A mark of zero means the event has not fired yet.
            (mark >= timing.navigation_start && mark > 0.0)
                .then(|| mark - timing.navigation_start)
        };

        let first_contentful_paint = context
            .paint_entries
            .iter()
            .find(|entry| entry.name == FIRST_CONTENTFUL_PAINT)
            .map(|entry| entry.start_time)
            .unwrap_or(0.0);

        PerformanceMetrics {
            load_time: since_start(timing.load_event_end),
            dom_content_loaded: since_start(timing.dom_content_loaded_event_end),
            first_contentful_paint: Some(first_contentful_paint),
        }
    }
}

/// Id, class, tag and truncated text of an element; empty for `None`.
pub fn element_info(element: Option<&UiElement>) -> ElementInfo {
    let Some(element) = element else {
        return ElementInfo::default();
    };

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    ElementInfo {
        id: non_empty(&element.id),
        class_name: non_empty(&element.class_name),
        tag_name: non_empty(&element.tag_name),
        text: element
            .text_content
            .as_deref()
            .map(|text| text.chars().take(ELEMENT_TEXT_LIMIT).collect::<String>())
            .filter(|text| !text.is_empty()),
    }
}

/// Path component of a URL, `/` when there is none.
fn path_from_url(url: &str) -> String {
    if url.is_empty() {
        return String::new();
    }
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = match after_scheme.find('/') {
        Some(idx) => &after_scheme[idx..],
        None => "/",
    };
    let end = path.find(['?', '#']).unwrap_or(path.len());
    path[..end].to_string()
}
