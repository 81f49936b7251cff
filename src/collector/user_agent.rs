//! Table-driven user-agent classification.
//!
//! Rules are evaluated top to bottom and the first substring match wins.
//! The tables are plain data, so extra browsers or platforms can be added
//! from configuration without touching this code.

use crate::collector::types::{DeviceInfo, DESKTOP, UNKNOWN};
use serde::{Deserialize, Serialize};

/// Maps a user-agent substring to a browser name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserRule {
    /// Substring that identifies the browser
    pub pattern: String,
    /// Browser name to report
    pub name: String,
    /// Token whose trailing digits are the major version (e.g. `Chrome/`)
    pub version_marker: String,
}

/// Maps a user-agent substring to an operating system and device class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRule {
    pub pattern: String,
    pub os: String,
    pub device_type: String,
}

/// Ordered browser and OS rule lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAgentTable {
    pub browsers: Vec<BrowserRule>,
    pub operating_systems: Vec<OsRule>,
}

const DEFAULT_BROWSERS: &[(&str, &str, &str)] = &[
    ("Chrome", "Chrome", "Chrome/"),
    ("Firefox", "Firefox", "Firefox/"),
    ("Safari", "Safari", "Version/"),
    ("Edge", "Edge", "Edge/"),
];

const DEFAULT_OPERATING_SYSTEMS: &[(&str, &str, &str)] = &[
    ("Windows", "Windows", DESKTOP),
    ("Mac", "macOS", DESKTOP),
    ("Linux", "Linux", DESKTOP),
    ("Android", "Android", "mobile"),
    ("iOS", "iOS", "mobile"),
];

impl Default for UserAgentTable {
    fn default() -> Self {
        Self {
            browsers: DEFAULT_BROWSERS
                .iter()
                .map(|(pattern, name, marker)| BrowserRule {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                    version_marker: marker.to_string(),
                })
                .collect(),
            operating_systems: DEFAULT_OPERATING_SYSTEMS
                .iter()
                .map(|(pattern, os, device_type)| OsRule {
                    pattern: pattern.to_string(),
                    os: os.to_string(),
                    device_type: device_type.to_string(),
                })
                .collect(),
        }
    }
}

impl UserAgentTable {
    /// Classify a user-agent string. Never fails; unmatched fields stay
    /// `"Unknown"` and the device class stays `"desktop"`.
    pub fn classify(&self, user_agent: &str) -> DeviceInfo {
        let mut info = DeviceInfo::default();

        if let Some(rule) = self
            .browsers
            .iter()
            .find(|rule| user_agent.contains(rule.pattern.as_str()))
        {
            info.browser = rule.name.clone();
            info.browser_version = major_version(user_agent, &rule.version_marker)
                .unwrap_or_else(|| UNKNOWN.to_string());
        }

        if let Some(rule) = self
            .operating_systems
            .iter()
            .find(|rule| user_agent.contains(rule.pattern.as_str()))
        {
            info.os = rule.os.clone();
            info.device_type = rule.device_type.clone();
        }

        info
    }
}

/// Digits immediately following `marker`, if any.
fn major_version(user_agent: &str, marker: &str) -> Option<String> {
    if marker.is_empty() {
        return None;
    }
    let start = user_agent.find(marker)? + marker.len();
    let digits: String = user_agent[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}
