//! Request validation for the ingest and registration routes.

use super::store::{Owner, WebsiteSettings, WebsiteStatus, WebsiteUpdate};
use crate::collector::types::EventType;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

macro_rules! pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

pattern!(WALLET_ADDRESS, r"^0x[a-fA-F0-9]{40}$");
pattern!(TX_HASH, r"^0x[a-fA-F0-9]{64}$");
pattern!(HTTP_URL, r"^https?://[^\s/?#]+[^\s]*$");
pattern!(EMAIL, r"^[^\s@]+@[^\s@]+\.[^\s@]+$");
pattern!(
    DOMAIN,
    r"^[a-zA-Z0-9][a-zA-Z0-9-]{1,61}[a-zA-Z0-9]\.[a-zA-Z]{2,}$"
);

/// Longest `User-Agent` value kept with an event.
pub const USER_AGENT_LIMIT: usize = 500;

const TRANSACTION_STATUSES: [&str; 3] = ["pending", "success", "failed"];

/// One rejected field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldError {
    fn new(field: &str, message: &str, value: Option<&Value>) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
            value: value.cloned(),
        }
    }
}

fn matches(pattern: &LazyLock<Option<Regex>>, value: &str) -> bool {
    Option::as_ref(pattern).is_some_and(|re| re.is_match(value))
}

/// Value at a dotted path. Null and empty strings count as absent.
fn lookup<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(body, |value, key| value.get(key))
        .filter(|value| !value.is_null() && value.as_str() != Some(""))
}

/// Check an event payload. Returns every problem found.
pub fn validate_event(body: &Value) -> Vec<FieldError> {
    let mut errors = Vec::new();
    let mut check = |field: &str, ok: fn(&Value) -> bool, message: &str, required: bool| {
        match lookup(body, field) {
            Some(value) if !ok(value) => errors.push(FieldError::new(field, message, Some(value))),
            None if required => errors.push(FieldError::new(field, message, None)),
            _ => {}
        }
    };

    check(
        "eventType",
        |v| v.as_str().and_then(EventType::parse).is_some(),
        "Invalid event type",
        true,
    );
    check("userId", non_empty_string, "User ID is required", true);
    check("sessionId", non_empty_string, "Session ID is required", true);
    check(
        "timestamp",
        |v| {
            v.as_str()
                .is_some_and(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
        },
        "Timestamp must be a valid ISO 8601 date",
        false,
    );
    check(
        "page.url",
        |v| v.as_str().is_some_and(|s| matches(&HTTP_URL, s)),
        "Invalid page URL",
        false,
    );
    check("page.title", Value::is_string, "Page title must be a string", false);
    check(
        "walletAddress",
        |v| v.as_str().is_some_and(|s| matches(&WALLET_ADDRESS, s)),
        "Invalid wallet address format",
        false,
    );
    check(
        "transaction.hash",
        |v| v.as_str().is_some_and(|s| matches(&TX_HASH, s)),
        "Invalid transaction hash format",
        false,
    );
    check(
        "transaction.status",
        |v| v.as_str().is_some_and(|s| TRANSACTION_STATUSES.contains(&s)),
        "Invalid transaction status",
        false,
    );
    check("element.id", Value::is_string, "Element ID must be a string", false);
    check("customData", Value::is_object, "Custom data must be an object", false);
    check(
        "performance.loadTime",
        Value::is_number,
        "Load time must be a number",
        false,
    );
    check(
        "performance.domContentLoaded",
        Value::is_number,
        "DOM content loaded time must be a number",
        false,
    );
    check(
        "performance.firstContentfulPaint",
        Value::is_number,
        "First contentful paint time must be a number",
        false,
    );

    errors
}

fn non_empty_string(value: &Value) -> bool {
    value.as_str().is_some_and(|s| !s.is_empty())
}

/// Body of `POST /websites/register`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterBody {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub settings: Option<WebsiteSettings>,
}

/// Registration values after trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub name: String,
    pub domain: String,
    pub description: Option<String>,
    pub owner: Option<Owner>,
    pub settings: Option<WebsiteSettings>,
}

/// Body of `PUT /websites/update`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateBody {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub owner: Option<Owner>,
    #[serde(default)]
    pub settings: Option<WebsiteSettings>,
    pub status: Option<WebsiteStatus>,
}

fn check_name(name: &str, raw: Option<&String>, errors: &mut Vec<FieldError>) {
    if name.is_empty() || name.chars().count() > 100 {
        errors.push(FieldError::new(
            "name",
            "Website name is required and must be between 1-100 characters",
            raw.map(|n| Value::String(n.clone())).as_ref(),
        ));
    }
}

fn check_description(description: Option<&str>, errors: &mut Vec<FieldError>) {
    if description.is_some_and(|d| d.chars().count() > 500) {
        errors.push(FieldError::new(
            "description",
            "Description must be less than 500 characters",
            None,
        ));
    }
}

/// Trim the owner's fields and check their formats. Blank fields are dropped.
fn check_owner(owner: &Owner, errors: &mut Vec<FieldError>) -> Owner {
    let trimmed = |field: &Option<String>| {
        field
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let owner = Owner {
        name: trimmed(&owner.name),
        email: trimmed(&owner.email),
        wallet_address: trimmed(&owner.wallet_address),
    };

    if owner.name.as_ref().is_some_and(|n| n.chars().count() > 100) {
        errors.push(FieldError::new(
            "owner.name",
            "Owner name must be less than 100 characters",
            None,
        ));
    }
    if let Some(email) = owner.email.as_deref().filter(|e| !matches(&EMAIL, e)) {
        errors.push(FieldError::new(
            "owner.email",
            "Invalid email format",
            Some(&Value::String(email.to_string())),
        ));
    }
    if let Some(wallet) = owner
        .wallet_address
        .as_deref()
        .filter(|w| !matches(&WALLET_ADDRESS, w))
    {
        errors.push(FieldError::new(
            "owner.walletAddress",
            "Invalid wallet address format",
            Some(&Value::String(wallet.to_string())),
        ));
    }
    owner
}

/// Check a registration body, returning the trimmed values.
pub fn validate_registration(body: &RegisterBody) -> Result<Registration, Vec<FieldError>> {
    let mut errors = Vec::new();

    let name = body.name.as_deref().map(str::trim).unwrap_or_default();
    check_name(name, body.name.as_ref(), &mut errors);

    let domain = body.domain.as_deref().map(str::trim).unwrap_or_default();
    if !matches(&DOMAIN, domain) {
        errors.push(FieldError::new(
            "domain",
            "Invalid domain format",
            body.domain.as_ref().map(|d| Value::String(d.clone())).as_ref(),
        ));
    }

    let description = body.description.as_deref().map(str::trim);
    check_description(description, &mut errors);
    let owner = body.owner.as_ref().map(|o| check_owner(o, &mut errors));

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(Registration {
        name: name.to_string(),
        domain: domain.to_string(),
        description: description.map(str::to_string),
        owner,
        settings: body.settings.clone(),
    })
}

/// Check an update body. A blank name leaves the name unchanged and a
/// blank description clears it.
pub fn validate_update(body: &UpdateBody) -> Result<WebsiteUpdate, Vec<FieldError>> {
    let mut errors = Vec::new();

    let name = body
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if let Some(name) = name {
        check_name(name, body.name.as_ref(), &mut errors);
    }

    let description = body.description.as_deref().map(str::trim);
    check_description(description, &mut errors);
    let owner = body.owner.as_ref().map(|o| check_owner(o, &mut errors));

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(WebsiteUpdate {
        name: name.map(str::to_string),
        description: description.map(|d| Some(d.to_string()).filter(|d| !d.is_empty())),
        owner,
        settings: body.settings.clone(),
        status: body.status,
    })
}

/// Truncate a `User-Agent` header value.
pub fn sanitize_user_agent(user_agent: &str) -> String {
    user_agent.chars().take(USER_AGENT_LIMIT).collect()
}
