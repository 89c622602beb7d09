//! Typed views over the dashboard's metrics envelopes.
//!
//! The socket layer never depends on these: routing only looks at `type`.
//! Collaborators that want structured payloads decode a [`RoutedMessage`]
//! with [`DashboardMessage::from_routed`]. All stats structs are partial, so
//! servers may push any subset of fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::RoutedMessage;

/// Every envelope the metrics dashboard understands.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardMessage {
    /// Web-server traffic statistics.
    NginxStats {
        /// Partial stats update.
        stats: NginxStats,
    },
    /// Application log statistics.
    LaravelStats {
        /// Partial stats update.
        stats: LaravelStats,
    },
    /// One streamed log line.
    LiveLog {
        /// The log entry.
        log: LogEntry,
    },
    /// Combined refresh of several panels.
    #[serde(rename_all = "camelCase")]
    DashboardUpdate {
        /// Traffic stats, if included.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        nginx: Option<NginxStats>,
        /// Log stats, if included.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        laravel: Option<LaravelStats>,
        /// Replacement live log list, if included.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        live_logs: Option<Vec<LogEntry>>,
    },
    /// The site whose metrics are being streamed changed.
    SiteSelected {
        /// Newly selected site.
        site: Site,
    },
    /// Liveness probe.
    Ping {
        /// Optional echo data.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
}

impl DashboardMessage {
    /// Decode a routed message. `None` if the type is unknown or the payload
    /// does not fit.
    pub fn from_routed(message: &RoutedMessage) -> Option<Self> {
        serde_json::from_value(message.envelope()).ok()
    }

    /// The envelope `type` this variant is sent under.
    pub fn message_type(&self) -> &'static str {
        match self {
            Self::NginxStats { .. } => "nginx_stats",
            Self::LaravelStats { .. } => "laravel_stats",
            Self::LiveLog { .. } => "live_log",
            Self::DashboardUpdate { .. } => "dashboard_update",
            Self::SiteSelected { .. } => "site_selected",
            Self::Ping { .. } => "ping",
        }
    }
}

/// Availability of a monitored site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteStatus {
    /// Serving traffic.
    #[default]
    Online,
    /// Not reachable.
    Offline,
    /// Deliberately taken down.
    Maintenance,
}

/// A monitored site.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Site {
    /// Site identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Primary domain.
    pub domain: String,
    /// Availability.
    pub status: SiteStatus,
}

/// Visits to one path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageVisits {
    /// Request path.
    pub path: String,
    /// Visit count.
    pub visits: u64,
    /// Share of all visits.
    pub percentage: f64,
}

/// A named bucket (browser, OS, country, status code, device) and its share.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Share {
    /// Bucket label. Servers use `name`, `type`, `code` or `country`.
    #[serde(alias = "type", alias = "code", alias = "country")]
    pub name: String,
    /// Count in this bucket.
    pub count: u64,
    /// Share of the total.
    pub percentage: f64,
}

/// Visits in one hour.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourlyVisits {
    /// `HH:00` label.
    pub hour: String,
    /// Visit count.
    pub visits: u64,
}

/// Web-server traffic statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NginxStats {
    /// Total visits.
    pub total_visits: Option<u64>,
    /// Unique visitors.
    pub unique_visitors: Option<u64>,
    /// Page views.
    pub page_views: Option<u64>,
    /// Bounce rate percentage.
    pub bounce_rate: Option<f64>,
    /// Average session duration, `m:ss`.
    pub avg_session_duration: Option<String>,
    /// Most visited paths.
    pub top_pages: Vec<PageVisits>,
    /// Browser breakdown.
    pub browsers: Vec<Share>,
    /// Operating system breakdown.
    pub operating_systems: Vec<Share>,
    /// Device class breakdown.
    pub devices: Vec<Share>,
    /// HTTP status code breakdown.
    pub status_codes: Vec<Share>,
    /// Visits per hour.
    pub hourly_traffic: Vec<HourlyVisits>,
    /// Visitor country breakdown.
    pub country_stats: Vec<Share>,
}

/// Severity of an application log entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// System is unusable.
    Emergency,
    /// Immediate action required.
    Alert,
    /// Critical condition.
    Critical,
    /// Runtime error.
    Error,
    /// Warning.
    Warning,
    /// Normal but significant.
    Notice,
    /// Informational.
    #[default]
    Info,
    /// Debug detail.
    Debug,
}

/// One application log entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogEntry {
    /// Entry identifier.
    pub id: String,
    /// Severity.
    pub level: LogLevel,
    /// Log message.
    pub message: String,
    /// Timestamp as sent by the server.
    pub timestamp: String,
    /// Structured context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Extra processor data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

/// Errors in one hour.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HourlyErrors {
    /// `HH:00` label.
    pub hour: String,
    /// Error count.
    pub errors: u64,
}

/// A slow database query.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlowQuery {
    /// SQL text.
    pub query: String,
    /// Duration in ms.
    pub time: f64,
    /// When it ran.
    pub timestamp: String,
}

/// Application log statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaravelStats {
    /// Total log lines.
    pub total_logs: Option<u64>,
    /// Error-level lines.
    pub error_count: Option<u64>,
    /// Warning-level lines.
    pub warning_count: Option<u64>,
    /// Info-level lines.
    pub info_count: Option<u64>,
    /// Debug-level lines.
    pub debug_count: Option<u64>,
    /// Latest errors.
    pub recent_errors: Vec<LogEntry>,
    /// Errors per hour.
    pub error_trends: Vec<HourlyErrors>,
    /// Slowest queries.
    pub slow_queries: Vec<SlowQuery>,
}
