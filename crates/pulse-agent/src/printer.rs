//! One-line console summaries of routed messages.

use pulse_core::RoutedMessage;
use pulse_core::messages::{DashboardMessage, LaravelStats, NginxStats};
use pulse_sockets::ConnectionRegistry;
use tokio::task::JoinHandle;

/// Summarize a routed message, using the dashboard types when it decodes
/// as one of them.
pub fn summarize(message: &RoutedMessage) -> String {
    let body = match DashboardMessage::from_routed(message) {
        Some(DashboardMessage::NginxStats { stats }) => nginx_summary(&stats),
        Some(DashboardMessage::LaravelStats { stats }) => laravel_summary(&stats),
        Some(DashboardMessage::LiveLog { log }) => {
            let level = format!("{:?}", log.level).to_lowercase();
            format!("[{level}] {}", log.message)
        }
        Some(DashboardMessage::DashboardUpdate {
            nginx,
            laravel,
            live_logs,
        }) => {
            let mut parts = Vec::new();
            if let Some(stats) = nginx {
                parts.push(nginx_summary(&stats));
            }
            if let Some(stats) = laravel {
                parts.push(laravel_summary(&stats));
            }
            if let Some(logs) = live_logs {
                parts.push(format!("{} live log(s)", logs.len()));
            }
            parts.join("; ")
        }
        Some(DashboardMessage::SiteSelected { site }) => {
            let status = format!("{:?}", site.status).to_lowercase();
            format!("site {} ({}) {status}", site.name, site.domain)
        }
        Some(DashboardMessage::Ping { data }) => match data {
            Some(data) => format!("ping {data}"),
            None => "ping".to_string(),
        },
        None => format!("{} field(s)", message.payload.as_object().map_or(0, |m| m.len())),
    };
    format!("[{}] {}: {}", message.connection_id, message.message_type, body)
}

fn nginx_summary(stats: &NginxStats) -> String {
    let mut parts = Vec::new();
    if let Some(v) = stats.total_visits {
        parts.push(format!("visits={v}"));
    }
    if let Some(v) = stats.unique_visitors {
        parts.push(format!("unique={v}"));
    }
    if let Some(v) = stats.page_views {
        parts.push(format!("views={v}"));
    }
    if let Some(v) = stats.bounce_rate {
        parts.push(format!("bounce={v:.1}%"));
    }
    if !stats.top_pages.is_empty() {
        parts.push(format!("top_pages={}", stats.top_pages.len()));
    }
    if parts.is_empty() {
        "no traffic fields".into()
    } else {
        parts.join(" ")
    }
}

fn laravel_summary(stats: &LaravelStats) -> String {
    let mut parts = Vec::new();
    if let Some(v) = stats.total_logs {
        parts.push(format!("logs={v}"));
    }
    if let Some(v) = stats.error_count {
        parts.push(format!("errors={v}"));
    }
    if let Some(v) = stats.warning_count {
        parts.push(format!("warnings={v}"));
    }
    if !stats.slow_queries.is_empty() {
        parts.push(format!("slow_queries={}", stats.slow_queries.len()));
    }
    if parts.is_empty() {
        "no log fields".into()
    } else {
        parts.join(" ")
    }
}

/// Print a summary line for every message routed on `ids` until their topics
/// close.
pub fn spawn<I>(registry: &ConnectionRegistry, ids: I) -> Vec<JoinHandle<()>>
where
    I: IntoIterator<Item = String>,
{
    ids.into_iter()
        .map(|id| {
            let mut subscription = registry.subscribe_all(&id);
            tokio::spawn(async move {
                while let Some(message) = subscription.recv().await {
                    println!("{}", summarize(&message));
                }
            })
        })
        .collect()
}
