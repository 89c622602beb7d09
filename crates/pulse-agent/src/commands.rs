//! Console command parsing and execution.

use std::fmt::Write as _;

use metrics_exporter_prometheus::PrometheusHandle;
use pulse_core::messages::{DashboardMessage, Site, SiteStatus};
use pulse_sockets::ConnectionRegistry;
use serde_json::json;
use thiserror::Error;

/// One line typed at the console.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print every connection's snapshot.
    Status,
    /// Connect one connection.
    Connect(String),
    /// Disconnect one connection.
    Disconnect(String),
    /// Reconnect one connection.
    Reconnect(String),
    /// Connect every connection.
    ConnectAll,
    /// Disconnect every connection.
    DisconnectAll,
    /// Reconnect every connection.
    ReconnectAll,
    /// Send a frame on one connection.
    Send {
        /// Target connection.
        id: String,
        /// Frame text.
        payload: String,
    },
    /// Send a frame on every connection.
    SendAll(String),
    /// Announce the selected site on every open connection.
    SelectSite(Site),
    /// Render the Prometheus exposition.
    Metrics,
    /// Print the command list.
    Help,
    /// Shut down and exit.
    Quit,
}

/// Why a console line could not be parsed.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Blank line.
    #[error("empty command")]
    Empty,
    /// First word is not a known command.
    #[error("unknown command {0:?}")]
    Unknown(String),
    /// A required argument is absent.
    #[error("`{command}` needs {argument}")]
    MissingArgument {
        /// Command name.
        command: &'static str,
        /// What was expected.
        argument: &'static str,
    },
}

/// Text printed for `help`.
pub const HELP: &str = "\
commands:
  status                        show every connection
  connect <id>                  open a connection
  disconnect <id>               close a connection and stop retrying
  reconnect <id>                close, reset retries, and reopen
  connect-all | disconnect-all | reconnect-all
  send <id> <payload>           send a frame (a bare word is sent as {\"type\":word})
  send-all <payload>            send a frame on every connection
  select-site <id> <domain> [name]
                                announce the selected site on every open connection
  metrics                       print Prometheus metrics
  help                          show this list
  quit                          disconnect everything and exit";

/// Parse one console line.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let id = |command: &'static str| -> Result<String, CommandError> {
        match rest.split_whitespace().next() {
            Some(id) => Ok(id.to_owned()),
            None => Err(CommandError::MissingArgument {
                command,
                argument: "a connection id",
            }),
        }
    };

    match word.to_ascii_lowercase().as_str() {
        "" => Err(CommandError::Empty),
        "status" | "ls" => Ok(Command::Status),
        "connect" => Ok(Command::Connect(id("connect")?)),
        "disconnect" => Ok(Command::Disconnect(id("disconnect")?)),
        "reconnect" => Ok(Command::Reconnect(id("reconnect")?)),
        "connect-all" => Ok(Command::ConnectAll),
        "disconnect-all" => Ok(Command::DisconnectAll),
        "reconnect-all" => Ok(Command::ReconnectAll),
        "send" => {
            let Some((id, payload)) = rest.split_once(char::is_whitespace) else {
                return Err(CommandError::MissingArgument {
                    command: "send",
                    argument: "a connection id and a payload",
                });
            };
            Ok(Command::Send {
                id: id.to_owned(),
                payload: frame_text(payload.trim()),
            })
        }
        "send-all" => {
            if rest.is_empty() {
                return Err(CommandError::MissingArgument {
                    command: "send-all",
                    argument: "a payload",
                });
            }
            Ok(Command::SendAll(frame_text(rest)))
        }
        "select-site" => {
            let mut words = rest.split_whitespace();
            let (Some(site_id), Some(domain)) = (words.next(), words.next()) else {
                return Err(CommandError::MissingArgument {
                    command: "select-site",
                    argument: "a site id and a domain",
                });
            };
            let name = words.collect::<Vec<_>>().join(" ");
            Ok(Command::SelectSite(Site {
                id: site_id.to_owned(),
                name: if name.is_empty() { domain.to_owned() } else { name },
                domain: domain.to_owned(),
                status: SiteStatus::Online,
            }))
        }
        "metrics" => Ok(Command::Metrics),
        "help" | "?" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(CommandError::Unknown(other.to_owned())),
    }
}

/// JSON-looking payloads go out verbatim; a bare word becomes `{"type":word}`.
fn frame_text(payload: &str) -> String {
    if payload.starts_with('{') || payload.starts_with('[') || payload.contains(char::is_whitespace)
    {
        payload.to_owned()
    } else {
        json!({ "type": payload }).to_string()
    }
}

fn per_connection(results: &[(String, bool)]) -> String {
    if results.is_empty() {
        return "no connections".into();
    }
    results
        .iter()
        .map(|(id, sent)| format!("{id}: {}", if *sent { "sent" } else { "not sent" }))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result of running a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    /// Text to print.
    pub text: String,
    /// Whether the console should exit.
    pub quit: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quit: false,
        }
    }
}

/// Runs console commands against a registry.
pub struct Controller {
    registry: ConnectionRegistry,
    metrics: Option<PrometheusHandle>,
}

impl Controller {
    /// Wrap a configured registry.
    pub fn new(registry: ConnectionRegistry, metrics: Option<PrometheusHandle>) -> Self {
        Self { registry, metrics }
    }

    /// The managed registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Execute one command.
    pub fn execute(&self, command: &Command) -> Reply {
        let registry = &self.registry;
        match command {
            Command::Status => Reply::text(self.status_table()),
            Command::Connect(id) => self.for_known(id, |r| r.connect(id), "connecting"),
            Command::Disconnect(id) => self.for_known(id, |r| r.disconnect(id), "disconnecting"),
            Command::Reconnect(id) => self.for_known(id, |r| r.reconnect(id), "reconnecting"),
            Command::ConnectAll => {
                registry.connect_all();
                Reply::text(format!("connecting {} connection(s)", registry.len()))
            }
            Command::DisconnectAll => {
                registry.disconnect_all();
                Reply::text(format!("disconnecting {} connection(s)", registry.len()))
            }
            Command::ReconnectAll => {
                registry.reconnect_all();
                Reply::text(format!("reconnecting {} connection(s)", registry.len()))
            }
            Command::Send { id, payload } => {
                if registry.send(id, payload.as_str()) {
                    Reply::text(format!("{id}: sent"))
                } else {
                    Reply::text(format!("{id}: not sent (unknown or not open)"))
                }
            }
            Command::SendAll(payload) => {
                Reply::text(per_connection(&registry.send_to_all(payload.as_str())))
            }
            Command::SelectSite(site) => {
                let message = DashboardMessage::SiteSelected { site: site.clone() };
                match serde_json::to_string(&message) {
                    Ok(frame) => Reply::text(per_connection(&registry.send_to_all(frame))),
                    Err(e) => Reply::text(format!("cannot encode site: {e}")),
                }
            }
            Command::Metrics => match &self.metrics {
                Some(handle) => Reply::text(handle.render()),
                None => Reply::text("metrics recorder not installed"),
            },
            Command::Help => Reply::text(HELP),
            Command::Quit => Reply {
                text: "shutting down".into(),
                quit: true,
            },
        }
    }

    /// Tear down every connection.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }

    fn for_known(
        &self,
        id: &str,
        action: impl FnOnce(&ConnectionRegistry),
        verb: &str,
    ) -> Reply {
        if self.registry.get(id).is_none() {
            return Reply::text(format!("unknown connection {id:?}"));
        }
        action(&self.registry);
        Reply::text(format!("{id}: {verb}"))
    }

    fn status_table(&self) -> String {
        let snapshots = self.registry.snapshot();
        if snapshots.is_empty() {
            return "no connections".into();
        }
        let width = snapshots.iter().map(|s| s.id.len()).max().unwrap_or(0);
        let mut out = String::new();
        for snap in snapshots {
            let _ = write!(
                out,
                "{:<width$}  {:<10}  attempts={}  {}",
                snap.id,
                snap.status.to_string(),
                snap.reconnect_attempts,
                snap.url,
            );
            if self.registry.reconnect_pending(&snap.id) {
                out.push_str("  (retry pending)");
            }
            if let Some(error) = &snap.last_error {
                let _ = write!(out, "  last error: {error}");
            }
            out.push('\n');
        }
        let _ = out.pop();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pulse_core::ConnectionConfig;
    use pulse_sockets::{NoopHandler, OutboundFrame};
    use pulse_sockets::testing::{MockConnector, MockOutcome};
    use std::time::Duration;

    #[test]
    fn parses_simple_commands() {
        assert_eq!(parse("status"), Ok(Command::Status));
        assert_eq!(parse("  CONNECT-ALL "), Ok(Command::ConnectAll));
        assert_eq!(parse("disconnect-all"), Ok(Command::DisconnectAll));
        assert_eq!(parse("reconnect-all"), Ok(Command::ReconnectAll));
        assert_eq!(parse("metrics"), Ok(Command::Metrics));
        assert_eq!(parse("?"), Ok(Command::Help));
        assert_eq!(parse("exit"), Ok(Command::Quit));
    }

    #[test]
    fn parses_id_commands() {
        assert_eq!(parse("connect main"), Ok(Command::Connect("main".into())));
        assert_eq!(parse("disconnect  logs"), Ok(Command::Disconnect("logs".into())));
        assert_eq!(parse("reconnect main extra"), Ok(Command::Reconnect("main".into())));
        assert_matches!(
            parse("connect"),
            Err(CommandError::MissingArgument { command: "connect", .. })
        );
    }

    #[test]
    fn parses_send() {
        assert_eq!(
            parse(r#"send main {"type":"ping","data":"test"}"#),
            Ok(Command::Send {
                id: "main".into(),
                payload: r#"{"type":"ping","data":"test"}"#.into(),
            })
        );
        assert_eq!(
            parse("send main ping"),
            Ok(Command::Send {
                id: "main".into(),
                payload: r#"{"type":"ping"}"#.into(),
            })
        );
        assert_eq!(parse("send-all hello there"), Ok(Command::SendAll("hello there".into())));
        assert_matches!(parse("send main"), Err(CommandError::MissingArgument { .. }));
        assert_matches!(parse("send-all"), Err(CommandError::MissingArgument { .. }));
    }

    #[test]
    fn parses_select_site() {
        assert_eq!(
            parse("select-site 1 example.com Main Website"),
            Ok(Command::SelectSite(Site {
                id: "1".into(),
                name: "Main Website".into(),
                domain: "example.com".into(),
                status: SiteStatus::Online,
            }))
        );
        assert_matches!(
            parse("select-site 2 shop.example.com"),
            Ok(Command::SelectSite(site)) if site.name == "shop.example.com"
        );
        assert_matches!(
            parse("select-site 1"),
            Err(CommandError::MissingArgument { command: "select-site", .. })
        );
    }

    #[test]
    fn rejects_unknown_and_empty() {
        assert_eq!(parse("   "), Err(CommandError::Empty));
        assert_eq!(parse("frobnicate x"), Err(CommandError::Unknown("frobnicate".into())));
    }

    fn controller(connector: &MockConnector) -> Controller {
        let registry = ConnectionRegistry::new(connector.clone(), NoopHandler);
        registry.configure([
            ConnectionConfig::new("main", "ws://localhost:8080/api/lara-sock"),
            ConnectionConfig::new("logs", "ws://localhost:8080/api/logs-sock"),
        ]);
        Controller::new(registry, None)
    }

    #[tokio::test(start_paused = true)]
    async fn status_lists_connections_in_order() {
        let connector = MockConnector::new();
        connector.script("logs", [MockOutcome::refuse("refused")]);
        let controller = controller(&connector);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let reply = controller.execute(&Command::Status);
        let lines: Vec<&str> = reply.text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("main"));
        assert!(lines[0].contains("open"));
        assert!(lines[1].starts_with("logs"));
        assert!(lines[1].contains("closed"));
        assert!(lines[1].contains("(retry pending)"));
        assert!(lines[1].contains("refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_reports_per_connection() {
        let connector = MockConnector::new();
        connector.script("logs", [MockOutcome::refuse("refused")]);
        let controller = controller(&connector);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let reply = controller.execute(&parse("send-all ping").unwrap());
        assert_eq!(reply.text, "main: sent\nlogs: not sent");

        let reply = controller.execute(&parse("send main ping").unwrap());
        assert_eq!(reply.text, "main: sent");
        let mut session = connector.take_session("main").unwrap();
        assert_eq!(session.drain_sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn select_site_reaches_open_connections_only() {
        let connector = MockConnector::new();
        connector.script("logs", [MockOutcome::refuse("refused")]);
        let controller = controller(&connector);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let reply = controller.execute(&parse("select-site 1 example.com Main Website").unwrap());
        assert_eq!(reply.text, "main: sent\nlogs: not sent");

        let mut session = connector.take_session("main").unwrap();
        let sent = session.drain_sent();
        assert_eq!(sent.len(), 1);
        let OutboundFrame::Text(text) = &sent[0] else {
            panic!("expected a text frame, got {:?}", sent[0]);
        };
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "site_selected",
                "site": {"id": "1", "name": "Main Website", "domain": "example.com", "status": "online"}
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_id_is_reported() {
        let connector = MockConnector::new();
        let controller = controller(&connector);
        let reply = controller.execute(&Command::Disconnect("nope".into()));
        assert_eq!(reply.text, "unknown connection \"nope\"");
        assert!(!reply.quit);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_and_quit() {
        let connector = MockConnector::new();
        let controller = controller(&connector);
        tokio::time::sleep(Duration::from_millis(1)).await;

        let _ = controller.execute(&Command::DisconnectAll);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(controller.registry().snapshot().iter().all(|s| s.status.to_string() == "closed"));

        let reply = controller.execute(&Command::Quit);
        assert!(reply.quit);
        controller.shutdown();
        assert!(controller.registry().is_empty());
    }

    #[tokio::test]
    async fn metrics_without_recorder() {
        let controller = Controller::new(ConnectionRegistry::new(MockConnector::new(), NoopHandler), None);
        assert_eq!(controller.execute(&Command::Metrics).text, "metrics recorder not installed");
    }
}
