//! Printable queue tickets.
//!
//! A ticket is rendered to a small self-contained HTML document with a fixed
//! layout: header, large number, optional priority marker, metadata rows, a
//! barcode-styled line and a footer. [`SystemPrinter`] spools the document
//! to disk and hands it to the platform print command after a short delay.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Local};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::{debug, info};

use crate::config::QueueConfig;
use crate::error::{QueueError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Ticket {
    /// Previewed display number.
    pub number: String,
    pub name: String,
    pub priority: bool,
    pub counter_name: String,
    pub issued_at: DateTime<Local>,
    /// People waiting ahead at issue time.
    pub ahead: usize,
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Text rendered in a barcode font under the number, e.g. `*P12-0309*`.
pub fn barcode_text(ticket: &Ticket) -> String {
    let number: String = ticket.number.chars().filter(char::is_ascii_alphanumeric).collect();
    format!("*{}-{}*", number.to_ascii_uppercase(), ticket.issued_at.format("%H%M"))
}

const STYLE: &str = "body{font-family:sans-serif;width:72mm;margin:0 auto;text-align:center}\
h1{font-size:16px;margin:8px 0}\
.number{font-size:64px;font-weight:bold;margin:12px 0}\
.priority{font-size:14px;font-weight:bold;border:2px solid #000;padding:2px 6px;display:inline-block}\
table{width:100%;font-size:12px;margin-top:10px}\
td{text-align:left}td.v{text-align:right}\
.barcode{font-family:'Libre Barcode 39',monospace;font-size:32px;margin-top:10px}\
footer{font-size:11px;margin-top:10px}";

impl Ticket {
    pub fn render_html(&self) -> String {
        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Ticket {number}</title>\
             <style>{STYLE}</style></head><body>\
             <h1>Queue Ticket</h1>\
             <div class=\"number\">{number}</div>",
            number = escape(&self.number),
        );
        if self.priority {
            html.push_str("<div class=\"priority\">PRIORITY</div>");
        }
        let rows = [
            ("Name", escape(&self.name)),
            ("Counter", escape(&self.counter_name)),
            ("Date", self.issued_at.format("%Y-%m-%d").to_string()),
            ("Time", self.issued_at.format("%H:%M").to_string()),
            ("Waiting ahead", self.ahead.to_string()),
        ];
        html.push_str("<table>");
        for (label, value) in rows {
            let _ = write!(html, "<tr><td>{label}</td><td class=\"v\">{value}</td></tr>");
        }
        html.push_str("</table>");
        let _ = write!(
            html,
            "<div class=\"barcode\">{}</div>\
             <footer>Please wait for your number to be called.<br>Thank you for your patience.</footer>\
             </body></html>",
            escape(&barcode_text(self)),
        );
        html
    }
}

pub trait TicketPrinter: Send + Sync {
    fn print<'a>(&'a self, ticket: &'a Ticket) -> BoxFuture<'a, Result<()>>;
}

/// Writes the ticket into a spool directory and runs the print command on it.
#[derive(Debug, Clone)]
pub struct SystemPrinter {
    command: String,
    spool_dir: PathBuf,
    delay: Duration,
}

impl SystemPrinter {
    pub fn new(command: impl Into<String>, spool_dir: impl Into<PathBuf>, delay: Duration) -> Self {
        Self { command: command.into(), spool_dir: spool_dir.into(), delay }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(config.print_command.clone(), config.spool_dir.clone(), config.print_delay())
    }

    async fn spool(&self, ticket: &Ticket) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.spool_dir)
            .await
            .map_err(|e| QueueError::Print(format!("{}: {e}", self.spool_dir.display())))?;
        let path = self.spool_dir.join(format!("ticket-{}.html", uuid::Uuid::new_v4()));
        tokio::fs::write(&path, ticket.render_html())
            .await
            .map_err(|e| QueueError::Print(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "ticket spooled");
        Ok(path)
    }
}

impl TicketPrinter for SystemPrinter {
    fn print<'a>(&'a self, ticket: &'a Ticket) -> BoxFuture<'a, Result<()>> {
        async move {
            let path = self.spool(ticket).await?;
            tokio::time::sleep(self.delay).await;

            let mut parts = self.command.split_whitespace();
            let program = parts
                .next()
                .ok_or_else(|| QueueError::Print("no print command configured".to_string()))?;
            let status = tokio::process::Command::new(program)
                .args(parts)
                .arg(&path)
                .status()
                .await
                .map_err(|e| QueueError::Print(format!("{program}: {e}")))?;
            if !status.success() {
                return Err(QueueError::Print(format!("{program} exited with {status}")));
            }
            info!(number = %ticket.number, "ticket sent to printer");
            Ok(())
        }
        .boxed()
    }
}
