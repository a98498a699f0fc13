use mailscope_domain::{Attachment, Degradation, ParsedMessage};
use serde::Serialize;

use crate::service::FetchReport;

pub const NO_SUBJECT: &str = "(no subject)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Compact,
    Expanded,
    Full,
}

impl Format {
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("full") => Self::Full,
            Some("expanded") => Self::Expanded,
            _ => Self::Compact,
        }
    }
}

/// The list-row view of a decoded message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSummary {
    pub subject: String,
    pub from: String,
    pub to: String,
    pub date: String,
    pub attachments: usize,
}

impl From<&ParsedMessage> for MessageSummary {
    fn from(msg: &ParsedMessage) -> Self {
        let subject = if msg.subject.trim().is_empty() {
            NO_SUBJECT.to_string()
        } else {
            msg.subject.clone()
        };
        Self {
            subject,
            from: msg.from.clone(),
            to: msg.to.clone(),
            date: msg.date.clone(),
            attachments: msg.attachments.len(),
        }
    }
}

#[derive(Serialize)]
struct AttachmentView<'a> {
    filename: &'a str,
    mime_type: String,
    size_kb: f64,
}

impl<'a> From<&'a Attachment> for AttachmentView<'a> {
    fn from(a: &'a Attachment) -> Self {
        Self {
            filename: a.display_name(),
            mime_type: a.mime_type(),
            size_kb: a.size_kb,
        }
    }
}

#[derive(Serialize)]
struct MessageView<'a> {
    #[serde(flatten)]
    summary: MessageSummary,
    text: &'a str,
    html: &'a str,
    attachment_files: Vec<AttachmentView<'a>>,
    #[serde(skip_serializing_if = "is_clean")]
    degradations: &'a [Degradation],
}

fn is_clean(degradations: &&[Degradation]) -> bool {
    degradations.is_empty()
}

impl<'a> From<&'a ParsedMessage> for MessageView<'a> {
    fn from(msg: &'a ParsedMessage) -> Self {
        Self {
            summary: MessageSummary::from(msg),
            text: &msg.text,
            html: &msg.html,
            attachment_files: msg.attachments.iter().map(AttachmentView::from).collect(),
            degradations: &msg.degradations,
        }
    }
}

pub fn format_report(report: &FetchReport, fmt: Format) -> String {
    match fmt {
        Format::Compact | Format::Expanded => {
            let mut lines: Vec<String> = Vec::with_capacity(report.messages.len() + 1);
            lines.push(format!(
                "{} messages from {} in {:.2}s:",
                report.messages.len(),
                report.provider,
                report.elapsed.as_secs_f64()
            ));
            for (i, msg) in report.messages.iter().enumerate() {
                lines.push(format_message_line(i + 1, msg));
                if fmt == Format::Expanded {
                    lines.push(format_message_detail(msg));
                }
            }
            lines.join("\n")
        }
        Format::Full => {
            let views: Vec<MessageView<'_>> =
                report.messages.iter().map(MessageView::from).collect();
            to_json(&views)
        }
    }
}

pub fn format_message(msg: &ParsedMessage, fmt: Format) -> String {
    match fmt {
        Format::Compact => format_message_line(1, msg),
        Format::Expanded => format!(
            "{}\n{}",
            format_message_line(1, msg),
            format_message_detail(msg)
        ),
        Format::Full => to_json(&MessageView::from(msg)),
    }
}

fn format_message_line(index: usize, msg: &ParsedMessage) -> String {
    let summary = MessageSummary::from(msg);
    let attach = if summary.attachments > 0 {
        format!(" +{} attach", summary.attachments)
    } else {
        String::new()
    };
    let degraded = if msg.is_degraded() { " (degraded)" } else { "" };
    format!(
        "  {index}. {subject} | {from}{attach}{degraded}",
        subject = truncate(&summary.subject, 80),
        from = summary.from,
    )
}

fn format_message_detail(msg: &ParsedMessage) -> String {
    let mut lines = vec![
        format!("     to: {}", msg.to),
        format!("     date: {}", msg.date),
    ];
    if msg.text.is_empty() {
        lines.push("     text: (no plain text)".to_string());
    } else {
        lines.push(format!("     text: {}", truncate(&msg.text, 400)));
    }
    if !msg.html.is_empty() {
        lines.push(format!("     html: {} chars", msg.html.chars().count()));
    }
    for a in &msg.attachments {
        lines.push(format!(
            "     attachment: {} ({} KB, {})",
            a.display_name(),
            a.size_kb,
            a.mime_type()
        ));
    }
    for d in &msg.degradations {
        lines.push(format!("     degraded {:?}: {}", d.field, d.issue));
    }
    lines.join("\n")
}

fn truncate(s: &str, max: usize) -> String {
    let clean: String = s.chars().filter(|c| *c != '\r').collect();
    let oneline = clean.replace('\n', " ");
    if oneline.chars().count() > max {
        let truncated: String = oneline.chars().take(max).collect();
        format!("{truncated}...")
    } else {
        oneline
    }
}

fn to_json<T: serde::Serialize + ?Sized>(val: &T) -> String {
    serde_json::to_string(val).unwrap_or_else(|e| format!("serialization error: {e}"))
}
