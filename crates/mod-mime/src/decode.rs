use mailparse::{DispositionType, MailHeaderMap, MailParseError, ParsedMail};
use mailscope_domain::{Attachment, DecodeIssue, DecodedField, Degradation, ParsedMessage};
use tracing::{debug, warn};

use crate::header::{decode_header, decode_text};

/// Decodes one raw message. Pure and reentrant; identical input gives
/// identical output.
pub fn parse(raw: &[u8]) -> ParsedMessage {
    let mail = match mailparse::parse_mail(raw) {
        Ok(mail) => mail,
        Err(e) => {
            warn!("mailparse error: {e}");
            return ParsedMessage {
                text: String::from_utf8_lossy(raw).into_owned(),
                degradations: vec![Degradation {
                    field: DecodedField::Structure,
                    issue: DecodeIssue::Unparseable(e.to_string()),
                }],
                ..Default::default()
            };
        }
    };

    let mut degradations = Vec::new();
    let mut header = |key: &str, field: DecodedField| -> String {
        let Some(h) = mail.headers.get_first_header(key) else {
            return String::new();
        };
        let decoded = decode_header(h.get_value_raw());
        degradations.extend(decoded.issues.into_iter().map(|issue| Degradation { field, issue }));
        decoded.text
    };
    let subject = header("Subject", DecodedField::Subject);
    let from = header("From", DecodedField::From);
    let to = header("To", DecodedField::To);
    let date = raw_header(&mail, "Date").unwrap_or_default();

    let body = walk(&mail, Walk::default(), false);
    degradations.extend(body.degradations);

    let parsed = ParsedMessage {
        subject,
        from,
        to,
        date,
        text: body.text,
        html: body.html,
        attachments: body.attachments,
        degradations,
    };

    if parsed.is_degraded() {
        warn!(
            subject = %parsed.subject,
            degraded = parsed.degradations.len(),
            "message decoded with degradations"
        );
    }
    debug!(
        text_len = parsed.text.len(),
        html_len = parsed.html.len(),
        attachments = parsed.attachments.len(),
        "message decoded"
    );
    parsed
}

/// Accumulator threaded through the depth-first fold.
#[derive(Default)]
struct Walk {
    text: String,
    html: String,
    attachments: Vec<Attachment>,
    degradations: Vec<Degradation>,
}

impl Walk {
    fn degrade(mut self, field: DecodedField, issues: Vec<DecodeIssue>) -> Self {
        self.degradations
            .extend(issues.into_iter().map(|issue| Degradation { field, issue }));
        self
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PartKind {
    Text,
    Html,
    Attachment,
    Message,
    Skipped,
}

fn classify(part: &ParsedMail<'_>) -> PartKind {
    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return PartKind::Attachment;
    }
    match part.ctype.mimetype.as_str() {
        "text/plain" => PartKind::Text,
        "text/html" => PartKind::Html,
        "message/rfc822" => PartKind::Message,
        _ => PartKind::Skipped,
    }
}

/// `delimited` is set for children of a multipart, whose raw body still
/// carries the newline that belongs to the following boundary.
fn walk(part: &ParsedMail<'_>, acc: Walk, delimited: bool) -> Walk {
    if !part.subparts.is_empty() {
        return part.subparts.iter().fold(acc, |acc, sub| walk(sub, acc, true));
    }
    match classify(part) {
        PartKind::Text => {
            let (text, mut acc) = body_text(part, acc, DecodedField::TextBody, delimited);
            acc.text.push_str(&text);
            acc
        }
        PartKind::Html => {
            let (html, mut acc) = body_text(part, acc, DecodedField::HtmlBody, delimited);
            acc.html.push_str(&html);
            acc
        }
        PartKind::Attachment => attachment(part, acc, delimited),
        PartKind::Message => encapsulated(part, acc, delimited),
        PartKind::Skipped => acc,
    }
}

/// Inline forwarded message: its parts join the outer bodies and attachments.
fn encapsulated(part: &ParsedMail<'_>, acc: Walk, delimited: bool) -> Walk {
    let bytes = match leaf_body(part, delimited) {
        Ok(bytes) => bytes,
        Err(e) => {
            return acc.degrade(
                DecodedField::Structure,
                vec![DecodeIssue::BadTransferEncoding(e.to_string())],
            )
        }
    };
    match mailparse::parse_mail(&bytes) {
        Ok(inner) => walk(&inner, acc, false),
        Err(e) => {
            warn!("encapsulated message unparseable: {e}");
            acc.degrade(
                DecodedField::Structure,
                vec![DecodeIssue::Unparseable(e.to_string())],
            )
        }
    }
}

/// Transfer-decoded body of a leaf, minus the boundary newline.
///
/// Base64 decoding already drops it; every other encoding keeps the line
/// break verbatim, so exactly one trailing `\r\n` (or `\n`) is removed.
fn leaf_body(part: &ParsedMail<'_>, delimited: bool) -> Result<Vec<u8>, MailParseError> {
    let mut body = part.get_body_raw()?;
    if delimited && !is_base64(part) {
        if body.ends_with(b"\r\n") {
            body.truncate(body.len() - 2);
        } else if body.ends_with(b"\n") {
            body.pop();
        }
    }
    Ok(body)
}

fn is_base64(part: &ParsedMail<'_>) -> bool {
    part.headers
        .get_first_value("Content-Transfer-Encoding")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("base64"))
}

fn body_text(
    part: &ParsedMail<'_>,
    acc: Walk,
    field: DecodedField,
    delimited: bool,
) -> (String, Walk) {
    match leaf_body(part, delimited) {
        Ok(bytes) => {
            let decoded = decode_text(&bytes, &part.ctype.charset);
            (decoded.text, acc.degrade(field, decoded.issues))
        }
        Err(e) => (
            String::new(),
            acc.degrade(field, vec![DecodeIssue::BadTransferEncoding(e.to_string())]),
        ),
    }
}

fn attachment(part: &ParsedMail<'_>, acc: Walk, delimited: bool) -> Walk {
    let index = acc.attachments.len();

    let (filename, name_issues) = match filename_param(part) {
        Some(raw) => {
            let decoded = decode_header(raw.as_bytes());
            (decoded.text, decoded.issues)
        }
        None => (String::new(), Vec::new()),
    };
    let (content, content_issues) = match leaf_body(part, delimited) {
        Ok(bytes) => (bytes, Vec::new()),
        Err(e) => (
            Vec::new(),
            vec![DecodeIssue::BadTransferEncoding(e.to_string())],
        ),
    };

    let mut acc = acc
        .degrade(DecodedField::AttachmentName(index), name_issues)
        .degrade(DecodedField::AttachmentContent(index), content_issues);
    acc.attachments.push(Attachment::new(filename, content));
    acc
}

/// `filename` from Content-Disposition, else `name` from Content-Type.
///
/// Read from the raw headers so encoded words go through [`decode_header`].
fn filename_param(part: &ParsedMail<'_>) -> Option<String> {
    let from_disposition = raw_header(part, "Content-Disposition")
        .map(|v| mailparse::parse_content_disposition(&v))
        .and_then(|d| d.params.get("filename").cloned());
    from_disposition.or_else(|| {
        raw_header(part, "Content-Type")
            .map(|v| mailparse::parse_content_type(&v))
            .and_then(|ct| ct.params.get("name").cloned())
    })
}

fn raw_header(part: &ParsedMail<'_>, key: &str) -> Option<String> {
    part.headers.get_first_header(key).map(|h| {
        String::from_utf8_lossy(h.get_value_raw())
            .replace(['\r', '\n'], "")
            .trim()
            .to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn b64_lines(data: &[u8]) -> String {
        let encoded = STANDARD.encode(data);
        encoded
            .as_bytes()
            .chunks(76)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>()
            .join("\r\n")
    }

    fn mixed(parts: &[String]) -> Vec<u8> {
        let mut msg = String::from(
            "From: Alice <alice@example.com>\r\n\
             To: Bob <bob@example.com>\r\n\
             Subject: Test\r\n\
             Date: Mon, 1 Jan 2024 10:00:00 +0000\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
             \r\n",
        );
        for part in parts {
            msg.push_str("--XYZ\r\n");
            msg.push_str(part);
            msg.push_str("\r\n");
        }
        msg.push_str("--XYZ--\r\n");
        msg.into_bytes()
    }

    fn b64_part(headers: &str, data: &[u8]) -> String {
        format!(
            "{headers}Content-Transfer-Encoding: base64\r\n\r\n{}",
            b64_lines(data)
        )
    }

    fn seven_bit_part(headers: &str, body: &str) -> String {
        format!("{headers}\r\n{body}")
    }

    #[test]
    fn text_html_and_attachment() {
        let raw = mixed(&[
            b64_part("Content-Type: text/plain; charset=utf-8\r\n", b"Hello"),
            b64_part("Content-Type: text/html; charset=utf-8\r\n", b"<b>Hi</b>"),
            b64_part(
                "Content-Type: application/octet-stream\r\n\
                 Content-Disposition: attachment; filename=\"a.txt\"\r\n",
                &[b'x'; 2048],
            ),
        ]);

        let msg = parse(&raw);
        assert_eq!(msg.subject, "Test");
        assert_eq!(msg.from, "Alice <alice@example.com>");
        assert_eq!(msg.to, "Bob <bob@example.com>");
        assert_eq!(msg.date, "Mon, 1 Jan 2024 10:00:00 +0000");
        assert_eq!(msg.text, "Hello");
        assert_eq!(msg.html, "<b>Hi</b>");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "a.txt");
        assert_eq!(msg.attachments[0].size_kb, 2.0);
        assert_eq!(msg.attachments[0].content.len(), 2048);
        assert!(!msg.is_degraded());
    }

    #[test]
    fn decoding_is_deterministic() {
        let raw = mixed(&[
            b64_part("Content-Type: text/plain\r\n", b"A"),
            b64_part(
                "Content-Type: image/png\r\nContent-Disposition: attachment\r\n",
                &[1, 2, 3],
            ),
        ]);
        assert_eq!(parse(&raw), parse(&raw));
    }

    #[test]
    fn plain_parts_concatenate_in_document_order() {
        let raw = mixed(&[
            b64_part("Content-Type: text/plain\r\n", b"A"),
            b64_part("Content-Type: text/plain\r\n", b"B"),
        ]);
        assert_eq!(parse(&raw).text, "AB");
    }

    #[test]
    fn nested_alternative_parts_are_all_collected() {
        let inner = format!(
            "Content-Type: multipart/alternative; boundary=\"INNER\"\r\n\r\n\
             --INNER\r\n{}\r\n\
             --INNER\r\n{}\r\n\
             --INNER--",
            b64_part("Content-Type: text/plain\r\n", b"B"),
            b64_part("Content-Type: text/html\r\n", b"<b>Hi</b>"),
        );
        let raw = mixed(&[b64_part("Content-Type: text/plain\r\n", b"A"), inner]);

        let msg = parse(&raw);
        assert_eq!(msg.text, "AB");
        assert_eq!(msg.html, "<b>Hi</b>");
    }

    #[test]
    fn text_attachment_is_not_merged_into_body() {
        let raw = mixed(&[
            b64_part("Content-Type: text/plain\r\n", b"Hello"),
            b64_part(
                "Content-Type: text/plain; charset=utf-8\r\n\
                 Content-Disposition: attachment; filename=\"notes.txt\"\r\n",
                b"attached text",
            ),
        ]);

        let msg = parse(&raw);
        assert_eq!(msg.text, "Hello");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "notes.txt");
        assert_eq!(msg.attachments[0].content, b"attached text");
        assert_eq!(msg.attachments[0].mime_type(), "text/plain");
    }

    #[test]
    fn inline_non_text_parts_are_skipped() {
        let raw = mixed(&[
            b64_part("Content-Type: text/plain\r\n", b"Hello"),
            b64_part(
                "Content-Type: image/png\r\nContent-Disposition: inline\r\n",
                &[0x89, b'P', b'N', b'G'],
            ),
        ]);

        let msg = parse(&raw);
        assert_eq!(msg.text, "Hello");
        assert!(msg.attachments.is_empty());
        assert!(msg.html.is_empty());
    }

    #[test]
    fn attachment_filename_fallbacks() {
        let raw = mixed(&[
            b64_part(
                "Content-Type: application/pdf; name=\"report.pdf\"\r\n\
                 Content-Disposition: attachment\r\n",
                b"%PDF",
            ),
            b64_part(
                "Content-Type: application/octet-stream\r\n\
                 Content-Disposition: attachment\r\n",
                b"?",
            ),
            b64_part(
                "Content-Type: application/octet-stream\r\n\
                 Content-Disposition: attachment; filename=\"=?UTF-8?B?SMOpbGxv?=.txt\"\r\n",
                b"x",
            ),
        ]);

        let msg = parse(&raw);
        let names: Vec<&str> = msg.attachments.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["report.pdf", "", "H\u{e9}llo.txt"]);
        assert_eq!(msg.attachments[1].display_name(), "attachment");
        assert_eq!(msg.attachments[1].size_kb, 0.0);
    }

    #[test]
    fn encoded_subject_and_sender() {
        let raw = b"Subject: =?UTF-8?B?SMOpbGxv?= World\r\n\
                    From: =?iso-8859-1?Q?Jos=E9?= <jose@example.com>\r\n\
                    \r\n\
                    body";
        let msg = parse(raw);
        assert_eq!(msg.subject, "H\u{e9}llo World");
        assert_eq!(msg.from, "Jos\u{e9} <jose@example.com>");
        assert!(msg.to.is_empty());
        assert!(msg.date.is_empty());
        assert!(msg.text.starts_with("body"));
    }

    #[test]
    fn unsupported_header_charset_degrades_only_that_segment() {
        let raw = b"Subject: =?x-bogus?B?SMOpbGxv?= World\r\n\
                    To: bob@example.com\r\n\
                    \r\n\
                    body";
        let msg = parse(raw);
        assert_eq!(msg.subject, " World");
        assert_eq!(msg.to, "bob@example.com");
        assert!(msg.degraded(DecodedField::Subject));
        assert!(!msg.degraded(DecodedField::To));
        assert_eq!(
            msg.degradations,
            vec![Degradation {
                field: DecodedField::Subject,
                issue: DecodeIssue::UnsupportedCharset("x-bogus".to_string()),
            }]
        );
    }

    #[test]
    fn invalid_body_bytes_are_reported_not_raised() {
        let mut raw = b"Subject: s\r\nContent-Type: text/plain; charset=utf-8\r\n\r\nok ".to_vec();
        raw.push(0xff);

        let msg = parse(&raw);
        assert!(msg.text.starts_with("ok "));
        assert_eq!(
            msg.degradations,
            vec![Degradation {
                field: DecodedField::TextBody,
                issue: DecodeIssue::MalformedBytes("utf-8".to_string()),
            }]
        );
    }

    #[test]
    fn seven_bit_parts_drop_the_boundary_newline() {
        let raw = mixed(&[
            seven_bit_part("Content-Type: text/plain\r\n", "Hello"),
            seven_bit_part("Content-Type: text/html\r\n", "<b>Hi</b>"),
            seven_bit_part(
                "Content-Type: text/plain\r\n\
                 Content-Disposition: attachment; filename=\"a.txt\"\r\n",
                &"x".repeat(2048),
            ),
        ]);

        let msg = parse(&raw);
        assert_eq!(msg.text, "Hello");
        assert_eq!(msg.html, "<b>Hi</b>");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "a.txt");
        assert_eq!(msg.attachments[0].content.len(), 2048);
        assert_eq!(msg.attachments[0].size_kb, 2.0);
    }

    #[test]
    fn seven_bit_plain_parts_concatenate() {
        let raw = mixed(&[
            seven_bit_part("Content-Type: text/plain\r\n", "A"),
            seven_bit_part("Content-Type: text/plain\r\n", "B"),
        ]);
        assert_eq!(parse(&raw).text, "AB");
    }

    #[test]
    fn seven_bit_text_attachment_keeps_exact_content() {
        let raw = mixed(&[
            seven_bit_part("Content-Type: text/plain\r\n", "Hello"),
            seven_bit_part(
                "Content-Type: text/plain\r\n\
                 Content-Disposition: attachment; filename=\"notes.txt\"\r\n",
                "attached text",
            ),
        ]);

        let msg = parse(&raw);
        assert_eq!(msg.text, "Hello");
        assert_eq!(msg.attachments[0].content, b"attached text");
    }

    #[test]
    fn single_part_body_is_kept_verbatim() {
        let msg = parse(b"Subject: s\r\n\r\nline\r\n");
        assert_eq!(msg.text, "line\r\n");
    }

    #[test]
    fn inline_forwarded_message_is_walked() {
        let raw = mixed(&[
            seven_bit_part("Content-Type: text/plain\r\n", "Top"),
            seven_bit_part(
                "Content-Type: message/rfc822\r\n",
                "Subject: fwd\r\nContent-Type: text/plain\r\n\r\nInner body",
            ),
        ]);

        let msg = parse(&raw);
        assert_eq!(msg.subject, "Test");
        assert_eq!(msg.text, "TopInner body");
        assert!(!msg.is_degraded());
    }
}
