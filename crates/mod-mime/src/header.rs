//! RFC 2047 encoded-word and charset decoding.

use std::borrow::Cow;

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use charset::Charset;
use mailscope_domain::DecodeIssue;

/// Decoded text plus whatever could not be decoded on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub issues: Vec<DecodeIssue>,
}

impl Decoded {
    fn clean(text: String) -> Self {
        Self {
            text,
            issues: Vec::new(),
        }
    }
}

/// Decodes a raw header value made of plain and encoded-word segments.
///
/// A segment whose charset is unknown, or whose bytes are invalid for it,
/// contributes `""`; the other segments are unaffected.
pub fn decode_header(raw: &[u8]) -> Decoded {
    let lossy = String::from_utf8_lossy(raw);
    let mut issues = Vec::new();
    if matches!(lossy, Cow::Owned(_)) {
        issues.push(DecodeIssue::MalformedBytes("utf-8".to_string()));
    }
    let unfolded = lossy.replace(['\r', '\n'], "");

    let mut text = String::with_capacity(unfolded.len());
    let mut rest = unfolded.trim();
    let mut after_word = false;

    while let Some((start, word)) = find_encoded_word(rest) {
        let before = &rest[..start];
        // whitespace between two adjacent encoded words is not part of the text
        if !(after_word && before.chars().all(char::is_whitespace)) {
            text.push_str(before);
        }
        match word.decode() {
            Ok(s) => text.push_str(&s),
            Err(issue) => issues.push(issue),
        }
        after_word = true;
        rest = &rest[start + word.len..];
    }
    text.push_str(rest);

    Decoded { text, issues }
}

/// Best-effort body decoding: never empty on error, lossy instead.
///
/// A missing or `us-ascii` label is read as UTF-8, which is a superset.
pub fn decode_text(bytes: &[u8], label: &str) -> Decoded {
    let label = label.trim();
    let label = if label.is_empty()
        || label.eq_ignore_ascii_case("us-ascii")
        || label.eq_ignore_ascii_case("ascii")
    {
        "utf-8"
    } else {
        label
    };

    match Charset::for_label(label.as_bytes()) {
        Some(cs) => {
            let (cow, had_errors) = cs.decode_without_bom_handling(bytes);
            let mut decoded = Decoded::clean(cow.into_owned());
            if had_errors {
                decoded
                    .issues
                    .push(DecodeIssue::MalformedBytes(label.to_string()));
            }
            decoded
        }
        None => Decoded {
            text: String::from_utf8_lossy(bytes).into_owned(),
            issues: vec![DecodeIssue::UnsupportedCharset(label.to_string())],
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Base64,
    Quoted,
}

#[derive(Debug)]
struct EncodedWord<'a> {
    charset: &'a str,
    encoding: Encoding,
    payload: &'a str,
    len: usize,
}

impl EncodedWord<'_> {
    fn decode(&self) -> Result<String, DecodeIssue> {
        // RFC 2231 allows a language suffix: utf-8*en
        let label = self.charset.split('*').next().unwrap_or(self.charset);
        let bytes = match self.encoding {
            Encoding::Base64 => decode_b(self.payload)?,
            Encoding::Quoted => decode_q(self.payload),
        };
        let cs = Charset::for_label_no_replacement(label.as_bytes())
            .ok_or_else(|| DecodeIssue::UnsupportedCharset(label.to_string()))?;
        let (cow, had_errors) = cs.decode_without_bom_handling(&bytes);
        if had_errors {
            return Err(DecodeIssue::MalformedBytes(label.to_string()));
        }
        Ok(cow.into_owned())
    }
}

fn find_encoded_word(s: &str) -> Option<(usize, EncodedWord<'_>)> {
    let mut from = 0;
    while let Some(off) = s[from..].find("=?") {
        let start = from + off;
        if let Some(word) = parse_encoded_word(&s[start..]) {
            return Some((start, word));
        }
        from = start + 2;
    }
    None
}

/// `s` starts with `=?`; shape is `=?charset?B|Q?payload?=`.
fn parse_encoded_word(s: &str) -> Option<EncodedWord<'_>> {
    let body = &s[2..];
    let q1 = body.find('?')?;
    let charset = &body[..q1];
    let after = &body[q1 + 1..];

    let encoding = match after.as_bytes().first()? {
        b'B' | b'b' => Encoding::Base64,
        b'Q' | b'q' => Encoding::Quoted,
        _ => return None,
    };
    if after.as_bytes().get(1) != Some(&b'?') {
        return None;
    }
    let tail = &after[2..];
    let close = tail.find("?=")?;
    let payload = &tail[..close];

    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }
    if payload.contains(char::is_whitespace) {
        return None;
    }

    Some(EncodedWord {
        charset,
        encoding,
        payload,
        len: 2 + q1 + 1 + 2 + close + 2,
    })
}

fn decode_b(payload: &str) -> Result<Vec<u8>, DecodeIssue> {
    STANDARD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload.trim_end_matches('=')))
        .map_err(|e| DecodeIssue::BadTransferEncoding(format!("base64: {e}")))
}

fn decode_q(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => out.push(b' '),
            b'=' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(byte) = hex {
                    out.push(byte);
                    i += 2;
                } else {
                    out.push(b'=');
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    out
}
