use std::collections::BTreeSet;
use std::sync::LazyLock;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders, PartType};
use regex::Regex;

use super::error::MessageParseError;
use super::types::{MessageRecord, RawMessage};

/// RFC 2047 encoded word: =?charset?encoding?text?=
static ENCODED_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"=\?([^?\s]+)\?([BbQq])\?([^?\s]*)\?=").unwrap());

/// "On <date>, <someone> wrote:" and everything after it
static QUOTED_REPLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)On\s.+?\swrote:.*$").unwrap());

/// Headers the record is built from, kept raw until decoding
#[derive(Default)]
struct RawHeaders {
    message_id: Option<String>,
    in_reply_to: Option<String>,
    references: Option<String>,
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    date: Option<String>,
}

impl RawHeaders {
    fn save(&mut self, header: &str, value: String) {
        let slot = match header {
            "message-id" => &mut self.message_id,
            "in-reply-to" => &mut self.in_reply_to,
            "references" => &mut self.references,
            "from" => &mut self.from,
            "to" => &mut self.to,
            "subject" => &mut self.subject,
            "date" => &mut self.date,
            _ => return,
        };
        // First occurrence wins
        if slot.is_none() {
            *slot = Some(value);
        }
    }
}

/// Unfold the header section of a raw message. Returns `None` if the blob
/// does not start with anything that looks like a header.
fn parse_headers(blob: &[u8]) -> Option<RawHeaders> {
    let text = String::from_utf8_lossy(blob);
    let mut headers = RawHeaders::default();
    let mut seen_any = false;

    let mut current_header: Option<String> = None;
    let mut current_value = String::new();

    for line in text.lines() {
        // Empty line marks end of headers
        if line.trim_end_matches('\r').is_empty() {
            break;
        }

        // Continuation of previous header
        if line.starts_with(' ') || line.starts_with('\t') {
            if current_header.is_some() {
                current_value.push(' ');
                current_value.push_str(line.trim());
            }
            continue;
        }

        if let Some(header) = current_header.take() {
            headers.save(&header, std::mem::take(&mut current_value));
        }

        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                seen_any = true;
                current_header = Some(name.to_lowercase());
                current_value = value.trim().to_string();
            }
        }
    }
    if let Some(header) = current_header.take() {
        headers.save(&header, current_value);
    }

    seen_any.then_some(headers)
}

/// Decode the bytes of an encoded word according to its charset
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    match charset.to_lowercase().as_str() {
        "iso-8859-1" | "latin1" | "latin-1" | "windows-1252" | "cp1252" => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).to_string(),
    }
}

/// Q encoding from RFC 2047: like quoted-printable, with '_' for space
fn decode_q(text: &str) -> Vec<u8> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                    }
                    None => {
                        out.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }

    out
}

enum Segment {
    Plain(String),
    Encoded { charset: String, bytes: Vec<u8> },
}

/// Decode an RFC 2047 header value.
///
/// The value is split into plain runs and encoded words. Adjacent encoded
/// words in the same charset are joined first (their bytes may split a
/// multibyte character), then all segments are joined in their original
/// order with a single space.
pub fn decode_header_value(raw: &str) -> String {
    let mut segments: Vec<Segment> = Vec::new();
    let mut last_end = 0;

    for caps in ENCODED_WORD.captures_iter(raw) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        let between = &raw[last_end..whole.start];
        last_end = whole.end;

        let gap_is_blank = between.trim().is_empty();
        if !gap_is_blank {
            segments.push(Segment::Plain(between.trim().to_string()));
        }

        let charset = caps[1].to_string();
        let text = &caps[3];
        let bytes = match caps[2].to_ascii_uppercase().as_str() {
            "B" => match STANDARD.decode(text) {
                Ok(bytes) => bytes,
                Err(_) => {
                    // Leave undecodable words as they were
                    segments.push(Segment::Plain(caps[0].to_string()));
                    continue;
                }
            },
            _ => decode_q(text),
        };

        if gap_is_blank
            && let Some(Segment::Encoded {
                charset: prev,
                bytes: prev_bytes,
            }) = segments.last_mut()
            && prev.eq_ignore_ascii_case(&charset)
        {
            prev_bytes.extend(bytes);
            continue;
        }
        segments.push(Segment::Encoded { charset, bytes });
    }

    let tail = raw[last_end..].trim();
    if !tail.is_empty() {
        segments.push(Segment::Plain(tail.to_string()));
    }

    segments
        .into_iter()
        .map(|segment| match segment {
            Segment::Plain(text) => text,
            Segment::Encoded { charset, bytes } => decode_charset(&charset, &bytes),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove a trailing quoted reply ("On ... wrote:" and everything after).
/// Heuristic: a body that says "On ... wrote:" in its own text loses the rest.
pub fn strip_quoted_reply(body: &str) -> String {
    QUOTED_REPLY.replace(body, "").trim().to_string()
}

/// Extract the plaintext body. For multipart messages this is the first
/// text/plain part in document order; a part that failed to decode is
/// returned as its raw payload instead.
fn extract_body(blob: &[u8]) -> String {
    let Some(message) = MessageParser::default().parse(blob) else {
        // Unparseable MIME structure, keep whatever follows the headers
        return raw_payload(blob);
    };

    let is_multipart = matches!(
        message.parts.first().map(|p| &p.body),
        Some(PartType::Multipart(_))
    );

    let part = if is_multipart {
        message.parts.iter().find(|part| {
            !matches!(part.body, PartType::Multipart(_))
                && part
                    .content_type()
                    .map(|ct| {
                        ct.ctype().eq_ignore_ascii_case("text")
                            && ct
                                .subtype()
                                .map(|s| s.eq_ignore_ascii_case("plain"))
                                .unwrap_or(false)
                    })
                    .unwrap_or(true)
        })
    } else {
        message.parts.first()
    };

    let Some(part) = part else {
        return String::new();
    };

    let decoded = match &part.body {
        PartType::Text(text) | PartType::Html(text) if !part.is_encoding_problem => {
            Some(text.to_string())
        }
        PartType::Binary(data) | PartType::InlineBinary(data) if !part.is_encoding_problem => {
            std::str::from_utf8(data).ok().map(str::to_string)
        }
        _ => None,
    };

    decoded.unwrap_or_else(|| {
        let start = part.raw_body_offset();
        let end = part.raw_end_offset();
        message
            .raw_message
            .get(start..end)
            .map(|raw| String::from_utf8_lossy(raw).to_string())
            .unwrap_or_default()
    })
}

/// Everything after the first blank line, undecoded
fn raw_payload(blob: &[u8]) -> String {
    let text = String::from_utf8_lossy(blob);
    text.split_once("\r\n\r\n")
        .or_else(|| text.split_once("\n\n"))
        .map(|(_, body)| body.to_string())
        .unwrap_or_default()
}

/// Parse a Date header. Falls back to `retrieved_at` so every record has a time.
fn parse_date(value: Option<&str>, retrieved_at: DateTime<Utc>) -> DateTime<Utc> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return retrieved_at;
    };

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return date.with_timezone(&Utc);
    }

    // Trailing comments like "(UTC)" or "(PST)" trip the strict parser
    let without_comment = value.split('(').next().unwrap_or(value).trim();
    if let Ok(date) = DateTime::parse_from_rfc2822(without_comment) {
        return date.with_timezone(&Utc);
    }

    tracing::debug!(date = value, "unparseable Date header, using retrieval time");
    retrieved_at
}

/// Message id from a header value, keeping angle brackets
fn first_message_id(value: &str) -> String {
    let value = value.trim();
    match (value.find('<'), value.find('>')) {
        (Some(start), Some(end)) if start < end => value[start..=end].to_string(),
        _ => value.split_whitespace().next().unwrap_or("").to_string(),
    }
}

/// Folder pseudo-label, SENT taking precedence
fn folder_label(folder: &str) -> Option<&'static str> {
    let folder = folder.to_lowercase();
    if folder.contains("sent") {
        Some("SENT")
    } else if folder.contains("inbox") {
        Some("INBOX")
    } else {
        None
    }
}

/// Turn a fetched message into its canonical record.
pub fn normalize_message(
    raw: &RawMessage,
    retrieved_at: DateTime<Utc>,
) -> Result<MessageRecord, MessageParseError> {
    let headers = parse_headers(&raw.blob).ok_or_else(|| MessageParseError {
        folder: raw.folder.clone(),
        seq: raw.seq,
        reason: if raw.blob.is_empty() {
            "empty message".to_string()
        } else {
            "no header section".to_string()
        },
    })?;

    let date = parse_date(headers.date.as_deref(), retrieved_at);

    let mut labels: BTreeSet<String> = raw.flags.iter().cloned().collect();
    if let Some(label) = folder_label(&raw.folder) {
        labels.insert(label.to_string());
    }

    let decode = |value: &Option<String>| {
        value
            .as_deref()
            .map(decode_header_value)
            .unwrap_or_default()
    };
    let msg_id = |value: &Option<String>| {
        value
            .as_deref()
            .map(first_message_id)
            .unwrap_or_default()
    };

    Ok(MessageRecord {
        message_id: msg_id(&headers.message_id),
        datetime: date.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        timestamp: date.timestamp_millis() as f64 / 1000.0,
        sender: decode(&headers.from),
        receiver: decode(&headers.to),
        subject: decode(&headers.subject),
        body: strip_quoted_reply(&extract_body(&raw.blob)),
        references: headers
            .references
            .as_deref()
            .map(|refs| refs.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        in_reply_to: msg_id(&headers.in_reply_to),
        labels,
        folder: raw.folder.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn raw(blob: &str, flags: &[&str], folder: &str) -> RawMessage {
        RawMessage {
            blob: blob.as_bytes().to_vec(),
            flags: flags.iter().map(|f| f.to_string()).collect(),
            folder: folder.to_string(),
            seq: 1,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_decode_header_value() {
        assert_eq!(decode_header_value("Project update"), "Project update");
        assert_eq!(
            decode_header_value("=?UTF-8?Q?Caf=C3=A9_menu?="),
            "Café menu"
        );
        assert_eq!(decode_header_value("=?utf-8?B?SGVsbG8=?="), "Hello");
        // Plain and encoded segments joined by one space
        assert_eq!(
            decode_header_value("Re: =?utf-8?q?R=C3=A9sum=C3=A9?= attached"),
            "Re: Résumé attached"
        );
        // Adjacent words in one charset are joined before decoding
        assert_eq!(
            decode_header_value("=?UTF-8?B?w6k=?=\r\n =?UTF-8?Q?t=C3=A9?="),
            "été"
        );
        // Different charsets stay separate segments
        assert_eq!(
            decode_header_value("=?iso-8859-1?q?caf=E9?= =?utf-8?q?ok?="),
            "café ok"
        );
        // Broken base64 is left as-is
        assert_eq!(decode_header_value("=?utf-8?B?***?="), "=?utf-8?B?***?=");
    }

    #[test]
    fn test_strip_quoted_reply() {
        let body = "Thanks!\n\nOn Wed, Jan 10, 2024 at 9:00 AM Alice <a@example.com> wrote:\n> Here's the update";
        assert_eq!(strip_quoted_reply(body), "Thanks!");
        assert_eq!(strip_quoted_reply("  no quote here \n"), "no quote here");
    }

    #[test]
    fn test_parse_date() {
        let parsed = parse_date(Some("Wed, 10 Jan 2024 09:00:00 +0000"), now());
        assert_eq!(parsed.timestamp(), 1704877200);

        let with_comment = parse_date(Some("Wed, 10 Jan 2024 01:00:00 -0800 (PST)"), now());
        assert_eq!(with_comment.timestamp(), 1704877200);

        assert_eq!(parse_date(Some("yesterday-ish"), now()), now());
        assert_eq!(parse_date(None, now()), now());
    }

    #[test]
    fn test_normalize_simple_message() {
        let blob = "Message-ID: <msg-id-2>\r\n\
            In-Reply-To: <msg-id-1>\r\n\
            References: <msg-id-0>\r\n <msg-id-1>\r\n\
            From: b@example.com\r\n\
            To: a@example.com\r\n\
            Subject: Re: Project update\r\n\
            Date: Wed, 10 Jan 2024 10:00:00 +0000\r\n\
            \r\n\
            Thanks!\r\n\
            On Wed, Jan 10, 2024 Alice wrote:\r\n\
            > Here's the update\r\n";
        let record =
            normalize_message(&raw(blob, &["\\Seen"], "[Gmail]/Sent Mail"), now()).unwrap();

        assert_eq!(record.message_id, "<msg-id-2>");
        assert_eq!(record.in_reply_to, "<msg-id-1>");
        assert_eq!(record.references, vec!["<msg-id-0>", "<msg-id-1>"]);
        assert_eq!(record.sender, "b@example.com");
        assert_eq!(record.receiver, "a@example.com");
        assert_eq!(record.subject, "Re: Project update");
        assert_eq!(record.body, "Thanks!");
        assert_eq!(record.timestamp, 1704880800.0);
        assert_eq!(record.datetime, "2024-01-10 10:00:00 UTC");
        assert_eq!(
            record.labels.into_iter().collect::<Vec<_>>(),
            vec!["SENT", "\\Seen"]
        );
        assert_eq!(record.folder, "[Gmail]/Sent Mail");
    }

    #[test]
    fn test_normalize_multipart_picks_first_plain_part() {
        let blob = "Message-ID: <mp@x>\r\n\
            Subject: multi\r\n\
            Content-Type: multipart/alternative; boundary=\"b1\"\r\n\
            \r\n\
            --b1\r\n\
            Content-Type: text/html; charset=utf-8\r\n\
            \r\n\
            <p>html body</p>\r\n\
            --b1\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            \r\n\
            plain body\r\n\
            --b1\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            \r\n\
            second plain\r\n\
            --b1--\r\n";
        let record = normalize_message(&raw(blob, &[], "INBOX"), now()).unwrap();
        assert_eq!(record.body, "plain body");
        assert!(record.labels.contains("INBOX"));
    }

    #[test]
    fn test_undecodable_part_falls_back_to_raw_payload() {
        let single = "Message-ID: <b64@x>\r\n\
            Subject: broken\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            !!!not*base64@@@\r\n";
        let record = normalize_message(&raw(single, &[], "INBOX"), now()).unwrap();
        assert_eq!(record.body, "!!!not*base64@@@");

        let multipart = "Message-ID: <b64mp@x>\r\n\
            Subject: broken\r\n\
            Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
            \r\n\
            --b1\r\n\
            Content-Type: text/plain; charset=utf-8\r\n\
            Content-Transfer-Encoding: base64\r\n\
            \r\n\
            !!!not*base64@@@\r\n\
            --b1--\r\n";
        let record = normalize_message(&raw(multipart, &[], "INBOX"), now()).unwrap();
        assert_eq!(record.body, "!!!not*base64@@@");
    }

    #[test]
    fn test_parse_error_names_folder_and_message() {
        let mut message = raw("", &[], "INBOX");
        message.seq = 7;
        let err = normalize_message(&message, now()).unwrap_err();
        assert_eq!(err.folder, "INBOX");
        assert_eq!(err.seq, 7);
        assert_eq!(err.to_string(), "cannot parse message 7 in INBOX: empty message");
    }

    #[test]
    fn test_normalize_without_id_or_date() {
        let blob = "Subject: orphan\r\n\r\nhello\r\n";
        let record = normalize_message(&raw(blob, &[], "Archive"), now()).unwrap();
        assert!(!record.has_id());
        assert_eq!(record.timestamp, now().timestamp() as f64);
        assert_eq!(record.body, "hello");
        assert!(record.labels.is_empty());
    }

    #[test]
    fn test_normalize_rejects_headerless_blob() {
        assert!(normalize_message(&raw("", &[], "INBOX"), now()).is_err());
        assert!(normalize_message(&raw("\r\njust text", &[], "INBOX"), now()).is_err());
    }

    #[test]
    fn test_folder_label() {
        assert_eq!(folder_label("Sent Items"), Some("SENT"));
        assert_eq!(folder_label("INBOX"), Some("INBOX"));
        assert_eq!(folder_label("Inbox/Sent"), Some("SENT"));
        assert_eq!(folder_label("Archive"), None);
    }
}
