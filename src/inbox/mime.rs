use mailparse::{addrparse_header, parse_mail, DispositionType, MailAddr, MailHeaderMap, ParsedMail};

use crate::codec::Message;
use crate::error::Result;
use crate::logging::Logger;

/// Body for fetched mail without an inline text part.
pub const NO_CONTENT_PLACEHOLDER: &str = "<!-- no content -->";

/// Stand-in for a message the server returned without a body. Decodes to a
/// message whose body is [`NO_CONTENT_PLACEHOLDER`].
pub fn placeholder_raw(sequence: u32) -> Vec<u8> {
    format!(
        "Subject: message {sequence} (no content)\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{NO_CONTENT_PLACEHOLDER}\r\n"
    )
    .into_bytes()
}

/// Decodes one raw RFC 5322 message: envelope from the headers, body from the
/// first inline `text/*` part. Attachments are only reported.
pub fn decode_raw(raw: &[u8], log: &Logger) -> Result<Message> {
    let parsed = parse_mail(raw)?;

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let from = addresses(&parsed, "From", log).into_iter().next().unwrap_or_default();
    let to = addresses(&parsed, "To", log).into_iter().next().unwrap_or_default();
    let cc = addresses(&parsed, "Cc", log);

    let mut body = None;
    walk_parts(&parsed, &subject, &mut body, log)?;

    let body = body.unwrap_or_else(|| {
        log.warn(format_args!("message {subject:?} has no inline text part"));
        NO_CONTENT_PLACEHOLDER.to_string()
    });

    Ok(Message::new(from, to, subject, body).with_cc(cc))
}

fn addresses(parsed: &ParsedMail, name: &str, log: &Logger) -> Vec<String> {
    let Some(header) = parsed.headers.get_first_header(name) else {
        return Vec::new();
    };

    match addrparse_header(header) {
        Ok(list) => list
            .iter()
            .flat_map(|address| match address {
                MailAddr::Single(info) => vec![info.addr.clone()],
                MailAddr::Group(group) => group.addrs.iter().map(|info| info.addr.clone()).collect(),
            })
            .collect(),
        Err(err) => {
            log.warn(format_args!("unparseable {name} header: {err}"));
            Vec::new()
        }
    }
}

fn walk_parts(part: &ParsedMail, subject: &str, body: &mut Option<String>, log: &Logger) -> Result<()> {
    let disposition = part.get_content_disposition();

    match disposition.disposition {
        DispositionType::Attachment => {
            let filename = disposition
                .params
                .get("filename")
                .map(String::as_str)
                .unwrap_or("unnamed");
            log.info(format_args!(
                "message {subject:?} has attachment {filename:?} ({}), skipping",
                part.ctype.mimetype
            ));
            return Ok(());
        }
        DispositionType::Inline
            if body.is_none() && part.subparts.is_empty() && part.ctype.mimetype.starts_with("text/") =>
        {
            *body = Some(part.get_body()?);
        }
        _ => {}
    }

    for subpart in &part.subparts {
        walk_parts(subpart, subject, body, log)?;
    }

    Ok(())
}
