//! Incremental element parser
//!
//! Scans a byte stream for start tags and yields one event per element, in
//! document order, without building a tree. At most one tag is buffered at a
//! time.
//!
//! Malformed fragments do not end the stream. The scanner reports them as
//! [`ParseEvent::Malformed`] and resumes at the next `<`, which can never
//! legally occur inside a tag. Only I/O failures end iteration early.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::PathBuf;

use crate::error::ImportError;

/// Upper bound for one buffered tag; longer tags are reported as malformed
pub const MAX_TAG_BYTES: usize = 64 * 1024;

/// A start (or empty-element) tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    /// Attribute names are ASCII-lowercased; values are entity-decoded
    pub attributes: HashMap<String, String>,
    pub self_closing: bool,
}

impl Element {
    /// Look up an attribute by its lowercase name
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// A fragment the scanner had to discard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedFragment {
    /// Byte offset of the `<` that opened the fragment
    pub offset: u64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseEvent {
    Element(Element),
    Malformed(MalformedFragment),
}

/// Streaming start-tag reader over any [`BufRead`]
pub struct ElementReader<R> {
    reader: R,
    source_path: PathBuf,
    offset: u64,
    tag: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> ElementReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            source_path: PathBuf::from("<stream>"),
            offset: 0,
            tag: Vec::with_capacity(512),
            finished: false,
        }
    }

    /// Name the source in I/O error reports
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = path.into();
        self
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn fill(&mut self) -> io::Result<&[u8]> {
        loop {
            match self.reader.fill_buf() {
                Ok(_) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        self.reader.fill_buf()
    }

    fn peek(&mut self) -> io::Result<Option<u8>> {
        Ok(self.fill()?.first().copied())
    }

    fn advance(&mut self, n: usize) {
        self.reader.consume(n);
        self.offset += n as u64;
    }

    fn next_byte(&mut self) -> io::Result<Option<u8>> {
        let byte = self.peek()?;
        if byte.is_some() {
            self.advance(1);
        }
        Ok(byte)
    }

    /// Consume text up to (not including) the next `<`. Returns false at EOF.
    fn skip_to_open(&mut self) -> io::Result<bool> {
        loop {
            let (found, used) = {
                let buf = self.fill()?;
                if buf.is_empty() {
                    return Ok(false);
                }
                match buf.iter().position(|&b| b == b'<') {
                    Some(i) => (true, i),
                    None => (false, buf.len()),
                }
            };
            self.advance(used);
            if found {
                return Ok(true);
            }
        }
    }

    /// Consume through the first occurrence of `pattern`. Returns false at EOF.
    fn skip_past(&mut self, pattern: &[u8]) -> io::Result<bool> {
        let mut window: Vec<u8> = Vec::with_capacity(pattern.len());
        while let Some(byte) = self.next_byte()? {
            if window.len() == pattern.len() {
                window.remove(0);
            }
            window.push(byte);
            if window == pattern {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Consume `expected` if it is the next byte
    fn eat(&mut self, expected: u8) -> io::Result<bool> {
        if self.peek()? == Some(expected) {
            self.advance(1);
            return Ok(true);
        }
        Ok(false)
    }

    /// Skip a `<!...>` construct whose `<!` has already been consumed.
    fn skip_markup(&mut self, start: u64) -> io::Result<Option<MalformedFragment>> {
        if self.eat(b'-')? {
            if self.eat(b'-')? && self.skip_past(b"-->")? {
                return Ok(None);
            }
            return Ok(Some(fragment(start, "unterminated comment")));
        }

        if self.eat(b'[')? {
            return Ok(if self.skip_past(b"]]>")? {
                None
            } else {
                Some(fragment(start, "unterminated CDATA section"))
            });
        }

        // Declarations (DOCTYPE with an internal subset, ELEMENT, ATTLIST)
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;
        while let Some(byte) = self.next_byte()? {
            if let Some(q) = quote {
                if byte == q {
                    quote = None;
                }
                continue;
            }
            match byte {
                b'"' | b'\'' => quote = Some(byte),
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b'>' if depth == 0 => return Ok(None),
                b'<' if depth > 0 => {
                    if self.eat(b'!')? && self.eat(b'-')? && self.eat(b'-')? {
                        if !self.skip_past(b"-->")? {
                            break;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(Some(fragment(start, "unterminated declaration")))
    }

    /// Buffer one tag body (everything between `<` and `>`) into `self.tag`.
    fn read_tag(&mut self, start: u64) -> io::Result<Result<(), MalformedFragment>> {
        self.tag.clear();
        let mut quote: Option<u8> = None;

        loop {
            let byte = match self.peek()? {
                Some(b) => b,
                None => return Ok(Err(fragment(start, "unterminated tag at end of input"))),
            };
            if byte == b'<' {
                // Leave it for the next scan; it opens the next fragment
                return Ok(Err(fragment(start, "unexpected '<' inside tag")));
            }
            self.advance(1);

            match quote {
                Some(q) if byte == q => quote = None,
                Some(_) => {}
                None if byte == b'"' || byte == b'\'' => quote = Some(byte),
                None if byte == b'>' => return Ok(Ok(())),
                None => {}
            }

            self.tag.push(byte);
            if self.tag.len() > MAX_TAG_BYTES {
                return Ok(Err(fragment(
                    start,
                    &format!("tag exceeds {} bytes", MAX_TAG_BYTES),
                )));
            }
        }
    }

    fn next_event(&mut self) -> io::Result<Option<ParseEvent>> {
        loop {
            if !self.skip_to_open()? {
                return Ok(None);
            }
            let start = self.offset;
            self.advance(1);

            match self.peek()? {
                None => {
                    return Ok(Some(ParseEvent::Malformed(fragment(
                        start,
                        "unexpected end of input after '<'",
                    ))))
                }
                Some(b'?') => {
                    if !self.skip_past(b"?>")? {
                        return Ok(Some(ParseEvent::Malformed(fragment(
                            start,
                            "unterminated processing instruction",
                        ))));
                    }
                }
                Some(b'!') => {
                    self.advance(1);
                    if let Some(bad) = self.skip_markup(start)? {
                        return Ok(Some(ParseEvent::Malformed(bad)));
                    }
                }
                Some(b'/') => {
                    if let Err(bad) = self.read_tag(start)? {
                        return Ok(Some(ParseEvent::Malformed(bad)));
                    }
                }
                Some(_) => {
                    if let Err(bad) = self.read_tag(start)? {
                        return Ok(Some(ParseEvent::Malformed(bad)));
                    }
                    let event = match std::str::from_utf8(&self.tag) {
                        Ok(body) => match parse_start_tag(body) {
                            Ok(element) => ParseEvent::Element(element),
                            Err(reason) => ParseEvent::Malformed(fragment(start, &reason)),
                        },
                        Err(_) => ParseEvent::Malformed(fragment(start, "tag is not valid UTF-8")),
                    };
                    return Ok(Some(event));
                }
            }
        }
    }
}

impl<R: BufRead> Iterator for ElementReader<R> {
    type Item = Result<ParseEvent, ImportError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(source) => {
                self.finished = true;
                Some(Err(ImportError::Source {
                    path: self.source_path.clone(),
                    source,
                }))
            }
        }
    }
}

fn fragment(offset: u64, reason: &str) -> MalformedFragment {
    MalformedFragment {
        offset,
        reason: reason.to_string(),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
}

fn is_valid_name(name: &str) -> bool {
    match name.chars().next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == ':' => {
            name.chars().all(is_name_char)
        }
        _ => false,
    }
}

/// Parse a start-tag body such as `Record type="X" value='1'/`
fn parse_start_tag(body: &str) -> Result<Element, String> {
    let trimmed = body.trim_end();
    let (body, self_closing) = match trimmed.strip_suffix('/') {
        Some(rest) => (rest, true),
        None => (trimmed, false),
    };

    let name_end = body
        .find(|c: char| c.is_ascii_whitespace())
        .unwrap_or(body.len());
    let name = &body[..name_end];
    if !is_valid_name(name) {
        return Err(format!("invalid element name '{}'", name));
    }

    let mut attributes = HashMap::new();
    let mut rest = &body[name_end..];

    loop {
        let after_ws = rest.trim_start();
        if after_ws.is_empty() {
            break;
        }
        if after_ws.len() == rest.len() {
            return Err("missing whitespace between attributes".to_string());
        }
        rest = after_ws;

        let key_end = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let key = &rest[..key_end];
        if !is_valid_name(key) {
            return Err(format!("invalid attribute name '{}'", key));
        }

        rest = rest[key_end..].trim_start();
        rest = rest
            .strip_prefix('=')
            .ok_or_else(|| format!("attribute '{}' has no value", key))?
            .trim_start();

        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Err(format!("value of attribute '{}' is not quoted", key)),
        };
        let value_end = rest[1..]
            .find(quote)
            .ok_or_else(|| format!("unterminated value for attribute '{}'", key))?;
        let raw = &rest[1..1 + value_end];

        attributes.insert(key.to_ascii_lowercase(), decode_entities(raw).into_owned());
        rest = &rest[value_end + 2..];
    }

    Ok(Element {
        name: name.to_string(),
        attributes,
        self_closing,
    })
}

/// Resolve the predefined and numeric character references.
///
/// Unknown references are kept verbatim.
fn decode_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let decoded = rest
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| resolve_entity(&rest[1..semi]).map(|c| (c, semi)));

        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse::<u32>().ok()?
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::{BufReader, Cursor, Read};

    fn events(input: &str) -> Vec<ParseEvent> {
        ElementReader::new(Cursor::new(input.as_bytes().to_vec()))
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    fn element_names(events: &[ParseEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                ParseEvent::Element(el) => Some(el.name.as_str()),
                _ => None,
            })
            .collect()
    }

    fn malformed_count(events: &[ParseEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ParseEvent::Malformed(_)))
            .count()
    }

    const EXPORT_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE HealthData [
<!-- HealthKit Export Version: 13 -->
<!ELEMENT HealthData (ExportDate,Me,(Record|Workout)*)>
<!ATTLIST HealthData
  locale CDATA #REQUIRED
>
<!ATTLIST Record
  type          CDATA #REQUIRED
  unit          CDATA #IMPLIED
  value         CDATA #IMPLIED
>
]>
<HealthData locale="en_US">
 <ExportDate value="2024-01-20 10:00:00 -0500"/>
"#;

    #[test]
    fn test_skips_prolog_and_doctype() {
        let input = format!(
            "{}{}",
            EXPORT_HEAD,
            r#" <Record type="HKQuantityTypeIdentifierStepCount" value="42"/>
</HealthData>"#
        );
        let events = events(&input);

        assert_eq!(malformed_count(&events), 0);
        assert_eq!(element_names(&events), vec!["HealthData", "ExportDate", "Record"]);
    }

    #[test]
    fn test_attributes_are_lowercased_and_decoded() {
        let events = events(
            r#"<Record sourceName="Tom&apos;s Watch &amp; Phone" startDate='2024-01-15 08:00:00 -0500' note="&#65;&#x42;&bogus;"/>"#,
        );

        match &events[0] {
            ParseEvent::Element(el) => {
                assert!(el.self_closing);
                assert_eq!(el.attr("sourcename"), Some("Tom's Watch & Phone"));
                assert_eq!(el.attr("startdate"), Some("2024-01-15 08:00:00 -0500"));
                assert_eq!(el.attr("note"), Some("AB&bogus;"));
                assert_eq!(el.attr("sourceName"), None);
            }
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_quoted_gt_does_not_close_tag() {
        let events = events(r#"<Record type="a>b" value="1"/>"#);
        match &events[0] {
            ParseEvent::Element(el) => assert_eq!(el.attr("type"), Some("a>b")),
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_children_are_emitted() {
        let events = events(
            r#"<Record type="HKQuantityTypeIdentifierHeartRate" value="60">
  <MetadataEntry key="HKMetadataKeyHeartRateMotionContext" value="0"/>
</Record>"#,
        );
        assert_eq!(element_names(&events), vec!["Record", "MetadataEntry"]);
    }

    #[test]
    fn test_recovers_from_unterminated_quote() {
        let events = events(
            r#"<Record type="A value="1"/>
<Record type="B" value="2"/>"#,
        );

        assert_eq!(malformed_count(&events), 1);
        assert_eq!(element_names(&events), vec!["Record"]);
        match events.last() {
            Some(ParseEvent::Element(el)) => assert_eq!(el.attr("type"), Some("B")),
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_recovers_from_bad_attribute_syntax() {
        let events = events(
            r#"<Record type=A/><Record type"B"/><Record 9x="1"/><Record type="C"/>"#,
        );
        assert_eq!(malformed_count(&events), 3);
        assert_eq!(element_names(&events), vec!["Record"]);
    }

    #[test]
    fn test_truncated_input_reports_fragment() {
        let events = events(r#"<Record type="A"/><Record type="B" val"#);
        assert_eq!(element_names(&events), vec!["Record"]);
        match events.last() {
            Some(ParseEvent::Malformed(f)) => {
                assert_eq!(f.offset, 18);
                assert!(f.reason.contains("end of input"));
            }
            other => panic!("expected malformed fragment, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_is_a_fragment() {
        let mut bytes = br#"<Record type=""#.to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe]);
        bytes.extend_from_slice(br#""/><Record type="ok"/>"#);

        let events: Vec<ParseEvent> = ElementReader::new(Cursor::new(bytes))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(malformed_count(&events), 1);
        assert_eq!(element_names(&events), vec!["Record"]);
    }

    #[test]
    fn test_oversized_tag_is_discarded() {
        let huge = "x".repeat(MAX_TAG_BYTES + 10);
        let input = format!(r#"<Record value="{}"/><Record type="ok"/>"#, huge);
        let events = events(&input);

        assert_eq!(malformed_count(&events), 1);
        assert_eq!(element_names(&events), vec!["Record"]);
    }

    #[test]
    fn test_small_read_buffer_matches_large() {
        let input = format!(
            "{}{}",
            EXPORT_HEAD,
            r#"<Record type="X" value="1"/><!-- a -- comment --><Record type="Y" value="2"/>"#
        );
        let tiny = BufReader::with_capacity(3, Cursor::new(input.clone().into_bytes()));
        let small: Vec<ParseEvent> = ElementReader::new(tiny).collect::<Result<_, _>>().unwrap();

        assert_eq!(small, events(&input));
    }

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.served {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
            self.served = true;
            let data = br#"<Record type="A"/>"#;
            buf[..data.len()].copy_from_slice(data);
            Ok(data.len())
        }
    }

    #[test]
    fn test_io_failure_ends_stream_with_error() {
        let reader = BufReader::with_capacity(64, FailingReader { served: false });
        let mut parser = ElementReader::new(reader).with_source_path("export.xml");

        assert!(matches!(parser.next(), Some(Ok(ParseEvent::Element(_)))));
        assert!(matches!(parser.next(), Some(Err(ImportError::Source { .. }))));
        assert!(parser.next().is_none());
    }
}
