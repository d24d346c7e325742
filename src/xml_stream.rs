use std::borrow::Cow;

/// One parse event produced by [XmlStream].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlEvent {
    pub kind: XmlEventKind,
    /// Element the event belongs to
    pub node: String,
    /// Ancestor chain at the time of the event, outermost first, including `node`
    pub path: Vec<String>,
    /// Trimmed character data (text events) or the full inner character data
    /// of the element (end events)
    pub text: String,
    /// Raw attribute substring of a start tag, exactly as it appeared
    pub attrs: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlEventKind {
    StartTag,
    Text,
    EndTag,
}

/// Incremental XML parser: bytes go in as they arrive, events come out one
/// at a time.
///
/// The stream frames one complete construct (tag, comment, processing
/// instruction or text run) before decoding it, so it never over-reads: a
/// partial trailing tag stays buffered until more bytes arrive. Consumed
/// bytes are dropped after every event, so memory is bounded by the longest
/// single construct. Comments and processing instructions are skipped.
/// Self-closing tags produce a single start event and do not push the
/// element path. Entity decoding is left to the caller; [decode_entities]
/// covers the predefined five.
#[derive(Debug, Default)]
pub struct XmlStream {
    buf: Vec<u8>,
    path: Vec<String>,
    // per-depth character data, fed into the end-tag event
    inner_text: Vec<String>,
    poisoned: bool,
}

impl XmlStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of input.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Finish parsing: any buffered partial input is discarded.
    pub fn end(&mut self) {
        self.buf.clear();
        self.path.clear();
        self.inner_text.clear();
        self.poisoned = false;
    }

    /// Advance until one event can be returned. `None` means the buffered
    /// input holds no complete construct (or the input was malformed, after
    /// which the stream stays inert until [XmlStream::end]).
    pub fn next_event(&mut self) -> Option<XmlEvent> {
        loop {
            if self.poisoned {
                return None;
            }
            let construct = self.frame_construct()?;
            match construct {
                Construct::Skip(len) => {
                    self.consume(len);
                }
                Construct::Text(len) => {
                    let raw = String::from_utf8_lossy(&self.buf[..len]).into_owned();
                    self.consume(len);
                    if let Some(acc) = self.inner_text.last_mut() {
                        acc.push_str(&raw);
                    }
                    let trimmed = raw.trim();
                    if !trimmed.is_empty() && !self.path.is_empty() {
                        let node = self.path.last().cloned().unwrap_or_default();
                        return Some(XmlEvent {
                            kind: XmlEventKind::Text,
                            node,
                            path: self.path.clone(),
                            text: trimmed.to_string(),
                            attrs: String::new(),
                        });
                    }
                }
                Construct::StartTag { len, self_closing } => {
                    let inner = String::from_utf8_lossy(&self.buf[1..len - 1]).into_owned();
                    self.consume(len);
                    let inner = inner.strip_suffix('/').unwrap_or(&inner).trim().to_string();
                    let (name, attrs) = match inner.split_once(char::is_whitespace) {
                        Some((name, attrs)) => (name.to_string(), attrs.trim().to_string()),
                        None => (inner, String::new()),
                    };
                    if name.is_empty() {
                        self.poisoned = true;
                        return None;
                    }
                    let mut path = self.path.clone();
                    path.push(name.clone());
                    if !self_closing {
                        self.path.push(name.clone());
                        self.inner_text.push(String::new());
                    }
                    return Some(XmlEvent {
                        kind: XmlEventKind::StartTag,
                        node: name,
                        path,
                        text: String::new(),
                        attrs,
                    });
                }
                Construct::EndTag(len) => {
                    let name = String::from_utf8_lossy(&self.buf[2..len - 1])
                        .trim()
                        .to_string();
                    self.consume(len);
                    let path = self.path.clone();
                    match self.path.pop() {
                        Some(open) if open == name => {}
                        _ => {
                            self.poisoned = true;
                            return None;
                        }
                    }
                    let text = self.inner_text.pop().unwrap_or_default();
                    // inner text also belongs to the parent's inner content
                    if let Some(parent) = self.inner_text.last_mut() {
                        parent.push_str(&text);
                    }
                    return Some(XmlEvent {
                        kind: XmlEventKind::EndTag,
                        node: name,
                        path,
                        text: text.trim().to_string(),
                        attrs: String::new(),
                    });
                }
            }
        }
    }

    fn consume(&mut self, len: usize) {
        self.buf.drain(..len);
    }

    /// Identify the next complete construct at the head of the buffer.
    fn frame_construct(&self) -> Option<Construct> {
        let buf = &self.buf;
        if buf.is_empty() {
            return None;
        }
        if buf[0] != b'<' {
            // text run is only complete once the next tag begins
            let lt = buf.iter().position(|&b| b == b'<')?;
            return Some(Construct::Text(lt));
        }
        if buf.starts_with(b"<!--") {
            let end = find_subslice(buf, b"-->")?;
            return Some(Construct::Skip(end + 3));
        }
        if buf.starts_with(b"<?") {
            let end = find_subslice(buf, b"?>")?;
            return Some(Construct::Skip(end + 2));
        }
        if buf.starts_with(b"<!") {
            let end = find_unquoted_gt(buf)?;
            return Some(Construct::Skip(end + 1));
        }
        let end = find_unquoted_gt(buf)?;
        if buf.starts_with(b"</") {
            return Some(Construct::EndTag(end + 1));
        }
        let self_closing = buf[end - 1] == b'/';
        Some(Construct::StartTag {
            len: end + 1,
            self_closing,
        })
    }
}

enum Construct {
    Text(usize),
    StartTag { len: usize, self_closing: bool },
    EndTag(usize),
    Skip(usize),
}

/// Find the closing `>` of a tag, honoring quotes: attribute values may
/// contain `>` inside single or double quotes.
fn find_unquoted_gt(buf: &[u8]) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (i, &b) in buf.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => (),
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(i),
                _ => (),
            },
        }
    }
    None
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Replace the five predefined entities. Unknown entities are left alone.
pub fn decode_entities(value: &str) -> Cow<'_, str> {
    if !value.contains('&') {
        return Cow::Borrowed(value);
    }
    let decoded = value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&");
    Cow::Owned(decoded)
}

#[cfg(test)]
mod tests {
    use super::{decode_entities, XmlEventKind, XmlStream};

    #[test]
    fn leaf_events_in_document_order() {
        let mut stream = XmlStream::new();
        stream.push(b"<?xml version=\"1.0\"?><root><a>one</a><!-- skip --><b attr=\"x>y\">two</b></root>");
        let mut leaves = Vec::new();
        while let Some(event) = stream.next_event() {
            if event.kind == XmlEventKind::EndTag && !event.text.is_empty() {
                leaves.push((event.path.join("/"), event.text));
            }
        }
        assert_eq!(
            leaves,
            vec![
                ("root/a".to_string(), "one".to_string()),
                ("root/b".to_string(), "two".to_string()),
            ]
        );
    }

    #[test]
    fn partial_tag_stays_buffered() {
        let mut stream = XmlStream::new();
        stream.push(b"<root><a>v</a");
        let start = stream.next_event().unwrap();
        assert_eq!(start.node, "root");
        let start = stream.next_event().unwrap();
        assert_eq!(start.node, "a");
        let text = stream.next_event().unwrap();
        assert_eq!(text.kind, XmlEventKind::Text);
        assert_eq!(text.text, "v");
        // closing tag is incomplete
        assert!(stream.next_event().is_none());
        stream.push(b"></root>");
        let end = stream.next_event().unwrap();
        assert_eq!(end.kind, XmlEventKind::EndTag);
        assert_eq!(end.node, "a");
        assert_eq!(end.text, "v");
        let end = stream.next_event().unwrap();
        assert_eq!(end.node, "root");
    }

    #[test]
    fn self_closing_tag_does_not_push_path() {
        let mut stream = XmlStream::new();
        stream.push(b"<root><empty attr=\"1\"/><a>x</a></root>");
        let root = stream.next_event().unwrap();
        assert_eq!(root.node, "root");
        let empty = stream.next_event().unwrap();
        assert_eq!(empty.kind, XmlEventKind::StartTag);
        assert_eq!(empty.node, "empty");
        assert_eq!(empty.attrs, "attr=\"1\"");
        assert_eq!(empty.path, vec!["root".to_string(), "empty".to_string()]);
        let a = stream.next_event().unwrap();
        assert_eq!(a.node, "a");
        assert_eq!(a.path, vec!["root".to_string(), "a".to_string()]);
    }

    #[test]
    fn attributes_kept_raw() {
        let mut stream = XmlStream::new();
        stream.push(b"<item id=\"1\" restricted=\"0\">t</item>");
        let start = stream.next_event().unwrap();
        assert_eq!(start.attrs, "id=\"1\" restricted=\"0\"");
    }

    #[test]
    fn mismatched_end_tag_stops_stream() {
        let mut stream = XmlStream::new();
        stream.push(b"<a><b></a>");
        stream.next_event().unwrap();
        stream.next_event().unwrap();
        assert!(stream.next_event().is_none());
        // inert until reset
        stream.push(b"<c/>");
        assert!(stream.next_event().is_none());
        stream.end();
        stream.push(b"<c>1</c>");
        assert!(stream.next_event().is_some());
    }

    #[test]
    fn printer_output_round_trips_through_stream() {
        use quick_xml::events::{BytesStart, BytesText, Event};

        // emit a document with the writer side, then replay it event by event
        let mut w = quick_xml::Writer::new(Vec::new());
        let root = BytesStart::new("scpd");
        let root_end = root.to_end().into_owned();
        w.write_event(Event::Start(root)).unwrap();
        w.create_element("name")
            .write_text_content(BytesText::new("Play"))
            .unwrap();
        w.create_element("direction")
            .write_text_content(BytesText::new("in"))
            .unwrap();
        w.write_event(Event::End(root_end)).unwrap();
        let printed = w.into_inner();

        let mut stream = XmlStream::new();
        stream.push(&printed);
        let mut leaves = Vec::new();
        while let Some(event) = stream.next_event() {
            if event.kind == XmlEventKind::EndTag && !event.text.is_empty() {
                leaves.push((event.path.join("/"), event.text));
            }
        }
        assert_eq!(
            leaves,
            vec![
                ("scpd/name".to_string(), "Play".to_string()),
                ("scpd/direction".to_string(), "in".to_string()),
            ]
        );
    }

    #[test]
    fn decodes_predefined_entities() {
        assert_eq!(
            decode_entities("&lt;a&gt; &amp; &quot;b&quot;&apos;"),
            "<a> & \"b\"'"
        );
    }
}
