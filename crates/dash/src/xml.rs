//! A small owned element tree built from `quick-xml` events.
//!
//! MPD processing needs parent/child navigation (inheritance of BaseURL and
//! segment addressing), which is awkward on a pure event stream.

use media_types::ManifestError;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    /// Local name, namespace prefix stripped.
    pub name: String,
    attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
    text: String,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Trimmed text content of this element.
    pub fn text(&self) -> &str {
        self.text.trim()
    }

    /// Direct children with the given local name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// First direct child with the given local name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    /// True if this element or any descendant has the given local name.
    pub fn contains(&self, name: &str) -> bool {
        self.name == name || self.children.iter().any(|c| c.contains(name))
    }
}

fn parse_failed(context: &str, err: impl std::fmt::Display) -> ManifestError {
    ManifestError::parse_failed(format!("{context}: {err}"))
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, ManifestError> {
    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(|e| parse_failed("malformed attribute", e))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr
            .unescape_value()
            .map_err(|e| parse_failed("malformed attribute value", e))?;
        attributes.push((key, value.into_owned()));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
        text: String::new(),
    })
}

/// Parses an XML document and returns its root element.
pub fn parse_document(xml: &str) -> Result<Element, ManifestError> {
    let mut reader = Reader::from_str(xml.trim_start_matches('\u{feff}'));
    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| parse_failed("invalid XML", e))?;

        match event {
            Event::Start(ref e) => stack.push(element_from(e)?),
            Event::Empty(ref e) => {
                let element = element_from(e)?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::End(_) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| ManifestError::parse_failed("unbalanced closing tag"))?;
                attach(&mut stack, &mut root, element)?;
            }
            Event::Text(ref t) => {
                if let Some(top) = stack.last_mut() {
                    let text = t.unescape().map_err(|e| parse_failed("invalid text", e))?;
                    top.text.push_str(&text);
                }
            }
            Event::CData(ref c) => {
                if let Some(top) = stack.last_mut() {
                    let bytes: &[u8] = c;
                    top.text.push_str(&String::from_utf8_lossy(bytes));
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(ManifestError::parse_failed("unexpected end of document"));
    }
    root.ok_or_else(|| ManifestError::parse_failed("document has no root element"))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> Result<(), ManifestError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(ManifestError::parse_failed("multiple root elements")),
    }
    Ok(())
}
