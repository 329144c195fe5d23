//! Owned XML element tree
//!
//! Project documents are parsed into a mutable tree of [`Element`]s so that
//! pruning and merging can remove, clone and splice whole subtrees.
//! Element matching is done on the local name only (ASCII case-insensitive),
//! so a namespace prefix never hides an element from a lookup.

use std::borrow::Cow;

use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesCData, BytesDecl, BytesEnd, BytesPI, BytesStart, BytesText, Event};
use quick_xml::name::QName;
use quick_xml::{Reader, Writer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML syntax error at byte {position}: {source}")]
    Syntax {
        position: u64,
        #[source]
        source: quick_xml::Error,
    },

    #[error("Unexpected closing tag </{0}>")]
    UnexpectedClose(String),

    #[error("Unclosed element <{0}>")]
    Unclosed(String),

    #[error("Document has no root element")]
    NoRoot,

    #[error("Document is not valid UTF-8: {0}")]
    Encoding(#[from] std::str::Utf8Error),

    #[error("Failed to write XML: {0}")]
    Write(String),
}

/// A child of an [`Element`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    CData(String),
    Comment(String),
    ProcessingInstruction(String),
}

impl Node {
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    pub fn as_element_mut(&mut self) -> Option<&mut Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }
}

/// An XML element with its prefix kept apart from the local name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub prefix: Option<String>,
    pub name: String,
    /// Attributes in document order, keyed by their qualified name
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    /// Creates an empty element; `prefix:local` names are split
    pub fn new(name: &str) -> Self {
        let (prefix, local) = match name.split_once(':') {
            Some((prefix, local)) => (Some(prefix.to_string()), local),
            None => (None, name),
        };

        Self {
            prefix,
            name: local.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attr(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Builder-style text setter
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    /// Builder-style child appender
    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    pub fn local_name(&self) -> &str {
        &self.name
    }

    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.name),
            None => self.name.clone(),
        }
    }

    /// Returns true if the local name matches, ignoring prefix and ASCII case
    pub fn is(&self, local: &str) -> bool {
        self.name.eq_ignore_ascii_case(local)
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((key.to_string(), value)),
        }
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(Node::Element(child));
    }

    /// Replaces all text content of this element with a single text node
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children
            .retain(|n| !matches!(n, Node::Text(_) | Node::CData(_)));
        self.children.insert(0, Node::Text(text.into()));
    }

    /// Same name and attributes, no children
    pub fn shallow_clone(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            children: Vec::new(),
        }
    }

    /// Direct child elements
    pub fn children(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    pub fn children_mut(&mut self) -> impl Iterator<Item = &mut Element> {
        self.children.iter_mut().filter_map(Node::as_element_mut)
    }

    /// First direct child with the given local name
    pub fn child(&self, local: &str) -> Option<&Element> {
        self.children().find(|c| c.is(local))
    }

    pub fn child_mut(&mut self, local: &str) -> Option<&mut Element> {
        self.children_mut().find(|c| c.is(local))
    }

    /// Trimmed text of the first direct child with the given local name
    pub fn child_text(&self, local: &str) -> Option<String> {
        self.child(local).map(|c| c.text().trim().to_string())
    }

    /// Concatenated text of this element and all its descendants
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) | Node::CData(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
                Node::Comment(_) | Node::ProcessingInstruction(_) => {}
            }
        }
    }

    /// Pre-order iterator over all descendant elements (excluding self)
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants {
            stack: vec![self.children.iter()],
        }
    }

    /// First descendant with the given local name
    pub fn find(&self, local: &str) -> Option<&Element> {
        self.descendants().find(|e| e.is(local))
    }

    /// All descendants with the given local name, in document order
    pub fn find_all<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.descendants().filter(move |e| e.is(local))
    }

    pub fn find_mut(&mut self, local: &str) -> Option<&mut Element> {
        for node in &mut self.children {
            if let Node::Element(el) = node {
                if el.is(local) {
                    return Some(el);
                }
                if let Some(found) = el.find_mut(local) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Calls `f` on every descendant with the given local name.
    /// Matched elements are not searched further.
    pub fn visit_mut<F: FnMut(&mut Element)>(&mut self, local: &str, f: &mut F) {
        for child in self.children_mut() {
            if child.is(local) {
                f(child);
            } else {
                child.visit_mut(local, f);
            }
        }
    }

    /// Keeps only the child elements accepted by `keep`; text and comments stay.
    /// Returns the number of removed elements.
    pub fn retain_children<F: FnMut(&Element) -> bool>(&mut self, mut keep: F) -> usize {
        let before = self.children.len();
        self.children.retain(|node| match node {
            Node::Element(el) => keep(el),
            _ => true,
        });
        before - self.children.len()
    }

    /// Removes every descendant element matching `pred`, at any depth.
    /// Returns the number of removed subtrees.
    pub fn remove_descendants<F: FnMut(&Element) -> bool>(&mut self, pred: &mut F) -> usize {
        let mut removed = self.retain_children(|el| !pred(el));
        for child in self.children_mut() {
            removed += child.remove_descendants(pred);
        }
        removed
    }

    /// Rewrites every attribute value and text node of the subtree.
    ///
    /// `rewrite` returns `None` to leave a value untouched. Returns the
    /// number of rewritten values.
    pub fn rewrite_values<F: Fn(&str) -> Option<String>>(&mut self, rewrite: &F) -> usize {
        let mut count = 0;
        for (_, value) in &mut self.attributes {
            if let Some(new_value) = rewrite(value) {
                *value = new_value;
                count += 1;
            }
        }
        for node in &mut self.children {
            match node {
                Node::Element(el) => count += el.rewrite_values(rewrite),
                Node::Text(t) | Node::CData(t) => {
                    if let Some(new_text) = rewrite(t) {
                        *t = new_text;
                        count += 1;
                    }
                }
                Node::Comment(_) | Node::ProcessingInstruction(_) => {}
            }
        }
        count
    }

    /// Iterates over every attribute value and text node of the subtree
    pub fn values(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_values(&mut out);
        out
    }

    fn collect_values<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.extend(self.attributes.iter().map(|(_, v)| v.as_str()));
        for node in &self.children {
            match node {
                Node::Element(el) => el.collect_values(out),
                Node::Text(t) | Node::CData(t) => out.push(t),
                Node::Comment(_) | Node::ProcessingInstruction(_) => {}
            }
        }
    }
}

/// Iterator returned by [`Element::descendants`]
pub struct Descendants<'a> {
    stack: Vec<std::slice::Iter<'a, Node>>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<&'a Element> {
        while let Some(top) = self.stack.last_mut() {
            match top.next() {
                Some(Node::Element(el)) => {
                    self.stack.push(el.children.iter());
                    return Some(el);
                }
                Some(_) => continue,
                None => {
                    self.stack.pop();
                }
            }
        }
        None
    }
}

/// A parsed document: the root element plus its DOCTYPE, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    pub doctype: Option<String>,
    pub root: Element,
}

impl XmlDocument {
    pub fn new(root: Element) -> Self {
        Self {
            doctype: None,
            root,
        }
    }

    /// Parses UTF-8 bytes, tolerating a leading byte-order mark
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, XmlError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        Self::parse(std::str::from_utf8(bytes)?)
    }

    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<Element> = Vec::new();
        let mut root: Option<Element> = None;
        let mut doctype = None;

        loop {
            let event = reader.read_event().map_err(|source| XmlError::Syntax {
                position: reader.buffer_position() as u64,
                source,
            })?;

            match event {
                Event::Start(start) => {
                    stack.push(element_from_start(&start, &reader)?);
                }
                Event::Empty(start) => {
                    let element = element_from_start(&start, &reader)?;
                    attach(&mut stack, &mut root, element);
                }
                Event::End(end) => {
                    let element = stack.pop().ok_or_else(|| {
                        XmlError::UnexpectedClose(String::from_utf8_lossy(end.name().as_ref()).into_owned())
                    })?;
                    attach(&mut stack, &mut root, element);
                }
                Event::Text(text) => {
                    if let Some(parent) = stack.last_mut() {
                        let value = text.unescape().map_err(|e| XmlError::Syntax {
                            position: reader.buffer_position() as u64,
                            source: e.into(),
                        })?;
                        parent.children.push(Node::Text(value.into_owned()));
                    }
                }
                Event::CData(data) => {
                    if let Some(parent) = stack.last_mut() {
                        let value = String::from_utf8_lossy(&data.into_inner()).into_owned();
                        parent.children.push(Node::CData(value));
                    }
                }
                Event::Comment(comment) => {
                    if let Some(parent) = stack.last_mut() {
                        let value = String::from_utf8_lossy(&comment).into_owned();
                        parent.children.push(Node::Comment(value));
                    }
                }
                Event::PI(pi) => {
                    if let Some(parent) = stack.last_mut() {
                        let value = String::from_utf8_lossy(&pi).into_owned();
                        parent.children.push(Node::ProcessingInstruction(value));
                    }
                }
                Event::DocType(text) => {
                    doctype = Some(String::from_utf8_lossy(&text).trim().to_string());
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(XmlError::Unclosed(open.qualified_name()));
        }

        let root = root.ok_or(XmlError::NoRoot)?;
        Ok(Self { doctype, root })
    }

    /// Serializes with an UTF-8 declaration
    pub fn to_bytes(&self) -> Result<Vec<u8>, XmlError> {
        let mut writer = Writer::new(Vec::new());

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(write_error)?;
        writer.get_mut().push(b'\n');

        if let Some(doctype) = &self.doctype {
            writer
                .write_event(Event::DocType(BytesText::from_escaped(doctype.as_str())))
                .map_err(write_error)?;
            writer.get_mut().push(b'\n');
        }

        write_element(&mut writer, &self.root)?;
        writer.get_mut().push(b'\n');

        Ok(writer.into_inner())
    }
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

fn element_from_start(start: &BytesStart, reader: &Reader<&[u8]>) -> Result<Element, XmlError> {
    let syntax = |source: quick_xml::Error| XmlError::Syntax {
        position: reader.buffer_position() as u64,
        source,
    };

    let qname = start.name();
    let mut element = Element {
        prefix: qname
            .prefix()
            .map(|p| String::from_utf8_lossy(p.as_ref()).into_owned()),
        name: String::from_utf8_lossy(qname.local_name().as_ref()).into_owned(),
        attributes: Vec::new(),
        children: Vec::new(),
    };

    for attr in start.attributes() {
        let attr = attr.map_err(|e| syntax(e.into()))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| syntax(e.into()))?
            .into_owned();
        element.attributes.push((key, value));
    }

    Ok(element)
}

fn write_element(writer: &mut Writer<Vec<u8>>, element: &Element) -> Result<(), XmlError> {
    let name = element.qualified_name();
    let mut start = BytesStart::new(name.as_str());
    for (key, value) in &element.attributes {
        start.push_attribute(Attribute {
            key: QName(key.as_bytes()),
            value: Cow::Owned(escape_attribute(value).into_bytes()),
        });
    }

    if element.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(write_error);
    }

    writer.write_event(Event::Start(start)).map_err(write_error)?;
    for node in &element.children {
        match node {
            Node::Element(child) => write_element(writer, child)?,
            Node::Text(text) => writer
                .write_event(Event::Text(BytesText::new(text)))
                .map_err(write_error)?,
            Node::CData(text) => writer
                .write_event(Event::CData(BytesCData::new(text.as_str())))
                .map_err(write_error)?,
            Node::Comment(text) => writer
                .write_event(Event::Comment(BytesText::from_escaped(text.as_str())))
                .map_err(write_error)?,
            Node::ProcessingInstruction(text) => writer
                .write_event(Event::PI(BytesPI::new(text.as_str())))
                .map_err(write_error)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new(name.as_str())))
        .map_err(write_error)
}

/// Attribute escaping that keeps line breaks and tabs as character references,
/// since parsers normalize raw whitespace inside attribute values.
fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#xa;"),
            '\r' => out.push_str("&#xd;"),
            '\t' => out.push_str("&#x9;"),
            _ => out.push(ch),
        }
    }
    out
}

fn write_error<E: std::fmt::Display>(e: E) -> XmlError {
    XmlError::Write(e.to_string())
}
