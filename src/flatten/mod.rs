//! Flattening one content document into an ordered list of typed elements.
//!
//! The markup is parsed with html5ever into an arena [`Dom`], then walked in
//! document order with an explicit stack. Content blocks (`p`, `h1`-`h6`,
//! `li`, `blockquote`, ...) become elements; structural containers only
//! split text runs; inline formatting is unwrapped.

mod dom;
mod sink;

use html5ever::driver::ParseOpts;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{ns, parse_document};

use crate::error::{Error, Result};
use crate::model::ElementKind;
use crate::util::{decode_text, extract_xml_encoding, parent_dir, resolve_href};

pub use dom::{Dom, NodeData, NodeId};
pub use sink::DomSink;

/// One content element before word tables are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatElement {
    pub kind: ElementKind,
    pub text: String,
    /// Resolved archive path of an image placeholder.
    pub source: Option<String>,
    pub alt: Option<String>,
}

impl FlatElement {
    fn text(kind: ElementKind, text: String) -> Self {
        Self {
            kind,
            text,
            source: None,
            alt: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatDocument {
    /// Cleaned `<title>` of the document, if any.
    pub head_title: Option<String>,
    pub elements: Vec<FlatElement>,
}

impl FlatDocument {
    /// Text of the first heading, cut to `max_chars`.
    pub fn first_heading(&self, max_chars: usize) -> Option<String> {
        self.elements
            .iter()
            .find(|e| matches!(e.kind, ElementKind::Heading(_)) && !e.text.is_empty())
            .map(|e| e.text.chars().take(max_chars).collect::<String>().trim().to_string())
    }
}

/// Parse the markup of archive entry `entry` into elements. Image sources are
/// resolved relative to the entry's directory.
pub fn flatten(bytes: &[u8], entry: &str) -> Result<FlatDocument> {
    let malformed = |reason: &str| Error::MalformedMarkup {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };

    // Checked after decoding: UTF-16 text is full of NUL bytes.
    let text = decode_text(bytes, extract_xml_encoding(bytes));
    if text.chars().all(char::is_whitespace) {
        return Err(malformed("document is empty"));
    }
    if memchr::memchr(0, text.as_bytes()).is_some() {
        return Err(malformed("document contains NUL bytes"));
    }
    if memchr::memchr(b'<', text.as_bytes()).is_none() {
        return Err(malformed("document contains no markup"));
    }
    let dom = parse_document(DomSink::new(), ParseOpts::default())
        .one(StrTendril::from_slice(&text))
        .into_dom();

    let head_title = dom
        .find_by_tag("title")
        .map(|t| clean_text(&dom.text_content(t)))
        .filter(|t| !t.is_empty());

    let mut walker = Walker::new(&dom, parent_dir(entry));
    walker.walk(dom.find_by_tag("body").unwrap_or(dom.document()));

    Ok(FlatDocument {
        head_title,
        elements: walker.elements,
    })
}

/// Remove invisible artifacts and collapse whitespace runs.
pub fn clean_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.chars() {
        if matches!(c, '\u{FFFC}' | '\u{FFFD}' | '\u{200B}' | '\u{AD}') {
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(c);
    }
    out
}

enum Frame {
    Enter(NodeId),
    LeaveBlock,
    LeaveContainer,
}

struct Walker<'a> {
    dom: &'a Dom,
    base_dir: &'a str,
    elements: Vec<FlatElement>,
    /// Text outside any content block.
    loose: String,
    /// Open content blocks, innermost last.
    blocks: Vec<(ElementKind, String)>,
}

impl<'a> Walker<'a> {
    fn new(dom: &'a Dom, base_dir: &'a str) -> Self {
        Self {
            dom,
            base_dir,
            elements: Vec::new(),
            loose: String::new(),
            blocks: Vec::new(),
        }
    }

    fn walk(&mut self, root: NodeId) {
        let mut stack = vec![Frame::Enter(root)];
        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => self.enter(id, &mut stack),
                Frame::LeaveBlock => {
                    self.flush();
                    self.blocks.pop();
                }
                Frame::LeaveContainer => self.flush(),
            }
        }
        self.flush();
    }

    fn enter(&mut self, id: NodeId, stack: &mut Vec<Frame>) {
        let dom = self.dom;
        let Some(node) = dom.get(id) else {
            return;
        };
        let name = match &node.data {
            NodeData::Text(text) => {
                self.buffer().push_str(text);
                return;
            }
            NodeData::Element { name, .. } => name,
            NodeData::Document => {
                self.push_children(id, stack);
                return;
            }
            NodeData::Other => return,
        };

        let tag = name.local.as_ref();
        if SKIPPED_TAGS.contains(&tag) || self.is_hidden(id) {
            return;
        }

        match tag {
            "br" => self.buffer().push(' '),
            "img" => self.image(id),
            "image" if name.ns == ns!(svg) => self.image(id),
            "svg" => self.svg(id),
            _ => {
                if let Some(kind) = block_kind(tag) {
                    self.flush();
                    self.blocks.push((kind, String::new()));
                    stack.push(Frame::LeaveBlock);
                } else if CONTAINER_TAGS.contains(&tag) {
                    self.flush();
                    stack.push(Frame::LeaveContainer);
                }
                self.push_children(id, stack);
            }
        }
    }

    fn push_children(&self, id: NodeId, stack: &mut Vec<Frame>) {
        let start = stack.len();
        stack.extend(self.dom.children(id).map(Frame::Enter));
        stack[start..].reverse();
    }

    fn buffer(&mut self) -> &mut String {
        match self.blocks.last_mut() {
            Some((_, text)) => text,
            None => &mut self.loose,
        }
    }

    /// Emit the pending text of the innermost open block (or loose text).
    fn flush(&mut self) {
        let (kind, buffer) = match self.blocks.last_mut() {
            Some((kind, text)) => (*kind, text),
            None => (ElementKind::Other, &mut self.loose),
        };
        let text = clean_text(buffer);
        buffer.clear();
        if !text.is_empty() {
            self.elements.push(FlatElement::text(kind, text));
        }
    }

    fn image(&mut self, id: NodeId) {
        self.flush();
        let source = self
            .dom
            .attr(id, "src")
            .or_else(|| self.dom.attr(id, "href"))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| resolve_href(self.base_dir, s));
        let alt = self
            .dom
            .attr(id, "alt")
            .map(clean_text)
            .filter(|a| !a.is_empty());
        self.elements.push(FlatElement {
            kind: ElementKind::Image,
            text: String::new(),
            source,
            alt,
        });
    }

    /// Inline SVG contributes only its embedded raster images.
    fn svg(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if node != id && self.dom.tag(node) == Some("image") {
                self.image(node);
                continue;
            }
            let start = stack.len();
            stack.extend(self.dom.children(node));
            stack[start..].reverse();
        }
    }

    fn is_hidden(&self, id: NodeId) -> bool {
        let attr = |name| self.dom.attr(id, name);
        attr("hidden").is_some()
            || attr("aria-hidden").is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
            || attr("role").is_some_and(|v| v.split_ascii_whitespace().any(|r| r == "doc-pagebreak"))
            || attr("epub:type").is_some_and(|v| v.split_ascii_whitespace().any(|t| t == "pagebreak"))
    }
}

const SKIPPED_TAGS: &[&str] = &["head", "title", "script", "style", "template", "noscript"];

const CONTAINER_TAGS: &[&str] = &[
    "html", "body", "div", "section", "article", "aside", "nav", "header", "footer", "main",
    "figure", "ul", "ol", "dl", "menu", "table", "thead", "tbody", "tfoot", "tr", "hr",
    "address", "details", "summary", "fieldset", "form", "center", "hgroup",
];

fn block_kind(tag: &str) -> Option<ElementKind> {
    Some(match tag {
        "p" | "pre" | "dd" => ElementKind::Paragraph,
        "h1" => ElementKind::Heading(1),
        "h2" => ElementKind::Heading(2),
        "h3" => ElementKind::Heading(3),
        "h4" => ElementKind::Heading(4),
        "h5" => ElementKind::Heading(5),
        "h6" => ElementKind::Heading(6),
        "li" => ElementKind::ListItem,
        "blockquote" => ElementKind::BlockQuote,
        "dt" | "figcaption" | "td" | "th" | "caption" => ElementKind::Other,
        _ => return None,
    })
}
