//! Immutable snapshots of measured element trees.
//!
//! The measurement step (owned by the host) produces a [`ContentNode`] tree,
//! either directly (it is `serde`-deserializable, so JSON works) or as an
//! XHTML document whose elements carry their measured box as `data-*`
//! attributes:
//!
//! ```text
//! <article data-line-height="20" data-outer-width="300">
//!   <p data-outer-height="60" data-margin-bottom="20">Hello</p>
//!   <figure class="required">
//!     <img data-sizes="onecolumn" data-min-height="120" src="a.png"/>
//!   </figure>
//! </article>
//! ```
//!
//! Text inside `<script>` payloads must be escaped or wrapped in CDATA since
//! the snapshot is read as XML.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::metrics::Metrics;

/// Display class of a snapshot element.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Display {
    #[default]
    Block,
    Inline,
    /// Not rendered; ignored by flattening.
    None,
}

/// One measured element of a content, grid or figure tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentNode {
    /// Lowercase local tag name.
    pub tag: String,
    pub classes: Vec<String>,
    /// Attributes other than `class`.
    pub attributes: BTreeMap<String, String>,
    pub display: Display,
    pub metrics: Metrics,
    /// Direct text content, concatenated in document order.
    pub text: String,
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    /// Create an empty element.
    pub fn element(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            ..Self::default()
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Shorthand for a box of `outer_height` with zero margins.
    pub fn with_height(mut self, outer_height: f32) -> Self {
        self.metrics.outer_height = outer_height;
        self.metrics.height = outer_height - self.metrics.bp_height();
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text.push_str(text);
        self
    }

    pub fn with_display(mut self, display: Display) -> Self {
        self.display = display;
        self
    }

    pub fn with_child(mut self, child: ContentNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// True when the element carries non-whitespace direct text.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }

    pub fn is_figure(&self) -> bool {
        self.tag == "figure"
    }

    /// Text of this element and all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::with_capacity(self.text.len());
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        out.push_str(&self.text);
        for child in &self.children {
            child.collect_text(out);
        }
    }

    /// Serialize back to markup.
    ///
    /// Direct text is emitted before children since the snapshot does not
    /// keep the interleaving of text and elements.
    pub fn to_markup(&self) -> String {
        let mut out = String::with_capacity(64);
        self.write_markup(&mut out);
        out
    }

    /// Opening tag only, with optional extra attributes appended.
    pub fn open_tag(&self, extra: &[(&str, &str)]) -> String {
        let mut out = String::with_capacity(32);
        self.write_start(&mut out, extra);
        out.push('>');
        out
    }

    pub fn close_tag(&self) -> String {
        alloc::format!("</{}>", self.tag)
    }

    fn write_start(&self, out: &mut String, extra: &[(&str, &str)]) {
        out.push('<');
        out.push_str(&self.tag);
        if !self.classes.is_empty() {
            out.push_str(" class=\"");
            out.push_str(&quick_xml::escape::escape(self.classes.join(" ").as_str()));
            out.push('"');
        }
        let attrs = self
            .attributes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(extra.iter().copied());
        for (name, value) in attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            out.push_str(&quick_xml::escape::escape(value));
            out.push('"');
        }
    }

    fn write_markup(&self, out: &mut String) {
        self.write_start(out, &[]);
        if self.text.is_empty() && self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        out.push_str(&quick_xml::escape::escape(self.text.as_str()));
        for child in &self.children {
            child.write_markup(out);
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push('>');
    }
}

/// Limits for snapshot parsing and tree growth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotLimits {
    /// Maximum element nesting depth.
    pub max_depth: usize,
    /// Maximum number of elements.
    pub max_nodes: usize,
    /// Maximum UTF-8 byte length of any one element's direct text.
    pub max_text_bytes: usize,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_depth: 128,
            max_nodes: 1 << 18,
            max_text_bytes: 1 << 20,
        }
    }
}

/// Read a measured XHTML snapshot.
pub fn parse_xhtml(content: &[u8]) -> Result<ContentNode, Error> {
    parse_xhtml_with_limits(content, SnapshotLimits::default())
}

/// Read a measured XHTML snapshot with explicit limits.
pub fn parse_xhtml_with_limits(
    content: &[u8],
    limits: SnapshotLimits,
) -> Result<ContentNode, Error> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(false);

    let mut buf = Vec::with_capacity(64);
    let mut stack: Vec<ContentNode> = Vec::with_capacity(16);
    let mut root: Option<ContentNode> = None;
    let mut node_count = 0usize;
    let mut entity_buf = String::with_capacity(16);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if stack.len() >= limits.max_depth {
                    return Err(Error::snapshot(
                        "SNAPSHOT_DEPTH",
                        alloc::format!(
                            "element nesting exceeds max_depth ({} > {})",
                            stack.len() + 1,
                            limits.max_depth
                        ),
                    ));
                }
                node_count += 1;
                check_node_count(node_count, limits)?;
                stack.push(node_from_start(&reader, &e)?);
            }
            Ok(Event::Empty(e)) => {
                node_count += 1;
                check_node_count(node_count, limits)?;
                let node = node_from_start(&reader, &e)?;
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::End(_)) => {
                let Some(node) = stack.pop() else {
                    return Err(Error::snapshot(
                        "SNAPSHOT_UNBALANCED",
                        "closing tag without matching start",
                    ));
                };
                attach(&mut stack, &mut root, node)?;
            }
            Ok(Event::Text(e)) => {
                if let Some(top) = stack.last_mut() {
                    let raw = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|err| Error::snapshot("SNAPSHOT_DECODE", alloc::format!("{:?}", err)))?;
                    push_text(top, raw.as_ref(), limits)?;
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(top) = stack.last_mut() {
                    let raw = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|err| Error::snapshot("SNAPSHOT_DECODE", alloc::format!("{:?}", err)))?;
                    push_text(top, raw.as_ref(), limits)?;
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some(top) = stack.last_mut() {
                    let name = e
                        .decode()
                        .map_err(|err| Error::snapshot("SNAPSHOT_DECODE", alloc::format!("{:?}", err)))?;
                    entity_buf.clear();
                    entity_buf.push('&');
                    entity_buf.push_str(name.as_ref());
                    entity_buf.push(';');
                    let resolved = quick_xml::escape::unescape(&entity_buf).map_err(|err| {
                        Error::snapshot("SNAPSHOT_ENTITY", alloc::format!("{:?}", err))
                    })?;
                    push_text(top, resolved.as_ref(), limits)?;
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(Error::snapshot(
                    "SNAPSHOT_XML",
                    alloc::format!(
                        "XML error at byte {}: {:?}",
                        reader.buffer_position(),
                        err
                    ),
                ));
            }
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(Error::snapshot(
            "SNAPSHOT_UNBALANCED",
            alloc::format!("{} unclosed element(s) at end of input", stack.len()),
        ));
    }
    root.ok_or_else(|| Error::snapshot("SNAPSHOT_EMPTY", "snapshot has no root element"))
}

fn check_node_count(count: usize, limits: SnapshotLimits) -> Result<(), Error> {
    if count > limits.max_nodes {
        return Err(Error::snapshot(
            "SNAPSHOT_NODES",
            alloc::format!("element count exceeds max_nodes ({})", limits.max_nodes),
        ));
    }
    Ok(())
}

fn push_text(node: &mut ContentNode, text: &str, limits: SnapshotLimits) -> Result<(), Error> {
    if node.text.len() + text.len() > limits.max_text_bytes {
        return Err(Error::snapshot(
            "SNAPSHOT_TEXT",
            alloc::format!(
                "text of <{}> exceeds max_text_bytes ({})",
                node.tag,
                limits.max_text_bytes
            ),
        ));
    }
    node.text.push_str(text);
    Ok(())
}

fn attach(
    stack: &mut [ContentNode],
    root: &mut Option<ContentNode>,
    node: ContentNode,
) -> Result<(), Error> {
    match stack.last_mut() {
        Some(parent) => {
            parent.children.push(node);
            Ok(())
        }
        None if root.is_none() => {
            *root = Some(node);
            Ok(())
        }
        None => Err(Error::snapshot(
            "SNAPSHOT_MULTIPLE_ROOTS",
            alloc::format!("second root element <{}>", node.tag),
        )),
    }
}

fn node_from_start(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> Result<ContentNode, Error> {
    let qname = e.name();
    let raw_name = reader
        .decoder()
        .decode(qname.as_ref())
        .map_err(|err| Error::snapshot("SNAPSHOT_DECODE", alloc::format!("{:?}", err)))?;
    let local = raw_name.rsplit(':').next().unwrap_or(raw_name.as_ref());
    let mut node = ContentNode::element(local);

    for attr in e.attributes().flatten() {
        let key = reader
            .decoder()
            .decode(attr.key.as_ref())
            .map_err(|err| Error::snapshot("SNAPSHOT_DECODE", alloc::format!("{:?}", err)))?;
        let raw_value = reader
            .decoder()
            .decode(attr.value.as_ref())
            .map_err(|err| Error::snapshot("SNAPSHOT_DECODE", alloc::format!("{:?}", err)))?;
        let value = quick_xml::escape::unescape(raw_value.as_ref())
            .map_err(|err| Error::snapshot("SNAPSHOT_ENTITY", alloc::format!("{:?}", err)))?;
        let key = key.to_ascii_lowercase();
        if key == "class" {
            node.classes = value.split_whitespace().map(String::from).collect();
        } else {
            node.attributes.insert(key, value.into_owned());
        }
    }

    node.metrics = metrics_from_attributes(&node);
    node.display = match node.attr("data-display") {
        Some("inline") => Display::Inline,
        Some("none") => Display::None,
        _ => Display::Block,
    };
    Ok(node)
}

fn metrics_from_attributes(node: &ContentNode) -> Metrics {
    let read = |name: &str| -> Option<f32> {
        let raw = node.attr(name)?;
        let parsed = raw.trim().trim_end_matches("px").parse::<f32>();
        match parsed {
            Ok(v) => Some(v),
            Err(_) => {
                log::warn!("Ignoring unparsable {}=\"{}\" on <{}>", name, raw, node.tag);
                None
            }
        }
    };

    let mut m = Metrics {
        flexible: !node.has_class("fixed"),
        ..Metrics::default()
    };
    m.margin_top = read("data-margin-top").unwrap_or(0.0);
    m.margin_bottom = read("data-margin-bottom").unwrap_or(0.0);
    m.border_top = read("data-border-top").unwrap_or(0.0);
    m.padding_top = read("data-padding-top").unwrap_or(0.0);
    m.border_bottom = read("data-border-bottom").unwrap_or(0.0);
    m.padding_bottom = read("data-padding-bottom").unwrap_or(0.0);
    m.line_height = read("data-line-height").unwrap_or(0.0);
    m.min_height = read("data-min-height").unwrap_or(0.0);
    m.min_width = read("data-min-width").unwrap_or(0.0);
    m.max_height = read("data-max-height");
    m.max_width = read("data-max-width");
    m.outer_width = read("data-outer-width").unwrap_or(0.0);
    m.width = read("data-width").unwrap_or((m.outer_width).max(0.0));

    let height = read("data-height");
    let outer = read("data-outer-height");
    match (outer, height) {
        (Some(outer), Some(height)) => {
            m.outer_height = outer;
            m.height = height;
        }
        (Some(outer), None) => {
            m.outer_height = outer;
            m.height = outer - m.bp_height();
        }
        (None, Some(height)) => {
            m.height = height;
            m.outer_height = height + m.bp_height();
        }
        (None, None) => {}
    }
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_builds_tree_with_metrics() {
        let xml = br#"<article data-line-height="20" data-outer-width="300">
            <p class="keepwithnext" data-outer-height="40" data-margin-bottom="20">Hello &amp; bye</p>
            <figure class="required"><img data-sizes="one" data-min-height="80"/></figure>
        </article>"#;
        let root = parse_xhtml(xml).expect("snapshot should parse");
        assert_eq!(root.tag, "article");
        assert_eq!(root.metrics.line_height, 20.0);
        assert_eq!(root.metrics.outer_width, 300.0);
        assert_eq!(root.children.len(), 2);

        let p = &root.children[0];
        assert!(p.has_class("keepwithnext"));
        assert_eq!(p.metrics.outer_height, 40.0);
        assert_eq!(p.metrics.height, 40.0);
        assert_eq!(p.metrics.margin_bottom, 20.0);
        assert_eq!(p.text, "Hello & bye");

        let fig = &root.children[1];
        assert!(fig.is_figure());
        assert_eq!(fig.children[0].attr("data-sizes"), Some("one"));
    }

    #[test]
    fn prefixed_element_names_keep_local_part() {
        let xml = br#"<h:article xmlns:h="http://www.w3.org/1999/xhtml" data-line-height="20">
            <h:p data-outer-height="40">one</h:p>
        </h:article>"#;
        let root = parse_xhtml(xml).expect("snapshot should parse");
        assert_eq!(root.tag, "article");
        assert_eq!(root.children[0].tag, "p");
        assert_eq!(root.children[0].metrics.outer_height, 40.0);
    }

    #[test]
    fn parse_rejects_unbalanced_and_empty_input() {
        assert!(matches!(
            parse_xhtml(b"<a><b></b>"),
            Err(Error::Snapshot { code: "SNAPSHOT_UNBALANCED", .. })
        ));
        assert!(matches!(
            parse_xhtml(b"   "),
            Err(Error::Snapshot { code: "SNAPSHOT_EMPTY", .. })
        ));
    }

    #[test]
    fn parse_enforces_depth_limit() {
        let limits = SnapshotLimits {
            max_depth: 2,
            ..SnapshotLimits::default()
        };
        assert!(parse_xhtml_with_limits(b"<a><b><c/></b></a>", limits).is_ok());
        let err = parse_xhtml_with_limits(b"<a><b><c></c></b></a>", limits);
        assert!(matches!(err, Err(Error::Snapshot { code: "SNAPSHOT_DEPTH", .. })));
    }

    #[test]
    fn cdata_script_payload_is_kept_as_text() {
        let xml = br#"<figure><script type="text/html" data-sizes="big"><![CDATA[<img src="x.png"/>]]></script></figure>"#;
        let root = parse_xhtml(xml).expect("snapshot should parse");
        assert_eq!(root.children[0].text, r#"<img src="x.png"/>"#);
    }

    #[test]
    fn markup_round_trips_through_parser() {
        let node = ContentNode::element("p")
            .with_class("lead")
            .with_attr("data-outer-height", "20")
            .with_text("a < b");
        let markup = node.to_markup();
        assert_eq!(markup, r#"<p class="lead" data-outer-height="20">a &lt; b</p>"#);
        let parsed = parse_xhtml(markup.as_bytes()).expect("markup should parse");
        assert_eq!(parsed.text, "a < b");
        assert_eq!(parsed.metrics.outer_height, 20.0);
    }
}
