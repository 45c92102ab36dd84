//! Figures: non-flowing content with named size variants.
//!
//! A `<figure>` offers one payload per size name. Payloads come in three
//! forms:
//!
//! * element children carrying `data-sizes`,
//! * cloaked `<script type="text/html" data-sizes="...">` bodies,
//! * templates: a `<script type="text/html" data-name="...">` body filled
//!   from a `<script type="application/json" data-template="...">` array of
//!   value objects (`{"sizes": "...", "minHeight": 120, "src": "..."}`).
//!
//! The size named `fallback` is not a container size: it becomes an inline
//! block in the text flow, used when the figure is not placed in a container.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use serde_json::Value;

use crate::capabilities::{parse_requirements, Capabilities};
use crate::error::Error;
use crate::snapshot::{self, ContentNode};

/// Size name reserved for the inline fallback.
pub const FALLBACK_SIZE: &str = "fallback";

const DEFAULT_TEMPLATE: &str = "_default";

const DATA_PROPERTIES: &[&str] = &[
    "data-sizes",
    "data-requires",
    "data-template",
    "data-name",
    "data-minwidth",
    "data-minheight",
];

/// One payload a figure can be shown with.
#[derive(Clone, Debug, PartialEq)]
pub struct FigureSize {
    /// Markup of the payload.
    pub payload: String,
    /// Measured payload element, when the payload was an element child.
    pub node: Option<ContentNode>,
    pub min_width: f32,
    pub min_height: f32,
    /// Capability tokens the host must support to show this payload.
    pub requirements: Vec<String>,
}

impl FigureSize {
    pub fn new(payload: impl Into<String>, min_width: f32, min_height: f32) -> Self {
        Self {
            payload: payload.into(),
            node: None,
            min_width,
            min_height,
            requirements: Vec::new(),
        }
    }

    pub fn with_requirements(mut self, requirements: Vec<String>) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn meets_requirements(&self, caps: &dyn Capabilities) -> bool {
        self.requirements.is_empty() || caps.meets_requirements(&self.requirements)
    }

    /// Height the payload needs: its measured outer height or the declared
    /// minimum, whichever is larger.
    pub fn payload_height(&self) -> f32 {
        self.node
            .as_ref()
            .map_or(0.0, |n| n.metrics.outer_height)
            .max(self.min_height)
    }
}

/// A figure in the content stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Figure {
    pub figure_index: usize,
    /// Index of the block that followed the figure in the source.
    pub anchor_index: usize,
    /// May be dropped when there is no room.
    pub optional: bool,
    pub zoomable: bool,
    /// Named payloads in declaration order, one per name.
    pub sizes: Vec<(String, FigureSize)>,
    /// Index of the inline fallback block.
    pub fallback: Option<usize>,
}

impl Figure {
    pub fn new(figure_index: usize, anchor_index: usize) -> Self {
        Self {
            figure_index,
            anchor_index,
            optional: true,
            zoomable: false,
            sizes: Vec::new(),
            fallback: None,
        }
    }

    pub fn with_size(mut self, name: &str, size: FigureSize) -> Self {
        self.save_size(&[name], size);
        self
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn size(&self, name: &str) -> Option<&FigureSize> {
        self.sizes.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Smallest size by payload height, ignoring requirements.
    pub fn smallest_size(&self) -> Option<(&str, &FigureSize)> {
        self.sizes
            .iter()
            .min_by(|a, b| a.1.payload_height().total_cmp(&b.1.payload_height()))
            .map(|(n, s)| (n.as_str(), s))
    }

    fn save_size(&mut self, names: &[&str], size: FigureSize) {
        for name in names {
            if self.sizes.iter().any(|(n, _)| n == name) {
                continue;
            }
            self.sizes.push(((*name).to_string(), size.clone()));
        }
    }

    /// Build a figure from its element.
    ///
    /// Returns the figure plus the node of its fallback payload. The
    /// fallback is removed from `sizes`.
    pub(crate) fn from_node(
        node: &ContentNode,
        figure_index: usize,
        anchor_index: usize,
    ) -> Result<(Self, Option<ContentNode>), Error> {
        let mut figure = Self::new(figure_index, anchor_index);
        figure.optional = !node.has_class("required");
        figure.zoomable = node.has_class("zoomable");

        let mut templates: BTreeMap<String, String> = BTreeMap::new();
        for child in &node.children {
            figure.process_child(child, &mut templates)?;
        }
        if node.has_text() {
            log::info!("Ignoring text directly inside figure {}", figure_index);
        }

        let fallback = match figure.sizes.iter().position(|(n, _)| n == FALLBACK_SIZE) {
            Some(pos) => {
                let (_, size) = figure.sizes.remove(pos);
                fallback_node(size)?
            }
            None => None,
        };
        Ok((figure, fallback))
    }

    fn process_child(
        &mut self,
        child: &ContentNode,
        templates: &mut BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let requirements = parse_requirements(child.attr("data-requires"));
        if child.tag != "script" {
            self.process_element(child, requirements);
            return Ok(());
        }
        match child.attr("type") {
            Some("text/html") => {
                if child.attr("data-sizes").is_some() {
                    let size = FigureSize {
                        payload: child.text.trim().to_string(),
                        node: None,
                        min_width: read_dimension(child, "minwidth"),
                        min_height: read_dimension(child, "minheight"),
                        requirements,
                    };
                    let names = split_sizes(child.attr("data-sizes"));
                    self.save_size(&names, size);
                } else {
                    let name = child.attr("data-name").unwrap_or(DEFAULT_TEMPLATE);
                    let body = child.text.trim();
                    if body.is_empty() {
                        log::warn!("Empty figure template {}", name);
                    } else {
                        templates.insert(name.to_string(), body.to_string());
                    }
                }
            }
            Some("application/json") => {
                let name = child.attr("data-template").unwrap_or(DEFAULT_TEMPLATE);
                self.process_template_values(child.text.trim(), name, templates, &requirements)?;
            }
            other => log::warn!("Unknown figure script type {:?}", other),
        }
        Ok(())
    }

    fn process_element(&mut self, child: &ContentNode, requirements: Vec<String>) {
        let mut payload_node = child.clone();
        for attr in DATA_PROPERTIES {
            payload_node.attributes.remove(*attr);
        }
        let size = FigureSize {
            payload: payload_node.to_markup(),
            min_width: read_dimension(child, "minwidth"),
            min_height: read_dimension(child, "minheight"),
            node: Some(payload_node),
            requirements,
        };
        let names = match child.attr("data-sizes") {
            Some(raw) => split_sizes(Some(raw)),
            None => alloc::vec![FALLBACK_SIZE],
        };
        self.save_size(&names, size);
    }

    fn process_template_values(
        &mut self,
        payload: &str,
        template_name: &str,
        templates: &BTreeMap<String, String>,
        requirements: &[String],
    ) -> Result<(), Error> {
        if payload.is_empty() {
            log::warn!("Empty figure template values");
            return Ok(());
        }
        let values: Value = serde_json::from_str(payload)
            .map_err(|err| Error::template(alloc::format!("invalid template JSON: {}", err)))?;
        let Value::Array(values) = values else {
            log::warn!("Ignoring non-array figure template values");
            return Ok(());
        };

        for value in &values {
            let Some(sizes) = value.get("sizes").and_then(Value::as_str) else {
                log::warn!("Ignoring template value without sizes");
                continue;
            };
            let name = value
                .get("template")
                .and_then(Value::as_str)
                .unwrap_or(template_name);
            let Some(template) = templates.get(name) else {
                log::warn!("Unknown figure template {}", name);
                continue;
            };
            let size = FigureSize {
                payload: apply_template(template, value),
                node: None,
                min_width: json_dimension(value.get("minWidth")),
                min_height: json_dimension(value.get("minHeight")),
                requirements: requirements.to_vec(),
            };
            let names = split_sizes(Some(sizes));
            self.save_size(&names, size);
        }
        Ok(())
    }
}

/// Replace each `{{ key }}` in `template` with the matching value.
///
/// Keys are trimmed and lowercased; missing keys become empty strings.
pub fn apply_template(template: &str, values: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let key = &after[..end];
        if key.is_empty() || key.contains('}') {
            out.push_str(&rest[..start + 2]);
            rest = after;
            continue;
        }
        out.push_str(&rest[..start]);
        out.push_str(&template_value(values, &key.trim().to_ascii_lowercase()));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

fn template_value(values: &Value, key: &str) -> String {
    let found = values.as_object().and_then(|obj| {
        obj.iter()
            .find(|(k, _)| k.to_ascii_lowercase() == key)
            .map(|(_, v)| v)
    });
    match found {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        _ => String::new(),
    }
}

fn split_sizes(raw: Option<&str>) -> Vec<&str> {
    raw.map(|s| s.split_whitespace().collect()).unwrap_or_default()
}

fn read_dimension(node: &ContentNode, name: &str) -> f32 {
    let dashed = match name {
        "minwidth" => "data-min-width",
        _ => "data-min-height",
    };
    let raw = node
        .attr(&alloc::format!("data-{}", name))
        .or_else(|| node.attr(dashed));
    parse_dimension(raw)
}

fn parse_dimension(raw: Option<&str>) -> f32 {
    raw.and_then(|s| s.trim().trim_end_matches("px").parse::<f32>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(f32::floor)
        .unwrap_or(0.0)
}

fn json_dimension(value: Option<&Value>) -> f32 {
    match value {
        Some(Value::Number(n)) => n
            .as_f64()
            .map(|v| v as f32)
            .filter(|v| v.is_finite() && *v > 0.0)
            .map(f32::floor)
            .unwrap_or(0.0),
        Some(Value::String(s)) => parse_dimension(Some(s)),
        _ => 0.0,
    }
}

/// Resolve the fallback payload into a measured node.
fn fallback_node(size: FigureSize) -> Result<Option<ContentNode>, Error> {
    if let Some(node) = size.node {
        return Ok(Some(node));
    }
    if size.payload.trim().is_empty() {
        return Ok(None);
    }
    match snapshot::parse_xhtml(size.payload.as_bytes()) {
        Ok(node) => Ok(Some(node)),
        Err(Error::Snapshot {
            code: "SNAPSHOT_MULTIPLE_ROOTS",
            ..
        }) => {
            let wrapped = alloc::format!("<div>{}</div>", size.payload);
            let mut node = snapshot::parse_xhtml(wrapped.as_bytes())?;
            node.metrics.outer_height = node
                .children
                .iter()
                .map(|c| c.metrics.outer_height + c.metrics.margin_height())
                .sum();
            node.metrics.height = node.metrics.outer_height;
            Ok(Some(node))
        }
        Err(err) => Err(err),
    }
}
