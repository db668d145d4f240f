use serde::{Deserialize, Serialize};

/// Element categories an agent can act on. Anything a backend emits outside
/// this set collapses to `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    Button,
    Input,
    Icon,
    Text,
    Link,
    Image,
    #[default]
    Other,
}

impl ElementType {
    pub fn from_label(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "button" => ElementType::Button,
            "input" => ElementType::Input,
            "icon" => ElementType::Icon,
            "text" => ElementType::Text,
            "link" => ElementType::Link,
            "image" => ElementType::Image,
            _ => ElementType::Other,
        }
    }
}

/// Output convention of a vision backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderFamily {
    /// Strict JSON emitters (schema-constrained decoding).
    NativeStructured,
    /// Output may wrap JSON in prose or fences, or emit loose coordinate tuples.
    PermissiveText,
}

/// Candidate element straight out of a backend response.
///
/// `raw_box` is always `[x_min, y_min, x_max, y_max]` but its unit is unknown:
/// fractional, 1000-grid or pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement {
    pub label: String,
    pub raw_box: [f64; 4],
    pub confidence: Option<f64>,
    pub text: Option<String>,
    pub element_type: Option<String>,
    pub tags: Vec<String>,
}

impl RawElement {
    pub fn new(label: impl Into<String>, raw_box: [f64; 4]) -> Self {
        Self {
            label: label.into(),
            raw_box,
            confidence: None,
            text: None,
            element_type: None,
            tags: Vec::new(),
        }
    }
}

/// Pixel-space box. Edges are inclusive-exclusive image coordinates with
/// `x_min < x_max` and `y_min < y_max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
    pub center_x: u32,
    pub center_y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Build from ordered corners. Returns `None` when the box has no area.
    pub fn from_corners(x_min: u32, y_min: u32, x_max: u32, y_max: u32) -> Option<Self> {
        if x_min >= x_max || y_min >= y_max {
            return None;
        }
        Some(Self {
            x_min,
            y_min,
            x_max,
            y_max,
            center_x: (x_min + x_max) / 2,
            center_y: (y_min + y_max) / 2,
            width: x_max - x_min,
            height: y_max - y_min,
        })
    }

    pub fn area(&self) -> f64 {
        self.width as f64 * self.height as f64
    }

    /// Intersection-over-union with another box, in `[0, 1]`.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let ix1 = self.x_min.max(other.x_min);
        let iy1 = self.y_min.max(other.y_min);
        let ix2 = self.x_max.min(other.x_max);
        let iy2 = self.y_max.min(other.y_max);
        let inter = ix2.saturating_sub(ix1) as f64 * iy2.saturating_sub(iy1) as f64;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementSource {
    Visual,
    Hierarchy,
    Merged,
}

/// Final, agent-facing element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: u32,
    pub label: String,
    #[serde(rename = "type")]
    pub element_type: ElementType,
    pub box_px: BoundingBox,
    pub source: ElementSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clickable: Option<bool>,
}

impl Element {
    /// Visual element with no hierarchy augmentation.
    pub fn visual(raw: RawElement, box_px: BoundingBox) -> Self {
        Self {
            id: 0,
            label: raw.label,
            element_type: raw
                .element_type
                .as_deref()
                .map(ElementType::from_label)
                .unwrap_or_default(),
            box_px,
            source: ElementSource::Visual,
            text: raw.text,
            confidence: raw.confidence,
            tags: raw.tags,
            resource_id: None,
            content_desc: None,
            clickable: None,
        }
    }
}

/// One node of a device UI hierarchy dump.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UiNode {
    pub resource_id: String,
    pub text: String,
    pub content_desc: String,
    pub class_name: String,
    pub package: String,
    pub clickable: bool,
    pub enabled: bool,
    pub focusable: bool,
    /// `None` when the dump's bounds are missing, malformed or zero-area.
    pub bounds: Option<BoundingBox>,
    pub children: Vec<UiNode>,
}

impl UiNode {
    /// Pre-order walk over this node and all descendants.
    pub fn walk<'a>(&'a self, out: &mut Vec<&'a UiNode>) {
        out.push(self);
        for child in &self.children {
            child.walk(out);
        }
    }
}

/// Parsed hierarchy dump: the visible window's top-level nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UiHierarchy {
    pub rotation: u32,
    pub roots: Vec<UiNode>,
}

impl UiHierarchy {
    pub fn flatten(&self) -> Vec<&UiNode> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.walk(&mut out);
        }
        out
    }
}

/// Per-request counters. Geometric problems are never errors, only counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NormalizeStats {
    pub parsed: usize,
    pub corrected: usize,
    pub discarded: usize,
    pub merged: usize,
    pub hierarchy_only: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeResult {
    pub summary: String,
    pub image_width: u32,
    pub image_height: u32,
    pub elements: Vec<Element>,
    pub stats: NormalizeStats,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
