/// Device UI hierarchy: parsing uiautomator dumps and merging them with the
/// visual element list.
///
/// The hierarchy is ground truth for geometry and identity (resource ids,
/// clickability) but is blind to anything drawn without a view, so it only
/// ever augments the visual list, never replaces it.
use std::sync::OnceLock;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use crate::errors::{GroundingError, GroundingResult};
use crate::perception::box_validator::{validate_box, BoxOutcome};
use crate::perception::types::{
    BoundingBox, Element, ElementSource, ElementType, UiHierarchy, UiNode,
};

/// Minimum IoU for a visual element to adopt a hierarchy node.
pub const MIN_MERGE_IOU: f64 = 0.5;

// ── Parsing ─────────────────────────────────────────────────────────────────

/// Parse uiautomator / dumpsys XML into a node tree.
///
/// Anything before `<?xml` is dropped, since `dumpsys` wraps the document in
/// other output.
pub fn parse_hierarchy(xml: &str) -> GroundingResult<UiHierarchy> {
    let xml = match xml.find("<?xml") {
        Some(start) => &xml[start..],
        None => xml.trim_start(),
    };
    if xml.is_empty() {
        return Err(GroundingError::Hierarchy("empty hierarchy dump".into()));
    }

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut hierarchy = UiHierarchy::default();
    let mut stack: Vec<UiNode> = Vec::new();
    let mut saw_root = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"hierarchy" => {
                    saw_root = true;
                    hierarchy.rotation = attr(e, "rotation")?
                        .and_then(|r| r.parse().ok())
                        .unwrap_or(0);
                }
                b"node" => stack.push(parse_node(e)?),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"node" => {
                    let node = parse_node(e)?;
                    attach(node, &mut stack, &mut hierarchy);
                }
                b"hierarchy" => saw_root = true,
                _ => {}
            },
            Ok(Event::End(ref e)) if e.name().as_ref() == b"node" => {
                let node = stack
                    .pop()
                    .ok_or_else(|| GroundingError::Hierarchy("unbalanced </node>".into()))?;
                attach(node, &mut stack, &mut hierarchy);
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(GroundingError::Hierarchy(format!(
                    "XML error at byte {}: {e}",
                    reader.buffer_position()
                )))
            }
        }
    }

    if !stack.is_empty() {
        return Err(GroundingError::Hierarchy("unterminated <node> element".into()));
    }
    if !saw_root && hierarchy.roots.is_empty() {
        return Err(GroundingError::Hierarchy("no <hierarchy> or <node> elements".into()));
    }

    tracing::debug!(
        rotation = hierarchy.rotation,
        nodes = hierarchy.flatten().len(),
        "UI hierarchy parsed"
    );
    Ok(hierarchy)
}

fn attach(node: UiNode, stack: &mut [UiNode], hierarchy: &mut UiHierarchy) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None => hierarchy.roots.push(node),
    }
}

fn attr(e: &BytesStart, name: &str) -> GroundingResult<Option<String>> {
    for a in e.attributes() {
        let a = a.map_err(|err| GroundingError::Hierarchy(format!("attribute: {err}")))?;
        if a.key.as_ref() == name.as_bytes() {
            let value = a
                .unescape_value()
                .map_err(|err| GroundingError::Hierarchy(format!("attribute '{name}': {err}")))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parse_node(e: &BytesStart) -> GroundingResult<UiNode> {
    let text = |name: &str| -> GroundingResult<String> { Ok(attr(e, name)?.unwrap_or_default()) };
    let flag = |name: &str| -> GroundingResult<bool> { Ok(attr(e, name)?.as_deref() == Some("true")) };

    let raw_bounds = text("bounds")?;
    let bounds = parse_bounds(&raw_bounds);
    if bounds.is_none() && !raw_bounds.is_empty() {
        tracing::debug!(bounds = %raw_bounds, "unusable node bounds");
    }

    Ok(UiNode {
        resource_id: text("resource-id")?,
        text: text("text")?,
        content_desc: text("content-desc")?,
        class_name: text("class")?,
        package: text("package")?,
        clickable: flag("clickable")?,
        enabled: flag("enabled")?,
        focusable: flag("focusable")?,
        bounds,
        children: Vec::new(),
    })
}

fn bounds_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]\s*$").expect("valid bounds regex")
    })
}

/// Parse `[x1,y1][x2,y2]`. Negative edges (partially off-screen views) are
/// clamped to zero; zero-area bounds yield `None`.
pub fn parse_bounds(raw: &str) -> Option<BoundingBox> {
    let caps = bounds_regex().captures(raw)?;
    let mut v = [0u32; 4];
    for (i, slot) in v.iter_mut().enumerate() {
        let n: i64 = caps[i + 1].parse().ok()?;
        *slot = u32::try_from(n.max(0)).ok()?;
    }
    BoundingBox::from_corners(v[0], v[1], v[2], v[3])
}

// ── Merging ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeParams {
    pub min_iou: f64,
    pub min_edge_px: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub merged: usize,
    pub hierarchy_only: usize,
}

/// Reconcile visual elements with a hierarchy tree.
///
/// - Each element adopts the node with the highest IoU (ties go to the
///   smaller node, then to the deeper one, i.e. the more specific view over
///   its container) when that IoU exceeds `min_iou`, and becomes `Merged`.
/// - Clickable nodes that overlap no element above `min_iou` are appended
///   as `Hierarchy` elements in tree pre-order.
///
/// Without a tree the elements pass through untouched.
pub fn merge_hierarchy(
    mut elements: Vec<Element>,
    hierarchy: Option<&UiHierarchy>,
    width: u32,
    height: u32,
    params: MergeParams,
) -> (Vec<Element>, MergeCounts) {
    let Some(hierarchy) = hierarchy else {
        return (elements, MergeCounts::default());
    };

    let nodes = hierarchy.flatten();
    let mut claimed = vec![false; nodes.len()];
    let mut counts = MergeCounts::default();

    for element in elements.iter_mut() {
        for (i, node) in nodes.iter().enumerate() {
            if node.bounds.is_some_and(|b| element.box_px.iou(&b) > params.min_iou) {
                claimed[i] = true;
            }
        }

        let Some((idx, iou)) = best_match(&element.box_px, &nodes) else {
            continue;
        };
        if iou <= params.min_iou {
            continue;
        }
        augment(element, nodes[idx]);
        counts.merged += 1;
        tracing::debug!(
            label = %element.label,
            resource_id = %nodes[idx].resource_id,
            iou,
            "element merged with hierarchy node"
        );
    }

    for (node, _) in nodes.iter().zip(&claimed).filter(|(n, c)| n.clickable && !**c) {
        let Some(bounds) = node.bounds else { continue };
        let px = [
            bounds.x_min as f64,
            bounds.y_min as f64,
            bounds.x_max as f64,
            bounds.y_max as f64,
        ];
        let BoxOutcome::Valid { bbox, .. } = validate_box(px, width, height, params.min_edge_px)
        else {
            tracing::debug!(resource_id = %node.resource_id, "clickable node outside image, skipped");
            continue;
        };
        elements.push(hierarchy_element(node, bbox));
        counts.hierarchy_only += 1;
    }

    (elements, counts)
}

/// Index and IoU of the best-overlapping node. Nodes that do not overlap at
/// all are never a match. `nodes` is in pre-order, so on a full tie the
/// later node is the descendant and wins.
fn best_match(target: &BoundingBox, nodes: &[&UiNode]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64, f64)> = None;
    for (i, node) in nodes.iter().enumerate() {
        let Some(bounds) = node.bounds else { continue };
        let iou = target.iou(&bounds);
        if iou <= 0.0 {
            continue;
        }
        let area = bounds.area();
        let better = match best {
            None => true,
            Some((_, best_iou, best_area)) => {
                iou > best_iou + f64::EPSILON
                    || ((iou - best_iou).abs() <= f64::EPSILON && area <= best_area)
            }
        };
        if better {
            best = Some((i, iou, area));
        }
    }
    best.map(|(i, iou, _)| (i, iou))
}

fn non_empty(s: &str) -> Option<String> {
    if s.is_empty() { None } else { Some(s.to_string()) }
}

fn augment(element: &mut Element, node: &UiNode) {
    element.source = ElementSource::Merged;
    element.resource_id = non_empty(&node.resource_id);
    element.content_desc = non_empty(&node.content_desc);
    element.clickable = Some(node.clickable);
    if element.label.is_empty() {
        element.label = node_label(node);
    }
    if element.text.is_none() {
        element.text = non_empty(&node.text);
    }
}

fn node_label(node: &UiNode) -> String {
    if !node.text.is_empty() {
        return node.text.clone();
    }
    if !node.content_desc.is_empty() {
        return node.content_desc.clone();
    }
    if !node.resource_id.is_empty() {
        return node
            .resource_id
            .rsplit_once(":id/")
            .map_or(node.resource_id.as_str(), |(_, id)| id)
            .to_string();
    }
    node.class_name
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_string()
}

fn element_type_for_class(class_name: &str) -> ElementType {
    let short = class_name.rsplit('.').next().unwrap_or_default();
    match short {
        "Button" | "ImageButton" | "CheckBox" | "Switch" | "RadioButton" | "ToggleButton" => {
            ElementType::Button
        }
        "EditText" | "AutoCompleteTextView" | "SearchView" => ElementType::Input,
        "ImageView" => ElementType::Image,
        "TextView" | "CheckedTextView" => ElementType::Text,
        _ => ElementType::Other,
    }
}

fn hierarchy_element(node: &UiNode, bbox: BoundingBox) -> Element {
    Element {
        id: 0,
        label: node_label(node),
        element_type: element_type_for_class(&node.class_name),
        box_px: bbox,
        source: ElementSource::Hierarchy,
        text: non_empty(&node.text),
        confidence: None,
        tags: Vec::new(),
        resource_id: non_empty(&node.resource_id),
        content_desc: non_empty(&node.content_desc),
        clickable: Some(node.clickable),
    }
}
