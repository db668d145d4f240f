/// Backend response parsing.
///
/// Vision backends disagree on output shape. Schema-constrained providers
/// return strict JSON; chat-style providers wrap JSON in prose or markdown
/// fences, or just write coordinate tuples next to labels. Strategies run in
/// a fixed fallback order and the first one that yields elements wins:
///
/// 1. strict JSON decode of the whole response,
/// 2. balanced-delimiter extraction of an embedded JSON structure,
/// 3. regex scan for numeric 4-tuples bound to a preceding label.
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{GroundingError, GroundingResult};
use crate::perception::types::{ProviderFamily, RawElement};

/// Keys that may hold the element list in an object response.
const LIST_KEYS: [&str; 5] = ["components", "elements", "detections", "items", "objects"];
/// Keys that may hold an element's box, in lookup order.
const BOX_KEYS: [&str; 7] = [
    "box_2d",
    "bbox",
    "box",
    "bounding_box",
    "box_px",
    "bounds",
    "coordinates",
];
const LABEL_KEYS: [&str; 4] = ["label", "name", "description", "text"];

/// Upper bound on embedded-structure candidates tried per response.
const MAX_EXTRACTION_ATTEMPTS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    Structured,
    Extracted,
    Pattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    /// In order of appearance in the source text.
    pub elements: Vec<RawElement>,
    pub summary: Option<String>,
    pub strategy: ParseStrategy,
}

fn strategies(family: ProviderFamily) -> &'static [ParseStrategy] {
    match family {
        ProviderFamily::NativeStructured => &[ParseStrategy::Structured, ParseStrategy::Extracted],
        ProviderFamily::PermissiveText => &[
            ParseStrategy::Structured,
            ParseStrategy::Extracted,
            ParseStrategy::Pattern,
        ],
    }
}

/// Parse a raw backend response into candidate elements.
///
/// A well-formed response that lists nothing is `Ok` with no elements;
/// `UnparsableResponse` means no strategy recognised anything at all.
pub fn parse_response(text: &str, family: ProviderFamily) -> GroundingResult<ParsedResponse> {
    let text = text.trim();
    if text.is_empty() {
        return Err(GroundingError::UnparsableResponse("empty response".into()));
    }

    // A well-formed but empty embedded structure is held back so the pattern
    // scan still gets a chance at the surrounding prose.
    let mut empty_fallback: Option<ParsedResponse> = None;

    for &strategy in strategies(family) {
        let attempt = match strategy {
            ParseStrategy::Structured => parse_structured(text),
            ParseStrategy::Extracted => parse_extracted(text),
            ParseStrategy::Pattern => parse_pattern(text),
        };
        let Some((elements, summary)) = attempt else {
            tracing::debug!(?strategy, "parse strategy found nothing");
            continue;
        };
        let parsed = ParsedResponse {
            elements,
            summary,
            strategy,
        };
        if strategy == ParseStrategy::Structured || !parsed.elements.is_empty() {
            tracing::debug!(?strategy, count = parsed.elements.len(), "response parsed");
            return Ok(parsed);
        }
        if empty_fallback.is_none() {
            empty_fallback = Some(parsed);
        }
    }

    empty_fallback.ok_or_else(|| {
        GroundingError::UnparsableResponse(format!(
            "no element structure found in {} bytes of response",
            text.len()
        ))
    })
}

// ── Strategy 1: strict JSON ─────────────────────────────────────────────────

fn parse_structured(text: &str) -> Option<(Vec<RawElement>, Option<String>)> {
    let value: Value = serde_json::from_str(text).ok()?;
    elements_from_value(&value)
}

// ── Strategy 2: balanced-delimiter extraction ───────────────────────────────

fn parse_extracted(text: &str) -> Option<(Vec<RawElement>, Option<String>)> {
    let bytes = text.as_bytes();
    let mut attempts = 0;
    let mut start = 0;

    while start < bytes.len() && attempts < MAX_EXTRACTION_ATTEMPTS {
        let Some(offset) = bytes[start..].iter().position(|b| *b == b'{' || *b == b'[') else {
            break;
        };
        let open = start + offset;
        attempts += 1;
        if let Some(close) = find_balanced_end(bytes, open) {
            let candidate = &text[open..=close];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if let Some(found) = elements_from_value(&value) {
                    tracing::debug!(offset = open, len = candidate.len(), "embedded JSON recovered");
                    return Some(found);
                }
            }
        }
        start = open + 1;
    }
    None
}

/// Index of the delimiter closing the one at `open`, skipping over JSON
/// string literals. `None` on a mismatched or unterminated structure.
fn find_balanced_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ── JSON → RawElement ───────────────────────────────────────────────────────

/// `None` when the document is not element-shaped at all (a bare number,
/// string, or an array of non-objects such as a lone coordinate tuple).
fn elements_from_value(value: &Value) -> Option<(Vec<RawElement>, Option<String>)> {
    match value {
        Value::Array(items) => {
            if !items.iter().all(Value::is_object) {
                return None;
            }
            Some((elements_from_items(items), None))
        }
        Value::Object(obj) => {
            let summary = obj
                .get("summary")
                .and_then(Value::as_str)
                .map(str::to_string);

            if let Some((key, list)) = LIST_KEYS
                .iter()
                .find_map(|k| obj.get(*k).map(|v| (*k, v)))
            {
                return match list.as_array() {
                    Some(items) => Some((elements_from_items(items), summary)),
                    None => {
                        tracing::warn!(key, "element list is not an array, treating as empty");
                        Some((Vec::new(), summary))
                    }
                };
            }

            // A single bare element object.
            if BOX_KEYS.iter().any(|k| obj.contains_key(*k)) {
                return Some((element_from_object(obj).into_iter().collect(), summary));
            }

            Some((Vec::new(), summary))
        }
        _ => None,
    }
}

fn elements_from_items(items: &[Value]) -> Vec<RawElement> {
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item.as_object() {
            Some(obj) => element_from_object(obj),
            None => {
                tracing::warn!(index = i, "skipping non-object component");
                None
            }
        })
        .collect()
}

fn element_from_object(obj: &Map<String, Value>) -> Option<RawElement> {
    let raw_box = BOX_KEYS.iter().find_map(|key| {
        let v = obj.get(*key)?;
        parse_box(v, *key == "box_2d")
    });
    let Some(raw_box) = raw_box else {
        tracing::warn!(keys = ?obj.keys().collect::<Vec<_>>(), "component has no usable box");
        return None;
    };

    let label = LABEL_KEYS
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string();

    let mut element = RawElement::new(label, raw_box);
    element.confidence = ["confidence", "score"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_f64));
    element.text = obj
        .get("text")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    element.element_type = obj
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_string);
    element.tags = obj
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(element)
}

/// Accepts `[a, b, c, d]`, `[[x1, y1], [x2, y2]]`, or an object with
/// `x_min/y_min/x_max/y_max` (or `x1/y1/x2/y2`). Numeric strings are accepted.
/// `y_first` reorders `[ymin, xmin, ymax, xmax]` into x-first.
fn parse_box(value: &Value, y_first: bool) -> Option<[f64; 4]> {
    let coords = match value {
        Value::Array(items) if items.len() == 4 => {
            let mut out = [0.0; 4];
            for (slot, item) in out.iter_mut().zip(items) {
                *slot = number(item)?;
            }
            out
        }
        Value::Array(points) if points.len() == 2 => {
            let p1 = points[0].as_array().filter(|p| p.len() == 2)?;
            let p2 = points[1].as_array().filter(|p| p.len() == 2)?;
            [number(&p1[0])?, number(&p1[1])?, number(&p2[0])?, number(&p2[1])?]
        }
        Value::Object(obj) => {
            let get = |a: &str, b: &str| obj.get(a).or_else(|| obj.get(b)).and_then(number);
            let x1 = get("x_min", "x1")?;
            let y1 = get("y_min", "y1")?;
            let x2 = get("x_max", "x2")?;
            let y2 = get("y_max", "y2")?;
            return Some([x1, y1, x2, y2]);
        }
        _ => return None,
    };
    if y_first {
        let [y1, x1, y2, x2] = coords;
        Some([x1, y1, x2, y2])
    } else {
        Some(coords)
    }
}

fn number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Strategy 3: coordinate tuples in free text ──────────────────────────────

fn tuple_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let num = r"\s*(-?\d+(?:\.\d+)?)\s*";
        Regex::new(&format!(r"[\[(]{num},{num},{num},{num}[\])]")).expect("valid tuple regex")
    })
}

fn y_first_hint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)y_?min\s*,\s*x_?min").expect("valid hint regex"))
}

fn label_noise_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\s*(\bat\b|\bbox_2d\b|\bbbox\b|\bbox\b|\bcoordinates\b|\bbounds\b|[:=\-–(,]))+\s*$")
            .expect("valid label noise regex")
    })
}

fn parse_pattern(text: &str) -> Option<(Vec<RawElement>, Option<String>)> {
    let y_first = y_first_hint_regex().is_match(text);
    let mut elements = Vec::new();
    let mut prev_end = 0;

    for caps in tuple_regex().captures_iter(text) {
        let whole = caps.get(0)?;
        let mut coords = [0.0; 4];
        for (i, slot) in coords.iter_mut().enumerate() {
            *slot = caps.get(i + 1)?.as_str().parse().ok()?;
        }
        if y_first {
            let [y1, x1, y2, x2] = coords;
            coords = [x1, y1, x2, y2];
        }

        let line_start = text[..whole.start()].rfind('\n').map_or(0, |i| i + 1);
        let label = clean_label(&text[line_start.max(prev_end)..whole.start()]);
        prev_end = whole.end();

        elements.push(RawElement::new(label, coords));
    }

    if elements.is_empty() {
        None
    } else {
        tracing::debug!(count = elements.len(), y_first, "coordinate tuples recovered from text");
        Some((elements, None))
    }
}

fn list_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(?:[-*•]|\d+[.)])\s+").expect("valid list marker regex"))
}

fn clean_label(raw: &str) -> String {
    let stripped = label_noise_regex().replace(raw, "");
    let stripped = list_marker_regex().replace(stripped.trim(), "");
    let label = stripped.trim().trim_matches('*').trim();
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = label.strip_prefix(quote).and_then(|r| r.strip_suffix(quote)) {
            return inner.trim().to_string();
        }
    }
    label.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEMINI_RESPONSE: &str = r#"{
        "summary": "Login screen",
        "components": [
            {"id": 1, "label": "Sign in", "type": "button", "tags": ["primary"], "box_2d": [200, 100, 400, 300]},
            {"id": 2, "label": "Email", "type": "input", "box_2d": [50, 100, 120, 900]}
        ]
    }"#;

    #[test]
    fn strict_json_uses_structured_strategy() {
        let parsed = parse_response(GEMINI_RESPONSE, ProviderFamily::NativeStructured).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Structured);
        assert_eq!(parsed.summary.as_deref(), Some("Login screen"));
        assert_eq!(parsed.elements.len(), 2);
        // box_2d is y-first and comes out x-first
        assert_eq!(parsed.elements[0].raw_box, [100.0, 200.0, 300.0, 400.0]);
        assert_eq!(parsed.elements[0].element_type.as_deref(), Some("button"));
        assert_eq!(parsed.elements[0].tags, vec!["primary".to_string()]);
    }

    #[test]
    fn well_formed_json_never_reaches_pattern_scan() {
        // Contains a tuple in a string, which the pattern scan would pick up.
        let text = r#"{"summary": "nothing clickable, maybe (1, 2, 3, 4)", "components": []}"#;
        let parsed = parse_response(text, ProviderFamily::PermissiveText).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Structured);
        assert!(parsed.elements.is_empty());
    }

    #[test]
    fn fenced_json_in_prose_is_recovered() {
        let text = "Sure! Here are the elements:\n```json\n[{\"label\": \"OK\", \"bbox\": [0.1, 0.2, 0.3, 0.4]}]\n```\nLet me know.";
        let parsed = parse_response(text, ProviderFamily::PermissiveText).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Extracted);
        assert_eq!(parsed.elements[0].label, "OK");
        assert_eq!(parsed.elements[0].raw_box, [0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn extraction_skips_leading_bracket_noise() {
        let text = "Boxes are [ymin, xmin, ymax, xmax]. {\"components\": [{\"label\": \"Menu\", \"box_2d\": [0, 0, 50, 80]}]}";
        let parsed = parse_response(text, ProviderFamily::NativeStructured).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Extracted);
        assert_eq!(parsed.elements[0].raw_box, [0.0, 0.0, 80.0, 50.0]);
    }

    #[test]
    fn braces_inside_strings_do_not_break_extraction() {
        let text = "prefix {\"elements\": [{\"label\": \"a } tricky ] label\", \"box\": [1, 2, 30, 40]}]} suffix";
        let parsed = parse_response(text, ProviderFamily::PermissiveText).unwrap();
        assert_eq!(parsed.elements[0].label, "a } tricky ] label");
    }

    #[test]
    fn free_text_tuples_bind_to_preceding_labels() {
        let text = "I can see:\n- Search bar: [120, 40, 860, 90]\n- \"Cart\" icon at (900, 40, 960, 90)\n";
        let parsed = parse_response(text, ProviderFamily::PermissiveText).unwrap();
        assert_eq!(parsed.strategy, ParseStrategy::Pattern);
        let labels: Vec<_> = parsed.elements.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["Search bar", "\"Cart\" icon"]);
        assert_eq!(parsed.elements[1].raw_box, [900.0, 40.0, 960.0, 90.0]);
    }

    #[test]
    fn y_first_hint_reorders_free_text_tuples() {
        let text = "Format [ymin, xmin, ymax, xmax]\nOK button: [10, 20, 30, 40]";
        let parsed = parse_response(text, ProviderFamily::PermissiveText).unwrap();
        assert_eq!(parsed.elements[0].raw_box, [20.0, 10.0, 40.0, 30.0]);
    }

    #[test]
    fn native_family_does_not_scan_tuples() {
        let err = parse_response("OK button: [10, 20, 30, 40]", ProviderFamily::NativeStructured)
            .unwrap_err();
        assert!(matches!(err, GroundingError::UnparsableResponse(_)));
    }

    #[test]
    fn unclosed_openers_count_toward_extraction_cap() {
        let text = format!("x {}", "[".repeat(200_000));
        let started = std::time::Instant::now();
        let err = parse_response(&text, ProviderFamily::NativeStructured).unwrap_err();
        assert!(matches!(err, GroundingError::UnparsableResponse(_)));
        assert!(started.elapsed() < std::time::Duration::from_secs(10));

        let stray = "[".repeat(MAX_EXTRACTION_ATTEMPTS);
        let text = format!("{stray} {{\"components\": [{{\"label\": \"a\", \"bbox\": [1, 2, 30, 40]}}]}}");
        assert!(parse_extracted(&text).is_none());
    }

    #[test]
    fn empty_and_junk_responses_are_unparsable() {
        for text in ["", "   ", "I could not analyse this image."] {
            let err = parse_response(text, ProviderFamily::PermissiveText).unwrap_err();
            assert!(matches!(err, GroundingError::UnparsableResponse(_)), "{text:?}");
        }
    }

    #[test]
    fn components_without_boxes_are_skipped_individually() {
        let text = r#"{"components": [
            {"label": "no box"},
            {"label": "short box", "box_2d": [1, 2, 3]},
            "not an object",
            {"label": "good", "bbox": {"x_min": 1, "y_min": 2, "x_max": 30, "y_max": "40"}}
        ]}"#;
        let parsed = parse_response(text, ProviderFamily::NativeStructured).unwrap();
        assert_eq!(parsed.elements.len(), 1);
        assert_eq!(parsed.elements[0].label, "good");
        assert_eq!(parsed.elements[0].raw_box, [1.0, 2.0, 30.0, 40.0]);
    }

    #[test]
    fn point_pair_boxes_are_accepted() {
        let text = r#"[{"name": "Tab", "bounds": [[10, 20], [110, 220]], "score": 0.8}]"#;
        let parsed = parse_response(text, ProviderFamily::NativeStructured).unwrap();
        assert_eq!(parsed.elements[0].raw_box, [10.0, 20.0, 110.0, 220.0]);
        assert_eq!(parsed.elements[0].confidence, Some(0.8));
    }

    #[test]
    fn order_of_appearance_is_preserved() {
        let text = r#"{"elements": [
            {"label": "c", "bbox": [0, 0, 10, 10]},
            {"label": "a", "bbox": [0, 0, 10, 10]},
            {"label": "b", "bbox": [0, 0, 10, 10]}
        ]}"#;
        let parsed = parse_response(text, ProviderFamily::NativeStructured).unwrap();
        let labels: Vec<_> = parsed.elements.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["c", "a", "b"]);
    }

    #[test]
    fn balanced_scan_rejects_mismatched_delimiters() {
        assert_eq!(find_balanced_end(b"{ ] }", 0), None);
        assert_eq!(find_balanced_end(b"[1, {\"a\": \"]\"}]", 0), Some(14));
        assert_eq!(find_balanced_end(b"{ \"open", 0), None);
    }
}
