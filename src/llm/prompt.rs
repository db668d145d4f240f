/// Grounding prompt and the backend-agnostic response schema.
use serde_json::{json, Value};

pub const GROUNDING_PROMPT: &str = "\
Analyze this UI screenshot for a blind automation agent.

Your task:
1. Provide a brief summary of what screen/application is shown
2. Identify ALL interactive and visible elements including:
   - Buttons (clickable elements)
   - Input fields (text boxes, search bars)
   - Icons (clickable icons, menu items)
   - Text (labels, headings, readable text)
   - Links (hyperlinks, navigation items)
   - Images (pictures, logos, graphics)
   - Other interactive elements

3. For EACH element, provide:
   - A clear, descriptive label
   - The element type (button, input, icon, text, link, image, or other)
   - Accurate bounding box coordinates as [ymin, xmin, ymax, xmax] normalized to 0-1000 scale

Be thorough and precise with bounding boxes to enable accurate clicking.";

/// JSON schema of the expected response, in standard JSON-Schema spelling.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "summary": {"type": "string"},
            "components": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "integer"},
                        "label": {"type": "string"},
                        "type": {"type": "string"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "box_2d": {
                            "type": "array",
                            "items": {"type": "number"},
                            "description": "[ymin, xmin, ymax, xmax] normalized 0-1000"
                        }
                    },
                    "required": ["id", "label", "type", "box_2d"]
                }
            }
        },
        "required": ["summary", "components"]
    })
}

/// The same schema with Gemini's upper-case `type` enum values.
pub fn gemini_response_schema() -> Value {
    fn upcase_types(v: &mut Value) {
        match v {
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    match child {
                        Value::String(s) if key == "type" => *s = s.to_ascii_uppercase(),
                        // "type" is also a property *name* under "properties".
                        _ => upcase_types(child),
                    }
                }
            }
            Value::Array(items) => items.iter_mut().for_each(upcase_types),
            _ => {}
        }
    }
    let mut schema = response_schema();
    upcase_types(&mut schema);
    schema
}

/// Schema instruction appended to the prompt for providers without
/// schema-constrained decoding.
pub fn json_instruction() -> String {
    let schema = serde_json::to_string_pretty(&response_schema()).unwrap_or_default();
    format!(
        "
You must return valid JSON matching this exact schema:
{schema}

Important:
- All bounding boxes 'box_2d' MUST be [ymin, xmin, ymax, xmax] normalized to 0-1000 range
- Each component must have: id (integer), label (string), type (string), box_2d (array of 4 numbers)
- Valid types: button, input, icon, text, link, image, other
- Ensure JSON is properly formatted and parseable
"
    )
}
