/// Grounding pipeline: image dimensions + backend text (+ optional hierarchy
/// dump) in, validated pixel-space element list out.
///
/// 1. Decode the image and take its upright dimensions.
/// 2. Parse the backend response into raw candidates.
/// 3. Map each candidate's box onto pixels.
/// 4. Swap / clamp / discard per element.
/// 5. Merge with the hierarchy tree, if one was supplied and parses.
/// 6. Assign sequential ids.
///
/// Image problems abort the request. Everything after that degrades: an
/// unparsable response or hierarchy becomes a warning, a bad element is
/// dropped and counted.
use crate::config::EngineConfig;
use crate::errors::GroundingResult;
use crate::perception::box_validator::{validate_box, BoxOutcome};
use crate::perception::coords::to_pixels;
use crate::perception::hierarchy::{merge_hierarchy, parse_hierarchy, MergeParams};
use crate::perception::preprocess::{decode_image, ImageLimits};
use crate::perception::response_parser::parse_response;
use crate::perception::types::{
    Element, NormalizeResult, NormalizeStats, ProviderFamily, RawElement,
};

/// Stateless normalization engine. Cheap to clone and safe to share across
/// threads; every call works on its own inputs only.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: EngineConfig,
}

impl Normalizer {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn image_limits(&self) -> ImageLimits {
        ImageLimits {
            max_bytes: self.config.max_image_bytes,
            max_dimension: self.config.max_dimension,
        }
    }

    pub fn normalize(
        &self,
        image_bytes: &[u8],
        backend_response: &str,
        family: ProviderFamily,
        hierarchy_xml: Option<&str>,
    ) -> GroundingResult<NormalizeResult> {
        let image = decode_image(image_bytes, &self.image_limits())?;
        Ok(self.normalize_with_dimensions(
            image.width,
            image.height,
            backend_response,
            family,
            hierarchy_xml,
        ))
    }

    /// Same as [`normalize`](Self::normalize) for callers that already know
    /// the upright image size.
    pub fn normalize_with_dimensions(
        &self,
        width: u32,
        height: u32,
        backend_response: &str,
        family: ProviderFamily,
        hierarchy_xml: Option<&str>,
    ) -> NormalizeResult {
        let mut stats = NormalizeStats::default();
        let mut warnings = Vec::new();

        let (raw_elements, summary) = match parse_response(backend_response, family) {
            Ok(parsed) => (parsed.elements, parsed.summary.unwrap_or_default()),
            Err(e) => {
                tracing::warn!(error = %e, "backend response unparsable, returning no elements");
                warnings.push(e.to_string());
                (Vec::new(), String::new())
            }
        };
        stats.parsed = raw_elements.len();

        let mut elements: Vec<Element> = raw_elements
            .into_iter()
            .filter_map(|raw| self.ground_element(raw, width, height, &mut stats))
            .collect();

        let hierarchy = hierarchy_xml.and_then(|xml| match parse_hierarchy(xml) {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::warn!(error = %e, "hierarchy dump unusable, skipping merge");
                warnings.push(e.to_string());
                None
            }
        });
        let params = MergeParams {
            min_iou: self.config.min_merge_iou,
            min_edge_px: self.config.min_box_edge_px,
        };
        let (merged, counts) = merge_hierarchy(elements, hierarchy.as_ref(), width, height, params);
        elements = merged;
        stats.merged = counts.merged;
        stats.hierarchy_only = counts.hierarchy_only;

        assign_ids(&mut elements);

        tracing::info!(
            width,
            height,
            parsed = stats.parsed,
            kept = elements.len(),
            corrected = stats.corrected,
            discarded = stats.discarded,
            merged = stats.merged,
            hierarchy_only = stats.hierarchy_only,
            "grounding normalized"
        );

        NormalizeResult {
            summary,
            image_width: width,
            image_height: height,
            elements,
            stats,
            warnings,
        }
    }

    fn ground_element(
        &self,
        raw: RawElement,
        width: u32,
        height: u32,
        stats: &mut NormalizeStats,
    ) -> Option<Element> {
        let (px, convention) = to_pixels(&raw.raw_box, width, height);
        match validate_box(px, width, height, self.config.min_box_edge_px) {
            BoxOutcome::Valid { bbox, corrected } => {
                if corrected {
                    stats.corrected += 1;
                    tracing::debug!(label = %raw.label, raw = ?raw.raw_box, ?convention, "box corrected");
                }
                Some(Element::visual(raw, bbox))
            }
            BoxOutcome::Discarded(reason) => {
                stats.discarded += 1;
                tracing::warn!(label = %raw.label, raw = ?raw.raw_box, ?convention, ?reason, "element discarded");
                None
            }
        }
    }
}

/// Reassign 1-based ids in output order so agents can refer to elements
/// compactly.
fn assign_ids(elements: &mut [Element]) {
    for (idx, elem) in elements.iter_mut().enumerate() {
        elem.id = idx as u32 + 1;
    }
}

/// Normalize with default thresholds.
pub fn normalize(
    image_bytes: &[u8],
    backend_response: &str,
    family: ProviderFamily,
    hierarchy_xml: Option<&str>,
) -> GroundingResult<NormalizeResult> {
    Normalizer::default().normalize(image_bytes, backend_response, family, hierarchy_xml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GroundingError;
    use crate::perception::preprocess::png_fixture;
    use crate::perception::types::ElementSource;

    #[test]
    fn counts_corrections_and_discards() {
        let response = r#"{"components": [
            {"label": "inverted", "bbox": [300, 400, 100, 200]},
            {"label": "sliver", "bbox": [100, 100, 900, 101]},
            {"label": "fine", "bbox": [0.1, 0.1, 0.2, 0.2]}
        ]}"#;
        let result = Normalizer::default().normalize_with_dimensions(
            1000,
            1000,
            response,
            ProviderFamily::NativeStructured,
            None,
        );
        assert_eq!(result.stats.parsed, 3);
        assert_eq!(result.stats.corrected, 1);
        assert_eq!(result.stats.discarded, 1);
        let labels: Vec<_> = result.elements.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["inverted", "fine"]);
        let ids: Vec<_> = result.elements.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn bad_hierarchy_is_a_warning_not_a_failure() {
        let response = r#"[{"label": "a", "bbox": [10, 10, 50, 50]}]"#;
        let result = Normalizer::default().normalize_with_dimensions(
            100,
            100,
            response,
            ProviderFamily::PermissiveText,
            Some("<hierarchy><node>"),
        );
        assert_eq!(result.elements.len(), 1);
        assert_eq!(result.elements[0].source, ElementSource::Visual);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn image_errors_abort() {
        let err = normalize(b"nope", "[]", ProviderFamily::NativeStructured, None).unwrap_err();
        assert!(matches!(err, GroundingError::Decode(_)));
    }

    #[test]
    fn thresholds_come_from_config() {
        let config = EngineConfig {
            min_box_edge_px: 50.0,
            ..EngineConfig::default()
        };
        let response = r#"[{"label": "small", "bbox": [10, 10, 30, 30]}]"#;
        let result = Normalizer::new(config).normalize_with_dimensions(
            2000,
            2000,
            response,
            ProviderFamily::NativeStructured,
            None,
        );
        assert!(result.elements.is_empty());
        assert_eq!(result.stats.discarded, 1);
    }

    #[test]
    fn normalize_decodes_real_image() {
        let png = png_fixture(200, 100);
        let result = normalize(
            &png,
            r#"[{"label": "half", "bbox": [0, 0, 0.5, 1]}]"#,
            ProviderFamily::NativeStructured,
            None,
        )
        .unwrap();
        assert_eq!((result.image_width, result.image_height), (200, 100));
        let b = result.elements[0].box_px;
        assert_eq!((b.x_min, b.y_min, b.x_max, b.y_max), (0, 0, 100, 100));
    }
}
