use std::io::Cursor;

use image::{DynamicImage, ImageFormat, RgbImage};
use visual_cortex::{normalize, ElementSource, NormalizeResult, ProviderFamily};

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

fn one_box(raw: [f64; 4]) -> String {
    serde_json::json!({"summary": "screen", "components": [{"label": "target", "bbox": raw}]})
        .to_string()
}

fn corners(result: &NormalizeResult) -> Vec<(u32, u32, u32, u32)> {
    result
        .elements
        .iter()
        .map(|e| (e.box_px.x_min, e.box_px.y_min, e.box_px.x_max, e.box_px.y_max))
        .collect()
}

#[test]
fn fractional_box_on_phone_screenshot() {
    let image = png(1080, 2400);
    let result = normalize(
        &image,
        &one_box([0.1, 0.2, 0.3, 0.4]),
        ProviderFamily::NativeStructured,
        None,
    )
    .unwrap();

    assert_eq!((result.image_width, result.image_height), (1080, 2400));
    assert_eq!(corners(&result), vec![(108, 480, 324, 960)]);
    let b = result.elements[0].box_px;
    assert_eq!((b.center_x, b.center_y), (216, 720));
    assert_eq!((b.width, b.height), (216, 480));
}

#[test]
fn sliver_after_grid_scaling_is_discarded() {
    let image = png(1000, 2000);
    let result = normalize(
        &image,
        &one_box([500.0, 500.0, 900.0, 501.0]),
        ProviderFamily::NativeStructured,
        None,
    )
    .unwrap();
    assert!(result.elements.is_empty());
    assert_eq!(result.stats.discarded, 1);
}

#[test]
fn empty_response_still_reports_dimensions() {
    let image = png(320, 240);
    let result = normalize(&image, "", ProviderFamily::PermissiveText, None).unwrap();
    assert!(result.elements.is_empty());
    assert_eq!((result.image_width, result.image_height), (320, 240));
    assert_eq!(result.warnings.len(), 1);
}

#[test]
fn repeated_runs_serialize_identically() {
    let image = png(640, 480);
    let response = r#"Here you go:
```json
{"components": [
  {"label": "Menu", "type": "icon", "box_2d": [10, 20, 80, 90]},
  {"label": "Search", "type": "input", "bbox": [0.2, 0.1, 0.8, 0.15]}
]}
```"#;
    let first = normalize(&image, response, ProviderFamily::PermissiveText, None).unwrap();
    let second = normalize(&image, response, ProviderFamily::PermissiveText, None).unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
    assert_eq!(first.elements.len(), 2);
}

#[test]
fn conventions_agree_on_the_same_region() {
    let image = png(1080, 2400);
    let fractional = [0.1, 0.5, 0.3, 0.6];
    let grid = [100.0, 500.0, 300.0, 600.0];
    let pixels = [108.0, 1200.0, 324.0, 1440.0];

    let boxes: Vec<_> = [fractional, grid, pixels]
        .into_iter()
        .map(|raw| {
            let result =
                normalize(&image, &one_box(raw), ProviderFamily::NativeStructured, None).unwrap();
            corners(&result)[0]
        })
        .collect();

    for b in &boxes[1..] {
        assert!(boxes[0].0.abs_diff(b.0) <= 1);
        assert!(boxes[0].1.abs_diff(b.1) <= 1);
        assert!(boxes[0].2.abs_diff(b.2) <= 1);
        assert!(boxes[0].3.abs_diff(b.3) <= 1);
    }
    assert_eq!(boxes[2], (108, 1200, 324, 1440));
}

#[test]
fn inverted_corners_land_on_the_same_box() {
    let image = png(1080, 2400);
    let upright = normalize(
        &image,
        &one_box([0.1, 0.2, 0.3, 0.4]),
        ProviderFamily::NativeStructured,
        None,
    )
    .unwrap();
    let inverted = normalize(
        &image,
        &one_box([0.3, 0.4, 0.1, 0.2]),
        ProviderFamily::NativeStructured,
        None,
    )
    .unwrap();
    assert_eq!(corners(&upright), corners(&inverted));
    assert_eq!(inverted.stats.corrected, 1);
}

#[test]
fn boxes_are_always_inside_the_image() {
    let image = png(200, 100);
    let response = r#"[
        {"label": "overflow", "bbox": [150, 50, 400, 300]},
        {"label": "negative", "bbox": [-20, -10, 60, 40]}
    ]"#;
    let result = normalize(&image, response, ProviderFamily::PermissiveText, None).unwrap();
    assert_eq!(result.elements.len(), 2);
    for e in &result.elements {
        assert!(e.box_px.x_min < e.box_px.x_max && e.box_px.x_max <= 200);
        assert!(e.box_px.y_min < e.box_px.y_max && e.box_px.y_max <= 100);
    }
}

#[test]
fn prose_tuples_are_recovered_for_text_providers() {
    let image = png(1000, 1000);
    let response = "I found these:\n1. \"Submit\" at (100, 200, 300, 260)\n2. Cancel (400, 200, 600, 260)";
    let result = normalize(&image, response, ProviderFamily::PermissiveText, None).unwrap();
    assert_eq!(result.elements.len(), 2);
    assert_eq!(result.elements[0].id, 1);
    assert_eq!(result.elements[1].id, 2);
}

#[test]
fn hierarchy_enriches_and_completes_visual_output() {
    let image = png(1000, 2000);
    // grid units: y doubles on this image
    let response = r#"{"components": [
        {"label": "Sign in", "type": "button", "bbox": [101, 201, 499, 299]}
    ]}"#;
    let xml = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node text="" resource-id="" class="android.widget.FrameLayout" clickable="false" bounds="[0,0][1000,2000]">
    <node text="Sign in" resource-id="com.example:id/sign_in" class="android.widget.Button" content-desc="" clickable="true" bounds="[100,400][500,600]" />
    <node text="" resource-id="com.example:id/settings" class="android.widget.ImageButton" content-desc="Settings" clickable="true" bounds="[900,100][1000,200]" />
  </node>
</hierarchy>"#;

    let result = normalize(&image, response, ProviderFamily::NativeStructured, Some(xml)).unwrap();
    assert_eq!(result.elements.len(), 2);
    assert_eq!(result.stats.merged, 1);
    assert_eq!(result.stats.hierarchy_only, 1);

    let sign_in = &result.elements[0];
    assert_eq!(sign_in.source, ElementSource::Merged);
    assert_eq!(sign_in.resource_id.as_deref(), Some("com.example:id/sign_in"));

    let settings = &result.elements[1];
    assert_eq!(settings.source, ElementSource::Hierarchy);
    assert_eq!(corners(&result)[1], (900, 100, 1000, 200));
}
