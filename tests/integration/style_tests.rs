//! Style engine integration tests.
//!
//! Tests verify:
//! - Every style honors the resolution bounds of both tiers
//! - Unknown style identifiers fall back to cartoon
//! - Color DNA transfer adopts the reference's Lab profile
//! - Background replacement and animation keep the image dimensions

use toonify::asset::{AssetEncoder, OutputFormat};
use toonify::error::StyleError;
use toonify::style::{
    fit_dimensions, lab_samples, ChannelMoments, ResolutionTier, Style, StyleRequest, Treatment,
    BREATH_FRAMES,
};

use super::test_utils::{
    encode_jpeg, encode_png, scene, scene_png, swatch, test_engine, TEST_PREMIUM_BOUNDS,
    TEST_STANDARD_BOUNDS,
};

// =============================================================================
// Resolution Bounds
// =============================================================================

#[test]
fn test_all_styles_respect_both_tiers() {
    let engine = test_engine();
    let input = scene_png(200, 100);

    for style in Style::ALL {
        for (tier, bounds) in [
            (ResolutionTier::Standard, TEST_STANDARD_BOUNDS),
            (ResolutionTier::Premium, TEST_PREMIUM_BOUNDS),
        ] {
            let request = StyleRequest::new(Treatment::Stylize(style), tier);
            let result = engine.process(&input, &request).unwrap();

            let expected = fit_dimensions(200, 100, bounds.0, bounds.1);
            assert_eq!(
                result.image.dimensions(),
                expected,
                "{} at {} produced the wrong size",
                style,
                tier
            );
        }
    }
}

#[test]
fn test_small_inputs_are_not_upscaled() {
    let engine = test_engine();
    let request = StyleRequest::from_identifier("anime", ResolutionTier::Premium);
    let result = engine.process(&scene_png(20, 10), &request).unwrap();
    assert_eq!(result.image.dimensions(), (20, 10));
}

#[test]
fn test_jpeg_and_png_inputs() {
    let engine = test_engine();
    let request = StyleRequest::from_identifier("sketch", ResolutionTier::Standard);

    let from_png = engine.process(&encode_png(&scene(40, 20)), &request).unwrap();
    let from_jpeg = engine.process(&encode_jpeg(&scene(40, 20)), &request).unwrap();
    assert_eq!(from_png.image.dimensions(), from_jpeg.image.dimensions());
}

#[test]
fn test_invalid_input_is_rejected() {
    let engine = test_engine();
    let request = StyleRequest::from_identifier("cartoon", ResolutionTier::Standard);

    let err = engine.process(b"definitely not an image", &request).unwrap_err();
    assert!(matches!(err, StyleError::InvalidImage { .. }));

    let err = engine.process(&[], &request).unwrap_err();
    assert!(matches!(err, StyleError::InvalidImage { .. }));
}

// =============================================================================
// Style Resolution
// =============================================================================

#[test]
fn test_unknown_style_falls_back_to_cartoon() {
    let engine = test_engine();
    let input = scene_png(64, 36);

    let unknown = StyleRequest::from_identifier("vaporwave", ResolutionTier::Standard);
    assert_eq!(unknown.treatment, Treatment::Stylize(Style::Cartoon));

    let cartoon = StyleRequest::from_identifier("cartoon", ResolutionTier::Standard);
    let a = engine.process(&input, &unknown).unwrap();
    let b = engine.process(&input, &cartoon).unwrap();
    assert_eq!(a.image, b.image);
}

#[test]
fn test_statistics_are_reported() {
    let engine = test_engine();
    let request = StyleRequest::from_identifier("vintage", ResolutionTier::Standard);
    let result = engine.process(&scene_png(48, 27), &request).unwrap();

    let input = result.input_stats.unwrap();
    let output = result.output_stats.unwrap();
    assert!((0.0..=255.0).contains(&input.brightness));
    assert!((0.0..=255.0).contains(&output.brightness));

    let balance = output.color_balance;
    assert!((balance.r + balance.g + balance.b - 100.0).abs() < 0.5);
}

// =============================================================================
// Effects
// =============================================================================

#[test]
fn test_dna_transfer_adopts_reference_profile() {
    let engine = test_engine();
    let target = swatch(40, 24, [60, 90, 120], 60);
    let reference = swatch(40, 40, [150, 110, 70], 50);

    let request = StyleRequest::new(
        Treatment::DnaTransfer {
            reference: encode_png(&reference),
        },
        ResolutionTier::Standard,
    );
    let result = engine.process(&encode_png(&target), &request).unwrap();

    let got = ChannelMoments::of(&lab_samples(&result.image));
    let want = ChannelMoments::of(&lab_samples(&reference));
    let tolerance = 0.02 * 255.0;
    for c in 0..3 {
        assert!(
            (got.mean[c] - want.mean[c]).abs() <= tolerance,
            "mean[{c}]: {} vs {}",
            got.mean[c],
            want.mean[c]
        );
    }
}

#[test]
fn test_dna_transfer_rejects_bad_reference() {
    let engine = test_engine();
    let request = StyleRequest::new(
        Treatment::DnaTransfer {
            reference: bytes::Bytes::from_static(b"garbage"),
        },
        ResolutionTier::Standard,
    );
    assert!(engine.process(&scene_png(32, 18), &request).is_err());
}

#[test]
fn test_background_replacement_keeps_dimensions() {
    let engine = test_engine();
    for plate in ["tokyo", "cyberpunk", "forest", "atlantis"] {
        let request = StyleRequest::new(
            Treatment::ReplaceBackground {
                plate: plate.to_string(),
            },
            ResolutionTier::Standard,
        );
        let result = engine.process(&scene_png(48, 27), &request).unwrap();
        assert_eq!(result.image.dimensions(), (48, 27), "plate {}", plate);
    }
}

#[test]
fn test_animation_encodes_to_gif() {
    let engine = test_engine();
    let image = scene(30, 20);

    let frames = engine.animate(&image);
    assert_eq!(frames.len(), BREATH_FRAMES);
    assert!(frames.iter().all(|f| f.dimensions() == (30, 20)));

    let gif = AssetEncoder::new().encode_animation(&frames).unwrap();
    assert!(gif.starts_with(b"GIF8"));
    assert_eq!(OutputFormat::Gif.content_type(), "image/gif");
}
