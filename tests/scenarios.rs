//! End-to-end pipeline scenarios: preprocess → segment → normalize →
//! quality → encode → matcher, and the repository's legacy-schema
//! migration path.

use image::{GrayImage, Luma};
use iris_core::config::{Config, Mode};
use iris_core::geometry::{Circle, Point};
use iris_core::matcher::{self, Decision};
use iris_core::repository::{
    migrate_legacy_row, row_to_record, InMemoryRepository, RepositoryAdapter, SubjectRecordRow,
};
use iris_core::segment::Segmentation;
use iris_core::template::Template;
use iris_core::{encode, normalize, preprocess, quality};
use std::f64::consts::PI;

const PUPIL_RADIUS: f64 = 30.0;
const IRIS_RADIUS: f64 = 80.0;
const CENTER: (f64, f64) = (320.0, 240.0);

/// A synthetic eye with angularly-varying iris texture (`frequency` cycles
/// around the annulus, rotated by `shift_deg` degrees), so the encoder
/// produces a non-trivial, distinguishing code instead of uniform regions.
fn synthetic_eye(frequency: f64, shift_deg: f64, occlude_top_half: bool) -> GrayImage {
    let shift = shift_deg.to_radians();
    GrayImage::from_fn(640, 480, |x, y| {
        let dx = f64::from(x) - CENTER.0;
        let dy = f64::from(y) - CENTER.1;
        let distance = (dx * dx + dy * dy).sqrt();
        let value = if distance <= PUPIL_RADIUS {
            40.0
        } else if distance <= IRIS_RADIUS {
            let mut theta = dy.atan2(dx);
            if theta < 0.0 {
                theta += 2.0 * PI;
            }
            if occlude_top_half && dy < 0.0 {
                0.0
            } else {
                128.0 + 60.0 * (frequency * (theta + shift)).sin()
            }
        } else {
            200.0
        };
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

fn segmentation() -> Segmentation {
    Segmentation {
        pupil: Circle::new(Point::new(CENTER.0, CENTER.1), PUPIL_RADIUS),
        iris: Circle::new(Point::new(CENTER.0, CENTER.1), IRIS_RADIUS),
    }
}

fn encode_eye(frequency: f64, shift_deg: f64, occlude_top_half: bool) -> iris_core::Result<Template> {
    let source = synthetic_eye(frequency, shift_deg, occlude_top_half);
    let preprocessed = preprocess::preprocess(&source).image;
    let strip = normalize::normalize(&preprocessed, &segmentation());
    encode::encode(&strip)
}

fn add_noise(image: &GrayImage, sigma: f64, seed: u64) -> GrayImage {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        // Irwin-Hall approximation of N(0, sigma^2): sum of 12 U(-0.5, 0.5)
        // samples has unit variance.
        let noise: f64 = (0..12).map(|_| rng.gen_range(-0.5..0.5)).sum::<f64>() * sigma;
        let base = f64::from(image.get_pixel(x, y).0[0]);
        Luma([(base + noise).round().clamp(0.0, 255.0) as u8])
    })
}

#[test]
fn empty_registry_enrollment_produces_consistent_templates() {
    let frequency = 20.0;
    let templates: Vec<Template> =
        (0..3).map(|_| encode_eye(frequency, 0.0, false).expect("burst should encode")).collect();

    for template in &templates {
        assert!(template.valid_fraction() >= 0.55, "mask valid fraction below gate");
    }
    let first = &templates[0];
    for other in &templates[1..] {
        let result = matcher::compare(first, other);
        assert!(result.distance < 0.20, "identical bursts should match tightly: {result:?}");
    }

    let repository = InMemoryRepository::new();
    let record = iris_core::repository::SubjectRecord {
        id: iris_core::repository::RecordId::new("subject-1"),
        first_name: "Test".to_string(),
        last_name: "Subject".to_string(),
        age: None,
        email: None,
        phone: None,
        notes: None,
        iris_image_path: None,
        templates,
        created_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
    };
    repository.insert(record).unwrap();
    let stored = repository.list_with_templates().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].templates.len(), 3);
}

#[test]
fn verification_against_noisy_capture_is_confirmed() {
    let frequency = 20.0;
    let enrolled = encode_eye(frequency, 0.0, false).expect("enrollment should encode");

    let noisy_source = add_noise(&synthetic_eye(frequency, 0.0, false), 5.0, 42);
    let preprocessed = preprocess::preprocess(&noisy_source).image;
    let strip = normalize::normalize(&preprocessed, &segmentation());
    let probe = encode::encode(&strip).expect("noisy capture should still encode");

    let result = matcher::compare(&probe, &enrolled);
    assert_eq!(result.decision, Decision::Confirmed, "noisy capture should confirm against its own enrollment: {result:?}");
    assert!(result.distance <= matcher::CONFIRMED_THRESHOLD, "distance {} exceeds the confirmed threshold", result.distance);
}

#[test]
fn verification_against_unrelated_texture_is_more_distant_than_against_self() {
    let enrolled = encode_eye(20.0, 0.0, false).expect("enrollment should encode");
    let unrelated = encode_eye(7.0, 95.0, false).expect("unrelated capture should encode");

    let self_distance = matcher::compare(&enrolled, &enrolled).distance;
    let cross_distance = matcher::compare(&enrolled, &unrelated).distance;
    assert!(cross_distance > self_distance);
}

#[test]
fn rotation_within_one_grid_column_is_within_tolerance() {
    let enrolled = encode_eye(20.0, 0.0, false).expect("enrollment should encode");
    // One angular grid column is 360/32 = 11.25 degrees (see encode::GRID_COLS).
    let rotated = encode_eye(20.0, 11.25, false).expect("rotated capture should encode");

    let result = matcher::compare(&enrolled, &rotated);
    assert!(result.distance <= 0.30, "rotated distance {} exceeds the consistency threshold", result.distance);
    assert!((-1..=1).contains(&result.best_shift), "best shift {} outside the expected +-1 column", result.best_shift);
}

#[test]
fn occluded_top_half_is_rejected_as_too_noisy() {
    let result = encode_eye(20.0, 0.0, true);
    assert!(matches!(result, Err(iris_core::PipelineError::EncodingTooNoisy(_))));
}

#[test]
fn occlusion_lowers_the_quality_scorer_occlusion_subscore() {
    let clean_source = synthetic_eye(20.0, 0.0, false);
    let occluded_source = synthetic_eye(20.0, 0.0, true);
    let clean = preprocess::preprocess(&clean_source).image;
    let occluded = preprocess::preprocess(&occluded_source).image;
    let seg = segmentation();
    let clean_strip = normalize::normalize(&clean, &seg);
    let occluded_strip = normalize::normalize(&occluded, &seg);

    let clean_quality = quality::score(&clean, &seg, &clean_strip);
    let occluded_quality = quality::score(&occluded, &seg, &occluded_strip);
    assert!(occluded_quality.occlusion < clean_quality.occlusion);
}

#[test]
fn legacy_v1_row_migrates_and_round_trips_through_v2() {
    let flat: Vec<f64> = (0..Template::LEN).map(|i| f64::from(i % 2)).collect();
    let csv = flat.iter().map(f64::to_string).collect::<Vec<_>>().join(",");
    let row = SubjectRecordRow {
        id: "legacy-1".to_string(),
        first_name: "Legacy".to_string(),
        last_name: "Subject".to_string(),
        age: None,
        email: None,
        phone: None,
        notes: None,
        iris_image_path: None,
        iris_templates: None,
        iris_template: Some(csv),
        created_at: "2020-01-01T00:00:00Z".to_string(),
        updated_at: "2020-01-01T00:00:00Z".to_string(),
    };

    let migrated = migrate_legacy_row(row);
    assert!(migrated.iris_template.is_none());
    assert_eq!(migrated.iris_templates.as_ref().unwrap().len(), 1);

    let record = row_to_record(migrated).expect("migrated row should convert");
    assert_eq!(record.templates.len(), 1);

    let repository = InMemoryRepository::new();
    repository.insert(record.clone()).unwrap();
    repository.update(record).unwrap();
    let fetched = repository
        .get_by_id(&iris_core::repository::RecordId::new("legacy-1"))
        .unwrap()
        .expect("record should exist after update");
    assert_eq!(fetched.templates.len(), 1);
}

#[test]
fn verification_flow_offers_enrollment_when_no_candidate_is_close() {
    let config = Config { mode: Mode::Verification, ..Config::default() };
    assert_eq!(config.min_score(), 50.0);
    // An empty registry can never produce a confirmed or suggested match;
    // exercised at the repository layer since driving the async controller
    // end-to-end requires a live frame source.
    let repository = InMemoryRepository::new();
    assert!(repository.list_with_templates().unwrap().is_empty());
}
