//! Slice-to-volume integration tests.
//!
//! Tests verify:
//! - A single edge gives identical output with and without cascading
//! - Cascading reaches the root through every intermediate edge
//! - Flipped slices are mirrored before their transform is applied
//! - Registration errors abort before any image is written
//! - Unreadable slices degrade the run

use std::sync::Arc;

use mosaic_assembler::error::{PipelineError, RegistrationError, Warning};
use mosaic_assembler::format::StosRecord;
use mosaic_assembler::io::{MemoryStore, RasterStore};
use mosaic_assembler::raster::RasterImage;
use mosaic_assembler::registration::{VolumeFrame, VolumeOptions, VolumePipeline};
use mosaic_assembler::transform::Transform;

use super::test_utils::{decoded, flat_tile, paths_containing, pattern_tile, TestExecutors};

fn pipeline(store: &Arc<MemoryStore>, executors: &TestExecutors) -> VolumePipeline {
    VolumePipeline::new(
        Arc::clone(store) as Arc<dyn RasterStore>,
        Arc::clone(&executors.pool),
        executors.handle(),
    )
}

fn insert(store: &MemoryStore, name: &str, raster: &RasterImage) {
    store.insert_raster(format!("slices/{name}"), raster).unwrap();
}

fn options(output_dir: &str) -> VolumeOptions {
    VolumeOptions {
        slice_dir: Some("slices".into()),
        ..VolumeOptions::new(output_dir)
    }
}

#[test]
fn test_single_edge_cascade_matches_direct() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    insert(&store, "a.png", &pattern_tile(40, 30));
    insert(&store, "b.png", &pattern_tile(40, 30));

    let mut record = StosRecord::new(1, "a.png", "b.png", Transform::translation(5.0, 3.0));
    record.flipped1 = true;

    let cascaded = pipeline(&store, &executors)
        .run(vec![record.clone()], &options("cascade"))
        .unwrap();
    let direct = pipeline(&store, &executors)
        .run(
            vec![record],
            &VolumeOptions {
                cascade: false,
                ..options("direct")
            },
        )
        .unwrap();

    assert_eq!(cascaded.outputs_composited, 2);
    assert_eq!(cascaded.bbox, direct.bbox);
    for slice in ["a.png", "b.png"] {
        let left = store.get_bytes(format!("cascade/{slice}")).unwrap();
        let right = store.get_bytes(format!("direct/{slice}")).unwrap();
        assert_eq!(left, right, "{slice} differs between modes");
    }
}

#[test]
fn test_cascade_reaches_root_through_chain() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    for name in ["a.png", "b.png", "c.png"] {
        insert(&store, name, &pattern_tile(20, 10));
    }
    let records = vec![
        StosRecord::new(1, "a.png", "b.png", Transform::translation(2.0, 0.0)),
        StosRecord::new(2, "b.png", "c.png", Transform::translation(3.0, 0.0)),
    ];

    let report = pipeline(&store, &executors)
        .run(records.clone(), &options("vol"))
        .unwrap();
    // Root x maps to b at x + 2 and to c at x + 5, so the slices span
    // [0, 20], [-2, 18] and [-5, 15] in the root frame.
    assert_eq!((report.width, report.height), (15, 10));
    assert_eq!(report.bbox.min.x, 0.0);

    let source = pattern_tile(20, 10);
    let a = decoded(&store, "vol/a.png");
    let b = decoded(&store, "vol/b.png");
    let c = decoded(&store, "vol/c.png");
    for y in [0, 4, 9] {
        assert_eq!(a.get(0, y), source.get(0, y));
        assert_eq!(b.get(0, y), source.get(2, y));
        assert_eq!(c.get(0, y), source.get(5, y));
    }

    // Without cascading, c only moves by its own edge.
    let direct = pipeline(&store, &executors)
        .run(
            records,
            &VolumeOptions {
                cascade: false,
                ..options("direct")
            },
        )
        .unwrap();
    assert_eq!(direct.width, 17);
    assert_eq!(decoded(&store, "direct/a.png").get(0, 0), source.get(0, 0));
    assert_eq!(decoded(&store, "direct/c.png").get(0, 0), source.get(3, 0));
}

#[test]
fn test_flipped_slice_is_mirrored() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let source = pattern_tile(12, 6);
    insert(&store, "a.png", &source);
    insert(&store, "b.png", &source);

    let mut record = StosRecord::new(1, "a.png", "b.png", Transform::Identity);
    record.flipped1 = true;

    pipeline(&store, &executors)
        .run(vec![record], &options("vol"))
        .unwrap();
    let a = decoded(&store, "vol/a.png");
    let b = decoded(&store, "vol/b.png");
    assert_eq!(a.get(0, 2), source.get(0, 2));
    assert_eq!(b.get(0, 2), source.get(11, 2));
    assert_eq!(b.get(11, 2), source.get(0, 2));
}

#[test]
fn test_union_frame_and_masks() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    insert(&store, "a.png", &flat_tile(10, 10, 90.0));
    insert(&store, "b.png", &flat_tile(10, 10, 30.0));
    let records = vec![StosRecord::new(1, "a.png", "b.png", Transform::translation(4.0, 2.0))];

    let report = pipeline(&store, &executors)
        .run(
            records,
            &VolumeOptions {
                frame: VolumeFrame::Union,
                write_mask: true,
                ..options("vol")
            },
        )
        .unwrap();
    // b spans [-4, 6] x [-2, 8] in the root frame.
    assert_eq!((report.width, report.height), (14, 12));
    assert_eq!(report.bbox.min.x, -4.0);
    assert_eq!(report.extent_label(), "Union footprint");
    assert_eq!(report.written.len(), 4);

    let a = decoded(&store, "vol/a.png");
    assert_eq!(a.get(0, 0), 0.0);
    assert_eq!(a.get(13, 11), 90.0);
    let b = decoded(&store, "vol/b.png");
    assert_eq!(b.get(0, 0), 30.0);
    assert_eq!(b.get(13, 11), 0.0);

    let mask = decoded(&store, "vol/a.mask.png");
    assert_eq!(mask.get(0, 0), 255.0);
    assert_eq!(mask.get(13, 11), 255.0);
}

#[test]
fn test_ambiguous_registration_writes_nothing() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    for name in ["a.png", "b.png", "c.png"] {
        insert(&store, name, &flat_tile(8, 8, 1.0));
    }
    let records = vec![
        StosRecord::new(1, "a.png", "c.png", Transform::Identity),
        StosRecord::new(2, "b.png", "c.png", Transform::Identity),
    ];

    let err = pipeline(&store, &executors)
        .run(records, &options("vol"))
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Registration(RegistrationError::AmbiguousRegistration { .. })
    ));
    assert!(paths_containing(&store, "vol/").is_empty());
    assert_eq!(store.load_count("slices/a.png"), 0);
}

#[test]
fn test_missing_slice_degrades_run() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    insert(&store, "a.png", &flat_tile(8, 8, 1.0));
    insert(&store, "b.png", &flat_tile(8, 8, 2.0));
    let records = vec![
        StosRecord::new(1, "a.png", "b.png", Transform::Identity),
        StosRecord::new(2, "a.png", "gone.png", Transform::Identity),
    ];

    let report = pipeline(&store, &executors)
        .run(records, &options("vol"))
        .unwrap();
    assert_eq!(report.outputs_composited, 2);
    assert_eq!(report.outputs_skipped, 1);
    assert!(matches!(
        &report.warnings[..],
        [Warning::SourceImageUnreadable { path, .. }] if path.ends_with("gone.png")
    ));
    assert!(store.contains("vol/a.png"));
    assert!(!store.contains("vol/gone.png"));
}

#[test]
fn test_disjoint_slices_have_no_footprint() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    insert(&store, "a.png", &flat_tile(8, 8, 1.0));
    insert(&store, "b.png", &flat_tile(8, 8, 2.0));
    let records = vec![StosRecord::new(1, "a.png", "b.png", Transform::translation(40.0, 0.0))];

    let err = pipeline(&store, &executors)
        .run(records, &options("vol"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::EmptyFootprint));
}
