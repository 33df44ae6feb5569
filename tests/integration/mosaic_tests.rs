//! End-to-end mosaic assembly tests.
//!
//! Tests verify:
//! - Last-writer-wins and blended overlaps on a two-tile mosaic
//! - Tiled deferred runs plan the full grid and skip empty regions
//! - Save failures surface after the writer is joined
//! - Unreadable sources degrade the run instead of aborting it
//! - Resident and deferred loading produce identical pixels
//! - Filesystem round trip through descriptor, tiles and manifest

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::ImageFormat;

use mosaic_assembler::error::{PipelineError, Warning};
use mosaic_assembler::format::{MosaicDescriptor, TileManifest, TileSpec};
use mosaic_assembler::geometry::Point2;
use mosaic_assembler::io::{FsRasterStore, MemoryStore, RasterStore};
use mosaic_assembler::mosaic::{FeatherMode, MosaicOptions, MosaicPipeline};
use mosaic_assembler::raster::{encode_raster, SampleType};
use mosaic_assembler::runtime::CancelFlag;
use mosaic_assembler::transform::Transform;
use mosaic_assembler::writer::QUEUE_DEPTH_PER_WORKER;

use super::test_utils::{
    decoded, descriptor_with, flat_tile, paths_containing, pattern_tile, TestExecutors,
};

fn two_tiles(store: &MemoryStore) -> MosaicDescriptor {
    descriptor_with(
        store,
        &[
            ("t0.png", flat_tile(100, 100, 50.0), Transform::Identity),
            ("t1.png", flat_tile(100, 100, 200.0), Transform::translation(50.0, 0.0)),
        ],
    )
}

fn pipeline(store: &Arc<MemoryStore>, executors: &TestExecutors) -> MosaicPipeline {
    MosaicPipeline::new(
        Arc::clone(store) as Arc<dyn RasterStore>,
        Arc::clone(&executors.pool),
        executors.handle(),
    )
}

// =============================================================================
// Feathering
// =============================================================================

#[test]
fn test_last_writer_wins_without_feathering() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = two_tiles(&store);
    let options = MosaicOptions {
        feathering: FeatherMode::None,
        ..MosaicOptions::new("out/m.png")
    };

    let report = pipeline(&store, &executors).run(&descriptor, &options).unwrap();
    assert_eq!((report.width, report.height), (150, 100));
    assert_eq!(report.outputs_planned, 1);
    assert!(report.manifest.is_none());

    let mosaic = decoded(&store, "out/m.png");
    assert_eq!(mosaic.dimensions(), (150, 100));
    for y in [0, 50, 99] {
        assert_eq!(mosaic.get(0, y), 50.0);
        assert_eq!(mosaic.get(49, y), 50.0);
        assert_eq!(mosaic.get(50, y), 200.0);
        assert_eq!(mosaic.get(99, y), 200.0);
        assert_eq!(mosaic.get(149, y), 200.0);
    }
}

#[test]
fn test_blend_interpolates_across_overlap() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = two_tiles(&store);
    let options = MosaicOptions {
        feathering: FeatherMode::Blend,
        ..MosaicOptions::new("out/m.png")
    };

    pipeline(&store, &executors).run(&descriptor, &options).unwrap();
    let mosaic = decoded(&store, "out/m.png");

    assert_eq!(mosaic.get(10, 40), 50.0);
    assert_eq!(mosaic.get(140, 40), 200.0);

    // Weights (99.5 - x) / 50 and (x - 49.5) / 50 inside the band.
    for x in 50..100u32 {
        let w2 = (x as f32 - 49.5) / 50.0;
        let expected = 50.0 * (1.0 - w2) + 200.0 * w2;
        let actual = mosaic.get(x, 40);
        assert!(
            (actual - expected).abs() <= 1.0,
            "column {x}: expected {expected}, got {actual}"
        );
    }
    for x in 51..100u32 {
        assert!(mosaic.get(x, 40) >= mosaic.get(x - 1, 40));
    }
}

// =============================================================================
// Tiled Deferred Runs
// =============================================================================

fn diagonal_tiles(store: &MemoryStore) -> MosaicDescriptor {
    descriptor_with(
        store,
        &[
            ("a.png", flat_tile(100, 100, 80.0), Transform::Identity),
            ("b.png", flat_tile(100, 100, 160.0), Transform::translation(100.0, 100.0)),
        ],
    )
}

fn tiled_deferred(output: &str) -> MosaicOptions {
    MosaicOptions {
        tile_size: Some((64, 64)),
        deferred: true,
        ..MosaicOptions::new(output)
    }
}

#[test]
fn test_deferred_tiling_skips_empty_regions() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = diagonal_tiles(&store);

    let report = pipeline(&store, &executors)
        .run(&descriptor, &tiled_deferred("out/m.png"))
        .unwrap();

    assert_eq!((report.width, report.height), (200, 200));
    assert_eq!(report.outputs_planned, 16);
    assert_eq!(report.outputs_composited, 12);
    assert_eq!(report.outputs_skipped, 4);
    assert_eq!(report.written.len(), 12);
    assert_eq!(report.peak_resident, 2);

    for (column, row) in [(0, 2), (0, 3), (2, 0), (3, 0)] {
        let path = format!("out/m.{column:03}.{row:03}.png");
        assert!(!store.contains(&path), "{path} should have been skipped");
    }
    assert!(store.contains("out/m.000.000.png"));
    assert!(store.contains("out/m.003.003.png"));

    // Planner pass plus one cache load each; no reload between columns.
    assert_eq!(store.load_count("a.png"), 2);
    assert_eq!(store.load_count("b.png"), 2);

    let edge = decoded(&store, "out/m.003.003.png");
    assert_eq!(edge.dimensions(), (8, 8));
    assert_eq!(edge.get(7, 7), 160.0);
}

#[test]
fn test_manifest_lists_written_tiles() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = diagonal_tiles(&store);
    let options = MosaicOptions {
        write_mask: true,
        ..tiled_deferred("out/m.png")
    };

    let report = pipeline(&store, &executors).run(&descriptor, &options).unwrap();
    assert_eq!(report.manifest, Some(PathBuf::from("out/m.manifest.json")));
    assert_eq!(report.written.len(), 24);

    let json = store.get_bytes("out/m.manifest.json").unwrap();
    let manifest = TileManifest::from_json(std::str::from_utf8(&json).unwrap()).unwrap();
    assert_eq!((manifest.mosaic_width, manifest.mosaic_height), (200, 200));
    assert_eq!((manifest.columns, manifest.rows), (4, 4));
    assert_eq!(manifest.tiles.len(), 12);

    let entry = manifest
        .tiles
        .iter()
        .find(|e| e.column == 1 && e.row == 2)
        .unwrap();
    assert_eq!((entry.x, entry.y, entry.width, entry.height), (64, 128, 64, 64));
    assert_eq!(entry.file, "m.001.002.png");
    assert_eq!(entry.mask_file.as_deref(), Some("m.001.002.mask.png"));

    let mask = decoded(&store, "out/m.000.000.mask.png");
    assert_eq!(mask.get(0, 0), 255.0);
    let mask = decoded(&store, "out/m.001.000.mask.png");
    assert_eq!(mask.get(63, 0), 0.0);
}

#[test]
fn test_resident_ceiling_bounds_decoded_tiles() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = descriptor_with(
        &store,
        &[
            ("s0.png", flat_tile(64, 64, 10.0), Transform::Identity),
            ("s1.png", flat_tile(64, 64, 20.0), Transform::translation(64.0, 0.0)),
            ("s2.png", flat_tile(64, 64, 30.0), Transform::translation(128.0, 0.0)),
        ],
    );
    let options = MosaicOptions {
        max_resident: Some(1),
        ..tiled_deferred("out/row.png")
    };

    let report = pipeline(&store, &executors).run(&descriptor, &options).unwrap();
    assert_eq!(report.outputs_composited, 3);
    assert_eq!(report.peak_resident, 1);
    assert_eq!(decoded(&store, "out/row.002.000.png").get(0, 0), 30.0);
}

#[test]
fn test_slow_storage_bounds_queued_outputs() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = diagonal_tiles(&store);
    store.delay_saves(Duration::from_millis(10));
    let options = MosaicOptions {
        tile_size: Some((64, 64)),
        io_workers: 1,
        write_mask: true,
        ..MosaicOptions::new("out/m.png")
    };

    let report = pipeline(&store, &executors).run(&descriptor, &options).unwrap();
    assert_eq!(report.outputs_composited, 12);
    assert_eq!(report.written.len(), 24);
    assert!(report.peak_pending_writes <= QUEUE_DEPTH_PER_WORKER);
    assert!(store.contains("out/m.003.003.mask.png"));
}

// =============================================================================
// Failures and Degraded Runs
// =============================================================================

#[test]
fn test_save_failure_reported_after_join() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = diagonal_tiles(&store);
    store.reject_saves_containing("m.001.001");

    let err = pipeline(&store, &executors)
        .run(&descriptor, &tiled_deferred("out/m.png"))
        .unwrap_err();
    match err {
        PipelineError::SaveFailure { failures } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].path, PathBuf::from("out/m.001.001.png"));
        }
        other => panic!("expected save failure, got {other:?}"),
    }

    // Every other tile still landed and no manifest claims the failed one.
    assert_eq!(paths_containing(&store, "out/m.0").len(), 11);
    assert!(!store.contains("out/m.manifest.json"));
}

#[test]
fn test_unreadable_source_degrades_run() {
    for deferred in [false, true] {
        let executors = TestExecutors::new();
        let store = Arc::new(MemoryStore::new());
        let mut descriptor = two_tiles(&store);
        store.insert_bytes("broken.png", Bytes::from_static(b"not an image"));
        descriptor.tiles.push(TileSpec {
            path: PathBuf::from("broken.png"),
            mask_path: None,
            transform: Transform::translation(500.0, 0.0),
        });
        let options = MosaicOptions {
            tile_size: Some((256, 256)),
            deferred,
            ..MosaicOptions::new("out/m.png")
        };

        let report = pipeline(&store, &executors).run(&descriptor, &options).unwrap();
        assert!(report.is_degraded());
        assert_eq!(report.warnings.len(), 1, "deferred = {deferred}");
        assert!(matches!(
            &report.warnings[0],
            Warning::SourceImageUnreadable { path, .. } if path == Path::new("broken.png")
        ));
        // The broken tile never widens the mosaic.
        assert_eq!(report.width, 150);
    }
}

#[test]
fn test_cancelled_run_writes_nothing() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = diagonal_tiles(&store);
    let cancel = CancelFlag::new();
    cancel.cancel();

    let err = pipeline(&store, &executors)
        .with_cancel_flag(cancel)
        .run(&descriptor, &tiled_deferred("out/m.png"))
        .unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled { completed: 0 }));
    assert!(paths_containing(&store, "out/").is_empty());
}

#[test]
fn test_deferred_without_tiling_is_rejected_before_loading() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = two_tiles(&store);
    let options = MosaicOptions {
        deferred: true,
        ..MosaicOptions::new("out/m.png")
    };

    let err = pipeline(&store, &executors).run(&descriptor, &options).unwrap_err();
    assert!(matches!(err, PipelineError::Configuration(_)));
    assert_eq!(store.load_count("t0.png"), 0);
}

// =============================================================================
// Loading Modes
// =============================================================================

#[test]
fn test_resident_and_deferred_outputs_match() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = descriptor_with(
        &store,
        &[
            ("p0.png", pattern_tile(90, 70), Transform::Identity),
            (
                "p1.png",
                pattern_tile(90, 70),
                Transform::rigid(0.1, Point2::new(45.0, 35.0), Point2::new(60.0, 20.0)),
            ),
        ],
    );

    let resident = MosaicOptions {
        tile_size: Some((48, 48)),
        ..MosaicOptions::new("res/m.png")
    };
    let deferred = MosaicOptions {
        deferred: true,
        ..resident.clone()
    };
    let deferred = MosaicOptions {
        output: PathBuf::from("def/m.png"),
        ..deferred
    };

    let a = pipeline(&store, &executors).run(&descriptor, &resident).unwrap();
    let b = pipeline(&store, &executors).run(&descriptor, &deferred).unwrap();
    assert_eq!(a.bbox, b.bbox);
    assert_eq!(a.outputs_composited, b.outputs_composited);

    let res_tiles = paths_containing(&store, "res/m.0");
    assert!(!res_tiles.is_empty());
    for path in res_tiles {
        let twin = PathBuf::from("def").join(path.file_name().unwrap());
        assert_eq!(
            store.get_bytes(&path),
            store.get_bytes(&twin),
            "{} differs",
            path.display()
        );
    }
}

#[test]
fn test_broken_mask_excluded_in_both_modes() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let mut descriptor = two_tiles(&store);
    store.insert_bytes("t1.mask.png", Bytes::from_static(b"not a mask"));
    descriptor.tiles[1].mask_path = Some(PathBuf::from("t1.mask.png"));

    let resident = MosaicOptions {
        tile_size: Some((64, 64)),
        ..MosaicOptions::new("res/m.png")
    };
    let deferred = MosaicOptions {
        deferred: true,
        output: PathBuf::from("def/m.png"),
        ..resident.clone()
    };

    let a = pipeline(&store, &executors).run(&descriptor, &resident).unwrap();
    let b = pipeline(&store, &executors).run(&descriptor, &deferred).unwrap();
    assert_eq!(a.bbox, b.bbox);
    assert_eq!((b.width, b.height), (100, 100));
    assert_eq!(a.outputs_planned, b.outputs_planned);
    assert_eq!(b.outputs_skipped, 0);
    for report in [&a, &b] {
        assert!(matches!(
            &report.warnings[..],
            [Warning::SourceImageUnreadable { path, .. }] if path == Path::new("t1.png")
        ));
    }
}

#[test]
fn test_shrink_halves_output() {
    let executors = TestExecutors::new();
    let store = Arc::new(MemoryStore::new());
    let descriptor = two_tiles(&store);
    let options = MosaicOptions {
        shrink: 2,
        feathering: FeatherMode::None,
        ..MosaicOptions::new("out/small.png")
    };

    let report = pipeline(&store, &executors).run(&descriptor, &options).unwrap();
    assert_eq!(report.pixel_spacing, 2.0);
    assert_eq!((report.width, report.height), (75, 50));
    assert_eq!(decoded(&store, "out/small.png").get(74, 0), 200.0);
}

// =============================================================================
// Filesystem Round Trip
// =============================================================================

#[test]
fn test_filesystem_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let tiles_dir = dir.path().join("tiles");
    std::fs::create_dir_all(&tiles_dir).unwrap();
    for (name, value) in [("t0.png", 40.0), ("t1.png", 120.0)] {
        let path = tiles_dir.join(name);
        let bytes = encode_raster(&flat_tile(100, 100, value), SampleType::U8, ImageFormat::Png, &path)
                .unwrap();
        std::fs::write(&path, &bytes).unwrap();
    }
    let descriptor_path = dir.path().join("section.mosaic");
    std::fs::write(
        &descriptor_path,
        "# two tiles\npixel_spacing: 1.0\ntiles/t0.png, identity\ntiles/t1.png, translation 50 0\n",
    )
    .unwrap();

    let descriptor = MosaicDescriptor::load(&descriptor_path).unwrap();
    let output = dir.path().join("out").join("section.png");
    let options = MosaicOptions {
        tile_size: Some((100, 100)),
        deferred: true,
        feathering: FeatherMode::None,
        ..MosaicOptions::new(&output)
    };

    let executors = TestExecutors::new();
    let report = MosaicPipeline::new(
        Arc::new(FsRasterStore::new()),
        Arc::clone(&executors.pool),
        executors.handle(),
    )
    .run(&descriptor, &options)
    .unwrap();
    assert_eq!(report.outputs_composited, 2);

    let manifest_path = dir.path().join("out").join("section.manifest.json");
    let manifest =
        TileManifest::from_json(&std::fs::read_to_string(&manifest_path).unwrap()).unwrap();
    assert_eq!(manifest.mosaic_width, 150);
    assert_eq!(manifest.tiles.len(), 2);

    let right = FsRasterStore::new()
        .load(&dir.path().join("out").join("section.001.000.png"), 1.0)
        .unwrap();
    assert_eq!(right.dimensions(), (50, 100));
    assert_eq!(right.get(0, 0), 120.0);
}
