//! Registration tree integration tests.
//!
//! Tests verify:
//! - Stos text resolves into a single tree with a stable dependency order
//! - Cycles and multiply-reachable slices report zero roots
//! - Disjoint groups report one root per group
//! - Cascades compose edge transforms and honor the identity law

use mosaic_assembler::error::RegistrationError;
use mosaic_assembler::format::{parse_stos, StosRecord};
use mosaic_assembler::geometry::Point2;
use mosaic_assembler::registration::{load_stos_files, StosForest};
use mosaic_assembler::transform::Transform;

const CHAIN: &str = "\
slice0: s10.png
slice1: s11.png
transform: translation 2 0

slice0: s11.png
slice1: s12.png
flipped1: true
transform: translation 0 3

slice0: s10.png
slice1: s09.png
pixel_spacing: 0.5
transform: rigid 0 0 0 -1 -1
";

fn edge(slice0: &str, slice1: &str) -> StosRecord {
    StosRecord::new(0, slice0, slice1, Transform::Identity)
}

#[test]
fn test_stos_chain_resolves_to_one_tree() {
    let records = parse_stos(CHAIN, "chain.stos").unwrap();
    let forest = StosForest::build(records);

    assert_eq!(forest.roots_found(), 1);
    assert_eq!(forest.require_single_tree().unwrap(), "s10.png");

    let order: Vec<&str> = forest
        .collect_in_dependency_order()
        .iter()
        .map(|e| e.slice)
        .collect();
    assert_eq!(order, ["s10.png", "s09.png", "s11.png", "s12.png"]);

    assert!(forest.is_flipped("s12.png"));
    assert!(!forest.is_flipped("s11.png"));
    assert_eq!(forest.pixel_spacing("s09.png"), 0.5);
}

#[test]
fn test_dependency_order_puts_parents_first() {
    let forest = StosForest::build(vec![
        edge("m", "z"),
        edge("root", "m"),
        edge("m", "b"),
        edge("b", "c"),
        edge("root", "a"),
    ]);
    let order = forest.collect_in_dependency_order();
    let position = |name: &str| order.iter().position(|e| e.slice == name).unwrap();

    for entry in &order {
        if let Some(record) = entry.edge {
            assert!(position(&record.slice0) < position(entry.slice));
        }
    }
    assert_eq!(order[0].depth, 0);
    assert_eq!(order[position("c")].depth, 3);
}

#[test]
fn test_two_parents_is_ambiguous() {
    let forest = StosForest::build(vec![edge("a", "c"), edge("b", "c"), edge("a", "b")]);
    assert_eq!(forest.roots_found(), 0);
    match forest.require_single_tree() {
        Err(RegistrationError::AmbiguousRegistration { slices }) => {
            assert!(slices.contains(&"c".to_string()));
        }
        other => panic!("expected ambiguity, got {other:?}"),
    }
}

#[test]
fn test_cycle_is_ambiguous() {
    let forest = StosForest::build(vec![edge("a", "b"), edge("b", "c"), edge("c", "a")]);
    assert_eq!(forest.roots_found(), 0);
    assert!(matches!(
        forest.require_single_tree(),
        Err(RegistrationError::AmbiguousRegistration { .. })
    ));
}

#[test]
fn test_disjoint_groups_report_every_root() {
    let forest = StosForest::build(vec![edge("a", "b"), edge("x", "y"), edge("y", "z")]);
    assert_eq!(forest.roots_found(), 2);
    match forest.require_single_tree() {
        Err(RegistrationError::DisjointRegistration { roots }) => {
            assert_eq!(roots, ["a", "x"]);
        }
        other => panic!("expected disjoint roots, got {other:?}"),
    }
}

#[test]
fn test_cascade_composes_edges() {
    let records = parse_stos(CHAIN, "chain.stos").unwrap();
    let forest = StosForest::build(records);

    // Root to leaf applies each recorded slice0 -> slice1 edge in turn.
    let down = Transform::cascade(forest.get_cascade("s10.png", "s12.png").unwrap());
    let p = down.apply(Point2::new(1.0, 1.0));
    assert!((p.x - 3.0).abs() < 1e-12 && (p.y - 4.0).abs() < 1e-12);

    let up = Transform::cascade(forest.get_cascade("s12.png", "s10.png").unwrap());
    let p = up.apply(Point2::new(3.0, 4.0));
    assert!((p.x - 1.0).abs() < 1e-12 && (p.y - 1.0).abs() < 1e-12);

    // s09 -> s10 undoes the rigid shift of (-1, -1), then s10 -> s12 adds (2, 3).
    let across = Transform::cascade(forest.get_cascade("s09.png", "s12.png").unwrap());
    let q = across.apply(Point2::new(1.0, 1.0));
    assert!((q.x - 4.0).abs() < 1e-9 && (q.y - 5.0).abs() < 1e-9);
}

#[test]
fn test_self_cascade_is_identity() {
    let records = parse_stos(CHAIN, "chain.stos").unwrap();
    let forest = StosForest::build(records);
    for slice in ["s09.png", "s10.png", "s11.png", "s12.png"] {
        let cascade = forest.get_cascade(slice, slice).unwrap();
        assert!(cascade.is_empty());
        let p = Point2::new(7.25, -3.5);
        assert_eq!(Transform::cascade(cascade).apply(p), p);
    }
}

#[test]
fn test_load_stos_files_concatenates() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.stos");
    let second = dir.path().join("b.stos");
    std::fs::write(&first, "slice0: a\nslice1: b\ntransform: identity\n").unwrap();
    std::fs::write(&second, "slice0: b\nslice1: c\ntransform: translation 1 1\n").unwrap();

    let records = load_stos_files(&[first, second]).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(StosForest::build(records).roots_found(), 1);

    assert!(load_stos_files(&[dir.path().join("missing.stos")]).is_err());
}
