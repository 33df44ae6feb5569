//! Structured run summary returned by both pipelines.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::Warning;
use crate::geometry::BoundingBox;
use crate::mosaic::FeatherMode;
use crate::raster::SampleType;
use crate::registration::VolumeFrame;

/// Which pipeline produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Mosaic,
    Volume,
}

/// Outcome of a successful run.
///
/// For mosaics an "output" is one output tile (or the whole mosaic when
/// tiling is off); for volumes it is one resampled slice.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub kind: RunKind,
    pub source_images: usize,
    pub outputs_planned: usize,
    pub outputs_composited: usize,
    /// Outputs with no overlapping source, never composited or written
    pub outputs_skipped: usize,
    pub threads: usize,
    pub io_workers: usize,
    pub shrink: u32,
    /// Physical size of one output pixel
    pub pixel_spacing: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feathering: Option<FeatherMode>,
    /// Region of the root frame a volume covers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame: Option<VolumeFrame>,
    pub sample_type: SampleType,
    /// Output size in pixels
    pub width: u32,
    pub height: u32,
    /// Mosaic bounding box, or the volume footprint
    pub bbox: BoundingBox,
    /// Largest number of source images decoded at once
    pub peak_resident: usize,
    /// Largest number of finished outputs queued on the writer at once
    pub peak_pending_writes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    /// Every file saved, masks included
    pub written: Vec<PathBuf>,
    pub warnings: Vec<Warning>,
}

impl RunReport {
    /// True when the run finished but some input was skipped.
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Emit the textual run summary.
    pub fn log_summary(&self) {
        info!("Run summary ({}):", self.kind_name());
        info!(
            "  Outputs: {} planned, {} composited, {} skipped, {} file(s) written",
            self.outputs_planned,
            self.outputs_composited,
            self.outputs_skipped,
            self.written.len()
        );
        info!("  Source images: {}", self.source_images);
        info!(
            "  Workers: {} compute thread(s), {} I/O worker(s)",
            self.threads, self.io_workers
        );
        info!("  Shrink factor: {}", self.shrink);
        info!("  Pixel spacing: {}", self.pixel_spacing);
        if let Some(feathering) = self.feathering {
            info!("  Feathering: {}", feathering);
        }
        info!(
            "  {}: [{:.3}, {:.3}] - [{:.3}, {:.3}] ({} x {} px)",
            self.extent_label(),
            self.bbox.min.x,
            self.bbox.min.y,
            self.bbox.max.x,
            self.bbox.max.y,
            self.width,
            self.height
        );
        if let Some(manifest) = &self.manifest {
            info!("  Manifest: {}", manifest.display());
        }
        if self.is_degraded() {
            warn!("  {} warning(s):", self.warnings.len());
            for warning in &self.warnings {
                warn!("    {}", warning);
            }
        }
    }

    /// What the summary's bounding box describes.
    pub fn extent_label(&self) -> &'static str {
        match (self.kind, self.frame) {
            (RunKind::Mosaic, _) => "Mosaic extent",
            (RunKind::Volume, Some(VolumeFrame::Union)) => "Union footprint",
            (RunKind::Volume, _) => "Overlap footprint",
        }
    }

    fn kind_name(&self) -> &'static str {
        match self.kind {
            RunKind::Mosaic => "mosaic",
            RunKind::Volume => "volume",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point2;

    fn sample_report() -> RunReport {
        RunReport {
            kind: RunKind::Volume,
            source_images: 2,
            outputs_planned: 2,
            outputs_composited: 2,
            outputs_skipped: 0,
            threads: 4,
            io_workers: 2,
            shrink: 1,
            pixel_spacing: 1.0,
            feathering: None,
            frame: Some(VolumeFrame::Intersection),
            sample_type: SampleType::U16,
            width: 10,
            height: 20,
            bbox: BoundingBox::new(Point2::ORIGIN, Point2::new(10.0, 20.0)),
            peak_resident: 1,
            peak_pending_writes: 1,
            manifest: None,
            written: vec![PathBuf::from("out/a.png")],
            warnings: vec![Warning::SourceImageUnreadable {
                path: PathBuf::from("b.png"),
                message: "truncated".to_string(),
            }],
        }
    }

    #[test]
    fn test_report_json() {
        let report = sample_report();
        assert!(report.is_degraded());
        let json = report.to_json().unwrap();
        assert!(json.contains("\"kind\": \"volume\""));
        assert!(json.contains("\"source_image_unreadable\""));
        assert!(!json.contains("feathering"));
        assert!(json.contains("\"frame\": \"intersection\""));
    }

    #[test]
    fn test_extent_label_follows_frame() {
        let mut report = sample_report();
        assert_eq!(report.extent_label(), "Overlap footprint");
        report.frame = Some(VolumeFrame::Union);
        assert_eq!(report.extent_label(), "Union footprint");
        report.kind = RunKind::Mosaic;
        report.frame = None;
        assert_eq!(report.extent_label(), "Mosaic extent");
    }
}
