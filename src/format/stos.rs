//! Slice-to-slice (stos) registration records.
//!
//! A stos file holds one or more records separated by blank lines. Each
//! record is a block of `key: value` lines:
//!
//! ```text
//! id: 1
//! slice0: section_010.png
//! slice1: section_011.png
//! flipped0: false
//! flipped1: true
//! pixel_spacing: 2.0
//! transform: rigid 0.01 512 512 -3.5 7.25
//! ```
//!
//! `transform` maps points of `slice0` into the frame of `slice1`. `id`
//! defaults to the record's position, `flipped*` to `false` and
//! `pixel_spacing` to `1`.

use crate::error::ParseError;
use crate::transform::{parse_transform, Transform};

/// One edge of the registration graph.
#[derive(Debug, Clone, PartialEq)]
pub struct StosRecord {
    pub id: usize,
    /// Fixed slice (parent)
    pub slice0: String,
    /// Moving slice (child)
    pub slice1: String,
    pub flipped0: bool,
    pub flipped1: bool,
    /// Maps `slice0` coordinates into `slice1` coordinates
    pub transform: Transform,
    pub pixel_spacing: f64,
}

impl StosRecord {
    pub fn new(
        id: usize,
        slice0: impl Into<String>,
        slice1: impl Into<String>,
        transform: Transform,
    ) -> Self {
        Self {
            id,
            slice0: slice0.into(),
            slice1: slice1.into(),
            flipped0: false,
            flipped1: false,
            transform,
            pixel_spacing: 1.0,
        }
    }
}

#[derive(Default)]
struct PartialRecord {
    first_line: usize,
    id: Option<usize>,
    slice0: Option<String>,
    slice1: Option<String>,
    flipped0: bool,
    flipped1: bool,
    transform: Option<Transform>,
    pixel_spacing: Option<f64>,
}

impl PartialRecord {
    fn is_empty(&self) -> bool {
        self.first_line == 0
    }

    fn finish(self, position: usize, source_name: &str) -> Result<StosRecord, ParseError> {
        let missing = |field| ParseError::MissingField {
            source_name: format!("{source_name}:{}", self.first_line),
            field,
        };
        Ok(StosRecord {
            id: self.id.unwrap_or(position),
            slice0: self.slice0.clone().ok_or_else(|| missing("slice0"))?,
            slice1: self.slice1.clone().ok_or_else(|| missing("slice1"))?,
            flipped0: self.flipped0,
            flipped1: self.flipped1,
            transform: self.transform.clone().ok_or_else(|| missing("transform"))?,
            pixel_spacing: self.pixel_spacing.unwrap_or(1.0),
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Parse every record in a stos document.
pub fn parse_stos(text: &str, source_name: &str) -> Result<Vec<StosRecord>, ParseError> {
    let syntax = |line: usize, message: String| ParseError::Syntax {
        source_name: source_name.to_string(),
        line,
        message,
    };

    let mut records = Vec::new();
    let mut current = PartialRecord::default();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.starts_with('#') {
            continue;
        }
        if line.is_empty() {
            if !current.is_empty() {
                let done = std::mem::take(&mut current);
                records.push(done.finish(records.len(), source_name)?);
            }
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| syntax(line_no, format!("expected 'key: value', got '{line}'")))?;
        let key = key.trim();
        let value = value.trim();
        if current.is_empty() {
            current.first_line = line_no;
        }

        match key {
            "id" => {
                current.id = Some(
                    value
                        .parse()
                        .map_err(|e| syntax(line_no, format!("invalid id: {e}")))?,
                )
            }
            "slice0" => current.slice0 = Some(value.to_string()),
            "slice1" => current.slice1 = Some(value.to_string()),
            "flipped0" => {
                current.flipped0 = parse_bool(value)
                    .ok_or_else(|| syntax(line_no, format!("invalid flag '{value}'")))?
            }
            "flipped1" => {
                current.flipped1 = parse_bool(value)
                    .ok_or_else(|| syntax(line_no, format!("invalid flag '{value}'")))?
            }
            "pixel_spacing" => {
                let spacing: f64 = value
                    .parse()
                    .map_err(|e| syntax(line_no, format!("invalid pixel_spacing: {e}")))?;
                current.pixel_spacing = Some(spacing);
            }
            "transform" => {
                current.transform =
                    Some(
                        parse_transform(value).map_err(|error| ParseError::Transform {
                            source_name: source_name.to_string(),
                            line: line_no,
                            error,
                        })?,
                    )
            }
            other => return Err(syntax(line_no, format!("unknown key '{other}'"))),
        }
    }

    if !current.is_empty() {
        records.push(current.finish(records.len(), source_name)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_records() {
        let text = "\
id: 7
slice0: a.png
slice1: b.png
flipped1: 1
transform: translation 5 0

slice0: b.png
slice1: c.png
pixel_spacing: 2
transform: identity
";
        let records = parse_stos(text, "pair.stos").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, 7);
        assert!(records[0].flipped1);
        assert!(!records[0].flipped0);
        assert_eq!(records[0].transform, Transform::translation(5.0, 0.0));
        assert_eq!(records[1].id, 1);
        assert_eq!(records[1].pixel_spacing, 2.0);
    }

    #[test]
    fn test_missing_transform() {
        let text = "slice0: a\nslice1: b\n";
        assert!(matches!(
            parse_stos(text, "x"),
            Err(ParseError::MissingField {
                field: "transform",
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_key() {
        let text = "slice0: a\ncolour: red\n";
        assert!(matches!(
            parse_stos(text, "x"),
            Err(ParseError::Syntax { line: 2, .. })
        ));
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_stos("\n\n# nothing\n", "x").unwrap().is_empty());
    }
}
