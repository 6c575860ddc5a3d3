//! Strict tokenizer for Marlin `M114` position reports.
//!
//! A report is a single line of whitespace-separated `KEY:VALUE` tokens,
//! optionally followed by a `Count` marker and the stepper counts:
//!
//! ```text
//! X:10.00 Y:20.00 Z:1.50 E:0.00 Count X:800 Y:1600 Z:600
//! ```
//!
//! Everything from `Count` on is ignored. Every token before it must be a
//! well-formed pair; anything else is a `ScopeError::Protocol` rather than a
//! silently truncated map.

use scope_core::{Position, ScopeError, ScopeResult};
use std::collections::BTreeMap;

/// Token that ends the logical-position section of a report.
pub const COUNT_MARKER: &str = "Count";

/// Parsed `M114` report: axis letter to value in millimeters.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AxisReport {
    axes: BTreeMap<String, f64>,
}

impl AxisReport {
    /// Value for one axis key, if present.
    pub fn get(&self, axis: &str) -> Option<f64> {
        self.axes.get(axis).copied()
    }

    /// All parsed axes.
    pub fn axes(&self) -> &BTreeMap<String, f64> {
        &self.axes
    }

    /// Project onto the fixed X, Y, Z axis order.
    pub fn to_position(&self) -> ScopeResult<Position> {
        let axis = |key: &str| {
            self.get(key).ok_or_else(|| {
                ScopeError::Protocol(format!("position report is missing axis {key}"))
            })
        };
        Ok(Position::new(axis("X")?, axis("Y")?, axis("Z")?))
    }
}

/// Tokenize an `M114` data line.
pub fn parse_position_report(line: &str) -> ScopeResult<AxisReport> {
    let mut axes = BTreeMap::new();

    for token in line.split_whitespace() {
        if token == COUNT_MARKER {
            break;
        }

        let (key, raw) = token.split_once(':').ok_or_else(|| {
            ScopeError::Protocol(format!("malformed token '{token}' in '{line}'"))
        })?;
        if key.is_empty() {
            return Err(ScopeError::Protocol(format!(
                "token '{token}' has no axis name in '{line}'"
            )));
        }
        let value: f64 = raw.parse().map_err(|_| {
            ScopeError::Protocol(format!("non-numeric value in token '{token}' in '{line}'"))
        })?;

        axes.insert(key.to_string(), value);
    }

    if axes.is_empty() {
        return Err(ScopeError::Protocol(format!(
            "position report contains no axes: '{line}'"
        )));
    }

    Ok(AxisReport { axes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_report() {
        let report =
            parse_position_report("X:10.00 Y:20.50 Z:1.25 E:0.00 Count X:800 Y:1640 Z:500")
                .unwrap();
        assert_eq!(report.get("X"), Some(10.0));
        assert_eq!(report.get("E"), Some(0.0));
        assert_eq!(report.axes().len(), 4);
        assert_eq!(
            report.to_position().unwrap(),
            Position::new(10.0, 20.5, 1.25)
        );
    }

    #[test]
    fn count_marker_is_optional() {
        let report = parse_position_report("X:-1.5 Y:0 Z:3").unwrap();
        assert_eq!(report.to_position().unwrap(), Position::new(-1.5, 0.0, 3.0));
    }

    #[test]
    fn stepper_counts_do_not_override_positions() {
        let report = parse_position_report("X:1.00 Y:2.00 Z:3.00 Count X:80 Y:160 Z:1200").unwrap();
        assert_eq!(report.get("X"), Some(1.0));
        assert_eq!(report.get("Z"), Some(3.0));
    }

    #[test]
    fn rejects_malformed_tokens() {
        for line in [
            "ok",
            "",
            "X:1.0 Y 2.0 Z:3.0",
            "X:1.0 :2.0 Z:3.0",
            "X:abc Y:2.0 Z:3.0",
            "echo:busy: processing",
        ] {
            let err = parse_position_report(line).unwrap_err();
            assert!(matches!(err, ScopeError::Protocol(_)), "line {line:?}");
        }
    }

    #[test]
    fn missing_axis_fails_projection() {
        let report = parse_position_report("X:1.0 Y:2.0 E:0.0").unwrap();
        assert!(matches!(
            report.to_position(),
            Err(ScopeError::Protocol(_))
        ));
    }
}
