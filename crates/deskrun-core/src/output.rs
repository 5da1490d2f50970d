//! Typed results produced by a completed action run.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output of a successful run, typed by the engine.
///
/// Engines decide the variant. `from_text` is the shared rule for engines
/// whose only result channel is free text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutput {
    /// A numeric answer (e.g. a price).
    Numeric(f64),
    /// Anything else, kept verbatim.
    Text(String),
}

impl ActionOutput {
    /// Classify a free-text engine answer.
    ///
    /// A trimmed answer consisting of a finite decimal number, optionally
    /// prefixed with `$` and grouped in thousands with `,`, becomes
    /// `Numeric`. Everything else is kept verbatim as `Text`.
    pub fn from_text(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let trimmed = raw.trim();
        let number = trimmed.strip_prefix('$').unwrap_or(trimmed);

        match ungroup(number).map(|digits| digits.parse::<f64>()) {
            Some(Ok(value)) if value.is_finite() => Self::Numeric(value),
            _ => Self::Text(raw),
        }
    }

    /// The numeric value, if any.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Numeric(value) => Some(*value),
            Self::Text(_) => None,
        }
    }
}

/// Strip thousands separators, rejecting malformed grouping.
///
/// `1,204.5` becomes `1204.5`; `1,2,3` and `1,20` are rejected.
fn ungroup(number: &str) -> Option<String> {
    if !number.contains(',') {
        return Some(number.to_string());
    }

    let (integer, fraction) = match number.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (number, None),
    };
    if fraction.is_some_and(|f| f.contains(',')) {
        return None;
    }

    let unsigned = integer.trim_start_matches(['-', '+']);
    let sign = &integer[..integer.len() - unsigned.len()];
    if sign.len() > 1 {
        return None;
    }

    let mut groups = unsigned.split(',');
    let leading = groups.next()?;
    let well_formed = (1..=3).contains(&leading.len())
        && leading.bytes().all(|b| b.is_ascii_digit())
        && groups.all(|g| g.len() == 3 && g.bytes().all(|b| b.is_ascii_digit()));
    if !well_formed {
        return None;
    }

    let mut digits = format!("{}{}", sign, unsigned.replace(',', ""));
    if let Some(fraction) = fraction {
        digits.push('.');
        digits.push_str(fraction);
    }
    Some(digits)
}

impl fmt::Display for ActionOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(value) => write!(f, "{}", value),
            Self::Text(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_number() {
        assert_eq!(ActionOutput::from_text("231"), ActionOutput::Numeric(231.0));
        assert_eq!(ActionOutput::from_text(" 189.50\n"), ActionOutput::Numeric(189.5));
    }

    #[test]
    fn test_currency_and_separators() {
        assert_eq!(ActionOutput::from_text("$1,204"), ActionOutput::Numeric(1204.0));
        assert_eq!(ActionOutput::from_text("1,234,567.25"), ActionOutput::Numeric(1234567.25));
        assert_eq!(ActionOutput::from_text("-2,500"), ActionOutput::Numeric(-2500.0));
    }

    #[test]
    fn test_malformed_grouping_is_text() {
        for raw in ["1,2,3", "1,20", "1234,567", ",123", "123,", "1,,234", "1.234,5", "$12,34.5"] {
            assert_eq!(
                ActionOutput::from_text(raw),
                ActionOutput::Text(raw.to_string()),
                "{} should stay text",
                raw
            );
        }
    }

    #[test]
    fn test_text_is_kept_verbatim() {
        let out = ActionOutput::from_text("No flights found ");
        assert_eq!(out, ActionOutput::Text("No flights found ".to_string()));
        assert_eq!(out.as_number(), None);
    }

    #[test]
    fn test_non_finite_is_text() {
        assert!(matches!(ActionOutput::from_text("inf"), ActionOutput::Text(_)));
        assert!(matches!(ActionOutput::from_text("NaN"), ActionOutput::Text(_)));
        assert!(matches!(ActionOutput::from_text("$"), ActionOutput::Text(_)));
    }

    #[test]
    fn test_serialization_shape() {
        let json = serde_json::to_string(&ActionOutput::Numeric(231.0)).unwrap();
        assert_eq!(json, r#"{"numeric":231.0}"#);
        let back: ActionOutput = serde_json::from_str(r#"{"text":"ok"}"#).unwrap();
        assert_eq!(back, ActionOutput::Text("ok".to_string()));
    }
}
