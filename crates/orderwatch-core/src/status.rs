//! Status classification.
//!
//! Order status codes map to a title, a description and an importance
//! flag through a lookup table. A secondary signal (an identifier field
//! with a recognized prefix, e.g. an assigned VIN) can force a result to
//! important regardless of the code. Purchase availability is classified
//! separately from the `buttons` array of a product page.
//!
//! Classification is stateless and deterministic: the same table is used
//! for live observations and for re-describing a stored status code.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Button title shown when the product can be ordered.
pub const PURCHASE_AVAILABLE_TITLE: &str = "立即购买";

/// Button title shown when the account cannot order yet.
pub const PURCHASE_BLOCKED_TITLE: &str = "暂无购买权限";

// ============================================================================
// Classification
// ============================================================================

/// Result of classifying a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub title: String,
    pub description: String,
    pub is_important: bool,
}

/// One row of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub title: String,
    pub description: String,
    pub is_important: bool,
}

impl StatusEntry {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        is_important: bool,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            is_important,
        }
    }
}

/// Secondary signal that marks an observation important.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportanceMarker {
    /// Field looked up on the auxiliary record.
    pub field: String,
    /// Prefix the field's string value must start with.
    pub prefix: String,
    /// Text appended to the description when the marker matches.
    pub note: String,
}

impl ImportanceMarker {
    pub fn new(
        field: impl Into<String>,
        prefix: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            prefix: prefix.into(),
            note: note.into(),
        }
    }

    fn matches(&self, auxiliary: &Value) -> bool {
        auxiliary
            .get(&self.field)
            .and_then(Value::as_str)
            .is_some_and(|value| !self.prefix.is_empty() && value.starts_with(&self.prefix))
    }
}

// ============================================================================
// Status Table
// ============================================================================

/// Data-driven status classifier.
#[derive(Debug, Clone)]
pub struct StatusTable {
    entries: HashMap<i64, StatusEntry>,
    fallback: StatusEntry,
    markers: Vec<ImportanceMarker>,
}

impl StatusTable {
    /// Creates a table with no known codes.
    pub fn new(fallback: StatusEntry) -> Self {
        Self {
            entries: HashMap::new(),
            fallback,
            markers: Vec::new(),
        }
    }

    /// Adds or replaces the entry for `code`.
    #[must_use]
    pub fn with_entry(mut self, code: i64, entry: StatusEntry) -> Self {
        self.entries.insert(code, entry);
        self
    }

    /// Adds a secondary importance marker.
    #[must_use]
    pub fn with_marker(mut self, marker: ImportanceMarker) -> Self {
        self.markers.push(marker);
        self
    }

    /// Classifies `code`, letting a matching marker on `auxiliary`
    /// override the importance flag.
    pub fn classify(&self, code: i64, auxiliary: Option<&Value>) -> Classification {
        let entry = self.entries.get(&code).unwrap_or(&self.fallback);
        let mut classification = Classification {
            title: entry.title.clone(),
            description: entry.description.clone(),
            is_important: entry.is_important,
        };

        let marker = auxiliary.and_then(|aux| self.markers.iter().find(|m| m.matches(aux)));
        if let Some(marker) = marker {
            classification.is_important = true;
            classification.description =
                format!("{} · {}", classification.description, marker.note);
        }

        classification
    }

    /// Describes a status code on its own (no auxiliary signal).
    pub fn describe(&self, code: i64) -> String {
        self.classify(code, None).description
    }

    /// Renders "before → after" text for a status transition.
    pub fn describe_transition(&self, previous: i64, current: i64) -> String {
        format!(
            "{previous} ({}) → {current} ({})",
            self.describe(previous),
            self.describe(current)
        )
    }
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::new(StatusEntry::new(
            "车辆状态变化",
            "ℹ️ 状态未知或未记录，建议留意变化",
            false,
        ))
        .with_entry(2520, StatusEntry::new("车辆生产状态", "🚧 车辆尚未下线", false))
        .with_entry(2605, StatusEntry::new("🎉 好消息！车辆已下线", "✅ 车辆已下线", true))
        .with_entry(3000, StatusEntry::new("🚚 车辆运输中", "🚚 车辆已运出", true))
        .with_marker(ImportanceMarker::new("vin", "HXM", "🔖 已分配车架号"))
    }
}

// ============================================================================
// Purchase Availability
// ============================================================================

/// Purchase availability derived from product page buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    /// The order button is active.
    Available,
    /// The account may not order yet.
    NotYetAvailable,
    /// No recognized button.
    Unknown,
}

impl Availability {
    /// Maps one button title.
    pub fn from_button_title(title: &str) -> Self {
        match title.trim() {
            PURCHASE_AVAILABLE_TITLE => Self::Available,
            PURCHASE_BLOCKED_TITLE => Self::NotYetAvailable,
            _ => Self::Unknown,
        }
    }

    pub fn is_important(&self) -> bool {
        matches!(self, Self::Available)
    }

    pub fn classification(&self) -> Classification {
        let (title, description) = match self {
            Self::Available => ("🛒 可以购买了", "✅ 已开放购买"),
            Self::NotYetAvailable => ("购买状态", "⏳ 暂无购买权限"),
            Self::Unknown => ("购买状态", "❓ 购买状态未知"),
        };
        Classification {
            title: title.to_string(),
            description: description.to_string(),
            is_important: self.is_important(),
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::NotYetAvailable => write!(f, "not yet available"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Classifies purchase availability from `observation.buttons[*].title`.
///
/// An available button anywhere wins over a blocked one.
pub fn classify_availability(observation: &Value) -> Availability {
    let titles = observation
        .get("buttons")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|button| button.get("title").and_then(Value::as_str));

    titles.fold(Availability::Unknown, |acc, title| {
        match (acc, Availability::from_button_title(title)) {
            (Availability::Available, _) | (_, Availability::Available) => Availability::Available,
            (_, Availability::NotYetAvailable) => Availability::NotYetAvailable,
            (acc, Availability::Unknown) => acc,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_codes() {
        let table = StatusTable::default();

        let produced = table.classify(2520, None);
        assert_eq!(produced.description, "🚧 车辆尚未下线");
        assert!(!produced.is_important);

        let rolled_off = table.classify(2605, None);
        assert_eq!(rolled_off.title, "🎉 好消息！车辆已下线");
        assert!(rolled_off.is_important);

        assert!(table.classify(3000, None).is_important);
    }

    #[test]
    fn test_unknown_code_uses_fallback() {
        let table = StatusTable::default();
        let c = table.classify(9999, None);
        assert_eq!(c.title, "车辆状态变化");
        assert!(!c.is_important);
    }

    #[test]
    fn test_marker_overrides_importance() {
        let table = StatusTable::default();
        let aux = json!({"vin": "HXMABC1234567890"});
        let c = table.classify(2520, Some(&aux));
        assert!(c.is_important);
        assert!(c.description.contains("已分配车架号"));

        let other = json!({"vin": "LSV0000"});
        assert!(!table.classify(2520, Some(&other)).is_important);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let table = StatusTable::default();
        let aux = json!({"vin": "HXM1"});
        assert_eq!(table.classify(2605, Some(&aux)), table.classify(2605, Some(&aux)));
    }

    #[test]
    fn test_describe_transition() {
        let table = StatusTable::default();
        assert_eq!(
            table.describe_transition(2520, 2605),
            "2520 (🚧 车辆尚未下线) → 2605 (✅ 车辆已下线)"
        );
    }

    #[test]
    fn test_custom_table() {
        let table = StatusTable::new(StatusEntry::new("?", "unknown", false))
            .with_entry(1, StatusEntry::new("one", "first", true));
        assert!(table.classify(1, None).is_important);
        assert_eq!(table.describe(2), "unknown");
    }

    #[test]
    fn test_availability_from_buttons() {
        let blocked = json!({"buttons": [{"title": "暂无购买权限"}]});
        assert_eq!(classify_availability(&blocked), Availability::NotYetAvailable);

        let open = json!({"buttons": [{"title": "立即购买"}]});
        let availability = classify_availability(&open);
        assert_eq!(availability, Availability::Available);
        assert!(availability.classification().is_important);

        let mixed = json!({"buttons": [{"title": "立即购买"}, {"title": "暂无购买权限"}]});
        assert_eq!(classify_availability(&mixed), Availability::Available);

        assert_eq!(classify_availability(&json!({"status": 1})), Availability::Unknown);
    }
}
