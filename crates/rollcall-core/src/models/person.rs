use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::de;
use super::Record;

/// Gender category used for per-class counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// Parse the encodings seen in member records.
    /// Handles single letters (`M`/`F`, `L`/`P`) as well as full words.
    pub fn parse(value: Option<&str>) -> Self {
        let Some(raw) = value else {
            return Gender::Other;
        };
        match raw.trim().to_lowercase().as_str() {
            "m" | "male" | "boy" | "l" | "laki-laki" | "laki laki" => Gender::Male,
            "f" | "female" | "girl" | "p" | "perempuan" => Gender::Female,
            _ => Gender::Other,
        }
    }
}

/// Allergy field as sent by the remote service.
///
/// Some records carry a list of allergy names, others a single
/// comma-separated string. Both normalize through `has_any`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Allergies {
    List(Vec<Value>),
    Text(String),
    #[default]
    None,
}

impl Allergies {
    /// True when at least one entry is non-empty after trimming.
    pub fn has_any(&self) -> bool {
        match self {
            Allergies::List(items) => items
                .iter()
                .any(|v| v.as_str().map(|s| !s.trim().is_empty()).unwrap_or(false)),
            Allergies::Text(text) => text.split(',').any(|part| !part.trim().is_empty()),
            Allergies::None => false,
        }
    }
}

/// A student record, the primary member partition of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(default, deserialize_with = "de::opt_id", alias = "studentId", alias = "student_id")]
    pub id: Option<String>,
    #[serde(default, alias = "fullName", alias = "full_name")]
    pub name: Option<String>,
    /// Foreign key into the group partition.
    #[serde(
        default,
        deserialize_with = "de::opt_id",
        alias = "classId",
        alias = "class_id",
        alias = "group_id"
    )]
    pub group_id: Option<String>,
    #[serde(default, alias = "sex")]
    pub gender: Option<String>,
    #[serde(default, alias = "allergy")]
    pub allergies: Allergies,
    #[serde(flatten)]
    pub extra: Record,
}

impl Member {
    pub fn gender(&self) -> Gender {
        Gender::parse(self.gender.as_deref())
    }

    pub fn has_allergy(&self) -> bool {
        self.allergies.has_any()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_gender_parse_encodings() {
        assert_eq!(Gender::parse(Some("M")), Gender::Male);
        assert_eq!(Gender::parse(Some("male")), Gender::Male);
        assert_eq!(Gender::parse(Some("L")), Gender::Male);
        assert_eq!(Gender::parse(Some(" F ")), Gender::Female);
        assert_eq!(Gender::parse(Some("Perempuan")), Gender::Female);
        assert_eq!(Gender::parse(Some("x")), Gender::Other);
        assert_eq!(Gender::parse(None), Gender::Other);
    }

    #[test]
    fn test_allergies_list_and_string_normalize() {
        let list: Allergies = serde_json::from_value(json!(["peanut"])).unwrap();
        assert!(list.has_any());

        let text: Allergies = serde_json::from_value(json!("dairy, ")).unwrap();
        assert!(text.has_any());

        let blank_list: Allergies = serde_json::from_value(json!(["", "  "])).unwrap();
        assert!(!blank_list.has_any());

        let blank_text: Allergies = serde_json::from_value(json!(" , ,")).unwrap();
        assert!(!blank_text.has_any());

        let null: Allergies = serde_json::from_value(json!(null)).unwrap();
        assert!(!null.has_any());
    }

    #[test]
    fn test_member_aliases_and_extra_fields() {
        let member: Member = serde_json::from_value(json!({
            "studentId": 17,
            "fullName": "Ana",
            "classId": "G1",
            "sex": "F",
            "allergy": "eggs",
            "nis": "2024-001"
        }))
        .unwrap();

        assert_eq!(member.id.as_deref(), Some("17"));
        assert_eq!(member.group_id.as_deref(), Some("G1"));
        assert_eq!(member.gender(), Gender::Female);
        assert!(member.has_allergy());
        assert_eq!(member.extra.get("nis"), Some(&json!("2024-001")));
    }

    #[test]
    fn test_member_serializes_canonical_names() {
        let member: Member = serde_json::from_value(json!({"id": 1, "class_id": 9})).unwrap();
        let value = serde_json::to_value(&member).unwrap();
        assert_eq!(value["groupId"], json!("9"));
        assert!(value.get("class_id").is_none());
    }
}
