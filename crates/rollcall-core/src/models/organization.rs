use serde::{Deserialize, Serialize};

use super::de;
use super::Record;

/// A class record. Counts are server-provided or filled in by the aggregator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default, deserialize_with = "de::opt_id", alias = "classId", alias = "class_id")]
    pub id: Option<String>,
    #[serde(default, alias = "className", alias = "class_name")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "de::opt_count",
        alias = "total_members",
        alias = "totalStudents",
        alias = "studentCount"
    )]
    pub total_members: Option<u32>,
    #[serde(default, deserialize_with = "de::opt_count", alias = "maleCount")]
    pub male: Option<u32>,
    #[serde(default, deserialize_with = "de::opt_count", alias = "femaleCount")]
    pub female: Option<u32>,
    #[serde(default, deserialize_with = "de::opt_count", alias = "allergy_count")]
    pub allergy_count: Option<u32>,
    #[serde(flatten)]
    pub extra: Record,
}
