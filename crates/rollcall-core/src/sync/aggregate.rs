//! Joins the member partition onto the group partition.

use std::collections::HashMap;

use crate::models::{Gender, Group, Member, Snapshot};

/// Per-group tallies computed from member records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupCounts {
    pub total: u32,
    pub male: u32,
    pub female: u32,
    pub allergy: u32,
}

/// Tally members by the group they reference. Members without a group id are skipped.
pub fn count_members(members: &[Member]) -> HashMap<&str, GroupCounts> {
    let mut counts: HashMap<&str, GroupCounts> = HashMap::new();
    for member in members {
        let Some(group_id) = member.group_id.as_deref() else {
            continue;
        };
        let tally = counts.entry(group_id).or_default();
        tally.total += 1;
        match member.gender() {
            Gender::Male => tally.male += 1,
            Gender::Female => tally.female += 1,
            Gender::Other => {}
        }
        if member.has_allergy() {
            tally.allergy += 1;
        }
    }
    counts
}

/// Write member counts onto each group.
///
/// A group with no matching members keeps whatever counts the server sent,
/// defaulting missing ones to zero.
pub fn aggregate(groups: &mut [Group], members: &[Member]) {
    let counts = count_members(members);
    for group in groups.iter_mut() {
        let tally = group
            .id
            .as_deref()
            .and_then(|id| counts.get(id))
            .filter(|t| t.total > 0);

        match tally {
            Some(t) => {
                group.total_members = Some(t.total);
                group.male = Some(t.male);
                group.female = Some(t.female);
                group.allergy_count = Some(t.allergy);
            }
            None => {
                group.total_members = Some(group.total_members.unwrap_or(0));
                group.male = Some(group.male.unwrap_or(0));
                group.female = Some(group.female.unwrap_or(0));
                group.allergy_count = Some(group.allergy_count.unwrap_or(0));
            }
        }
    }
}

pub fn aggregate_snapshot(snapshot: &mut Snapshot) {
    let Snapshot {
        members, groups, ..
    } = snapshot;
    aggregate(groups, members);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(value: serde_json::Value) -> Member {
        serde_json::from_value(value).unwrap()
    }

    fn group(id: &str) -> Group {
        Group {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_class_counts_scenario() {
        let members = vec![
            member(json!({"id": 1, "classId": "G1", "gender": "M", "allergies": ["peanut"]})),
            member(json!({"id": 2, "classId": "G1", "gender": "F", "allergies": "dairy, "})),
            member(json!({"id": 3, "classId": "G1", "gender": "M"})),
            member(json!({"id": 4, "classId": "G2", "gender": "F"})),
            member(json!({"id": 5, "classId": "G2", "gender": "M", "allergies": []})),
        ];
        let mut groups = vec![group("G1")];

        aggregate(&mut groups, &members);

        let g1 = &groups[0];
        assert_eq!(g1.total_members, Some(3));
        assert_eq!(g1.male, Some(2));
        assert_eq!(g1.female, Some(1));
        assert_eq!(g1.allergy_count, Some(2));
    }

    #[test]
    fn test_gender_encodings_count_together() {
        let members = vec![
            member(json!({"classId": 7, "gender": "L"})),
            member(json!({"classId": "7", "gender": "male"})),
            member(json!({"classId": 7, "gender": "P"})),
            member(json!({"classId": 7, "gender": "unknown"})),
        ];
        let mut groups = vec![group("7")];

        aggregate(&mut groups, &members);

        assert_eq!(groups[0].total_members, Some(4));
        assert_eq!(groups[0].male, Some(2));
        assert_eq!(groups[0].female, Some(1));
    }

    #[test]
    fn test_empty_group_keeps_server_counts() {
        let mut groups = vec![
            Group {
                id: Some("G9".into()),
                total_members: Some(31),
                male: Some(16),
                female: Some(15),
                allergy_count: None,
                ..Default::default()
            },
            group("G10"),
        ];

        aggregate(&mut groups, &[member(json!({"classId": "other"}))]);

        assert_eq!(groups[0].total_members, Some(31));
        assert_eq!(groups[0].male, Some(16));
        assert_eq!(groups[0].female, Some(15));
        assert_eq!(groups[0].allergy_count, Some(0));
        assert_eq!(groups[1].total_members, Some(0));
    }

    #[test]
    fn test_matched_members_override_server_counts() {
        let mut groups = vec![Group {
            id: Some("G1".into()),
            total_members: Some(99),
            ..Default::default()
        }];
        aggregate(&mut groups, &[member(json!({"classId": "G1", "gender": "F"}))]);
        assert_eq!(groups[0].total_members, Some(1));
        assert_eq!(groups[0].female, Some(1));
    }

    #[test]
    fn test_members_without_group_are_ignored() {
        let members = [member(json!({"id": 1, "gender": "M"}))];
        let counts = count_members(&members);
        assert!(counts.is_empty());
    }
}
