use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Group, Member, Record};

/// A named, independently fetchable slice of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Partition {
    Members,
    Groups,
    AttendanceToday,
    AttendanceWeekly,
    Deliveries,
    CalendarEvents,
    MenuOfDay,
}

impl Partition {
    /// All partitions, in canonical snapshot order.
    pub const ALL: [Partition; 7] = [
        Partition::Members,
        Partition::Groups,
        Partition::AttendanceToday,
        Partition::AttendanceWeekly,
        Partition::Deliveries,
        Partition::CalendarEvents,
        Partition::MenuOfDay,
    ];

    /// Wire name, also used as the partition hint in invalidation signals.
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Members => "members",
            Partition::Groups => "groups",
            Partition::AttendanceToday => "attendanceToday",
            Partition::AttendanceWeekly => "attendanceWeekly",
            Partition::Deliveries => "deliveries",
            Partition::CalendarEvents => "calendarEvents",
            Partition::MenuOfDay => "menuOfDay",
        }
    }

    /// Failure of the primary partition aborts the whole load.
    pub fn is_primary(&self) -> bool {
        matches!(self, Partition::Members)
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The joined, denormalized bundle of every partition for one cache key.
///
/// Field order is the canonical serialization order used for hashing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub attendance_today: Vec<Record>,
    #[serde(default)]
    pub attendance_weekly: Vec<Record>,
    #[serde(default)]
    pub deliveries: Vec<Record>,
    #[serde(default)]
    pub calendar_events: Vec<Record>,
    #[serde(default)]
    pub menu_of_day: Option<Record>,
}

impl Snapshot {
    /// Apply a partial update: each partition present in the patch replaces
    /// the corresponding partition wholesale.
    pub fn merge(&mut self, patch: SnapshotPatch) {
        let SnapshotPatch {
            members,
            groups,
            attendance_today,
            attendance_weekly,
            deliveries,
            calendar_events,
            menu_of_day,
        } = patch;

        if let Some(v) = members {
            self.members = v;
        }
        if let Some(v) = groups {
            self.groups = v;
        }
        if let Some(v) = attendance_today {
            self.attendance_today = v;
        }
        if let Some(v) = attendance_weekly {
            self.attendance_weekly = v;
        }
        if let Some(v) = deliveries {
            self.deliveries = v;
        }
        if let Some(v) = calendar_events {
            self.calendar_events = v;
        }
        if let Some(v) = menu_of_day {
            self.menu_of_day = v;
        }
    }

    pub fn group(&self, id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id.as_deref() == Some(id))
    }

    /// Number of records held by a partition (0 or 1 for the menu).
    pub fn partition_len(&self, partition: Partition) -> usize {
        match partition {
            Partition::Members => self.members.len(),
            Partition::Groups => self.groups.len(),
            Partition::AttendanceToday => self.attendance_today.len(),
            Partition::AttendanceWeekly => self.attendance_weekly.len(),
            Partition::Deliveries => self.deliveries.len(),
            Partition::CalendarEvents => self.calendar_events.len(),
            Partition::MenuOfDay => usize::from(self.menu_of_day.is_some()),
        }
    }
}

/// A local mutation. `None` leaves a partition untouched.
///
/// `menu_of_day: Some(None)` clears the menu.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Member>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<Group>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance_today: Option<Vec<Record>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance_weekly: Option<Vec<Record>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliveries: Option<Vec<Record>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_events: Option<Vec<Record>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_of_day: Option<Option<Record>>,
}

impl SnapshotPatch {
    pub fn groups(groups: Vec<Group>) -> Self {
        Self {
            groups: Some(groups),
            ..Default::default()
        }
    }

    /// Partitions touched by this patch, in canonical order.
    pub fn partitions(&self) -> Vec<Partition> {
        let present = [
            self.members.is_some(),
            self.groups.is_some(),
            self.attendance_today.is_some(),
            self.attendance_weekly.is_some(),
            self.deliveries.is_some(),
            self.calendar_events.is_some(),
            self.menu_of_day.is_some(),
        ];
        Partition::ALL
            .iter()
            .zip(present)
            .filter_map(|(p, set)| set.then_some(*p))
            .collect()
    }

    /// Comma-joined partition names, used as the signal hint.
    pub fn hint(&self) -> String {
        self.partitions()
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Convert an arbitrary JSON value into a record map, dropping non-objects.
pub(crate) fn into_record(value: Value) -> Option<Record> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
