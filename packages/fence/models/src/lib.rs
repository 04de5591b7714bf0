#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geofence, perimeter, rule and pin types shared across the fence map.
//!
//! Field names serialize in `camelCase` to match the REST API. Polygon
//! coordinates are always held in storage order (`[lat, lng]`) and are
//! stored open: the first vertex is not repeated at the end.

pub mod coord;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use coord::{Coordinate, DisplayCoord, StorageCoord, Vertex};

/// Default fence colour used when none is chosen.
pub const DEFAULT_FENCE_COLOR: &str = "#f97316";

/// Identifier of a [`Geofence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FenceId(pub i64);

impl std::fmt::Display for FenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a [`Perimeter`].
///
/// [`PerimeterId::DRAFT`] marks a perimeter that has not been persisted
/// yet and only exists in an editing session or as an optimistic insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PerimeterId(pub i64);

impl std::fmt::Display for PerimeterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PerimeterId {
    pub const DRAFT: Self = Self(0);

    #[must_use]
    pub const fn is_draft(self) -> bool {
        self.0 == Self::DRAFT.0
    }
}

/// Whether a fence is being monitored.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FenceStatus {
    #[default]
    Active,
    Inactive,
}

/// A named monitored area. Owns perimeters, rules and pins; deleting a
/// geofence removes all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub id: FenceId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// CSS colour used for the fence outline and fill.
    pub color: String,
    #[serde(default)]
    pub status: FenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a [`Geofence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewGeofence {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub color: String,
    #[serde(default)]
    pub status: FenceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl NewGeofence {
    /// Attaches the identifier assigned by the store.
    #[must_use]
    pub fn with_id(self, id: FenceId) -> Geofence {
        Geofence {
            id,
            name: self.name,
            description: self.description,
            color: self.color,
            status: self.status,
            company_id: self.company_id,
            department_id: self.department_id,
            created_at: self.created_at,
        }
    }
}

/// Geometry of a perimeter, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PerimeterShape {
    /// An open ring of at least three distinct vertices.
    Polygon { coordinates: Vec<StorageCoord> },
    /// A circle around `center` with `radius` in meters.
    Circle { center: StorageCoord, radius: f64 },
}

impl PerimeterShape {
    /// Returns the polygon ring, or `None` for circles.
    #[must_use]
    pub fn polygon(&self) -> Option<&[StorageCoord]> {
        match self {
            Self::Polygon { coordinates } => Some(coordinates),
            Self::Circle { .. } => None,
        }
    }
}

/// A single geometric boundary belonging to a [`Geofence`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Perimeter {
    pub id: PerimeterId,
    pub fence_id: FenceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub shape: PerimeterShape,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a [`Perimeter`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPerimeter {
    pub fence_id: FenceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub shape: PerimeterShape,
    pub created_at: DateTime<Utc>,
}

impl NewPerimeter {
    /// Attaches the identifier assigned by the store.
    #[must_use]
    pub fn with_id(self, id: PerimeterId) -> Perimeter {
        Perimeter {
            id,
            fence_id: self.fence_id,
            name: self.name,
            shape: self.shape,
            created_at: self.created_at,
        }
    }
}

/// Full replacement of a perimeter's mutable fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerimeterUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub shape: PerimeterShape,
}

impl From<&Perimeter> for PerimeterUpdate {
    fn from(perimeter: &Perimeter) -> Self {
        Self {
            name: perimeter.name.clone(),
            shape: perimeter.shape.clone(),
        }
    }
}

/// What crossing the fence boundary means for a rule.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleCondition {
    Enter,
    Exit,
    Inside,
    Outside,
}

/// What happens when a rule's condition is met.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleAction {
    Notify,
    Alert,
    Block,
    Custom,
}

/// A monitoring rule attached to a fence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: i64,
    pub fence_id: FenceId,
    pub name: String,
    pub condition: RuleCondition,
    pub action: RuleAction,
    /// Free-form configuration for [`RuleAction::Custom`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_config: Option<serde_json::Value>,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a [`Rule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub fence_id: FenceId,
    pub name: String,
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_config: Option<serde_json::Value>,
    #[serde(default)]
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl NewRule {
    /// Attaches the identifier assigned by the store.
    #[must_use]
    pub fn with_id(self, id: i64) -> Rule {
        Rule {
            id,
            fence_id: self.fence_id,
            name: self.name,
            condition: self.condition,
            action: self.action,
            action_config: self.action_config,
            is_default: self.is_default,
            created_at: self.created_at,
        }
    }
}

/// Preset rules offered when a fence is first drawn.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleTemplate {
    #[default]
    MonitorEntry,
    MonitorExit,
    BlockEntry,
    BlockExit,
}

impl RuleTemplate {
    /// Parses a template name, falling back to [`RuleTemplate::MonitorEntry`]
    /// for anything unrecognised.
    #[must_use]
    pub fn parse_or_default(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    #[must_use]
    pub const fn condition(self) -> RuleCondition {
        match self {
            Self::MonitorEntry | Self::BlockEntry => RuleCondition::Enter,
            Self::MonitorExit | Self::BlockExit => RuleCondition::Exit,
        }
    }

    #[must_use]
    pub const fn action(self) -> RuleAction {
        match self {
            Self::MonitorEntry | Self::MonitorExit => RuleAction::Notify,
            Self::BlockEntry | Self::BlockExit => RuleAction::Block,
        }
    }

    /// Human-readable rule name.
    #[must_use]
    pub const fn rule_name(self) -> &'static str {
        match self {
            Self::MonitorEntry => "Monitor entry",
            Self::MonitorExit => "Monitor exit",
            Self::BlockEntry => "Block entry",
            Self::BlockExit => "Block exit",
        }
    }

    /// Builds the rule this template describes for `fence_id`.
    #[must_use]
    pub fn to_rule(self, fence_id: FenceId, created_at: DateTime<Utc>) -> NewRule {
        NewRule {
            fence_id,
            name: self.rule_name().to_string(),
            condition: self.condition(),
            action: self.action(),
            action_config: None,
            is_default: true,
            created_at,
        }
    }
}

/// Progress of a field task pinned inside a fence.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PinStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Canceled,
}

/// A point of interest attached to a fence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pin {
    pub id: i64,
    pub fence_id: FenceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible_id: Option<i64>,
    pub name: String,
    pub coordinates: StorageCoord,
    #[serde(default)]
    pub status: PinStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Payload for creating a [`Pin`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPin {
    pub fence_id: FenceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsible_id: Option<i64>,
    pub name: String,
    pub coordinates: StorageCoord,
    #[serde(default)]
    pub status: PinStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewPin {
    /// Attaches the identifier assigned by the store.
    #[must_use]
    pub fn with_id(self, id: i64) -> Pin {
        Pin {
            id,
            fence_id: self.fence_id,
            responsible_id: self.responsible_id,
            name: self.name,
            coordinates: self.coordinates,
            status: self.status,
            due_date: self.due_date,
            action_type: self.action_type,
            created_at: self.created_at,
        }
    }
}
