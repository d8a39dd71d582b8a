/// Machine telemetry payloads
///
/// Snapshots pushed by the machine hub. The client never mutates them.
use crate::format::{parse_iso_duration, parse_timestamp};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Operating state of a runtime block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RunStateRepr")]
pub enum RunState {
    Running,
    SpeedLoss,
    Downtime,
}

/// Run state as it appears on the wire: enum ordinal or name
#[derive(Deserialize)]
#[serde(untagged)]
enum RunStateRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<RunStateRepr> for RunState {
    type Error = String;

    fn try_from(repr: RunStateRepr) -> Result<Self, Self::Error> {
        match repr {
            RunStateRepr::Code(0) => Ok(RunState::Running),
            RunStateRepr::Code(1) => Ok(RunState::SpeedLoss),
            RunStateRepr::Code(2) => Ok(RunState::Downtime),
            RunStateRepr::Code(other) => Err(format!("Unknown run state code: {}", other)),
            RunStateRepr::Name(name) => {
                let normalized: String = name
                    .chars()
                    .filter(|c| *c != '_' && *c != '-' && *c != ' ')
                    .collect::<String>()
                    .to_lowercase();
                match normalized.as_str() {
                    "running" => Ok(RunState::Running),
                    "speedloss" => Ok(RunState::SpeedLoss),
                    "downtime" => Ok(RunState::Downtime),
                    _ => Err(format!("Unknown run state: {}", name)),
                }
            }
        }
    }
}

/// One segment of a machine's operating timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeBlock {
    #[serde(default, alias = "machineName", skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(deserialize_with = "timestamp")]
    pub start_time: DateTime<Utc>,
    /// `None` while the block is still open
    #[serde(default, deserialize_with = "optional_timestamp")]
    pub end_time: Option<DateTime<Utc>>,
    pub state: RunState,
    #[serde(default, deserialize_with = "optional_id")]
    pub stop_reason_id: Option<String>,
    #[serde(default)]
    pub stop_reason_name: Option<String>,
    #[serde(default)]
    pub stop_reason_color: Option<String>,
    #[serde(default)]
    pub unplanned: bool,
}

impl RuntimeBlock {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    /// Length of the block; open blocks are measured up to `now`
    pub fn duration_at(&self, now: DateTime<Utc>) -> Duration {
        let end = self.end_time.unwrap_or(now);
        (end - self.start_time).max(Duration::zero())
    }
}

/// OEE snapshot for one machine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OeeUpdate {
    /// Machine the snapshot belongs to, when the server includes it
    #[serde(alias = "machineName", skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,

    pub availability: f64,
    pub performance: f64,
    pub quality: f64,
    pub oee: f64,

    pub availability_delta: f64,
    pub performance_delta: f64,
    pub quality_delta: f64,
    pub oee_delta: f64,

    pub good_count: i64,
    pub total_count: i64,
    pub good_count_delta: i64,
    pub total_count_delta: i64,

    // ISO-8601 durations, e.g. "PT7H30M"
    #[serde(alias = "plannedTime")]
    pub planned_production_time: Option<String>,
    pub run_time: Option<String>,
    #[serde(alias = "downTime")]
    pub downtime: Option<String>,
    pub speed_loss_time: Option<String>,

    pub current_product: Option<String>,
    pub state_blocks: Vec<RuntimeBlock>,
}

impl OeeUpdate {
    /// Availability × Performance × Quality
    pub fn computed_oee(&self) -> f64 {
        self.availability * self.performance * self.quality
    }

    pub fn scrap_count(&self) -> i64 {
        (self.total_count - self.good_count).max(0)
    }

    pub fn run_time_ms(&self) -> Option<u64> {
        self.run_time.as_deref().and_then(parse_iso_duration)
    }

    pub fn downtime_ms(&self) -> Option<u64> {
        self.downtime.as_deref().and_then(parse_iso_duration)
    }

    /// Most recent state block, if any
    pub fn last_block(&self) -> Option<&RuntimeBlock> {
        self.state_blocks.iter().max_by_key(|block| block.start_time)
    }
}

fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("Invalid timestamp: {}", raw)))
}

fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("Invalid timestamp: {}", raw))),
    }
}

/// Identifier sent either as a number or a string
fn optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }

    Ok(Option::<Id>::deserialize(deserializer)?.map(|id| match id {
        Id::Number(n) => n.to_string(),
        Id::Text(s) => s,
    }))
}
