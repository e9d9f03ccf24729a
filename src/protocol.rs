//! JSON wire formats exchanged with the collector.
//!
//! Inbound control messages mutate the registry; outbound measurement
//! reports carry one flush worth of samples.

use serde::{Deserialize, Serialize};

use crate::aggregator::MeasurementMap;
use crate::mac::{MacAddress, MacParseError};

// ── Outbound ────────────────────────────────────────────────────────

/// Measurement report published on every flush.
///
/// `{"station-id":"S1","map":{"beacon1":[-70,-72]}}`
#[derive(Debug, Serialize)]
pub struct MeasurementReport<'a> {
    #[serde(rename = "station-id")]
    pub station_id: &'a str,
    pub map: &'a MeasurementMap,
}

impl MeasurementReport<'_> {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Registry change requested by the collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Track these addresses. `label` is only set when exactly one address
    /// was given together with a `name`.
    Add {
        addresses: Vec<MacAddress>,
        label: Option<String>,
    },
    /// Stop tracking these addresses.
    DeleteAddresses(Vec<MacAddress>),
    /// Stop tracking every beacon labeled `name`.
    DeleteLabel(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown action {0:?}")]
    UnknownAction(String),
    #[error("`{action}` command is missing `{field}`")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },
    #[error(transparent)]
    InvalidAddress(#[from] MacParseError),
    #[error("`name` requires exactly one `mac`, got {0}")]
    AmbiguousName(usize),
}

/// `mac` may be a single address or a list of them.
#[derive(Deserialize)]
#[serde(untagged)]
enum MacField {
    One(String),
    Many(Vec<String>),
}

impl MacField {
    fn parse(self) -> Result<Vec<MacAddress>, MacParseError> {
        match self {
            MacField::One(s) => Ok(vec![s.parse()?]),
            MacField::Many(list) => list.iter().map(|s| s.parse()).collect(),
        }
    }
}

/// Wire shape of a control message, validated into a [`Command`] by
/// [`parse_command`].
#[derive(Deserialize)]
struct RawCommand {
    action: String,
    #[serde(default)]
    mac: Option<MacField>,
    #[serde(default)]
    name: Option<String>,
}

/// Decode one control message payload.
pub fn parse_command(payload: &[u8]) -> Result<Command, CommandError> {
    let raw: RawCommand = serde_json::from_slice(payload.trim_ascii())?;

    match raw.action.as_str() {
        "add" => {
            let addresses = raw
                .mac
                .ok_or(CommandError::MissingField {
                    action: "add",
                    field: "mac",
                })?
                .parse()?;
            if raw.name.is_some() && addresses.len() != 1 {
                return Err(CommandError::AmbiguousName(addresses.len()));
            }
            Ok(Command::Add {
                addresses,
                label: raw.name,
            })
        }
        "delete" => match (raw.mac, raw.name) {
            (Some(mac), _) => Ok(Command::DeleteAddresses(mac.parse()?)),
            (None, Some(name)) => Ok(Command::DeleteLabel(name)),
            (None, None) => Err(CommandError::MissingField {
                action: "delete",
                field: "mac",
            }),
        },
        other => Err(CommandError::UnknownAction(other.to_string())),
    }
}
