//! Reservation (lease) context and reservation status codes.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::chat::{Participant, ParticipantRole, Presence};

/// Known reservation status codes, plus a fallback for anything else.
///
/// Parsing is lenient: a leading `reservation_` prefix is stripped and
/// `_by_<role>` segments collapse to `_<role>`, so `reservation_confirmation_by_owner`
/// parses as `ConfirmationOwner`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    ConfirmationOwner,
    ConfirmationRider,
    Collected,
    Completed,
    Rejected,
    Cancelled,
    Unknown(String),
}

impl ReservationStatus {
    /// Normalize a raw status code into its canonical lowercase form.
    pub fn normalize_code(raw: &str) -> String {
        let code = raw.trim().to_lowercase();
        let code = code.strip_prefix("reservation_").unwrap_or(&code);
        code.replace("_by_", "_")
    }

    pub fn parse(raw: &str) -> Self {
        let code = Self::normalize_code(raw);
        match code.as_str() {
            "pending" => ReservationStatus::Pending,
            "confirmed" => ReservationStatus::Confirmed,
            "confirmation_owner" => ReservationStatus::ConfirmationOwner,
            "confirmation_rider" => ReservationStatus::ConfirmationRider,
            "collected" => ReservationStatus::Collected,
            "completed" => ReservationStatus::Completed,
            "rejected" => ReservationStatus::Rejected,
            "cancelled" | "canceled" => ReservationStatus::Cancelled,
            _ => ReservationStatus::Unknown(code),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::ConfirmationOwner => "confirmation_owner",
            ReservationStatus::ConfirmationRider => "confirmation_rider",
            ReservationStatus::Collected => "collected",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Unknown(code) => code,
        }
    }

    /// Fixed transcript phrase for a status transition, if the code has one.
    pub fn phrase(&self) -> Option<&'static str> {
        match self {
            ReservationStatus::Pending => Some("Reservation is pending"),
            ReservationStatus::Confirmed => Some("Reservation has been confirmed"),
            ReservationStatus::ConfirmationOwner => Some("Owner confirmed the reservation"),
            ReservationStatus::ConfirmationRider => Some("Rider confirmed the reservation"),
            ReservationStatus::Collected => Some("Vehicle has been collected"),
            ReservationStatus::Completed => Some("Reservation is completed"),
            _ => None,
        }
    }
}

impl Default for ReservationStatus {
    fn default() -> Self {
        ReservationStatus::Pending
    }
}

impl From<String> for ReservationStatus {
    fn from(value: String) -> Self {
        ReservationStatus::parse(&value)
    }
}

impl From<ReservationStatus> for String {
    fn from(value: ReservationStatus) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LeasedAsset {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LeaseParty {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeasePricing {
    pub total: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_rate: Option<f64>,
}

/// Business data of the reservation behind the active chat session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseContext {
    pub id: String,
    /// Stable chat topic; falls back to `id` when the backend omits it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    pub asset: LeasedAsset,
    pub renter: LeaseParty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<LeasePricing>,
    #[serde(default)]
    pub status: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

impl LeaseContext {
    /// The topic id every chat operation for this reservation is keyed by.
    pub fn resolved_topic_id(&self) -> &str {
        self.topic_id
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.id)
    }

    /// The renter as the chat counterparty.
    pub fn counterparty(&self) -> Participant {
        Participant {
            id: self.renter.id.clone(),
            name: self.renter.name.clone(),
            contact: self.renter.email.clone().or_else(|| self.renter.phone.clone()),
            role: ParticipantRole::Renter,
            presence: Presence::Offline,
        }
    }
}
