use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, ParleyResult};

/// `type` tag carried by a QR contact card
pub const CONTACT_CARD_TYPE: &str = "encrypted_messenger_key";

/// Seconds since the Unix epoch (0 if the clock is before 1970)
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Public key bundle exchanged out of band (rendered as a QR code by the UI)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactCard {
    pub username: String,
    /// base64 SubjectPublicKeyInfo
    pub public_key: String,
    #[serde(rename = "type")]
    pub card_type: String,
}

impl ContactCard {
    pub fn new(username: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            public_key: public_key.into(),
            card_type: CONTACT_CARD_TYPE.to_string(),
        }
    }

    pub fn to_json(&self) -> ParleyResult<String> {
        serde_json::to_string(self)
            .map_err(|e| ParleyError::ContactCard(format!("serialization: {e}")))
    }

    /// Parse a scanned card. All fields must be present and non-empty and
    /// the `type` tag must match.
    pub fn from_json(s: &str) -> ParleyResult<Self> {
        let card: ContactCard = serde_json::from_str(s)
            .map_err(|e| ParleyError::ContactCard(format!("not a contact card: {e}")))?;

        if card.card_type != CONTACT_CARD_TYPE {
            return Err(ParleyError::ContactCard(format!(
                "unexpected card type {:?}",
                card.card_type
            )));
        }
        if card.username.is_empty() || card.public_key.is_empty() {
            return Err(ParleyError::ContactCard(
                "username and publicKey must be non-empty".into(),
            ));
        }
        Ok(card)
    }
}

/// A position fix shared in chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal accuracy in meters
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Unix seconds
    pub timestamp: u64,
}

impl Location {
    /// A fix with only the mandatory fields, stamped now
    pub fn new(latitude: f64, longitude: f64, accuracy: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy,
            altitude: None,
            altitude_accuracy: None,
            heading: None,
            speed: None,
            timestamp: unix_now(),
        }
    }

    /// Great-circle distance in meters (haversine)
    pub fn distance_to(&self, other: &Location) -> f64 {
        let phi1 = self.latitude.to_radians();
        let phi2 = other.latitude.to_radians();
        let d_phi = (other.latitude - self.latitude).to_radians();
        let d_lambda = (other.longitude - self.longitude).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_M * c
    }

    /// Whether a live share should send this fix after `last`: the first
    /// fix always counts, later ones must move more than
    /// [`LIVE_MIN_DISTANCE_M`] or tighten accuracy below
    /// [`LIVE_ACCURACY_GAIN`] of the previous value.
    pub fn has_changed_significantly(&self, last: Option<&Location>) -> bool {
        let Some(last) = last else {
            return true;
        };
        self.distance_to(last) > LIVE_MIN_DISTANCE_M
            || self.accuracy < last.accuracy * LIVE_ACCURACY_GAIN
    }

    /// Accuracy rounded to whole meters, as shown in previews
    pub fn accuracy_label(&self) -> String {
        format!("\u{b1}{}m", self.accuracy.round() as i64)
    }
}

/// Mean Earth radius used for distances
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;
/// Movement a live share ignores
pub const LIVE_MIN_DISTANCE_M: f64 = 10.0;
pub const LIVE_ACCURACY_GAIN: f64 = 0.8;

/// How a location message was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMode {
    /// One-off fix
    Current,
    /// Update within an ongoing live share
    Live,
}

impl std::fmt::Display for LocationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocationMode::Current => f.write_str("current"),
            LocationMode::Live => f.write_str("live"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Image => f.write_str("image"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Descriptive record encrypted alongside a media payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMetadata {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub original_name: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Size of the (already compressed) payload in bytes
    pub size: u64,
    /// Unix seconds
    pub timestamp: u64,
}

impl MediaMetadata {
    pub fn new(kind: MediaKind, original_name: &str, mime_type: &str, size: u64) -> Self {
        Self {
            kind,
            original_name: original_name.to_string(),
            mime_type: mime_type.to_string(),
            width: None,
            height: None,
            size,
            timestamp: unix_now(),
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}
