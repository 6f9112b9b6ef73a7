//! Contacts, channel addresses and the per-user escalation profile.

use serde::{Deserialize, Serialize};

use super::geo::GeoPoint;

/// Notification channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Text message
    Sms,
    /// Automated voice call
    Voice,
    /// Email
    Email,
    /// Chat application message
    Chat,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Sms => write!(f, "sms"),
            ChannelKind::Voice => write!(f, "voice"),
            ChannelKind::Email => write!(f, "email"),
            ChannelKind::Chat => write!(f, "chat"),
        }
    }
}

/// One channel-specific address for a contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelAddress {
    /// Channel the address belongs to
    pub channel: ChannelKind,
    /// Address in the channel's own format
    pub address: String,
}

/// A person who can be notified about an alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    /// Display name
    pub name: String,
    /// Known addresses, at most one per channel
    pub addresses: Vec<ChannelAddress>,
}

impl Contact {
    /// Create a contact with no addresses.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addresses: Vec::new(),
        }
    }

    /// Add an address for a channel.
    pub fn with_address(mut self, channel: ChannelKind, address: impl Into<String>) -> Self {
        self.addresses.push(ChannelAddress {
            channel,
            address: address.into(),
        });
        self
    }

    /// Address for a channel, if the contact has one.
    pub fn address_for(&self, channel: ChannelKind) -> Option<&str> {
        self.addresses
            .iter()
            .find(|a| a.channel == channel)
            .map(|a| a.address.as_str())
    }
}

/// Escalation tier, ordered by notification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierKind {
    /// Family and friends, notified first
    Caregiver,
    /// Nearby responders from the emergency network
    Responder,
    /// Emergency services, last resort
    Emergency,
}

impl std::fmt::Display for TierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TierKind::Caregiver => write!(f, "caregiver"),
            TierKind::Responder => write!(f, "responder"),
            TierKind::Emergency => write!(f, "emergency"),
        }
    }
}

/// One tier of contacts in the escalation ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactTier {
    /// Which tier this is
    pub kind: TierKind,
    /// Contacts notified at this tier
    pub contacts: Vec<Contact>,
}

/// Per-user dispatch profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    /// Last known location, used for responder matching
    pub location: Option<GeoPoint>,
    /// Caregiver-tier contacts
    pub caregivers: Vec<Contact>,
    /// Emergency-tier contacts
    pub emergency: Vec<Contact>,
}
