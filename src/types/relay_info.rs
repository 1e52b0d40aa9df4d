//! Relay information exposed to the admin surface

use serde::{Deserialize, Serialize};

pub const SOFTWARE: &str = "https://github.com/BlowaterNostr/relayed";

/// Descriptive relay metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayInformation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Admin pubkey, canonical hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub supported_nips: Vec<u16>,
    pub software: String,
    pub version: String,
}

impl Default for RelayInformation {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            pubkey: None,
            contact: None,
            icon: None,
            supported_nips: vec![1, 2],
            software: SOFTWARE.to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Fields an operator may change; `None` leaves the current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayInformationUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub contact: Option<String>,
    pub icon: Option<String>,
}

impl RelayInformation {
    pub fn merge(&mut self, update: RelayInformationUpdate) {
        if update.name.is_some() {
            self.name = update.name;
        }
        if update.description.is_some() {
            self.description = update.description;
        }
        if update.contact.is_some() {
            self.contact = update.contact;
        }
        if update.icon.is_some() {
            self.icon = update.icon;
        }
    }
}
