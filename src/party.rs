//! Participating organizations and the directory they are registered in.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// The unique name of a party, e.g. `BANK_A`.
pub type PartyId = String;

/// Reachability of a party as recorded in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PartyStatus {
    /// The party accepts protocol requests.
    Online,
    /// The party must not be contacted.
    Offline,
}

/// An organization taking part in MPC jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Unique name of the party.
    pub id: PartyId,
    /// Human readable name.
    pub display_name: String,
    /// Where the party's MPC service is reachable.
    pub endpoint: String,
    /// Whether the party is currently reachable.
    pub status: PartyStatus,
}

impl Party {
    /// Creates an online party whose display name equals its id.
    pub fn online(id: impl Into<PartyId>, endpoint: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            endpoint: endpoint.into(),
            status: PartyStatus::Online,
        }
    }

    /// Returns `true` if the party accepts requests.
    pub fn is_online(&self) -> bool {
        self.status == PartyStatus::Online
    }
}

/// Read access to the registered parties.
pub trait PartyDirectory: Send + Sync + 'static {
    /// Looks up a party by id.
    fn find(&self, id: &str) -> Option<Party>;

    /// All registered parties, ordered by id.
    fn all(&self) -> Vec<Party>;
}

/// A [`PartyDirectory`] held in memory.
#[derive(Debug, Default)]
pub struct InMemoryPartyDirectory {
    parties: RwLock<BTreeMap<PartyId, Party>>,
}

impl InMemoryPartyDirectory {
    /// Creates a directory containing `parties`.
    pub fn new(parties: impl IntoIterator<Item = Party>) -> Self {
        let directory = Self::default();
        for party in parties {
            directory.register(party);
        }
        directory
    }

    /// Registers a party, replacing a previous registration with the same id.
    pub fn register(&self, party: Party) -> Option<Party> {
        self.parties.write().insert(party.id.clone(), party)
    }

    /// Updates the status of a registered party. Returns `false` for unknown ids.
    pub fn set_status(&self, id: &str, status: PartyStatus) -> bool {
        match self.parties.write().get_mut(id) {
            Some(party) => {
                party.status = status;
                true
            }
            None => false,
        }
    }
}

impl PartyDirectory for InMemoryPartyDirectory {
    fn find(&self, id: &str) -> Option<Party> {
        self.parties.read().get(id).cloned()
    }

    fn all(&self) -> Vec<Party> {
        self.parties.read().values().cloned().collect()
    }
}
