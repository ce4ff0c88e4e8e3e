//! Name registry: which display name is owned by which live connection.
//!
//! Both directions (name -> owner, connection -> name) live behind one mutex
//! so every operation observes and leaves them in agreement. Records are
//! never removed; a closed connection only flips its name offline.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::NamePolicy;
use crate::ws::ConnectionId;

/// Public view of a registered name, as sent in `init.success` and `receiver.updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub name: String,
    pub is_online: bool,
}

impl ClientRecord {
    pub fn new(name: impl Into<String>, is_online: bool) -> Self {
        Self {
            name: name.into(),
            is_online,
        }
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registration {
    /// The record just brought online.
    pub record: ClientRecord,
    /// All known records after the registration, including offline ones.
    pub snapshot: BTreeMap<String, ClientRecord>,
    /// Connection that owned the name before and has been detached from it.
    pub superseded: Option<ConnectionId>,
}

/// Error type for registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
    /// The name is online under another connection and the policy is `reject`.
    NameTaken(String),
}

impl std::fmt::Display for RegisterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegisterError::NameTaken(name) => write!(f, "Name {} is already taken", name),
        }
    }
}

impl std::error::Error for RegisterError {}

#[derive(Debug, Default)]
struct Inner {
    /// name -> owning connection; `None` once the owner disconnected
    owners: HashMap<String, Option<ConnectionId>>,
    /// connection -> name it currently owns
    names: HashMap<ConnectionId, String>,
}

impl Inner {
    fn snapshot(&self) -> BTreeMap<String, ClientRecord> {
        self.owners
            .iter()
            .map(|(name, owner)| (name.clone(), ClientRecord::new(name.clone(), owner.is_some())))
            .collect()
    }
}

/// Process-wide name registry. Shared through `AppState`.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    inner: Mutex<Inner>,
    policy: NamePolicy,
}

impl ClientRegistry {
    pub fn new(policy: NamePolicy) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            policy,
        }
    }

    // Mutations below are plain map operations, so a poisoned lock still guards consistent maps.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bring `name` online under `connection_id`.
    ///
    /// The caller only registers connections that own no name yet.
    ///
    /// Under [`NamePolicy::Overwrite`] the last registration wins and the
    /// previous owner is detached: its later disconnect leaves the name alone.
    /// Under [`NamePolicy::Reject`] a name online under another connection
    /// cannot be claimed.
    pub fn register(
        &self,
        name: &str,
        connection_id: ConnectionId,
    ) -> Result<Registration, RegisterError> {
        let mut inner = self.lock();

        if let Some(Some(owner)) = inner.owners.get(name) {
            if *owner != connection_id && self.policy == NamePolicy::Reject {
                return Err(RegisterError::NameTaken(name.to_string()));
            }
        }

        let superseded = match inner.owners.insert(name.to_string(), Some(connection_id)) {
            Some(Some(old)) if old != connection_id => {
                inner.names.remove(&old);
                Some(old)
            }
            _ => None,
        };
        inner.names.insert(connection_id, name.to_string());

        Ok(Registration {
            record: ClientRecord::new(name, true),
            snapshot: inner.snapshot(),
            superseded,
        })
    }

    /// Look up a record by name.
    pub fn lookup(&self, name: &str) -> Option<ClientRecord> {
        self.lock()
            .owners
            .get(name)
            .map(|owner| ClientRecord::new(name, owner.is_some()))
    }

    /// The live connection a message for `name` should go to, if it is online.
    pub fn route_target(&self, name: &str) -> Option<ConnectionId> {
        self.lock().owners.get(name).copied().flatten()
    }

    /// The name currently owned by a connection.
    pub fn name_of(&self, connection_id: ConnectionId) -> Option<String> {
        self.lock().names.get(&connection_id).cloned()
    }

    /// Flip the name owned by `connection_id` offline and forget the connection.
    ///
    /// Returns `None` for connections that never registered or whose name was
    /// taken over by a later registration.
    pub fn mark_offline(&self, connection_id: ConnectionId) -> Option<ClientRecord> {
        let mut inner = self.lock();
        let name = inner.names.remove(&connection_id)?;
        if let Some(owner) = inner.owners.get_mut(&name) {
            *owner = None;
        }
        Some(ClientRecord::new(name, false))
    }

    /// All known records, online and offline, keyed by name.
    pub fn snapshot(&self) -> BTreeMap<String, ClientRecord> {
        self.lock().snapshot()
    }

    /// Number of known names.
    pub fn len(&self) -> usize {
        self.lock().owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of names currently online.
    pub fn online_count(&self) -> usize {
        self.lock().names.len()
    }
}
