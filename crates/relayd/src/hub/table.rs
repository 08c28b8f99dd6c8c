//! Membership table owned by the hub actor.

use std::collections::{BTreeMap, HashMap};

use relay_core::{ConnectionId, Identity};

use super::commands::MemberInfo;
use super::member::Member;

/// Live connections, ordered by connection id (join order).
///
/// In keyed mode an identity index enforces at most one connection per
/// identity. In anonymous mode identities may repeat and the index is
/// not maintained.
#[derive(Debug)]
pub struct MembershipTable {
    keyed: bool,
    members: BTreeMap<ConnectionId, Member>,
    by_identity: HashMap<Identity, ConnectionId>,
}

impl MembershipTable {
    pub fn new(keyed: bool) -> Self {
        Self {
            keyed,
            members: BTreeMap::new(),
            by_identity: HashMap::new(),
        }
    }

    /// Inserts a member.
    ///
    /// Returns the member it displaced: the previous holder of the same
    /// identity in keyed mode, or a stale entry with the same connection id.
    pub fn insert(&mut self, member: Member) -> Option<Member> {
        let id = member.id;
        let stale = self.remove(id);

        let displaced = if self.keyed {
            self.by_identity
                .insert(member.identity.clone(), id)
                .and_then(|previous| self.members.remove(&previous))
        } else {
            None
        };

        self.members.insert(id, member);
        displaced.or(stale)
    }

    /// Removes a member by connection id. `None` if it was not present.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Member> {
        let member = self.members.remove(&id)?;

        if self.keyed && self.by_identity.get(&member.identity) == Some(&id) {
            self.by_identity.remove(&member.identity);
        }

        Some(member)
    }

    /// Finds the connection registered under an identity.
    ///
    /// In anonymous mode this is the earliest connection using it.
    pub fn lookup(&self, identity: &Identity) -> Option<&Member> {
        if self.keyed {
            self.by_identity
                .get(identity)
                .and_then(|id| self.members.get(id))
        } else {
            self.members.values().find(|m| &m.identity == identity)
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn snapshot(&self) -> Vec<MemberInfo> {
        self.members
            .values()
            .map(|m| MemberInfo {
                connection: m.id,
                identity: m.identity.clone(),
            })
            .collect()
    }

    /// Removes every member, in join order.
    pub fn drain(&mut self) -> Vec<Member> {
        self.by_identity.clear();
        std::mem::take(&mut self.members).into_values().collect()
    }
}
