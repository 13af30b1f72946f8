//! Branch directory.
//!
//! Maps branch names to head commits and namespaces, keeps track of the
//! default branch, and pins every session to its current branch.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::info;

use super::types::{BranchName, Session, SessionId};
use crate::error::{VcError, VcResult};
use crate::history::CommitId;
use crate::tables::NamespaceId;

/// A named, movable pointer to a head commit.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub name: BranchName,
    pub head: CommitId,
    /// where the branch's working tables live
    pub namespace: NamespaceId,
    pub created_at: DateTime<Utc>,
}

impl Branch {
    pub fn new(name: BranchName, head: CommitId, namespace: NamespaceId) -> Self {
        Self {
            name,
            head,
            namespace,
            created_at: Utc::now(),
        }
    }
}

/// Listing entry for [`BranchDirectory::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct BranchInfo {
    pub name: BranchName,
    pub head: CommitId,
    pub is_current: bool,
    pub is_default: bool,
}

#[derive(Debug)]
pub struct BranchDirectory {
    branches: BTreeMap<BranchName, Branch>,
    default: BranchName,
    pins: HashMap<SessionId, BranchName>,
}

impl BranchDirectory {
    pub fn new(default_branch: Branch) -> Self {
        let default = default_branch.name.clone();
        Self {
            branches: BTreeMap::from([(default.clone(), default_branch)]),
            default,
            pins: HashMap::new(),
        }
    }

    pub fn create(&mut self, branch: Branch) -> VcResult<()> {
        if self.branches.contains_key(&branch.name) {
            return Err(VcError::DuplicateBranch(branch.name));
        }
        info!(branch = %branch.name, head = %branch.head, "created branch");
        self.branches.insert(branch.name.clone(), branch);
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.branches.contains_key(name)
    }

    pub fn get(&self, name: &str) -> VcResult<&Branch> {
        self.branches
            .get(name)
            .ok_or_else(|| VcError::UnknownBranch(name.to_string()))
    }

    fn key_of(&self, name: &str) -> VcResult<BranchName> {
        Ok(self.get(name)?.name.clone())
    }

    pub fn by_namespace(&self, namespace: NamespaceId) -> Option<&Branch> {
        self.branches.values().find(|b| b.namespace == namespace)
    }

    pub fn default_branch(&self) -> &Branch {
        // the default branch can be renamed but never removed
        &self.branches[&self.default]
    }

    pub fn is_default(&self, name: &str) -> bool {
        self.default == name
    }

    pub fn set_head(&mut self, name: &str, head: CommitId) -> VcResult<()> {
        let key = self.key_of(name)?;
        if let Some(branch) = self.branches.get_mut(&key) {
            branch.head = head;
        }
        Ok(())
    }

    /// Rename a branch, carrying the default flag and session pins along.
    pub fn rename(&mut self, old: &str, new: BranchName) -> VcResult<()> {
        let old = self.key_of(old)?;
        if old == new {
            return Ok(());
        }
        if self.branches.contains_key(&new) {
            return Err(VcError::DuplicateBranch(new));
        }

        if let Some(mut branch) = self.branches.remove(&old) {
            branch.name = new.clone();
            self.branches.insert(new.clone(), branch);
        }
        if self.default == old {
            self.default = new.clone();
        }
        for pinned in self.pins.values_mut().filter(|p| **p == old) {
            *pinned = new.clone();
        }
        info!(from = %old, to = %new, "renamed branch");
        Ok(())
    }

    /// Remove a branch. Sessions pinned to it fall back to the default branch.
    ///
    /// Returns the removed branch and the sessions that were moved.
    pub fn delete(&mut self, name: &str) -> VcResult<(Branch, Vec<SessionId>)> {
        let key = self.key_of(name)?;
        if key == self.default {
            return Err(VcError::CannotDeleteDefault(key));
        }

        let mut moved = Vec::new();
        for (session, pinned) in self.pins.iter_mut() {
            if *pinned == key {
                *pinned = self.default.clone();
                moved.push(*session);
            }
        }

        let branch = self
            .branches
            .remove(&key)
            .ok_or_else(|| VcError::UnknownBranch(name.to_string()))?;
        info!(branch = %key, sessions_moved = moved.len(), "deleted branch");
        Ok((branch, moved))
    }

    // ==================== Sessions ====================

    /// Pin a session to the default branch.
    pub fn attach(&mut self, session: &Session) {
        self.pins.insert(session.id(), self.default.clone());
    }

    pub fn detach(&mut self, session: &Session) {
        self.pins.remove(&session.id());
    }

    pub fn switch(&mut self, session: &Session, name: &str) -> VcResult<()> {
        let key = self.key_of(name)?;
        self.pins.insert(session.id(), key);
        Ok(())
    }

    /// The session's current branch; sessions never attached get the default.
    pub fn current(&self, session: &Session) -> &Branch {
        self.pins
            .get(&session.id())
            .and_then(|name| self.branches.get(name))
            .unwrap_or_else(|| self.default_branch())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Branch> {
        self.branches.values()
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// all branches by name, flagging the session's current one
    pub fn list(&self, session: &Session) -> Vec<BranchInfo> {
        let current = &self.current(session).name;
        self.branches
            .values()
            .map(|b| BranchInfo {
                name: b.name.clone(),
                head: b.head,
                is_current: &b.name == current,
                is_default: b.name == self.default,
            })
            .collect()
    }
}
