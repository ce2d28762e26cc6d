// Copyright 2024-2025 Martin Pool.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! Operations in progress on the server, at most one per user and set.

use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::instance::LocalInstance;
use crate::{Error, Result, Stamp};

/// A backup set in one user's namespace.
pub type OpId = (Option<String>, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Backup,
    Restore,
}

#[derive(Debug)]
struct Op {
    kind: OpKind,
    /// The session that started it.
    owner: String,
    run: String,
    /// The instance writing the running manifest, for backups.
    instance: Option<LocalInstance>,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            OpKind::Backup => "backup",
            OpKind::Restore => "restore",
        };
        write!(f, "{kind} {}", self.run)
    }
}

#[derive(Debug, Default)]
pub struct OpRegistry {
    ops: HashMap<OpId, Op>,
}

impl OpRegistry {
    /// Fail unless `owner` may start an op of this kind on the set.
    ///
    /// A backup conflicts with any other op; a restore conflicts only with
    /// ops of other sessions.
    pub fn check_free(&self, id: &OpId, owner: &str, kind: OpKind) -> Result<()> {
        match self.ops.get(id) {
            None => Ok(()),
            Some(op) if kind == OpKind::Restore && op.owner == owner => Ok(()),
            Some(op) => Err(Error::OpConflict {
                set: id.1.clone(),
                op: op.to_string(),
            }),
        }
    }

    /// Register a backup whose running manifest has been created, returning
    /// its run id.
    pub fn begin_backup(
        &mut self,
        id: OpId,
        owner: &str,
        instance: LocalInstance,
    ) -> Result<String> {
        self.check_free(&id, owner, OpKind::Backup)?;
        let run = format!("{}.{}", id.1, Stamp::now());
        debug!(?id, owner, run, "Begin backup");
        self.ops.insert(
            id,
            Op {
                kind: OpKind::Backup,
                owner: owner.to_owned(),
                run: run.clone(),
                instance: Some(instance),
            },
        );
        Ok(run)
    }

    /// The instance of a backup owned by this session.
    pub fn backup_instance(&mut self, id: &OpId, owner: &str) -> Result<&mut LocalInstance> {
        match self.ops.get_mut(id) {
            Some(op) if op.owner != owner => Err(Error::OpConflict {
                set: id.1.clone(),
                op: op.to_string(),
            }),
            Some(Op {
                instance: Some(instance),
                ..
            }) => Ok(instance),
            _ => Err(Error::NotRunning { set: id.1.clone() }),
        }
    }

    /// Remove a backup owned by this session, returning its instance.
    pub fn end_backup(&mut self, id: &OpId, owner: &str) -> Result<LocalInstance> {
        self.backup_instance(id, owner)?;
        self.ops
            .remove(id)
            .and_then(|op| op.instance)
            .ok_or_else(|| Error::NotRunning { set: id.1.clone() })
    }

    pub fn begin_restore(&mut self, id: &OpId, owner: &str) -> Result<()> {
        self.check_free(id, owner, OpKind::Restore)?;
        if !self.ops.contains_key(id) {
            self.ops.insert(
                id.clone(),
                Op {
                    kind: OpKind::Restore,
                    owner: owner.to_owned(),
                    run: Stamp::now().to_string(),
                    instance: None,
                },
            );
        }
        Ok(())
    }

    pub fn end_restore(&mut self, id: &OpId, owner: &str) {
        if self
            .ops
            .get(id)
            .is_some_and(|op| op.kind == OpKind::Restore && op.owner == owner)
        {
            self.ops.remove(id);
        }
    }

    /// Drop every op started by these sessions, returning the instances of
    /// backups so that they can be abandoned.
    pub fn remove_owned_by(&mut self, owners: &[String]) -> Vec<LocalInstance> {
        let ids: Vec<OpId> = self
            .ops
            .iter()
            .filter(|(_, op)| owners.contains(&op.owner))
            .map(|(id, _)| id.clone())
            .collect();
        ids.into_iter()
            .filter_map(|id| self.ops.remove(&id))
            .filter_map(|op| op.instance)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
