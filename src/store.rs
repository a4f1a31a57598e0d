use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::IndexOptions;
use mongodb::{bson::doc, Collection, Database, IndexModel};
use thiserror::Error;

use crate::schemas::{Group, GroupMember, Receipt};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("could not encode document: {0}")]
    Encode(#[from] bson::ser::Error),
    #[error("group {0} already exists")]
    DuplicateGroup(String),
}

/// Persistence for groups and their receipts.
///
/// Membership mutations report `false` when the group does not exist.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn insert_group(&self, group: Group) -> Result<(), StoreError>;
    async fn find_group(&self, id: &str) -> Result<Option<Group>, StoreError>;
    async fn add_member(&self, group_id: &str, member: GroupMember) -> Result<bool, StoreError>;
    async fn remove_member(&self, group_id: &str, email: &str) -> Result<bool, StoreError>;
    async fn insert_receipt(&self, receipt: Receipt) -> Result<(), StoreError>;
    async fn receipts_for_group(&self, group_id: &str) -> Result<Vec<Receipt>, StoreError>;
}

/// Server error code for a unique index violation.
const DUPLICATE_KEY: i32 = 11000;

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

pub struct MongoStore {
    groups: Collection<Group>,
    receipts: Collection<Receipt>,
}

impl MongoStore {
    pub fn new(database: Database) -> Self {
        MongoStore {
            groups: database.collection("Groups"),
            receipts: database.collection("Receipts"),
        }
    }

    /// Group ids are unique; inserts rely on this index to refuse duplicates.
    pub async fn ensure_indexes(&self) -> Result<(), StoreError> {
        let unique_id = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.groups.create_index(unique_id, None).await?;
        Ok(())
    }

    async fn replace_members(
        &self,
        group_id: &str,
        members: &[GroupMember],
    ) -> Result<(), StoreError> {
        self.groups
            .update_one(
                doc! { "id": group_id },
                doc! { "$set": { "members": bson::to_bson(members)? } },
                None,
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MongoStore {
    async fn insert_group(&self, group: Group) -> Result<(), StoreError> {
        match self.groups.insert_one(&group, None).await {
            Ok(_) => Ok(()),
            Err(err) if is_duplicate_key(&err) => Err(StoreError::DuplicateGroup(group.id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn find_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        Ok(self.groups.find_one(doc! { "id": id }, None).await?)
    }

    async fn add_member(&self, group_id: &str, member: GroupMember) -> Result<bool, StoreError> {
        let Some(mut group) = self.find_group(group_id).await? else {
            return Ok(false);
        };
        if !group.has_member(member.email()) {
            group.members.push(member);
            self.replace_members(group_id, &group.members).await?;
        }
        Ok(true)
    }

    async fn remove_member(&self, group_id: &str, email: &str) -> Result<bool, StoreError> {
        let Some(mut group) = self.find_group(group_id).await? else {
            return Ok(false);
        };
        group.members.retain(|member| member.email() != email);
        self.replace_members(group_id, &group.members).await?;
        Ok(true)
    }

    async fn insert_receipt(&self, receipt: Receipt) -> Result<(), StoreError> {
        self.receipts.insert_one(receipt, None).await?;
        Ok(())
    }

    async fn receipts_for_group(&self, group_id: &str) -> Result<Vec<Receipt>, StoreError> {
        let cursor = self.receipts.find(doc! { "groupId": group_id }, None).await?;
        Ok(cursor.try_collect().await?)
    }
}

/// Process-local store for development and tests.
#[derive(Default)]
pub struct MemoryStore {
    groups: Mutex<HashMap<String, Group>>,
    receipts: Mutex<Vec<Receipt>>,
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_group(&self, group: Group) -> Result<(), StoreError> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        if groups.contains_key(&group.id) {
            return Err(StoreError::DuplicateGroup(group.id));
        }
        groups.insert(group.id.clone(), group);
        Ok(())
    }

    async fn find_group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        let groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(groups.get(id).cloned())
    }

    async fn add_member(&self, group_id: &str, member: GroupMember) -> Result<bool, StoreError> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(group) = groups.get_mut(group_id) else {
            return Ok(false);
        };
        if !group.has_member(member.email()) {
            group.members.push(member);
        }
        Ok(true)
    }

    async fn remove_member(&self, group_id: &str, email: &str) -> Result<bool, StoreError> {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(group) = groups.get_mut(group_id) else {
            return Ok(false);
        };
        group.members.retain(|member| member.email() != email);
        Ok(true)
    }

    async fn insert_receipt(&self, receipt: Receipt) -> Result<(), StoreError> {
        self.receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(receipt);
        Ok(())
    }

    async fn receipts_for_group(&self, group_id: &str) -> Result<Vec<Receipt>, StoreError> {
        let receipts = self.receipts.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(receipts
            .iter()
            .filter(|receipt| receipt.belongs_to(group_id))
            .cloned()
            .collect())
    }
}
