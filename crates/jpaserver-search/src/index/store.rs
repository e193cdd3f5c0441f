use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;

use parking_lot::RwLock;
use serde_json::Value;
use time::OffsetDateTime;

use super::IndexRow;
use crate::query::plan::{SqlValue, Table, columns};

/// One row of `hfj_resource`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRow {
    pub pid: i64,
    pub resource_type: String,
    pub fhir_id: String,
    pub version: i64,
    pub updated: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

impl ResourceRow {
    pub fn value(&self, column: &str) -> SqlValue {
        match column {
            columns::RES_ID => SqlValue::Integer(self.pid),
            columns::RES_TYPE => SqlValue::text(&self.resource_type),
            columns::FHIR_ID => SqlValue::text(&self.fhir_id),
            columns::RES_VER => SqlValue::Integer(self.version),
            columns::RES_UPDATED => SqlValue::Timestamp(self.updated),
            columns::RES_DELETED_AT => self.deleted_at.map_or(SqlValue::Null, SqlValue::Timestamp),
            _ => SqlValue::Null,
        }
    }
}

/// A resource as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    pub pid: i64,
    pub resource_type: String,
    pub id: String,
    pub version: i64,
    pub last_updated: OffsetDateTime,
    pub deleted: bool,
    pub resource: Value,
}

/// A row of any table, as the executor sees it.
#[derive(Debug, Clone, Copy)]
pub enum TableRow<'a> {
    Resource(&'a ResourceRow),
    Index { pid: i64, row: &'a IndexRow },
}

impl TableRow<'_> {
    pub fn value(&self, column: &str) -> SqlValue {
        match self {
            Self::Resource(row) => row.value(column),
            Self::Index { pid, row } => row.value(*pid, column),
        }
    }
}

/// The tables themselves. Read access goes through [`IndexStore::read_tables`].
#[derive(Debug, Default)]
pub struct IndexTables {
    resources: BTreeMap<i64, ResourceRow>,
    bodies: HashMap<i64, Value>,
    ids: HashMap<(String, String), i64>,
    rows: HashMap<i64, Vec<IndexRow>>,
    next_pid: i64,
}

impl IndexTables {
    pub fn resource(&self, pid: i64) -> Option<&ResourceRow> {
        self.resources.get(&pid)
    }

    pub fn pid_of(&self, resource_type: &str, id: &str) -> Option<i64> {
        self.ids
            .get(&(resource_type.to_string(), id.to_string()))
            .copied()
    }

    fn stored(&self, pid: i64) -> Option<StoredResource> {
        let row = self.resources.get(&pid)?;
        Some(StoredResource {
            pid,
            resource_type: row.resource_type.clone(),
            id: row.fhir_id.clone(),
            version: row.version,
            last_updated: row.updated,
            deleted: row.deleted_at.is_some(),
            resource: self.bodies.get(&pid).cloned().unwrap_or(Value::Null),
        })
    }

    /// Every row of `table`, in pid order.
    pub fn scan(&self, table: Table) -> Vec<TableRow<'_>> {
        if table == Table::Resource {
            return self.resources.values().map(TableRow::Resource).collect();
        }
        self.resources
            .keys()
            .flat_map(|pid| self.rows_for(table, *pid))
            .collect()
    }

    /// Rows of `table` owned by the resource `pid`.
    pub fn rows_for(&self, table: Table, pid: i64) -> Vec<TableRow<'_>> {
        if table == Table::Resource {
            return self.resources.get(&pid).map(TableRow::Resource).into_iter().collect();
        }
        self.rows
            .get(&pid)
            .into_iter()
            .flatten()
            .filter(|row| row.table() == table)
            .map(|row| TableRow::Index { pid, row })
            .collect()
    }

    pub fn index_rows(&self, pid: i64) -> &[IndexRow] {
        self.rows.get(&pid).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    fn resolve_links(&self, rows: &mut [IndexRow]) {
        for row in rows {
            if let IndexRow::Link(link) = row {
                link.target_pid = self.pid_of(&link.target_resource_type, &link.target_fhir_id);
            }
        }
    }

    /// Point links written before their target existed at the new target.
    fn backfill_links(&mut self, resource_type: &str, id: &str, pid: i64) {
        for row in self.rows.values_mut().flatten() {
            if let IndexRow::Link(link) = row
                && link.target_pid.is_none()
                && link.target_resource_type == resource_type
                && link.target_fhir_id == id
            {
                link.target_pid = Some(pid);
            }
        }
    }
}

/// Thread-safe owner of the index tables.
#[derive(Debug, Default)]
pub struct IndexStore {
    tables: RwLock<IndexTables>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a new version of a resource and replace its index rows.
    ///
    /// Writing over a deleted resource revives it with the next version.
    pub fn upsert(
        &self,
        resource_type: &str,
        id: &str,
        resource: Value,
        rows: Vec<IndexRow>,
        updated: OffsetDateTime,
    ) -> StoredResource {
        match self.upsert_with(resource_type, id, updated, |_| {
            Ok::<_, Infallible>((resource, rows))
        }) {
            Ok(stored) => stored,
            Err(never) => match never {},
        }
    }

    /// Like [`IndexStore::upsert`], with the body and rows produced from the
    /// version being written while the write lock is held.
    pub fn upsert_with<E>(
        &self,
        resource_type: &str,
        id: &str,
        updated: OffsetDateTime,
        prepare: impl FnOnce(i64) -> Result<(Value, Vec<IndexRow>), E>,
    ) -> Result<StoredResource, E> {
        let mut tables = self.tables.write();
        let key = (resource_type.to_string(), id.to_string());
        let existing = tables.ids.get(&key).copied();
        let version = existing
            .and_then(|pid| tables.resources.get(&pid))
            .map_or(1, |row| row.version + 1);

        let (resource, mut rows) = prepare(version)?;
        tables.resolve_links(&mut rows);

        let pid = match existing {
            Some(pid) => pid,
            None => {
                tables.next_pid += 1;
                let pid = tables.next_pid;
                tables.ids.insert(key, pid);
                tables.backfill_links(resource_type, id, pid);
                pid
            }
        };

        tables.resources.insert(
            pid,
            ResourceRow {
                pid,
                resource_type: resource_type.to_string(),
                fhir_id: id.to_string(),
                version,
                updated,
                deleted_at: None,
            },
        );
        tables.bodies.insert(pid, resource.clone());
        tables.rows.insert(pid, rows);

        tracing::trace!(resource_type, id, pid, version, "Indexed resource version");

        Ok(StoredResource {
            pid,
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            version,
            last_updated: updated,
            deleted: false,
            resource,
        })
    }

    /// Stamp `deleted_at` and drop the index rows. Returns `None` when the
    /// resource never existed.
    pub fn delete(
        &self,
        resource_type: &str,
        id: &str,
        deleted_at: OffsetDateTime,
    ) -> Option<StoredResource> {
        let mut tables = self.tables.write();
        let pid = tables.pid_of(resource_type, id)?;
        if let Some(row) = tables.resources.get_mut(&pid)
            && row.deleted_at.is_none()
        {
            row.deleted_at = Some(deleted_at);
            row.version += 1;
        }
        tables.rows.remove(&pid);
        tables.stored(pid)
    }

    pub fn read(&self, resource_type: &str, id: &str) -> Option<StoredResource> {
        let tables = self.tables.read();
        let pid = tables.pid_of(resource_type, id)?;
        tables.stored(pid)
    }

    pub fn read_pid(&self, pid: i64) -> Option<StoredResource> {
        self.tables.read().stored(pid)
    }

    /// Run `f` under a read lock of the tables.
    pub fn read_tables<R>(&self, f: impl FnOnce(&IndexTables) -> R) -> R {
        f(&self.tables.read())
    }
}
