use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use pfasync_types::ids::EndpointId;
use pfasync_types::mapping::{
    ActiveRule, DataType, MappingRule, MappingVersionSnapshot, SnapshotReason, TransformType,
};

use super::{
    collect_rows, now_ts, parse_enum, parse_ts, SnapshotRow, SqliteStateBackend, SNAPSHOT_COLUMNS,
};
use crate::backend::{MappingStore, ReplaceOutcome, RestoreOutcome};
use crate::error::{self, StateError};
use crate::hashing::rules_hash;

type RuleRow = (
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    bool,
    String,
);

fn rule_from_row(row: RuleRow) -> error::Result<ActiveRule> {
    let (id, endpoint, source, destination, data_type, transform, params_json, default_json, is_active, updated_at) =
        row;
    Ok(ActiveRule {
        id,
        endpoint_id: EndpointId::new(endpoint),
        rule: MappingRule {
            source_field: source,
            destination_field: destination,
            data_type: parse_enum("data_type", &data_type, DataType::parse)?,
            transform_type: parse_enum("transform_type", &transform, TransformType::parse)?,
            transform_params: serde_json::from_str(&params_json)?,
            default_value: default_json.as_deref().map(serde_json::from_str).transpose()?,
            is_active,
        },
        updated_at: parse_ts(&updated_at)?,
    })
}

fn load_rules(conn: &Connection, endpoint: &EndpointId) -> error::Result<Vec<ActiveRule>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, endpoint_id, source_field, destination_field, data_type, transform_type, \
             transform_params_json, default_value_json, is_active, updated_at \
             FROM mapping_rules WHERE endpoint_id = ?1 ORDER BY position, id",
        )
        .map_err(StateError::backend)?;
    let rows = stmt
        .query_map([endpoint.as_str()], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
            ))
        })
        .map_err(StateError::backend)?;
    collect_rows(rows, rule_from_row)
}

fn write_rules(tx: &Transaction<'_>, endpoint: &EndpointId, rules: &[MappingRule]) -> error::Result<()> {
    tx.execute(
        "DELETE FROM mapping_rules WHERE endpoint_id = ?1",
        [endpoint.as_str()],
    )
    .map_err(|e| StateError::backend_context("write_rules: clear", e))?;
    let now = now_ts();
    let mut stmt = tx
        .prepare(
            "INSERT INTO mapping_rules \
             (endpoint_id, position, source_field, destination_field, data_type, transform_type, \
              transform_params_json, default_value_json, is_active, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .map_err(|e| StateError::backend_context("write_rules: prepare", e))?;
    for (position, rule) in rules.iter().enumerate() {
        let default_json = rule
            .default_value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        stmt.execute(params![
            endpoint.as_str(),
            i64::try_from(position).unwrap_or(i64::MAX),
            rule.source_field,
            rule.destination_field,
            rule.data_type.as_str(),
            rule.transform_type.as_str(),
            serde_json::to_string(&rule.transform_params)?,
            default_json,
            rule.is_active,
            now,
        ])
        .map_err(|e| StateError::backend_context("write_rules: insert", e))?;
    }
    Ok(())
}

/// Freeze the endpoint's current registry rows.
fn insert_snapshot(
    conn: &Connection,
    endpoint: &EndpointId,
    reason: SnapshotReason,
) -> error::Result<MappingVersionSnapshot> {
    let rules: Vec<MappingRule> = load_rules(conn, endpoint)?
        .into_iter()
        .map(|active| active.rule)
        .collect();
    let hash = rules_hash(&rules)?;
    let captured_at = now_ts();
    conn.execute(
        "INSERT INTO mapping_versions (endpoint_id, captured_at, reason, rules_hash, rules_json) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            endpoint.as_str(),
            captured_at,
            reason.as_str(),
            hash,
            serde_json::to_string(&rules)?,
        ],
    )
    .map_err(|e| StateError::backend_context("insert_snapshot", e))?;
    Ok(MappingVersionSnapshot {
        id: conn.last_insert_rowid(),
        endpoint_id: endpoint.clone(),
        captured_at: parse_ts(&captured_at)?,
        reason,
        rules_hash: hash,
        rules,
    })
}

fn load_snapshot(conn: &Connection, id: i64) -> error::Result<Option<MappingVersionSnapshot>> {
    conn.query_row(
        &format!("SELECT {SNAPSHOT_COLUMNS} FROM mapping_versions WHERE id = ?1"),
        [id],
        SnapshotRow::from_row,
    )
    .optional()
    .map_err(StateError::backend)?
    .map(SnapshotRow::into_model)
    .transpose()
}

impl MappingStore for SqliteStateBackend {
    fn active_rules(&self, endpoint: &EndpointId) -> error::Result<Vec<ActiveRule>> {
        let conn = self.lock_conn()?;
        load_rules(&conn, endpoint)
    }

    fn replace_active_rules(
        &self,
        endpoint: &EndpointId,
        rules: &[MappingRule],
    ) -> error::Result<ReplaceOutcome> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("replace_active_rules: begin tx", e))?;
        let snapshot = insert_snapshot(&tx, endpoint, SnapshotReason::BeforeBulkReplace)?;
        write_rules(&tx, endpoint, rules)?;
        tx.commit()
            .map_err(|e| StateError::backend_context("replace_active_rules: commit", e))?;
        Ok(ReplaceOutcome {
            snapshot_id: snapshot.id,
            saved: rules.len(),
        })
    }

    fn create_snapshot(
        &self,
        endpoint: &EndpointId,
        reason: SnapshotReason,
    ) -> error::Result<MappingVersionSnapshot> {
        let conn = self.lock_conn()?;
        insert_snapshot(&conn, endpoint, reason)
    }

    fn get_snapshot(&self, id: i64) -> error::Result<Option<MappingVersionSnapshot>> {
        let conn = self.lock_conn()?;
        load_snapshot(&conn, id)
    }

    fn list_snapshots(&self, endpoint: &EndpointId) -> error::Result<Vec<MappingVersionSnapshot>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {SNAPSHOT_COLUMNS} FROM mapping_versions WHERE endpoint_id = ?1 \
                 ORDER BY id DESC"
            ))
            .map_err(StateError::backend)?;
        let rows = stmt
            .query_map([endpoint.as_str()], SnapshotRow::from_row)
            .map_err(StateError::backend)?;
        collect_rows(rows, SnapshotRow::into_model)
    }

    fn restore_snapshot(
        &self,
        endpoint: &EndpointId,
        version_id: i64,
    ) -> error::Result<RestoreOutcome> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("restore_snapshot: begin tx", e))?;
        let snapshot = load_snapshot(&tx, version_id)?
            .filter(|snapshot| &snapshot.endpoint_id == endpoint)
            .ok_or_else(|| {
                StateError::NotFound(format!("mapping version {version_id} for {endpoint}"))
            })?;
        let backup = insert_snapshot(&tx, endpoint, SnapshotReason::BeforeRestore)?;
        write_rules(&tx, endpoint, &snapshot.rules)?;
        tx.commit()
            .map_err(|e| StateError::backend_context("restore_snapshot: commit", e))?;
        Ok(RestoreOutcome {
            restored: snapshot.rules.len(),
            backup_snapshot_id: backup.id,
        })
    }

    fn resolve_current_version(
        &self,
        endpoint: &EndpointId,
    ) -> error::Result<MappingVersionSnapshot> {
        let conn = self.lock_conn()?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)
            .map_err(|e| StateError::backend_context("resolve_current_version: begin tx", e))?;
        let rules: Vec<MappingRule> = load_rules(&tx, endpoint)?
            .into_iter()
            .map(|active| active.rule)
            .collect();
        let hash = rules_hash(&rules)?;
        let latest = tx
            .query_row(
                &format!(
                    "SELECT {SNAPSHOT_COLUMNS} FROM mapping_versions WHERE endpoint_id = ?1 \
                     ORDER BY id DESC LIMIT 1"
                ),
                [endpoint.as_str()],
                SnapshotRow::from_row,
            )
            .optional()
            .map_err(StateError::backend)?
            .map(SnapshotRow::into_model)
            .transpose()?;

        let version = match latest {
            Some(snapshot) if snapshot.rules_hash == hash => snapshot,
            _ => insert_snapshot(&tx, endpoint, SnapshotReason::Commit)?,
        };
        tx.commit()
            .map_err(|e| StateError::backend_context("resolve_current_version: commit", e))?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::super::test_support::endpoint;
    use super::*;

    fn rules_v1() -> Vec<MappingRule> {
        vec![
            MappingRule::new("Id", "external_id", DataType::String, TransformType::Direct),
            MappingRule::new("Start", "start_date", DataType::Date, TransformType::Date)
                .with_param("format", json!("%m/%d/%Y")),
        ]
    }

    #[test]
    fn replace_snapshots_previous_set_first() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let first = backend.replace_active_rules(&endpoint(), &rules_v1()).unwrap();
        assert_eq!(first.saved, 2);
        let before = backend.get_snapshot(first.snapshot_id).unwrap().unwrap();
        assert!(before.rules.is_empty());
        assert_eq!(before.reason, SnapshotReason::BeforeBulkReplace);

        let second = backend
            .replace_active_rules(&endpoint(), &rules_v1()[..1])
            .unwrap();
        let frozen = backend.get_snapshot(second.snapshot_id).unwrap().unwrap();
        assert_eq!(frozen.rules, rules_v1());
        assert_eq!(backend.active_rules(&endpoint()).unwrap().len(), 1);
    }

    #[test]
    fn active_rules_keep_order_and_params() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.replace_active_rules(&endpoint(), &rules_v1()).unwrap();
        let active = backend.active_rules(&endpoint()).unwrap();
        let rules: Vec<MappingRule> = active.into_iter().map(|a| a.rule).collect();
        assert_eq!(rules, rules_v1());
    }

    #[test]
    fn restore_brings_back_exact_rules_and_keeps_history() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.replace_active_rules(&endpoint(), &rules_v1()).unwrap();
        let v1 = backend
            .create_snapshot(&endpoint(), SnapshotReason::Manual)
            .unwrap();

        let changed = vec![MappingRule::new(
            "Name",
            "title",
            DataType::String,
            TransformType::Custom,
        )
        .with_param("function", json!("trim"))
        .with_default(json!("untitled"))];
        backend.replace_active_rules(&endpoint(), &changed).unwrap();

        let outcome = backend.restore_snapshot(&endpoint(), v1.id).unwrap();
        assert_eq!(outcome.restored, 2);
        let backup = backend.get_snapshot(outcome.backup_snapshot_id).unwrap().unwrap();
        assert_eq!(backup.reason, SnapshotReason::BeforeRestore);
        assert_eq!(backup.rules, changed);

        let restored: Vec<MappingRule> = backend
            .active_rules(&endpoint())
            .unwrap()
            .into_iter()
            .map(|a| a.rule)
            .collect();
        assert_eq!(restored, v1.rules);
        assert!(backend.get_snapshot(v1.id).unwrap().is_some());
    }

    #[test]
    fn restore_rejects_foreign_or_missing_version() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        let other = EndpointId::new("pfa.projects");
        let snapshot = backend
            .create_snapshot(&other, SnapshotReason::Manual)
            .unwrap();
        assert!(matches!(
            backend.restore_snapshot(&endpoint(), snapshot.id),
            Err(StateError::NotFound(_))
        ));
        assert!(matches!(
            backend.restore_snapshot(&endpoint(), 404),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn resolve_current_version_reuses_matching_snapshot() {
        let backend = SqliteStateBackend::in_memory().unwrap();
        backend.replace_active_rules(&endpoint(), &rules_v1()).unwrap();

        let first = backend.resolve_current_version(&endpoint()).unwrap();
        assert_eq!(first.reason, SnapshotReason::Commit);
        let again = backend.resolve_current_version(&endpoint()).unwrap();
        assert_eq!(first.id, again.id);

        backend
            .replace_active_rules(&endpoint(), &rules_v1()[1..])
            .unwrap();
        let third = backend.resolve_current_version(&endpoint()).unwrap();
        assert_ne!(third.id, first.id);
        assert_eq!(backend.list_snapshots(&endpoint()).unwrap()[0].id, third.id);
    }
}
