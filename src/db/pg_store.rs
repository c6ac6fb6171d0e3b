// src/db/pg_store.rs

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use tokio_postgres::Transaction;

use crate::consolidation::executor::{execute_plan, MergeWriter};
use crate::db::store::DedupStore;
use crate::models::{
    BranchRecord, ChildLink, ChildRow, EntityKind, ForeignKeyRelation, JobRecord, KeyedRelation,
    MergeOutcome, MergePlan, SalesPersonRecord,
};
use crate::utils::db_connect::PgPool;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the merge audit table if it is missing.
    pub async fn ensure_audit_table(&self) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for audit table setup")?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS dedup_merge_audit (
                id BIGSERIAL PRIMARY KEY,
                run_id TEXT NOT NULL,
                entity_kind TEXT NOT NULL,
                eliminated_id BIGINT NOT NULL,
                surviving_id BIGINT NOT NULL,
                merged_at TIMESTAMP NOT NULL DEFAULT NOW()
            );
            CREATE INDEX IF NOT EXISTS idx_dedup_merge_audit_run ON dedup_merge_audit (run_id);",
        )
        .await
        .context("Failed to create dedup_merge_audit table")?;
        info!("Audit table dedup_merge_audit is ready");
        Ok(())
    }

    /// Rows of a keyed child table grouped by parent.
    async fn load_keyed(
        &self,
        relation: KeyedRelation,
    ) -> Result<HashMap<i64, Vec<ChildRow>>> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for child rows")?;
        let quantity = relation
            .quantity_column()
            .map(|q| format!("{}::float8", q))
            .unwrap_or_else(|| "NULL::float8".to_string());
        let query = format!(
            "SELECT {parent}::bigint AS parent, {key}::bigint AS key, {quantity} AS quantity
             FROM {table}
             WHERE {parent} IS NOT NULL AND {key} IS NOT NULL
             ORDER BY 1, 2",
            parent = relation.parent_column(),
            key = relation.key_column(),
            quantity = quantity,
            table = relation.table(),
        );
        let rows = conn
            .query(query.as_str(), &[])
            .await
            .with_context(|| format!("Failed to load {}", relation.table()))?;

        let mut grouped: HashMap<i64, Vec<ChildRow>> = HashMap::new();
        for row in rows {
            let parent: i64 = row.get("parent");
            grouped
                .entry(parent)
                .or_default()
                .push(ChildRow::new(row.get("key"), row.get("quantity")));
        }
        Ok(grouped)
    }
}

#[async_trait]
impl DedupStore for PgStore {
    async fn load_jobs(&self) -> Result<Vec<JobRecord>> {
        let mut shifts = self.load_keyed(KeyedRelation::Shift).await?;
        let mut special = self.load_keyed(KeyedRelation::JobSpecialShift).await?;

        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for jobs")?;
        let rows = conn
            .query(
                "SELECT id::bigint AS id, name::text AS name, branch_id::bigint AS branch_id,
                        closing_date::date AS closing_date,
                        performance_status::text AS performance_status
                 FROM jobs
                 ORDER BY id",
                &[],
            )
            .await
            .context("Failed to load jobs")?;

        let jobs: Vec<JobRecord> = rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("id");
                JobRecord {
                    id,
                    name: row.get("name"),
                    branch_id: row.get("branch_id"),
                    closing_date: row.get("closing_date"),
                    performance_status: row.get("performance_status"),
                    shifts: shifts.remove(&id).unwrap_or_default(),
                    special_shifts: special.remove(&id).unwrap_or_default(),
                }
            })
            .collect();
        debug!("Loaded {} jobs", jobs.len());
        Ok(jobs)
    }

    async fn load_branches(&self) -> Result<Vec<BranchRecord>> {
        let mut links = self.load_keyed(KeyedRelation::BranchSalesPersonLink).await?;

        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for branches")?;
        let rows = conn
            .query(
                "SELECT id::bigint AS id, name::text AS name, \"createdAt\"::timestamp AS created_at
                 FROM branches
                 ORDER BY id",
                &[],
            )
            .await
            .context("Failed to load branches")?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("id");
                BranchRecord {
                    id,
                    name: row.get("name"),
                    created_at: row.get("created_at"),
                    sales_person_links: links.remove(&id).unwrap_or_default(),
                }
            })
            .collect())
    }

    async fn load_sales_persons(&self) -> Result<Vec<SalesPersonRecord>> {
        let mut branches = self.load_keyed(KeyedRelation::SalesPersonBranchLink).await?;

        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for salespersons")?;
        let rows = conn
            .query(
                "SELECT sp.id::bigint AS id, sp.name::text AS name,
                        sp.telegram_id::text AS telegram_id,
                        COALESCE(sp.is_active, true) AS is_active,
                        (SELECT COUNT(*) FROM estimates e WHERE e.sales_person_id = sp.id) AS estimate_count
                 FROM sales_persons sp
                 ORDER BY sp.id",
                &[],
            )
            .await
            .context("Failed to load salespersons")?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: i64 = row.get("id");
                SalesPersonRecord {
                    id,
                    name: row.get("name"),
                    telegram_id: row.get("telegram_id"),
                    is_active: row.get("is_active"),
                    branches: branches.remove(&id).unwrap_or_default(),
                    estimate_count: row.get("estimate_count"),
                }
            })
            .collect())
    }

    async fn apply_plan(&self, plan: &MergePlan, audit_run_id: Option<&str>) -> Result<MergeOutcome> {
        let mut conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for merge")?;
        let tx = conn
            .transaction()
            .await
            .context("Failed to start merge transaction")?;

        let result = {
            let mut writer = PgMergeWriter { tx: &tx };
            execute_plan(&mut writer, plan, audit_run_id).await
        };

        match result {
            Ok(outcome) => {
                tx.commit()
                    .await
                    .context("Failed to commit merge transaction")?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        "Rollback of {} cluster {} failed: {}",
                        plan.kind, plan.canonical_id, rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn insert_sales_person(&self, name: &str, telegram_id: Option<&str>) -> Result<i64> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for salesperson insert")?;
        let row = conn
            .query_one(
                "INSERT INTO sales_persons (name, telegram_id, is_active)
                 VALUES ($1, $2, true)
                 RETURNING id::bigint AS id",
                &[&name, &telegram_id],
            )
            .await
            .context("Failed to insert salesperson")?;
        Ok(row.get("id"))
    }

    async fn add_sales_person_branch(&self, sales_person_id: i64, branch_id: i64) -> Result<()> {
        let conn = self
            .pool
            .get()
            .await
            .context("Failed to get DB connection for salesperson branch link")?;
        conn.execute(
            "INSERT INTO sales_person_branches (sales_person_id, branch_id)
             SELECT $1::bigint, $2::bigint
             WHERE NOT EXISTS (
                 SELECT 1 FROM sales_person_branches
                 WHERE sales_person_id = $1::bigint AND branch_id = $2::bigint
             )",
            &[&sales_person_id, &branch_id],
        )
        .await
        .context("Failed to link salesperson to branch")?;
        Ok(())
    }
}

/// Writes of one cluster merge, all inside the caller's transaction.
struct PgMergeWriter<'a> {
    tx: &'a Transaction<'a>,
}

#[async_trait]
impl<'a> MergeWriter for PgMergeWriter<'a> {
    async fn reassign_foreign_key(
        &mut self,
        relation: ForeignKeyRelation,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64> {
        let query = format!(
            "UPDATE {table} SET {col} = $1::bigint WHERE {col} = $2::bigint",
            table = relation.table(),
            col = relation.column(),
        );
        let moved = self.tx.execute(query.as_str(), &[&to_id, &from_id]).await?;
        Ok(moved)
    }

    async fn reparent_child(
        &mut self,
        relation: KeyedRelation,
        key: i64,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64> {
        let query = format!(
            "UPDATE {table} SET {parent} = $1::bigint WHERE {parent} = $2::bigint AND {key} = $3::bigint",
            table = relation.table(),
            parent = relation.parent_column(),
            key = relation.key_column(),
        );
        let moved = self
            .tx
            .execute(query.as_str(), &[&to_id, &from_id, &key])
            .await?;
        Ok(moved)
    }

    async fn fold_child(
        &mut self,
        relation: KeyedRelation,
        key: i64,
        from_id: i64,
        to_id: i64,
    ) -> Result<u64> {
        let table = relation.table();
        let parent = relation.parent_column();
        let key_col = relation.key_column();

        if let Some(qty) = relation.quantity_column() {
            let query = format!(
                "UPDATE {table} SET {qty} = COALESCE({qty}, 0) + COALESCE((
                     SELECT SUM(l.{qty}) FROM {table} l
                     WHERE l.{parent} = $2::bigint AND l.{key_col} = $3::bigint
                 ), 0)
                 WHERE {parent} = $1::bigint AND {key_col} = $3::bigint",
            );
            let updated = self
                .tx
                .execute(query.as_str(), &[&to_id, &from_id, &key])
                .await?;
            if updated == 0 {
                bail!(
                    "{} has no {}={} row for parent {} to fold into",
                    table,
                    key_col,
                    key,
                    to_id
                );
            }
        }

        let query = format!(
            "DELETE FROM {table} WHERE {parent} = $1::bigint AND {key_col} = $2::bigint"
        );
        let removed = self.tx.execute(query.as_str(), &[&from_id, &key]).await?;
        Ok(removed)
    }

    async fn count_children(&mut self, link: ChildLink, parent_id: i64) -> Result<i64> {
        let query = format!(
            "SELECT COUNT(*) AS remaining FROM {table} WHERE {col} = $1::bigint",
            table = link.table(),
            col = link.parent_column(),
        );
        let row = self.tx.query_one(query.as_str(), &[&parent_id]).await?;
        Ok(row.get("remaining"))
    }

    async fn delete_parent(&mut self, kind: EntityKind, id: i64) -> Result<u64> {
        let query = format!("DELETE FROM {} WHERE id = $1::bigint", kind.table());
        let deleted = self.tx.execute(query.as_str(), &[&id]).await?;
        Ok(deleted)
    }

    async fn record_audit(
        &mut self,
        run_id: &str,
        kind: EntityKind,
        eliminated_id: i64,
        surviving_id: i64,
    ) -> Result<()> {
        self.tx
            .execute(
                "INSERT INTO dedup_merge_audit (run_id, entity_kind, eliminated_id, surviving_id, merged_at)
                 VALUES ($1, $2, $3, $4, NOW())",
                &[&run_id, &kind.as_str(), &eliminated_id, &surviving_id],
            )
            .await?;
        Ok(())
    }
}
