use crate::candidates::{merge_candidates, QualRow};
use crate::error::{classify_db_err, is_degradable};
use crate::hypothetical::evaluate_candidates;
use crate::sql;
use async_trait::async_trait;
use sea_orm::{
    AccessMode, ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, DbErr, QueryResult, Statement, TransactionTrait,
};
use sentinel_config::{redact_dsn, InstanceConfig};
use sentinel_core::{SnapshotSource, SourceError, SourceSnapshot};
use sentinel_types::{IndexCandidate, OptionalFeature, QueryKey, QueryStat};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 每个周期最多用 hypopg 评估的候选数
const DEFAULT_HYPOPG_LIMIT: usize = 20;

/// PoWA 仓库快照源
///
/// 统计数据来自 PoWA 仓库（`dsn`），谓词统计与假设索引在目标库（`target_dsn`，
/// 未配置时即仓库本身）上读取。所有会话都以只读事务打开。
pub struct PowaSource {
    connections: Mutex<HashMap<String, DatabaseConnection>>,
    hypopg_limit: usize,
}

impl PowaSource {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            hypopg_limit: DEFAULT_HYPOPG_LIMIT,
        }
    }

    pub fn with_hypopg_limit(mut self, limit: usize) -> Self {
        self.hypopg_limit = limit;
        self
    }

    /// 关闭所有连接池
    pub async fn close(&self) {
        let connections: Vec<_> = self.connections.lock().await.drain().collect();
        for (dsn, conn) in connections {
            if let Err(e) = conn.close().await {
                warn!(dsn = %redact_dsn(&dsn), "Failed to close connection pool: {}", e);
            }
        }
    }

    async fn connection(
        &self,
        dsn: &str,
        instance: &InstanceConfig,
    ) -> Result<DatabaseConnection, SourceError> {
        let mut connections = self.connections.lock().await;
        if let Some(conn) = connections.get(dsn) {
            return Ok(conn.clone());
        }

        let mut options = ConnectOptions::new(dsn.to_owned());
        options
            .max_connections(instance.max_connections)
            .min_connections(0)
            .connect_timeout(Duration::from_secs(instance.fetch_timeout_secs))
            .acquire_timeout(Duration::from_secs(instance.fetch_timeout_secs))
            .sqlx_logging(false);

        let conn = Database::connect(options)
            .await
            .map_err(|e| classify_db_err(&e))?;
        info!(
            instance = %instance.id,
            dsn = %redact_dsn(dsn),
            "Connected to PostgreSQL"
        );
        connections.insert(dsn.to_owned(), conn.clone());
        Ok(conn)
    }

    /// 开启只读事务并限定语句超时
    async fn read_only(
        conn: &DatabaseConnection,
        instance: &InstanceConfig,
    ) -> Result<DatabaseTransaction, SourceError> {
        let txn = conn
            .begin_with_config(None, Some(AccessMode::ReadOnly))
            .await
            .map_err(|e| classify_db_err(&e))?;
        let timeout_ms = instance.fetch_timeout_secs.saturating_mul(1000);
        txn.execute_unprepared(&format!("SET LOCAL statement_timeout = {}", timeout_ms))
            .await
            .map_err(|e| classify_db_err(&e))?;
        Ok(txn)
    }

    async fn flag(txn: &DatabaseTransaction, query: &str) -> Result<bool, SourceError> {
        let row = txn
            .query_one(Statement::from_string(DatabaseBackend::Postgres, query))
            .await
            .map_err(|e| classify_db_err(&e))?;
        match row {
            Some(row) => row
                .try_get::<bool>("", "present")
                .map_err(|e| classify_db_err(&e)),
            None => Ok(false),
        }
    }

    async fn fetch_statements(
        txn: &DatabaseTransaction,
        srvid: i32,
    ) -> Result<BTreeMap<QueryKey, QueryStat>, SourceError> {
        let rows = txn
            .query_all(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                sql::LATEST_STATEMENTS,
                vec![srvid.into()],
            ))
            .await
            .map_err(|e| classify_db_err(&e))?;

        let mut stats = BTreeMap::new();
        for row in rows {
            let (key, stat) = statement_row(&row).map_err(|e| classify_db_err(&e))?;
            stats.insert(key, stat);
        }
        Ok(stats)
    }

    async fn fetch_kcache(
        txn: &DatabaseTransaction,
        srvid: i32,
    ) -> Result<HashMap<QueryKey, f64>, SourceError> {
        let rows = txn
            .query_all(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                sql::LATEST_KCACHE,
                vec![srvid.into()],
            ))
            .await
            .map_err(|e| classify_db_err(&e))?;

        let mut cpu = HashMap::with_capacity(rows.len());
        for row in rows {
            let key = query_key(&row).map_err(|e| classify_db_err(&e))?;
            let value: Option<f64> = row
                .try_get("", "cpu_time_ms")
                .map_err(|e| classify_db_err(&e))?;
            if let Some(value) = value {
                cpu.insert(key, value);
            }
        }
        Ok(cpu)
    }

    /// 从 PoWA 仓库读取语句统计与 kcache
    async fn fetch_repository(
        &self,
        instance: &InstanceConfig,
        snapshot: SourceSnapshot,
    ) -> Result<SourceSnapshot, SourceError> {
        let conn = self.connection(&instance.dsn, instance).await?;
        let txn = Self::read_only(&conn, instance).await?;

        if !Self::flag(&txn, sql::POWA_SCHEMA_PRESENT).await? {
            return Err(SourceError::SchemaMismatch(
                "PoWA schema not found (powa_statements_history_current)".to_string(),
            ));
        }

        let stats = Self::fetch_statements(&txn, instance.srvid).await?;

        let kcache = match Self::flag(&txn, sql::POWA_KCACHE_PRESENT).await {
            Ok(true) => match Self::fetch_kcache(&txn, instance.srvid).await {
                Ok(cpu) => Ok(cpu),
                Err(e) if is_degradable(&e) => Err(e.to_string()),
                Err(e) => return Err(e),
            },
            Ok(false) => Err("pg_stat_kcache is not registered in PoWA".to_string()),
            Err(e) if is_degradable(&e) => Err(e.to_string()),
            Err(e) => return Err(e),
        };

        // 只读事务，结束即可
        let _ = txn.rollback().await;

        let mut snapshot = snapshot;
        match kcache {
            Ok(cpu) => {
                for (key, stat) in stats {
                    let stat = match cpu.get(&key) {
                        Some(cpu_ms) => {
                            let io_ms = stat.io_time_ms.unwrap_or(0.0);
                            stat.with_kcache(*cpu_ms, io_ms)
                        }
                        None => stat,
                    };
                    snapshot = snapshot.with_stat(key, stat);
                }
            }
            Err(reason) => {
                for (key, stat) in stats {
                    snapshot = snapshot.with_stat(key, stat);
                }
                snapshot = snapshot.degrade(OptionalFeature::Kcache, reason);
            }
        }
        Ok(snapshot)
    }

    /// 从目标库读取谓词统计，并在可用时用 hypopg 评估
    ///
    /// 目标库的任何失败都只降级 qualstats / hypopg，不影响本周期其余检测。
    async fn fetch_target(&self, instance: &InstanceConfig, snapshot: SourceSnapshot) -> SourceSnapshot {
        let dsn = instance.target_dsn.as_deref().unwrap_or(&instance.dsn);
        let conn = match self.connection(dsn, instance).await {
            Ok(conn) => conn,
            Err(e) => {
                return snapshot
                    .degrade(OptionalFeature::Qualstats, format!("target unreachable: {}", e))
                    .degrade(OptionalFeature::Hypopg, "target unreachable");
            }
        };
        let txn = match Self::read_only(&conn, instance).await {
            Ok(txn) => txn,
            Err(e) => {
                return snapshot
                    .degrade(OptionalFeature::Qualstats, e.to_string())
                    .degrade(OptionalFeature::Hypopg, "target unreachable");
            }
        };

        let result = self.read_candidates(&txn).await;
        let _ = txn.rollback().await;

        match result {
            Ok((candidates, hypopg)) => {
                let snapshot = snapshot.with_index_candidates(candidates);
                match hypopg {
                    Ok(()) => snapshot,
                    Err(reason) => snapshot.degrade(OptionalFeature::Hypopg, reason),
                }
            }
            Err(reason) => snapshot
                .degrade(OptionalFeature::Qualstats, reason)
                .degrade(OptionalFeature::Hypopg, "no qualifier statistics"),
        }
    }

    async fn read_candidates(
        &self,
        txn: &DatabaseTransaction,
    ) -> Result<(Vec<IndexCandidate>, Result<(), String>), String> {
        let extensions = txn
            .query_all(Statement::from_string(
                DatabaseBackend::Postgres,
                sql::TARGET_EXTENSIONS,
            ))
            .await
            .map_err(|e| classify_db_err(&e).to_string())?;
        let installed: Vec<String> = extensions
            .iter()
            .filter_map(|row| row.try_get::<String>("", "extname").ok())
            .collect();

        if !installed.iter().any(|e| e == "pg_qualstats") {
            return Err("pg_qualstats is not installed on target".to_string());
        }

        let rows = txn
            .query_all(Statement::from_string(
                DatabaseBackend::Postgres,
                sql::QUAL_CANDIDATES,
            ))
            .await
            .map_err(|e| classify_db_err(&e).to_string())?;
        let mut quals = Vec::with_capacity(rows.len());
        for row in rows {
            quals.push(qual_row(&row).map_err(|e| classify_db_err(&e).to_string())?);
        }
        let mut candidates = merge_candidates(quals);

        if !installed.iter().any(|e| e == "hypopg") {
            return Ok((candidates, Err("hypopg is not installed on target".to_string())));
        }

        evaluate_candidates(txn, &mut candidates, self.hypopg_limit).await;
        let _ = txn.execute_unprepared(sql::HYPOPG_RESET).await;
        Ok((candidates, Ok(())))
    }
}

impl Default for PowaSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotSource for PowaSource {
    async fn fetch(&self, instance: &InstanceConfig) -> Result<SourceSnapshot, SourceError> {
        let snapshot = self.fetch_repository(instance, SourceSnapshot::new()).await?;
        let snapshot = self.fetch_target(instance, snapshot).await;
        debug!(
            instance = %instance.id,
            statements = snapshot.stats.len(),
            candidates = snapshot.index_candidates.as_ref().map(|c| c.len()).unwrap_or(0),
            "PoWA snapshot fetched"
        );
        Ok(snapshot)
    }

    fn name(&self) -> &str {
        "powa"
    }
}

fn query_key(row: &QueryResult) -> Result<QueryKey, DbErr> {
    let dbid: i64 = row.try_get("", "dbid")?;
    let userid: i64 = row.try_get("", "userid")?;
    let queryid: i64 = row.try_get("", "queryid")?;
    Ok(QueryKey::from_parts(dbid, userid, queryid))
}

fn statement_row(row: &QueryResult) -> Result<(QueryKey, QueryStat), DbErr> {
    let key = query_key(row)?;
    let calls: Option<i64> = row.try_get("", "calls")?;
    let total_time: Option<f64> = row.try_get("", "total_time")?;
    let rows: Option<i64> = row.try_get("", "rows")?;
    let io_time: Option<f64> = row.try_get("", "io_time")?;

    let mut stat = QueryStat::new(calls.unwrap_or(0).max(0) as u64, total_time.unwrap_or(0.0))
        .with_rows(rows.unwrap_or(0).max(0) as u64);
    stat.io_time_ms = io_time;
    stat.database = row.try_get("", "datname")?;
    stat.query = row.try_get("", "query")?;
    Ok((key, stat))
}

fn qual_row(row: &QueryResult) -> Result<QualRow, DbErr> {
    let dbid: i64 = row.try_get("", "dbid")?;
    let userid: i64 = row.try_get("", "userid")?;
    let query_ids: Vec<i64> = row.try_get("", "query_ids")?;
    Ok(QualRow {
        table: row.try_get("", "table_name")?,
        columns: row.try_get("", "columns")?,
        execution_count: row.try_get::<Option<i64>>("", "execution_count")?.unwrap_or(0),
        rows_filtered: row.try_get::<Option<i64>>("", "rows_filtered")?.unwrap_or(0),
        query_ids: query_ids
            .into_iter()
            .map(|queryid| QueryKey::from_parts(dbid, userid, queryid))
            .collect(),
        has_index: row.try_get("", "has_index")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_repository_is_unavailable() {
        let source = PowaSource::new();
        let mut instance = InstanceConfig::new("pg-main", "postgres://sentinel@127.0.0.1:1/powa");
        instance.fetch_timeout_secs = 1;

        let err = source.fetch(&instance).await.unwrap_err();
        assert!(matches!(err, SourceError::Unavailable(_)));
        assert_eq!(source.name(), "powa");
    }
}
