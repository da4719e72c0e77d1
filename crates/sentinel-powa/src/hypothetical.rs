use crate::candidates::{estimated_benefit, is_explainable, plan_total_cost};
use crate::sql;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseTransaction, DbErr, Statement};
use sentinel_types::{IndexCandidate, QueryKey};
use tracing::debug;

/// 每个候选最多尝试的示例查询数
const EXAMPLE_QUERY_ATTEMPTS: usize = 3;

const SAVEPOINT: &str = "SAVEPOINT sentinel_hypo";
const ROLLBACK_TO_SAVEPOINT: &str = "ROLLBACK TO SAVEPOINT sentinel_hypo";
const RELEASE_SAVEPOINT: &str = "RELEASE SAVEPOINT sentinel_hypo";

/// 假设索引评估用到的目标库操作
#[async_trait]
pub trait HypoSession: Send + Sync {
    async fn execute_sql(&self, sql: &str) -> Result<(), DbErr>;

    /// `pg_qualstats_example_query`
    async fn example_query(&self, queryid: i64) -> Result<Option<String>, DbErr>;

    /// `EXPLAIN (FORMAT JSON)` 的总代价
    async fn plan_cost(&self, query: &str) -> Result<Option<f64>, DbErr>;

    async fn create_index(&self, ddl: &str) -> Result<(), DbErr>;
}

#[async_trait]
impl HypoSession for DatabaseTransaction {
    async fn execute_sql(&self, sql: &str) -> Result<(), DbErr> {
        self.execute_unprepared(sql).await.map(|_| ())
    }

    async fn example_query(&self, queryid: i64) -> Result<Option<String>, DbErr> {
        let row = self
            .query_one(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                sql::EXAMPLE_QUERY,
                vec![queryid.into()],
            ))
            .await?;
        match row {
            Some(row) => row.try_get::<Option<String>>("", "query"),
            None => Ok(None),
        }
    }

    async fn plan_cost(&self, query: &str) -> Result<Option<f64>, DbErr> {
        let row = self
            .query_one(Statement::from_string(
                DatabaseBackend::Postgres,
                format!("EXPLAIN (FORMAT JSON) {}", query),
            ))
            .await?;
        match row {
            Some(row) => {
                let plan: serde_json::Value = row.try_get("", "QUERY PLAN")?;
                Ok(plan_total_cost(&plan))
            }
            None => Ok(None),
        }
    }

    async fn create_index(&self, ddl: &str) -> Result<(), DbErr> {
        self.query_one(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            sql::HYPOPG_CREATE,
            vec![ddl.into()],
        ))
        .await
        .map(|_| ())
    }
}

/// `dbid:userid:queryid` 中的 queryid
fn queryid_of(key: &QueryKey) -> Option<i64> {
    key.as_str().rsplit(':').next()?.parse().ok()
}

/// 对过滤行数最多的若干候选估算假设索引收益
///
/// 单个候选失败只回滚到保存点，不影响同一事务中的其它候选。
pub async fn evaluate_candidates<S: HypoSession + ?Sized>(
    session: &S,
    candidates: &mut [IndexCandidate],
    limit: usize,
) {
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| !candidates[i].has_index)
        .collect();
    order.sort_by(|&a, &b| candidates[b].rows_filtered.cmp(&candidates[a].rows_filtered));
    order.truncate(limit);

    for index in order {
        let candidate = &mut candidates[index];
        match evaluate_candidate(session, candidate).await {
            Ok(benefit) => candidate.estimated_benefit = benefit,
            Err(e) => {
                debug!(table = %candidate.table, "Hypothetical index evaluation failed: {}", e);
            }
        }
    }
}

/// 在保存点内查找示例查询，比较建假设索引前后的计划代价
pub async fn evaluate_candidate<S: HypoSession + ?Sized>(
    session: &S,
    candidate: &IndexCandidate,
) -> Result<Option<f64>, DbErr> {
    session.execute_sql(SAVEPOINT).await?;

    match compare_plans(session, candidate).await {
        Ok(benefit) => {
            session.execute_sql(sql::HYPOPG_RESET).await?;
            session.execute_sql(RELEASE_SAVEPOINT).await?;
            Ok(benefit)
        }
        Err(e) => {
            let _ = session.execute_sql(ROLLBACK_TO_SAVEPOINT).await;
            let _ = session.execute_sql(sql::HYPOPG_RESET).await;
            let _ = session.execute_sql(RELEASE_SAVEPOINT).await;
            Err(e)
        }
    }
}

async fn compare_plans<S: HypoSession + ?Sized>(
    session: &S,
    candidate: &IndexCandidate,
) -> Result<Option<f64>, DbErr> {
    let Some(example) = example_query(session, candidate).await? else {
        debug!(table = %candidate.table, "No explainable example query for candidate");
        return Ok(None);
    };

    let before = session.plan_cost(&example).await?;
    session.create_index(&candidate.ddl()).await?;
    let after = session.plan_cost(&example).await?;

    Ok(match (before, after) {
        (Some(before), Some(after)) => estimated_benefit(before, after),
        _ => None,
    })
}

async fn example_query<S: HypoSession + ?Sized>(
    session: &S,
    candidate: &IndexCandidate,
) -> Result<Option<String>, DbErr> {
    for key in candidate.query_ids.iter().take(EXAMPLE_QUERY_ATTEMPTS) {
        let Some(queryid) = queryid_of(key) else {
            continue;
        };
        if let Some(query) = session.example_query(queryid).await? {
            if is_explainable(&query) {
                return Ok(Some(query));
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 模拟目标库事务：任一语句失败后事务进入中止状态，直到回滚到保存点
    #[derive(Default)]
    struct FakeSession {
        log: Mutex<Vec<String>>,
        aborted: Mutex<bool>,
        failing_queryids: Vec<i64>,
    }

    impl FakeSession {
        fn failing(queryids: &[i64]) -> Self {
            Self {
                failing_queryids: queryids.to_vec(),
                ..Self::default()
            }
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        fn step(&self, entry: String) -> Result<(), DbErr> {
            self.log.lock().unwrap().push(entry);
            if *self.aborted.lock().unwrap() {
                return Err(DbErr::Custom("current transaction is aborted".into()));
            }
            Ok(())
        }

        fn fail(&self) -> DbErr {
            *self.aborted.lock().unwrap() = true;
            DbErr::Custom("function pg_qualstats_example_query failed".into())
        }
    }

    #[async_trait]
    impl HypoSession for FakeSession {
        async fn execute_sql(&self, sql: &str) -> Result<(), DbErr> {
            if sql == ROLLBACK_TO_SAVEPOINT {
                *self.aborted.lock().unwrap() = false;
            }
            self.step(sql.to_string())
        }

        async fn example_query(&self, queryid: i64) -> Result<Option<String>, DbErr> {
            self.step(format!("example {}", queryid))?;
            if self.failing_queryids.contains(&queryid) {
                return Err(self.fail());
            }
            Ok(Some(format!("SELECT * FROM orders WHERE id = {}", queryid)))
        }

        async fn plan_cost(&self, _query: &str) -> Result<Option<f64>, DbErr> {
            let hypothetical = self.log().iter().any(|l| l.starts_with("create"));
            self.step("explain".to_string())?;
            Ok(Some(if hypothetical { 25.0 } else { 100.0 }))
        }

        async fn create_index(&self, ddl: &str) -> Result<(), DbErr> {
            self.step(format!("create {}", ddl))
        }
    }

    fn candidate(table: &str, queryid: i64, rows_filtered: u64) -> IndexCandidate {
        let mut candidate = IndexCandidate::new(table, vec!["customer_id".to_string()]);
        candidate.rows_filtered = rows_filtered;
        candidate.query_ids = vec![QueryKey::from_parts(16384, 10, queryid)];
        candidate
    }

    #[test]
    fn test_queryid_of() {
        assert_eq!(queryid_of(&QueryKey::from_parts(16384, 10, -42)), Some(-42));
        assert_eq!(queryid_of(&QueryKey::new("garbage")), None);
    }

    #[tokio::test]
    async fn test_benefit_from_plan_costs() {
        let session = FakeSession::default();
        let benefit = evaluate_candidate(&session, &candidate("public.orders", 7, 100))
            .await
            .unwrap();

        assert_eq!(benefit, Some(0.75));
        let log = session.log();
        assert_eq!(log.first().map(String::as_str), Some(SAVEPOINT));
        assert_eq!(log[1], "example 7");
        assert_eq!(log.last().map(String::as_str), Some(RELEASE_SAVEPOINT));
    }

    #[tokio::test]
    async fn test_example_lookup_failure_rolls_back_to_savepoint() {
        let session = FakeSession::failing(&[1]);
        let mut candidates = vec![
            candidate("public.orders", 1, 900),
            candidate("public.customers", 2, 500),
        ];

        evaluate_candidates(&session, &mut candidates, 10).await;

        assert_eq!(candidates[0].estimated_benefit, None);
        assert_eq!(candidates[1].estimated_benefit, Some(0.75));

        let log = session.log();
        assert_eq!(&log[..3], &[SAVEPOINT, "example 1", ROLLBACK_TO_SAVEPOINT]);
        assert!(log.iter().filter(|l| l.as_str() == SAVEPOINT).count() == 2);
    }

    #[tokio::test]
    async fn test_indexed_and_over_limit_candidates_skipped() {
        let session = FakeSession::default();
        let mut indexed = candidate("public.orders", 1, 900);
        indexed.has_index = true;
        let mut candidates = vec![
            indexed,
            candidate("public.customers", 2, 10),
            candidate("public.items", 3, 500),
        ];

        evaluate_candidates(&session, &mut candidates, 1).await;

        assert_eq!(candidates[0].estimated_benefit, None);
        assert_eq!(candidates[1].estimated_benefit, None);
        assert_eq!(candidates[2].estimated_benefit, Some(0.75));
    }
}
