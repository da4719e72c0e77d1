//! PoWA 仓库与目标库上执行的查询，全部只读

/// PoWA 核心表是否存在
pub const POWA_SCHEMA_PRESENT: &str = r#"
SELECT to_regclass('powa_statements_history_current') IS NOT NULL AS present
"#;

/// PoWA 中已注册的可选模块
pub const POWA_KCACHE_PRESENT: &str = r#"
SELECT to_regclass('powa_kcache_metrics_current') IS NOT NULL AS present
"#;

/// 每个 (dbid, userid, queryid) 最近一次的累计计数
///
/// 最新记录可能还在 `_current` 表，也可能已被聚合进历史表（取区间最大值）。
pub const LATEST_STATEMENTS: &str = r#"
WITH latest AS (
    SELECT h.dbid, h.userid, h.queryid,
           (h.record).ts AS ts,
           (h.record).calls AS calls,
           (h.record).total_exec_time AS total_time,
           (h.record).rows AS rows,
           (h.record).blk_read_time + (h.record).blk_write_time AS io_time
      FROM powa_statements_history_current h
     WHERE h.srvid = $1
    UNION ALL
    SELECT h.dbid, h.userid, h.queryid,
           (h.maxs_in_range).ts,
           (h.maxs_in_range).calls,
           (h.maxs_in_range).total_exec_time,
           (h.maxs_in_range).rows,
           (h.maxs_in_range).blk_read_time + (h.maxs_in_range).blk_write_time
      FROM powa_statements_history h
     WHERE h.srvid = $1
       AND upper(h.coalesce_range) > now() - interval '1 day'
)
SELECT DISTINCT ON (l.dbid, l.userid, l.queryid)
       l.dbid::bigint AS dbid,
       l.userid::bigint AS userid,
       l.queryid AS queryid,
       l.calls::bigint AS calls,
       l.total_time::double precision AS total_time,
       l.rows::bigint AS rows,
       l.io_time::double precision AS io_time,
       d.datname::text AS datname,
       s.query AS query
  FROM latest l
  LEFT JOIN powa_databases d
         ON d.srvid = $1 AND d.oid = l.dbid
  LEFT JOIN powa_statements s
         ON s.srvid = $1 AND s.dbid = l.dbid AND s.userid = l.userid AND s.queryid = l.queryid
 ORDER BY l.dbid, l.userid, l.queryid, l.ts DESC
"#;

/// pg_stat_kcache 的最近一次 CPU 时间（秒转毫秒）
pub const LATEST_KCACHE: &str = r#"
SELECT DISTINCT ON (k.dbid, k.userid, k.queryid)
       k.dbid::bigint AS dbid,
       k.userid::bigint AS userid,
       k.queryid AS queryid,
       (((k.metrics).user_time + (k.metrics).system_time) * 1000.0)::double precision AS cpu_time_ms
  FROM powa_kcache_metrics_current k
 WHERE k.srvid = $1
 ORDER BY k.dbid, k.userid, k.queryid, (k.metrics).ts DESC
"#;

/// 目标库已安装的扩展
pub const TARGET_EXTENSIONS: &str = r#"
SELECT extname::text AS extname
  FROM pg_extension
 WHERE extname IN ('pg_qualstats', 'hypopg')
"#;

/// 按 qualid 聚合的过滤谓词，及首列是否已有索引
pub const QUAL_CANDIDATES: &str = r#"
WITH quals AS (
    SELECT q.lrelid AS relid,
           q.lrelid::regclass::text AS table_name,
           array_agg(DISTINCT quote_ident(a.attname::text)) AS columns,
           array_agg(DISTINCT q.lattnum) AS attnums,
           max(q.execution_count)::bigint AS execution_count,
           sum(q.nbfiltered)::bigint AS rows_filtered,
           array_agg(DISTINCT q.queryid) AS query_ids,
           q.dbid::bigint AS dbid,
           q.userid::bigint AS userid
      FROM pg_qualstats() q
      JOIN pg_attribute a ON a.attrelid = q.lrelid AND a.attnum = q.lattnum
     WHERE q.lrelid IS NOT NULL
       AND q.eval_type = 'f'
       AND q.dbid = (SELECT oid FROM pg_database WHERE datname = current_database())
     GROUP BY q.qualid, q.lrelid, q.dbid, q.userid
)
SELECT quals.table_name,
       quals.columns,
       quals.execution_count,
       quals.rows_filtered,
       quals.query_ids,
       quals.dbid,
       quals.userid,
       EXISTS (
           SELECT 1 FROM pg_index i
            WHERE i.indrelid = quals.relid
              AND i.indkey[0] = ANY (quals.attnums)
       ) AS has_index
  FROM quals
"#;

/// 带常量的示例查询，用于 EXPLAIN
pub const EXAMPLE_QUERY: &str = r#"
SELECT pg_qualstats_example_query($1) AS query
"#;

pub const HYPOPG_CREATE: &str = r#"
SELECT indexrelid FROM hypopg_create_index($1)
"#;

pub const HYPOPG_RESET: &str = "SELECT hypopg_reset()";
