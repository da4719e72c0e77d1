//! PoWA 快照源
//!
//! 通过 sea-orm（sqlx-postgres）只读访问 PoWA 仓库与目标库。

pub mod candidates;
pub mod error;
pub mod hypothetical;
pub mod source;
pub mod sql;

pub use candidates::{merge_candidates, QualRow};
pub use error::{classify_db_err, classify_sqlstate};
pub use hypothetical::{evaluate_candidate, evaluate_candidates, HypoSession};
pub use source::PowaSource;
