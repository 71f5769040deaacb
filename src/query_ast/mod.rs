//! SQL query layer for API-backed tables.
//!
//! Pipeline: parse → extract conditions → translate (pushed vs residual) →
//! plan → paginated fetch → unify → local execution.

pub mod ast;
pub mod condition;
pub mod errors;
pub mod fetch;
pub mod handler;
pub mod local;
pub mod logical;
pub mod parser;
pub mod planner;
pub mod translate;
pub mod unify;

pub use condition::{Condition, ConditionSet, Operand, Operator, extract_conditions};
pub use errors::*;
pub use fetch::{Page, RemoteSource, fetch_all};
pub use handler::{ApiTable, HandlerRegistry, StatementOutcome, TableHandler, TablePipeline, execute_sql};
pub use logical::{OrderBy, ProjectedColumn, Projection, QuerySpec};
pub use planner::{Capabilities, ExecutionPlan, RemoteRequest, plan};
pub use translate::{
    FilterDialect, ParamDialect, ParamField, SimilaritySearch, TargetFilter, Translation, VectorExprDialect, translate,
};
pub use unify::Unifier;
