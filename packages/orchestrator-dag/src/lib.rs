//! Build DAG: the dependency graph of learning-build stages
//! and the dispatch rule that turns stage statuses into run/cascade/halt
//! decisions. An open, string-keyed stage set declared once in
//! `learning_build_dag()`.

pub mod dag;
pub mod dispatch;
pub mod stage_names;

pub use dag::{learning_build_dag, BuildDag, StageNode};
pub use dispatch::{evaluate, StageStatus, Verdict};
