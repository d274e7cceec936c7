//! Execution environment and external toolchain adapters for Stagehand stages.
//!
//! Provides the `ExecutionEnvironment` trait, its `LocalExecutionEnvironment`
//! implementation, and the `toolchain` of stylesheet, script, bundler and test
//! tools the build stages delegate to.

pub mod environment;
pub mod local_env;
pub mod toolchain;

pub use environment::{DirEntry, ExecResult, ExecutionEnvironment};
pub use local_env::LocalExecutionEnvironment;
pub use toolchain::{ToolCommands, Toolchain};
