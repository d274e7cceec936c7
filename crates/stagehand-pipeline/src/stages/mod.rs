//! Built-in stage implementations.

mod bundle;
mod clean;
mod script;
mod style;
mod test;

pub use bundle::{BundleStage, BundleWatchStage};
pub use clean::CleanStage;
pub use script::{ScriptStage, ScriptTarget};
pub use style::StyleStage;
pub use test::{TestStage, TEST_FILE_PATTERN, TEST_REPORTER};
