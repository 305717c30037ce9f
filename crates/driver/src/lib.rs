//! Driver surface of the full-text storage engine.
//!
//! The database host loads this as a file driver: [`FullTextFile`] for
//! inverted indexes, [`LobInterface`] for LOB columns. Both decode
//! their parameters from the [`options::OpenOptions`] bag the planner
//! stages through the `*_parameter` hooks.

#[cfg(test)]
mod tests;

mod fulltext;
mod lobfile;
mod locator;
pub mod options;

pub use fulltext::{FullTextFile, SearchCondition, virtual_field};
pub use lobfile::LobInterface;
pub use locator::Locator;
pub use options::{OpenMode, OpenOptions};
