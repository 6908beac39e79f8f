mod builder;
mod flat;

pub use builder::{BuildReport, IndexBuilder};
pub use flat::{FlatIndex, IndexEntry, IndexMeta, META_FILE, VECTORS_FILE};
