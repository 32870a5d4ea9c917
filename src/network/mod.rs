pub mod compress;
pub mod graph;
pub mod graphml;
pub mod hopflag;
pub mod occurrence;
pub mod stats;

pub use compress::CompressParams;
pub use compress::ContractionRecord;
pub use graph::CoGraph;
pub use graph::EdgeAttr;
pub use graph::SeedNode;
pub use graph::SigMethod;
pub use hopflag::FlagRecord;
pub use hopflag::HopFlagParams;
pub use occurrence::OccurrenceRecord;
