pub mod clustering;
pub mod uc;

pub use clustering::ClusterRow;
pub use clustering::RowType;
pub use uc::UcRecord;
pub use uc::UcType;
