pub mod command;
pub mod network;
pub mod plate;
pub mod table;
pub mod utils;

pub use network::CoGraph;
pub use network::SigMethod;
pub use table::ClusterRow;
