pub mod cluster;
pub mod filter;
pub mod network;

pub use cluster::ClusterCMD;
pub use filter::FilterCMD;
pub use network::NetworkCMD;
