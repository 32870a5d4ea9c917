use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use log::info;

use crate::table::clustering;
use crate::table::uc::read_uc;
use crate::utils;

pub const DEFAULT_MIN_READ_SIZE: u64 = 3;
pub const DEFAULT_RELATIVE_SIZE_THRESHOLD: f64 = 0.05;

/// Parse and filter a domain clustering table
#[derive(Args)]
pub struct FilterCMD {
    /// Directory containing the domain clustering table
    #[arg(short = 'i', long = "inpath", value_parser = clap::value_parser!(PathBuf))]
    pub inpath: PathBuf,

    /// Sample name for input/output files
    #[arg(short = 's', long = "sample-name")]
    pub sample_name: String,

    /// Only consider amplicons with at least this many reads
    #[arg(long = "min-read-size", default_value_t = DEFAULT_MIN_READ_SIZE)]
    pub min_read_size: u64,

    /// Drop cluster members below this fraction of the largest read size in
    /// their cluster
    #[arg(long = "relative-size-threshold", default_value_t = DEFAULT_RELATIVE_SIZE_THRESHOLD)]
    pub relative_size_threshold: f64,

    /// Only consider amplicons detected in at least this many subpools
    #[arg(long = "min-subpools")]
    pub min_subpools: u32,
}

impl FilterCMD {
    pub fn try_execute(&mut self) -> Result<()> {
        let table_path = self.inpath.join(format!("{}_OTU.txt", self.sample_name));
        let centroids_path = self.inpath.join(format!("{}_OTU.fna", self.sample_name));
        let parsed_path = self.inpath.join(format!("{}_OTU.csv", self.sample_name));

        if !table_path.is_file() {
            bail!("Unable to load domain clustering table -> {}", table_path.display());
        }
        if !centroids_path.is_file() {
            bail!("Unable to load domain centroid sequences -> {}", centroids_path.display());
        }

        info!("Parsing clustering information...");
        let records = read_uc(&table_path)?;
        let centroid_seqs = utils::read_fasta_map(&centroids_path)?;

        info!("Populating table features...");
        let mut rows = clustering::build_cluster_rows(&records, &centroid_seqs, &self.sample_name)?;
        clustering::log_table_size(&rows);

        rows = clustering::filter_min_read_size(rows, self.min_read_size);
        clustering::log_table_size(&rows);

        //subpool counts are recomputed over the surviving rows
        clustering::annotate_cluster_wells(&mut rows);
        rows = clustering::filter_min_subpools(rows, self.min_subpools);
        clustering::log_table_size(&rows);

        rows = clustering::filter_relative_size(rows, self.relative_size_threshold);
        clustering::log_table_size(&rows);

        rows = clustering::dedup_cross_plate(rows);
        clustering::log_table_size(&rows);

        //clusters that lost their seed row along the way are dropped whole
        rows = clustering::drop_orphan_clusters(rows);
        clustering::log_table_size(&rows);

        clustering::write_clustering_table(&parsed_path, &rows)?;
        info!(
            "Parsed and filtered domain clustering table saved -> {}...",
            parsed_path.display()
        );
        Ok(())
    }
}
