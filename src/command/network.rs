use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use itertools::Itertools;
use log::info;

use crate::network::{compress, graph, graphml, hopflag, occurrence};
use crate::network::{CoGraph, CompressParams, HopFlagParams, SigMethod};
use crate::table::{clustering, ClusterRow};
use crate::utils;

pub const DEFAULT_ALPHA: f64 = 1e-6;
pub const DEFAULT_MERGE_SIMILAR_ID: f64 = 0.9;

/// Build, flag and compress the domain co-occurrence network
#[derive(Args)]
pub struct NetworkCMD {
    /// One or more filtered domain clustering tables
    #[arg(short = 'l', long = "tables", num_args = 1.., required = true,
          value_parser = clap::value_parser!(PathBuf))]
    pub tables: Vec<PathBuf>,

    /// Results output directory
    #[arg(short = 'o', long = "outpath", value_parser = clap::value_parser!(PathBuf))]
    pub outpath: PathBuf,

    /// Only analyze domain pairs with at least this many co-occurrences
    #[arg(short = 'm', long = "min-shared-occurrences",
          default_value_t = occurrence::DEFAULT_MIN_PAIR_COUNT)]
    pub min_shared_occurrences: u32,

    /// Maximal (adjusted) p-value for an edge
    #[arg(short = 'a', long = "alpha", default_value_t = DEFAULT_ALPHA)]
    pub alpha: f64,

    /// Significance mode gating edge inclusion
    #[arg(long = "method", value_enum, default_value = "fdr_bh")]
    pub method: SigMethod,

    /// Identity threshold for merging similar domains within networks
    /// (0 skips compression)
    #[arg(long = "merge-similar-id", default_value_t = DEFAULT_MERGE_SIMILAR_ID)]
    pub merge_similar_id: f64,

    /// Minimum sub-network size worth compressing
    #[arg(long = "min-net-size", default_value_t = compress::DEFAULT_MIN_NET_SIZE)]
    pub min_net_size: usize,

    /// Run the Monte Carlo analysis flagging edges affected by index swapping
    #[arg(long = "flag-edges")]
    pub flag_edges: bool,

    /// Monte Carlo trials per candidate edge
    #[arg(long = "permutations", default_value_t = hopflag::DEFAULT_PERMUTATIONS)]
    pub permutations: u32,

    /// Empirical p-value below which an edge is flagged
    #[arg(long = "flag-significance", default_value_t = hopflag::DEFAULT_SIGNIFICANCE)]
    pub flag_significance: f64,

    /// Plates in the well space the Monte Carlo trials draw from
    #[arg(long = "plates", default_value_t = hopflag::DEFAULT_PLATES)]
    pub plates: u32,

    /// Random seed for the Monte Carlo trials
    #[arg(long = "seed", default_value_t = 1)]
    pub seed: u64,

    /// Declared total number of wells; defaults to the distinct wells observed
    #[arg(long = "total-wells")]
    pub total_wells: Option<usize>,

    /// Number of threads used by the external clustering tool
    #[arg(long = "threads", default_value_t = 1)]
    pub threads: u32,

    /// Ignore and re-write existing output files
    #[arg(long = "override")]
    pub override_files: bool,
}

impl NetworkCMD {
    pub fn try_execute(&mut self) -> Result<()> {
        fs::create_dir_all(&self.outpath)
            .with_context(|| format!("unable to create {}", self.outpath.display()))?;

        //Concatenate the per-domain tables into one multi-domain table
        info!("Concatenating domain tables...");
        let mut merged: Vec<ClusterRow> = Vec::new();
        for table in &self.tables {
            let rows = clustering::read_clustering_table(table)
                .with_context(|| format!("unable to load clustering table -> {}", table.display()))?;
            merged.extend(rows);
        }

        let domains: Vec<String> = merged
            .iter()
            .filter_map(|r| r.domain.clone())
            .unique()
            .sorted()
            .collect();
        if domains.is_empty() {
            bail!("no domain annotations found in the input tables");
        }
        let tag = domains.join("#");

        let merged_path = self.outpath.join(format!("CLUSTERING-DATAFRAME_{}.csv", tag));
        clustering::write_clustering_table(&merged_path, &merged)?;

        //Pairwise co-occurrence statistics, reused from disk when present
        let occurrence_path = self.outpath.join(format!("OCCURRENCES-DATAFRAME_{}.csv", tag));
        let occurrences = if occurrence_path.is_file() && !self.override_files {
            info!("File exists --> {}", occurrence_path.display());
            occurrence::read_occurrence_table(&occurrence_path)?
        } else {
            info!("Calculating domain co-occurrences...");
            let records = occurrence::calc_occurrences(
                &merged,
                self.min_shared_occurrences,
                self.total_wells,
            )?;
            occurrence::write_occurrence_table(&occurrence_path, &records)?;
            records
        };

        //Significant pairs become the weighted co-occurrence graph
        let network_path = self.outpath.join(format!("NETWORKS#{}_{}.graphml", tag, self.alpha));
        let mut g = if network_path.is_file() && !self.override_files {
            info!("File exists --> {}", network_path.display());
            graphml::read_graphml(&network_path)?
        } else {
            info!("Building domain clustering graph...");
            let g = graph::build_graph(&occurrences, &merged, self.alpha, self.method)?;
            graphml::write_graphml(&network_path, &g)?;
            g
        };

        //Monte Carlo flagging of edges shaped like barcode swaps
        let flagged_path = self
            .outpath
            .join(format!("NETWORKS#{}_{}_EDGE_FLAG.graphml", tag, self.alpha));
        let report_path = self.outpath.join(format!("EDGE-FLAG-DATAFRAME#{}.csv", tag));
        let cleaned = if !self.flag_edges {
            g.clone()
        } else if flagged_path.is_file() && report_path.is_file() && !self.override_files {
            info!("File exists --> {}", flagged_path.display());
            g = graphml::read_graphml(&flagged_path)?;
            strip_flagged_edges(&g)
        } else {
            info!("Flagging edges potentially affected by index swapping...");
            let params = HopFlagParams {
                permutations: self.permutations,
                significance: self.flag_significance,
                n_plates: self.plates,
                rng_seed: self.seed,
            };
            let (cleaned, report) = hopflag::flag_swap_edges(&mut g, &params)?;
            graphml::write_graphml(&flagged_path, &g)?;
            hopflag::write_flag_report(&report_path, &report)?;
            cleaned
        };

        //Contract near-duplicate nodes within each sub-network
        if self.merge_similar_id > 0.0 {
            let compressed_path = self
                .outpath
                .join(format!("NETWORKS#{}_{}_COMPRESSED.graphml", tag, self.alpha));
            let contraction_path =
                self.outpath.join(format!("MERGED-NODES-DATAFRAME#{}.csv", tag));
            if compressed_path.is_file() && contraction_path.is_file() && !self.override_files {
                info!("File exists --> {}", compressed_path.display());
            } else {
                info!("Merging similar domains within networks...");
                utils::check_vsearch()?;
                let mut compressed = cleaned;
                let params = CompressParams {
                    cluster_id: self.merge_similar_id,
                    min_net_size: self.min_net_size,
                    threads: self.threads,
                };
                let contraction_log = compress::merge_similar_nodes(&mut compressed, &params)?;
                graphml::write_graphml(&compressed_path, &compressed)?;
                compress::write_contraction_log(&contraction_path, &contraction_log)?;
            }
        }

        info!("Done!");
        Ok(())
    }
}

/// Copy of a flag-annotated graph without its flagged edges
fn strip_flagged_edges(g: &CoGraph) -> CoGraph {
    let mut cleaned = g.clone();
    let flagged: Vec<_> = cleaned
        .graph
        .edge_indices()
        .filter(|&e| cleaned.graph[e].hop_flag)
        .collect();
    for e in flagged {
        cleaned.graph.remove_edge(e);
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::RowType;

    fn row(rtype: RowType, seed: &str, well: u32) -> ClusterRow {
        ClusterRow {
            rtype,
            seed: seed.to_string(),
            query: format!("q_w{};size=5", well),
            hit: seed.to_string(),
            well,
            read_size: 5,
            cluster_size: 10,
            cluster_wells: 0,
            domain: (rtype == RowType::S).then(|| "NRPS".to_string()),
            seq: (rtype == RowType::S).then(|| "ACGTACGT".to_string()),
        }
    }

    fn sample_rows() -> Vec<ClusterRow> {
        let mut rows = Vec::new();
        //A and B share wells 0..4 of 12; C drifts alone
        for w in 0..5 {
            rows.push(row(if w == 0 { RowType::S } else { RowType::H }, "A", w));
            rows.push(row(if w == 0 { RowType::S } else { RowType::H }, "B", w));
        }
        for w in 5..12 {
            rows.push(row(if w == 5 { RowType::S } else { RowType::H }, "C", w));
        }
        rows
    }

    fn command(table: PathBuf, outpath: PathBuf) -> NetworkCMD {
        NetworkCMD {
            tables: vec![table],
            outpath,
            min_shared_occurrences: 2,
            alpha: 0.05,
            method: SigMethod::Pvalue,
            merge_similar_id: 0.0,
            min_net_size: 3,
            flag_edges: false,
            permutations: 50,
            flag_significance: 0.05,
            plates: 6,
            seed: 1,
            total_wells: None,
            threads: 1,
            override_files: false,
        }
    }

    #[test]
    fn cached_outputs_are_reused_and_overridable() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = dir.path().join("NRPS_OTU.csv");
        clustering::write_clustering_table(&table_path, &sample_rows()).unwrap();
        let out = dir.path().join("results");

        let mut cmd = command(table_path, out.clone());
        cmd.try_execute().unwrap();

        let occ_path = out.join("OCCURRENCES-DATAFRAME_NRPS.csv");
        let net_path = out.join("NETWORKS#NRPS_0.05.graphml");
        assert!(occ_path.is_file());
        let first = fs::read(&net_path).unwrap();

        //unchanged outputs are reused byte for byte
        cmd.try_execute().unwrap();
        assert_eq!(fs::read(&net_path).unwrap(), first);

        //the occurrence table is reused from disk, not recomputed: emptied
        //of rows it yields an empty graph once the graph file is gone
        let header = fs::read_to_string(&occ_path)
            .unwrap()
            .lines()
            .next()
            .unwrap()
            .to_string();
        fs::write(&occ_path, format!("{}\n", header)).unwrap();
        fs::remove_file(&net_path).unwrap();
        cmd.try_execute().unwrap();
        assert_eq!(graphml::read_graphml(&net_path).unwrap().edge_count(), 0);

        //--override recomputes the chain from the input tables
        cmd.override_files = true;
        cmd.try_execute().unwrap();
        assert_eq!(fs::read(&net_path).unwrap(), first);
        assert_eq!(graphml::read_graphml(&net_path).unwrap().edge_count(), 1);
    }

    #[test]
    fn missing_flag_report_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = dir.path().join("NRPS_OTU.csv");
        clustering::write_clustering_table(&table_path, &sample_rows()).unwrap();
        let out = dir.path().join("results");

        let mut cmd = command(table_path, out.clone());
        //the five shared wells sit on one plate column, so the edge is a
        //flagging candidate and the report is non-trivial
        cmd.flag_edges = true;
        cmd.try_execute().unwrap();

        let flagged_path = out.join("NETWORKS#NRPS_0.05_EDGE_FLAG.graphml");
        let report_path = out.join("EDGE-FLAG-DATAFRAME#NRPS.csv");
        assert!(flagged_path.is_file());
        assert!(report_path.is_file());

        //a lost report next to a kept flagged graph is rebuilt on re-run
        fs::remove_file(&report_path).unwrap();
        cmd.try_execute().unwrap();
        assert!(report_path.is_file());
    }
}
