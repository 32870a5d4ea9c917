use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use super::graph::CoGraph;
use crate::table::uc::{read_uc, UcRecord, UcType};
use crate::utils;

pub const DEFAULT_MIN_NET_SIZE: usize = 3;

#[derive(Debug, Clone)]
pub struct CompressParams {
    /// identity threshold for the external clustering pass
    pub cluster_id: f64,
    /// components smaller than this are left alone
    pub min_net_size: usize,
    /// thread count handed to the external tool
    pub threads: u32,
}

impl Default for CompressParams {
    fn default() -> Self {
        Self {
            cluster_id: 0.9,
            min_net_size: DEFAULT_MIN_NET_SIZE,
            threads: 1,
        }
    }
}

/// One node-merge event: absorbed was contracted into seed, bringing the
/// listed wells with it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractionRecord {
    pub seed: String,
    pub absorbed: String,
    pub wells: String,
}

///////////////////////////////
/// Collapse near-duplicate nodes within each connected component.
///
/// Component sequences are clustered by the external tool at the given
/// identity threshold; every non-seed member of a cluster is contracted
/// into its seed node. A failing component is logged and left uncompressed;
/// the remaining components are still processed. Returns the contraction
/// log, kept separate from node state
pub fn merge_similar_nodes(
    g: &mut CoGraph,
    params: &CompressParams,
) -> Result<Vec<ContractionRecord>> {
    let components = g.components();
    info!("{} sub-networks found...", components.len());

    let mut log = Vec::new();
    for (i, component) in components.iter().enumerate() {
        if component.len() < params.min_net_size {
            continue;
        }

        //Nodes ordered by descending cluster size; the clustering tool
        //prefers earlier sequences as seeds
        let mut members: Vec<(String, String, u64)> = component
            .iter()
            .map(|&idx| {
                let node = &g.graph[idx];
                (node.id.clone(), node.seq.clone(), node.cluster_size)
            })
            .collect();
        members.sort_by(|x, y| y.2.cmp(&x.2).then_with(|| x.0.cmp(&y.0)));

        match compress_component(g, &members, params, &mut log) {
            Ok(n) => debug!("Compressed {} nodes in sub-network {}...", n, i),
            Err(e) => error!("Sub-network {} left uncompressed: {:#}", i, e),
        }
    }

    info!("{} nodes merged...", log.len());
    Ok(log)
}

///////////////////////////////
/// Run one component through the external clustering pass and contract the
/// resulting clusters. The scratch directory is exclusive to this call
/// (random name, 0700) and removed on every path
/// Scratch directory readable by the owning user only
fn scratch_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .permissions(Permissions::from_mode(0o700))
        .tempdir()
        .context("unable to create scratch directory")
}

fn compress_component(
    g: &mut CoGraph,
    members: &[(String, String, u64)],
    params: &CompressParams,
    log: &mut Vec<ContractionRecord>,
) -> Result<usize> {
    let tmpdir = scratch_dir()?;
    let input_file = tmpdir.path().join("network_nodes.fna");
    let centroids_file = tmpdir.path().join("network_nodes_OTU.fna");
    let table_file = tmpdir.path().join("network_nodes_OTU.txt");

    utils::write_fasta(
        &input_file,
        members.iter().map(|(id, seq, _)| (id.as_str(), seq.as_str())),
    )?;

    let result = cluster_and_contract(g, &input_file, &centroids_file, &table_file, params, log);

    //Scratch removal failures are logged, never fatal
    if let Err(e) = tmpdir.close() {
        warn!("Unable to remove temp files: {}", e);
    }
    result
}

fn cluster_and_contract(
    g: &mut CoGraph,
    input_file: &Path,
    centroids_file: &Path,
    table_file: &Path,
    params: &CompressParams,
    log: &mut Vec<ContractionRecord>,
) -> Result<usize> {
    let mut cmd = Command::new("vsearch");
    cmd.arg("--threads")
        .arg(params.threads.to_string())
        .arg("--cluster_fast")
        .arg(input_file)
        .arg("--id")
        .arg(params.cluster_id.to_string())
        .arg("--centroids")
        .arg(centroids_file)
        .arg("--uc")
        .arg(table_file)
        .arg("-sizein")
        .arg("-minsize")
        .arg("1");
    utils::run_tool(&mut cmd)?;

    debug!("Parsing clustering information from {}", table_file.display());
    let records = read_uc(table_file)?;
    apply_uc_clusters(g, &records, log)
}

///////////////////////////////
/// Contract every non-seed cluster member into its seed node, logging each
/// absorption. Order within a cluster does not affect the final well set
pub fn apply_uc_clusters(
    g: &mut CoGraph,
    records: &[UcRecord],
    log: &mut Vec<ContractionRecord>,
) -> Result<usize> {
    let mut counter = 0;
    for rec in records {
        if rec.rtype == UcType::Cluster || rec.query == rec.hit {
            continue;
        }
        debug!("Compressing node {} into node {}", rec.query, rec.hit);

        let seed = g
            .node_by_id(&rec.hit)
            .ok_or_else(|| anyhow!("cluster seed '{}' is not a graph node", rec.hit))?;
        let absorbed = g
            .node_by_id(&rec.query)
            .ok_or_else(|| anyhow!("cluster member '{}' is not a graph node", rec.query))?;

        let removed = g.contract(seed, absorbed);
        log.push(ContractionRecord {
            seed: rec.hit.clone(),
            absorbed: removed.id,
            wells: removed.wells.iter().map(|w| w.to_string()).join("_"),
        });
        counter += 1;
    }
    Ok(counter)
}

pub fn write_contraction_log(path: &Path, log: &[ContractionRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("unable to write contraction log {}", path.display()))?;
    for rec in log {
        writer.serialize(rec)?;
    }
    writer.flush()?;
    Ok(())
}
