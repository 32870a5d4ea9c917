use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::graph::CoGraph;
use crate::plate;
use crate::plate::{PLATE_ROWS, WELLS_PER_PLATE};

pub const DEFAULT_PERMUTATIONS: u32 = 500;
pub const DEFAULT_SIGNIFICANCE: f64 = 0.05;
pub const DEFAULT_PLATES: u32 = 6;

//An edge only qualifies for the permutation test when some plate row or
//column repeats more often than this among its shared wells
const CANDIDATE_REPEAT: u32 = 2;

#[derive(Debug, Clone)]
pub struct HopFlagParams {
    /// Monte Carlo trials per candidate edge
    pub permutations: u32,
    /// empirical p-value below which an edge is flagged
    pub significance: f64,
    /// plates in the addressable well space the trials draw from
    pub n_plates: u32,
    pub rng_seed: u64,
}

impl Default for HopFlagParams {
    fn default() -> Self {
        Self {
            permutations: DEFAULT_PERMUTATIONS,
            significance: DEFAULT_SIGNIFICANCE,
            n_plates: DEFAULT_PLATES,
            rng_seed: 1,
        }
    }
}

/// Permutation-test outcome for one candidate edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub seed1: String,
    pub seed2: String,
    #[serde(rename = "nWells")]
    pub n_wells: u32,
    #[serde(rename = "rowMax")]
    pub row_max: u32,
    #[serde(rename = "rowIdx")]
    pub row_token: String,
    #[serde(rename = "pRow")]
    pub p_row: f64,
    #[serde(rename = "colMax")]
    pub col_max: u32,
    #[serde(rename = "colIdx")]
    pub col_token: String,
    #[serde(rename = "pCol")]
    pub p_col: f64,
    #[serde(rename = "minP")]
    pub min_p: f64,
    pub flagged: bool,
}

///////////////////////////////
/// Row/column repeat maxima of a random well draw, without building
/// position tokens: rows and columns are counted per plate, which is all
/// the simulation needs
fn sim_row_col_max(wells: &[u32]) -> (u32, u32) {
    let mut rows: FxHashMap<u32, u32> = FxHashMap::default();
    let mut cols: FxHashMap<u32, u32> = FxHashMap::default();
    let mut row_max = 0;
    let mut col_max = 0;
    for &w in wells {
        let plate = w / WELLS_PER_PLATE;
        let q = w % WELLS_PER_PLATE;
        let r = rows.entry(plate * PLATE_ROWS + q % PLATE_ROWS).or_insert(0);
        *r += 1;
        row_max = row_max.max(*r);
        let c = cols.entry(plate * (WELLS_PER_PLATE / PLATE_ROWS) + q / PLATE_ROWS).or_insert(0);
        *c += 1;
        col_max = col_max.max(*c);
    }
    (row_max, col_max)
}

///////////////////////////////
/// Monte Carlo test for barcode-swap artifacts.
///
/// For each edge the wells shared by its endpoints are mapped to
/// plate-namespaced row/column positions. Repeats above CANDIDATE_REPEAT on
/// a single position make the edge a candidate; candidates are compared
/// against random draws of the same number of wells from the full well
/// space. Flagged edges get hop_flag set in place; the returned graph is a
/// copy with flagged edges removed, next to the per-candidate report.
///
/// No candidates or no flagged edges is a valid empty outcome
pub fn flag_swap_edges(
    g: &mut CoGraph,
    params: &HopFlagParams,
) -> Result<(CoGraph, Vec<FlagRecord>)> {
    let mut rng = SmallRng::seed_from_u64(params.rng_seed);
    let well_space = (params.n_plates * WELLS_PER_PLATE) as usize;
    let n_trials = params.permutations;

    //Fixed edge order keeps the random number stream reproducible
    let mut edges: Vec<(petgraph::stable_graph::EdgeIndex, String, String)> = g
        .graph
        .edge_indices()
        .map(|e| {
            let (s, t) = g.graph.edge_endpoints(e).unwrap();
            let (mut sid, mut tid) = (g.graph[s].id.clone(), g.graph[t].id.clone());
            if tid < sid {
                std::mem::swap(&mut sid, &mut tid);
            }
            (e, sid, tid)
        })
        .collect();
    edges.sort_by(|x, y| (&x.1, &x.2).cmp(&(&y.1, &y.2)));
    info!("{} edges found...", edges.len());

    let mut report = Vec::new();
    let mut flagged_edges = Vec::new();
    for (eidx, sid, tid) in edges {
        let (s, t) = g.graph.edge_endpoints(eidx).unwrap();
        let shared: Vec<u32> = g.graph[s].wells.intersection(&g.graph[t].wells).copied().collect();
        let Some(bias) = plate::row_col_max(&shared) else {
            continue;
        };
        if bias.row_max <= CANDIDATE_REPEAT && bias.col_max <= CANDIDATE_REPEAT {
            //spread-out wells need no simulation and are never flagged
            continue;
        }

        debug!(
            "edge ({},{}): {} shared wells, rowMax {}, colMax {}",
            sid,
            tid,
            shared.len(),
            bias.row_max,
            bias.col_max
        );

        //Count how often a random well draw repeats at least as strongly
        let n_draw = shared.len().min(well_space);
        let mut row_hits = 0u32;
        let mut col_hits = 0u32;
        for _ in 0..n_trials {
            let draw: Vec<u32> = rand::seq::index::sample(&mut rng, well_space, n_draw)
                .iter()
                .map(|w| w as u32)
                .collect();
            let (sim_row, sim_col) = sim_row_col_max(&draw);
            if sim_row >= bias.row_max {
                row_hits += 1;
            }
            if sim_col >= bias.col_max {
                col_hits += 1;
            }
        }

        let p_row = row_hits as f64 / n_trials as f64;
        let p_col = col_hits as f64 / n_trials as f64;
        let min_p = p_row.min(p_col);
        let flagged = min_p < params.significance;
        if flagged {
            g.graph[eidx].hop_flag = true;
            flagged_edges.push(eidx);
        }

        report.push(FlagRecord {
            seed1: sid,
            seed2: tid,
            n_wells: shared.len() as u32,
            row_max: bias.row_max,
            row_token: bias.row_token,
            p_row,
            col_max: bias.col_max,
            col_token: bias.col_token,
            p_col,
            min_p,
            flagged,
        });
    }

    info!("{} edges flagged...", flagged_edges.len());

    //Cleaned copy without the flagged edges
    let mut cleaned = g.clone();
    for eidx in flagged_edges {
        cleaned.graph.remove_edge(eidx);
    }
    Ok((cleaned, report))
}

pub fn write_flag_report(path: &Path, report: &[FlagRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("unable to write flag report {}", path.display()))?;
    for rec in report {
        writer.serialize(rec)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::graph::{EdgeAttr, SeedNode};
    use std::collections::BTreeSet;

    fn graph_with_shared_wells(wells: &[u32]) -> CoGraph {
        let mut g = CoGraph::new();
        let mk = |id: &str, wells: &[u32]| SeedNode {
            id: id.to_string(),
            seq: "ACGT".to_string(),
            cluster_size: 10,
            domain: String::new(),
            wells: wells.iter().copied().collect(),
            compressed: 0,
        };
        let a = g.add_node(mk("a", wells));
        let b = g.add_node(mk("b", wells));
        g.add_edge(a, b, EdgeAttr { weight: 5.0, hop_flag: false });
        g
    }

    #[test]
    fn row_clustered_edge_is_flagged() {
        //five shared wells on the same plate row: a hallmark of index bleed
        let mut g = graph_with_shared_wells(&[0, 16, 32, 48, 64]);
        let params = HopFlagParams::default();
        let (cleaned, report) = flag_swap_edges(&mut g, &params).unwrap();

        assert_eq!(report.len(), 1);
        let rec = &report[0];
        assert_eq!(rec.row_max, 5);
        assert_eq!(rec.row_token, "RA_P0");
        assert!(rec.flagged);
        assert!(rec.min_p < params.significance);

        //flag set in place, edge removed from the cleaned copy
        let e = g.graph.edge_indices().next().unwrap();
        assert!(g.graph[e].hop_flag);
        assert_eq!(cleaned.edge_count(), 0);
        assert_eq!(cleaned.node_count(), 2);
    }

    #[test]
    fn spread_out_edge_is_never_a_candidate() {
        //no row or column repeats more than twice
        let mut g = graph_with_shared_wells(&[0, 17, 34, 51, 68]);
        let (cleaned, report) = flag_swap_edges(&mut g, &HopFlagParams::default()).unwrap();
        assert!(report.is_empty());
        assert_eq!(cleaned.edge_count(), 1);
        let e = g.graph.edge_indices().next().unwrap();
        assert!(!g.graph[e].hop_flag);
    }

    #[test]
    fn deterministic_for_a_fixed_seed() {
        let params = HopFlagParams { permutations: 100, ..Default::default() };
        let mut g1 = graph_with_shared_wells(&[0, 16, 32, 1, 2]);
        let mut g2 = graph_with_shared_wells(&[0, 16, 32, 1, 2]);
        let (_, r1) = flag_swap_edges(&mut g1, &params).unwrap();
        let (_, r2) = flag_swap_edges(&mut g2, &params).unwrap();
        assert_eq!(r1, r2);
    }

    #[test]
    fn empty_graph_is_a_valid_empty_result() {
        let mut g = CoGraph::new();
        let (cleaned, report) = flag_swap_edges(&mut g, &HopFlagParams::default()).unwrap();
        assert!(report.is_empty());
        assert_eq!(cleaned.edge_count(), 0);
    }
}
