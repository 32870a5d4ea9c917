use std::collections::BTreeSet;

use anyhow::{bail, Result};
use log::info;
use petgraph::stable_graph::{NodeIndex, StableUnGraph};
use petgraph::visit::EdgeRef;
use rustc_hash::FxHashMap;

use super::occurrence::OccurrenceRecord;
use super::stats::fdr_bh;
use crate::table::{ClusterRow, RowType};

/// How occurrence p-values gate edge inclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SigMethod {
    /// raw p-value cutoff
    #[value(name = "pvalue")]
    Pvalue,
    /// Benjamini-Hochberg FDR control
    #[value(name = "fdr_bh")]
    FdrBh,
}

/// A graph node: one cluster seed with its attributes
#[derive(Debug, Clone, PartialEq)]
pub struct SeedNode {
    pub id: String,
    pub seq: String,
    pub cluster_size: u64,
    pub domain: String,
    /// wells this seed was observed in; grows as nodes are contracted in
    pub wells: BTreeSet<u32>,
    /// number of nodes merged into this one
    pub compressed: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgeAttr {
    /// -log10 of the (corrected) p-value
    pub weight: f64,
    pub hop_flag: bool,
}

/// Undirected co-occurrence graph over cluster seeds
#[derive(Clone, Default)]
pub struct CoGraph {
    pub graph: StableUnGraph<SeedNode, EdgeAttr>,
    index: FxHashMap<String, NodeIndex>,
}

impl CoGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn add_node(&mut self, node: SeedNode) -> NodeIndex {
        let id = node.id.clone();
        let idx = self.graph.add_node(node);
        self.index.insert(id, idx);
        idx
    }

    pub fn node_by_id(&self, id: &str) -> Option<NodeIndex> {
        self.index.get(id).copied()
    }

    pub fn add_edge(&mut self, n1: NodeIndex, n2: NodeIndex, attr: EdgeAttr) {
        self.graph.add_edge(n1, n2, attr);
    }

    /// Node indices in id order; iteration over the graph stays deterministic
    pub fn sorted_nodes(&self) -> Vec<NodeIndex> {
        let mut nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        nodes.sort_by(|&x, &y| self.graph[x].id.cmp(&self.graph[y].id));
        nodes
    }

    ///////////////////////////////
    /// Connected components, largest first; within a component nodes are in
    /// id order
    pub fn components(&self) -> Vec<Vec<NodeIndex>> {
        let mut seen: FxHashMap<NodeIndex, bool> = FxHashMap::default();
        let mut components = Vec::new();
        for start in self.sorted_nodes() {
            if seen.contains_key(&start) {
                continue;
            }
            let mut member = vec![start];
            seen.insert(start, true);
            let mut queue = vec![start];
            while let Some(n) = queue.pop() {
                for nb in self.graph.neighbors(n) {
                    if seen.insert(nb, true).is_none() {
                        member.push(nb);
                        queue.push(nb);
                    }
                }
            }
            member.sort_by(|&x, &y| self.graph[x].id.cmp(&self.graph[y].id));
            components.push(member);
        }
        components.sort_by(|x, y| y.len().cmp(&x.len()));
        components
    }

    ///////////////////////////////
    /// Contract one node into a surviving seed node: the seed keeps its own
    /// identity and attributes, takes the union of the well sets, counts the
    /// absorption, and inherits the absorbed node's edges (existing edges
    /// win on duplicates, no self-loops)
    pub fn contract(&mut self, seed: NodeIndex, absorbed: NodeIndex) -> SeedNode {
        let removed_wells: Vec<u32> = self.graph[absorbed].wells.iter().copied().collect();
        self.graph[seed].wells.extend(removed_wells);
        self.graph[seed].compressed += 1;

        let inherited: Vec<(NodeIndex, EdgeAttr)> = self
            .graph
            .edges(absorbed)
            .map(|e| {
                let other = if e.source() == absorbed { e.target() } else { e.source() };
                (other, e.weight().clone())
            })
            .collect();
        for (other, attr) in inherited {
            if other != seed && self.graph.find_edge(seed, other).is_none() {
                self.graph.add_edge(seed, other, attr);
            }
        }

        let removed = self.graph.remove_node(absorbed).unwrap();
        self.index.remove(&removed.id);
        removed
    }
}

///////////////////////////////
/// Build the co-occurrence graph: one edge per significant pair, weighted
/// by -log10 of the selected p-value, node attributes sourced from the
/// filtered clustering table
pub fn build_graph(
    occurrences: &[OccurrenceRecord],
    table: &[ClusterRow],
    alpha: f64,
    method: SigMethod,
) -> Result<CoGraph> {
    //Select edges and the p-value that weights them
    let mut edges: Vec<(&OccurrenceRecord, f64)> = Vec::new();
    match method {
        SigMethod::Pvalue => {
            for rec in occurrences {
                if rec.pvalue < alpha {
                    edges.push((rec, rec.pvalue));
                }
            }
        }
        SigMethod::FdrBh => {
            let pvals: Vec<f64> = occurrences.iter().map(|r| r.pvalue).collect();
            for (rec, corr) in occurrences.iter().zip(fdr_bh(&pvals, alpha)) {
                if corr.reject {
                    edges.push((rec, corr.p_adjusted));
                }
            }
        }
    }

    //Node attributes come from the table: well sets for all rows of a seed,
    //sequence/size/domain from its centroid row. Well sets are only built
    //for seeds that actually form edges
    let mut wells_per_seed: FxHashMap<&str, BTreeSet<u32>> = FxHashMap::default();
    let mut seed_info: FxHashMap<&str, &ClusterRow> = FxHashMap::default();
    for row in table {
        wells_per_seed.entry(&row.seed).or_default().insert(row.well);
        if row.rtype == RowType::S {
            seed_info.insert(&row.seed, row);
        }
    }

    let mut g = CoGraph::new();
    let mut node_of = |g: &mut CoGraph, id: &str| -> Result<NodeIndex> {
        if let Some(idx) = g.node_by_id(id) {
            return Ok(idx);
        }
        let Some(info) = seed_info.get(id) else {
            bail!("seed '{}' forms an edge but has no centroid row in the table", id);
        };
        let Some(wells) = wells_per_seed.get(id) else {
            bail!("seed '{}' forms an edge but has no well data", id);
        };
        Ok(g.add_node(SeedNode {
            id: id.to_string(),
            seq: info.seq.clone().unwrap_or_default(),
            cluster_size: info.cluster_size,
            domain: info.domain.clone().unwrap_or_default(),
            wells: wells.clone(),
            compressed: 0,
        }))
    };

    for (rec, p) in edges {
        let n1 = node_of(&mut g, &rec.seed1)?;
        let n2 = node_of(&mut g, &rec.seed2)?;
        g.add_edge(
            n1,
            n2,
            EdgeAttr {
                weight: -p.log10(),
                hop_flag: false,
            },
        );
    }

    info!("Constructing network --> {:?} {}", method, alpha);
    info!("{} nodes and {} edges found...", g.node_count(), g.edge_count());
    Ok(g)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::occurrence::calc_occurrences;

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

    fn small_table() -> Vec<ClusterRow> {
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

    #[test]
    fn significant_pair_forms_an_annotated_edge() {
        let table = small_table();
        let occ = calc_occurrences(&table, 2, None).unwrap();
        let g = build_graph(&occ, &table, 0.05, SigMethod::Pvalue).unwrap();

        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);

        let a = g.node_by_id("A").unwrap();
        let node = &g.graph[a];
        assert_eq!(node.domain, "NRPS");
        assert_eq!(node.seq, "ACGTACGT");
        assert_eq!(node.compressed, 0);
        assert_eq!(node.wells.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

        let e = g.graph.find_edge(a, g.node_by_id("B").unwrap()).unwrap();
        assert!(g.graph[e].weight > 0.0);
        assert!(!g.graph[e].hop_flag);
    }

    #[test]
    fn corrected_mode_never_reports_more_edges_than_raw() {
        let table = small_table();
        let occ = calc_occurrences(&table, 2, None).unwrap();
        let raw = build_graph(&occ, &table, 0.05, SigMethod::Pvalue).unwrap();
        let bh = build_graph(&occ, &table, 0.05, SigMethod::FdrBh).unwrap();
        assert!(bh.edge_count() <= raw.edge_count());
    }

    #[test]
    fn contraction_merges_wells_and_counts() {
        let table = small_table();
        let occ = calc_occurrences(&table, 2, None).unwrap();
        let mut g = build_graph(&occ, &table, 0.05, SigMethod::Pvalue).unwrap();

        let a = g.node_by_id("A").unwrap();
        let b = g.node_by_id("B").unwrap();
        g.graph[b].wells.insert(99);
        let removed = g.contract(a, b);

        assert_eq!(removed.id, "B");
        assert_eq!(g.node_count(), 1);
        assert!(g.node_by_id("B").is_none());
        let node = &g.graph[a];
        assert_eq!(node.compressed, 1);
        assert!(node.wells.contains(&99));
    }

    #[test]
    fn components_are_size_sorted() {
        let mut g = CoGraph::new();
        let mk = |id: &str| SeedNode {
            id: id.to_string(),
            seq: String::new(),
            cluster_size: 1,
            domain: String::new(),
            wells: BTreeSet::new(),
            compressed: 0,
        };
        let a = g.add_node(mk("a"));
        let b = g.add_node(mk("b"));
        let c = g.add_node(mk("c"));
        let _lone = g.add_node(mk("lone"));
        g.add_edge(a, b, EdgeAttr { weight: 1.0, hop_flag: false });
        g.add_edge(b, c, EdgeAttr { weight: 1.0, hop_flag: false });

        let comps = g.components();
        assert_eq!(comps.len(), 2);
        assert_eq!(comps[0].len(), 3);
        assert_eq!(comps[1].len(), 1);
    }
}
