use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use rustc_hash::FxHashMap;

use super::graph::{CoGraph, EdgeAttr, SeedNode};

//Fixed attribute schema of a co-occurrence graph
const NODE_KEYS: [(&str, &str, &str); 5] = [
    ("d0", "well", "string"),
    ("d1", "seq", "string"),
    ("d2", "clusterSize", "long"),
    ("d3", "domain", "string"),
    ("d4", "compressed", "long"),
];
const EDGE_KEYS: [(&str, &str, &str); 2] = [
    ("d5", "weight", "double"),
    ("d6", "hopFlag", "long"),
];

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

fn join_wells(wells: &BTreeSet<u32>) -> String {
    wells.iter().map(|w| w.to_string()).collect::<Vec<_>>().join("_")
}

///////////////////////////////
/// Write the graph as GraphML. Nodes and edges are emitted in id order so
/// repeated runs produce byte-identical files
pub fn write_graphml(path: &Path, g: &CoGraph) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("unable to write graph file {}", path.display()))?;
    let mut w = BufWriter::new(file);

    writeln!(w, "<?xml version='1.0' encoding='utf-8'?>")?;
    writeln!(w, "<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">")?;
    for (id, name, ty) in NODE_KEYS {
        writeln!(w, "  <key id=\"{}\" for=\"node\" attr.name=\"{}\" attr.type=\"{}\"/>", id, name, ty)?;
    }
    for (id, name, ty) in EDGE_KEYS {
        writeln!(w, "  <key id=\"{}\" for=\"edge\" attr.name=\"{}\" attr.type=\"{}\"/>", id, name, ty)?;
    }
    writeln!(w, "  <graph edgedefault=\"undirected\">")?;

    for idx in g.sorted_nodes() {
        let node = &g.graph[idx];
        writeln!(w, "    <node id=\"{}\">", escape(&node.id))?;
        writeln!(w, "      <data key=\"d0\">{}</data>", join_wells(&node.wells))?;
        writeln!(w, "      <data key=\"d1\">{}</data>", escape(&node.seq))?;
        writeln!(w, "      <data key=\"d2\">{}</data>", node.cluster_size)?;
        writeln!(w, "      <data key=\"d3\">{}</data>", escape(&node.domain))?;
        writeln!(w, "      <data key=\"d4\">{}</data>", node.compressed)?;
        writeln!(w, "    </node>")?;
    }

    //Edges ordered by endpoint ids
    let mut edges: Vec<(String, String, &EdgeAttr)> = g
        .graph
        .edge_indices()
        .map(|e| {
            let (s, t) = g.graph.edge_endpoints(e).unwrap();
            let (mut sid, mut tid) = (g.graph[s].id.clone(), g.graph[t].id.clone());
            if tid < sid {
                std::mem::swap(&mut sid, &mut tid);
            }
            (sid, tid, &g.graph[e])
        })
        .collect();
    edges.sort_by(|x, y| (&x.0, &x.1).cmp(&(&y.0, &y.1)));

    for (sid, tid, attr) in edges {
        writeln!(w, "    <edge source=\"{}\" target=\"{}\">", escape(&sid), escape(&tid))?;
        writeln!(w, "      <data key=\"d5\">{}</data>", attr.weight)?;
        writeln!(w, "      <data key=\"d6\">{}</data>", attr.hop_flag as u8)?;
        writeln!(w, "    </edge>")?;
    }

    writeln!(w, "  </graph>")?;
    writeln!(w, "</graphml>")?;
    w.flush()?;
    Ok(())
}

/// Extract the value of one XML attribute from a start tag
fn tag_attr(line: &str, name: &str) -> Option<String> {
    let marker = format!("{}=\"", name);
    let start = line.find(&marker)? + marker.len();
    let end = line[start..].find('"')? + start;
    Some(unescape(&line[start..end]))
}

/// Content of a one-line <data> element
fn data_value(line: &str) -> Option<String> {
    let start = line.find('>')? + 1;
    let end = line.rfind("</data>")?;
    (start <= end).then(|| unescape(&line[start..end]))
}

fn parse_wells(joined: &str) -> Result<BTreeSet<u32>> {
    if joined.is_empty() {
        return Ok(BTreeSet::new());
    }
    joined
        .split('_')
        .map(|w| w.parse().context("bad well in graph file"))
        .collect()
}

///////////////////////////////
/// Read a GraphML file previously written by write_graphml
pub fn read_graphml(path: &Path) -> Result<CoGraph> {
    let file = File::open(path)
        .with_context(|| format!("unable to read graph file {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut key_names: FxHashMap<String, String> = FxHashMap::default();
    let mut g = CoGraph::new();

    let mut current_node: Option<SeedNode> = None;
    let mut current_edge: Option<(String, String, EdgeAttr)> = None;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();

        if line.starts_with("<key ") {
            let id = tag_attr(line, "id").ok_or_else(|| anyhow!("key element without id"))?;
            let name =
                tag_attr(line, "attr.name").ok_or_else(|| anyhow!("key element without name"))?;
            key_names.insert(id, name);
        } else if line.starts_with("<node ") {
            let id = tag_attr(line, "id").ok_or_else(|| anyhow!("node element without id"))?;
            current_node = Some(SeedNode {
                id,
                seq: String::new(),
                cluster_size: 0,
                domain: String::new(),
                wells: BTreeSet::new(),
                compressed: 0,
            });
        } else if line.starts_with("</node>") {
            let node = current_node.take().ok_or_else(|| anyhow!("stray </node>"))?;
            g.add_node(node);
        } else if line.starts_with("<edge ") {
            let source =
                tag_attr(line, "source").ok_or_else(|| anyhow!("edge element without source"))?;
            let target =
                tag_attr(line, "target").ok_or_else(|| anyhow!("edge element without target"))?;
            current_edge = Some((source, target, EdgeAttr { weight: 0.0, hop_flag: false }));
        } else if line.starts_with("</edge>") {
            let (source, target, attr) =
                current_edge.take().ok_or_else(|| anyhow!("stray </edge>"))?;
            let n1 = g
                .node_by_id(&source)
                .ok_or_else(|| anyhow!("edge references unknown node '{}'", source))?;
            let n2 = g
                .node_by_id(&target)
                .ok_or_else(|| anyhow!("edge references unknown node '{}'", target))?;
            g.add_edge(n1, n2, attr);
        } else if line.starts_with("<data ") {
            let key = tag_attr(line, "key").ok_or_else(|| anyhow!("data element without key"))?;
            let name = key_names
                .get(&key)
                .ok_or_else(|| anyhow!("data element with undeclared key '{}'", key))?;
            let value = data_value(line).ok_or_else(|| anyhow!("unreadable data element"))?;

            if let Some(node) = current_node.as_mut() {
                match name.as_str() {
                    "well" => node.wells = parse_wells(&value)?,
                    "seq" => node.seq = value,
                    "clusterSize" => node.cluster_size = value.parse()?,
                    "domain" => node.domain = value,
                    "compressed" => node.compressed = value.parse()?,
                    other => bail!("unknown node attribute '{}'", other),
                }
            } else if let Some((_, _, attr)) = current_edge.as_mut() {
                match name.as_str() {
                    "weight" => attr.weight = value.parse()?,
                    "hopFlag" => attr.hop_flag = value.parse::<u8>()? != 0,
                    other => bail!("unknown edge attribute '{}'", other),
                }
            } else {
                bail!("data element outside node or edge");
            }
        }
        //header, graph and closing tags need no handling
    }

    Ok(g)
}
