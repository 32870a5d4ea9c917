use std::path::Path;

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use regex::Regex;

/// Record types of the clustering tool's uc output.
/// S = seed/centroid, H = hit assigned to a seed, C = per-cluster summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UcType {
    Seed,
    Hit,
    Cluster,
}

/// One row of a uc clustering table.
/// Columns: record-type, cluster id, length, identity, strand, two unused,
/// alignment, query id, hit id
#[derive(Debug, Clone)]
pub struct UcRecord {
    pub rtype: UcType,
    pub cluster: u32,
    pub length: u64,
    pub ident: String,
    pub strand: String,
    pub align: String,
    pub query: String,
    pub hit: String,
}

lazy_static! {
    static ref RE_SIZE: Regex = Regex::new(r"size=(\d+)").unwrap();
}

/// Drop one trailing ';' left behind by size annotations
pub fn trim_trailing_semicolon(id: &str) -> &str {
    id.strip_suffix(';').unwrap_or(id)
}

/// Extract the size= annotation of a sequence id
pub fn parse_size_annotation(id: &str) -> Option<u64> {
    RE_SIZE.captures(id)?.get(1)?.as_str().parse().ok()
}

///////////////////////////////
/// Read a uc clustering table, keeping S/H/C rows.
/// Seed rows carry '*' as hit id; these are normalized to self-hits so
/// every S/H row points at its cluster seed
pub fn read_uc(path: &Path) -> Result<Vec<UcRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("unable to read clustering table {}", path.display()))?;

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let rtype = match row.get(0) {
            Some("S") => UcType::Seed,
            Some("H") => UcType::Hit,
            Some("C") => UcType::Cluster,
            //other record types carry no cluster assignment
            _ => continue,
        };

        let field = |i: usize| row.get(i).unwrap_or("").to_string();
        let query = trim_trailing_semicolon(&field(8)).to_string();
        let mut hit = trim_trailing_semicolon(&field(9)).to_string();
        if hit == "*" || hit.is_empty() {
            hit = query.clone();
        }

        records.push(UcRecord {
            rtype,
            cluster: field(1)
                .parse()
                .map_err(|_| anyhow!("bad cluster id in {}", path.display()))?,
            length: field(2)
                .parse()
                .map_err(|_| anyhow!("bad length/size column in {}", path.display()))?,
            ident: field(3),
            strand: field(4),
            align: field(7),
            query,
            hit,
        });
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn id_annotations() {
        assert_eq!(trim_trailing_semicolon("w12;size=5;"), "w12;size=5");
        assert_eq!(trim_trailing_semicolon("w12"), "w12");
        assert_eq!(parse_size_annotation("w12;size=5"), Some(5));
        assert_eq!(parse_size_annotation("w12"), None);
    }

    #[test]
    fn parse_uc_rows() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "S\t0\t250\t*\t*\t*\t*\t*\tw1;size=10;\t*").unwrap();
        writeln!(f, "H\t0\t250\t98.5\t+\t0\t0\t250M\tw2;size=4;\tw1;size=10;").unwrap();
        writeln!(f, "C\t0\t14\t*\t*\t*\t*\t*\tw1;size=10;\t*").unwrap();
        f.flush().unwrap();

        let records = read_uc(f.path()).unwrap();
        assert_eq!(records.len(), 3);

        //seed row becomes a self-hit
        assert_eq!(records[0].rtype, UcType::Seed);
        assert_eq!(records[0].hit, "w1;size=10");

        assert_eq!(records[1].rtype, UcType::Hit);
        assert_eq!(records[1].query, "w2;size=4");
        assert_eq!(records[1].hit, "w1;size=10");

        //C row carries the cluster size in the length column
        assert_eq!(records[2].rtype, UcType::Cluster);
        assert_eq!(records[2].length, 14);
    }
}
