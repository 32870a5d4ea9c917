use std::path::Path;

use anyhow::{anyhow, Context, Result};
use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::uc::{parse_size_annotation, UcRecord, UcType};
use crate::plate;

/// Row kind in a filtered clustering table: cluster seed or cluster member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowType {
    S,
    H,
}

/// One amplicon observation after parsing: a cluster member seen in one well
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRow {
    #[serde(rename = "type")]
    pub rtype: RowType,
    pub seed: String,
    pub query: String,
    pub hit: String,
    pub well: u32,
    #[serde(rename = "readSize")]
    pub read_size: u64,
    #[serde(rename = "clusterSize")]
    pub cluster_size: u64,
    #[serde(rename = "clusterWells")]
    pub cluster_wells: u32,
    pub domain: Option<String>,
    pub seq: Option<String>,
}

lazy_static! {
    static ref RE_WELL: Regex = Regex::new(r"w(\d+)").unwrap();
    static ref RE_WELL_FIXED: Regex = Regex::new(r"\d{5}").unwrap();
}

/// Extract the well index encoded in a read id, either as a wNNN tag or as
/// a fixed five-digit field
pub fn parse_well(id: &str) -> Result<u32> {
    if let Some(cap) = RE_WELL.captures(id) {
        return Ok(cap[1].parse()?);
    }
    if let Some(m) = RE_WELL_FIXED.find(id) {
        return Ok(m.as_str().parse()?);
    }
    Err(anyhow!("no well index in read id '{}'", id))
}

pub fn read_clustering_table(path: &Path) -> Result<Vec<ClusterRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("unable to load clustering table {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row?);
    }
    Ok(rows)
}

pub fn write_clustering_table(path: &Path, rows: &[ClusterRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("unable to write clustering table {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn count_clusters(rows: &[ClusterRow]) -> usize {
    rows.iter().map(|r| r.seed.as_str()).collect::<FxHashSet<_>>().len()
}

pub fn log_table_size(rows: &[ClusterRow]) {
    info!("{} clusters found ({} rows)...", count_clusters(rows), rows.len());
}

///////////////////////////////
/// Turn raw uc records into clustering-table rows: canonical seed ids with
/// cluster sizes, wells and read sizes from the read ids, centroid
/// sequences and the domain attached to seed rows.
/// Cluster members observed in the same well are merged into one row with
/// their read sizes summed
pub fn build_cluster_rows(
    records: &[UcRecord],
    centroid_seqs: &FxHashMap<String, String>,
    domain: &str,
) -> Result<Vec<ClusterRow>> {
    //Cluster sizes live in the C summary rows
    let mut cluster_sizes: FxHashMap<&str, u64> = FxHashMap::default();
    for rec in records.iter().filter(|r| r.rtype == UcType::Cluster) {
        cluster_sizes.insert(&rec.query, rec.length);
    }

    let mut rows = Vec::new();
    for rec in records {
        let rtype = match rec.rtype {
            UcType::Seed => RowType::S,
            UcType::Hit => RowType::H,
            UcType::Cluster => continue,
        };

        let cluster_size = *cluster_sizes
            .get(rec.hit.as_str())
            .ok_or_else(|| anyhow!("no cluster summary row for seed '{}'", rec.hit))?;

        //Canonical seed id: centroid id base with the cluster size annotation
        let base = rec.hit.split(';').next().unwrap_or(&rec.hit);
        let seed = format!("{};size={}", base, cluster_size);

        let seq = if rtype == RowType::S {
            Some(centroid_seqs.get(&rec.hit).cloned().ok_or_else(|| {
                anyhow!("centroid sequence missing for seed '{}'", rec.hit)
            })?)
        } else {
            None
        };

        rows.push(ClusterRow {
            rtype,
            seed,
            query: rec.query.clone(),
            hit: rec.hit.clone(),
            well: parse_well(&rec.query)?,
            read_size: parse_size_annotation(&rec.query)
                .ok_or_else(|| anyhow!("no size annotation in read id '{}'", rec.query))?,
            cluster_size,
            cluster_wells: 0,
            domain: (rtype == RowType::S).then(|| domain.to_string()),
            seq,
        });
    }

    //Merge cluster members present in the same well; first row wins,
    //read sizes are summed
    let mut merged: Vec<ClusterRow> = Vec::new();
    let mut index: FxHashMap<(String, u32), usize> = FxHashMap::default();
    for row in rows {
        let key = (row.seed.clone(), row.well);
        match index.get(&key) {
            Some(&i) => merged[i].read_size += row.read_size,
            None => {
                index.insert(key, merged.len());
                merged.push(row);
            }
        }
    }

    annotate_cluster_wells(&mut merged);
    Ok(merged)
}

/// Recount the distinct wells each seed appears in
pub fn annotate_cluster_wells(rows: &mut [ClusterRow]) {
    let mut wells_per_seed: FxHashMap<&str, FxHashSet<u32>> = FxHashMap::default();
    for row in rows.iter() {
        wells_per_seed.entry(&row.seed).or_default().insert(row.well);
    }
    let counts: FxHashMap<String, u32> = wells_per_seed
        .into_iter()
        .map(|(seed, wells)| (seed.to_string(), wells.len() as u32))
        .collect();
    for row in rows.iter_mut() {
        row.cluster_wells = counts[&row.seed];
    }
}

/// Drop rows backed by fewer reads than min_read_size
pub fn filter_min_read_size(rows: Vec<ClusterRow>, min_read_size: u64) -> Vec<ClusterRow> {
    info!("Dropping rows with readSize < {}...", min_read_size);
    rows.into_iter().filter(|r| r.read_size >= min_read_size).collect()
}

/// Drop seeds observed in fewer than min_subpools distinct wells
pub fn filter_min_subpools(rows: Vec<ClusterRow>, min_subpools: u32) -> Vec<ClusterRow> {
    info!("Dropping clusters seen in fewer than {} subpools...", min_subpools);
    rows.into_iter().filter(|r| r.cluster_wells >= min_subpools).collect()
}

///////////////////////////////
/// Drop member rows whose read size falls below a fraction of the largest
/// read size in their cluster. Seed rows are always kept
pub fn filter_relative_size(rows: Vec<ClusterRow>, factor: f64) -> Vec<ClusterRow> {
    info!("Dropping rows with readSize <= cluster max * {}...", factor);
    let mut max_per_seed: FxHashMap<&str, u64> = FxHashMap::default();
    for row in rows.iter() {
        let max = max_per_seed.entry(&row.seed).or_insert(0);
        *max = (*max).max(row.read_size);
    }
    let thresholds: FxHashMap<String, f64> = max_per_seed
        .into_iter()
        .map(|(seed, max)| (seed.to_string(), max as f64 * factor))
        .collect();
    rows.into_iter()
        .filter(|r| r.rtype == RowType::S || r.read_size as f64 > thresholds[&r.seed])
        .collect()
}

///////////////////////////////
/// Remove duplicate hits of one seed on the same plate position across
/// plates: barcode swapping between sample plates leaves a low-read copy
/// of an amplicon at the same coordinates of a sibling plate.
/// Per (seed, within-plate position), only the highest read-size row
/// survives
pub fn dedup_cross_plate(rows: Vec<ClusterRow>) -> Vec<ClusterRow> {
    info!("Removing potential barcode swaps between sample plates...");
    let mut rows = rows;
    rows.sort_by(|x, y| y.read_size.cmp(&x.read_size));
    let mut seen: FxHashSet<(String, u32)> = FxHashSet::default();
    rows.retain(|r| seen.insert((r.seed.clone(), r.well % plate::WELLS_PER_PLATE)));
    rows
}

/// Drop clusters whose seed row did not survive the preceding filters
pub fn drop_orphan_clusters(rows: Vec<ClusterRow>) -> Vec<ClusterRow> {
    let with_seed: FxHashSet<String> = rows
        .iter()
        .filter(|r| r.rtype == RowType::S)
        .map(|r| r.seed.clone())
        .collect();
    rows.into_iter().filter(|r| with_seed.contains(&r.seed)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(rtype: RowType, seed: &str, well: u32, read_size: u64) -> ClusterRow {
        ClusterRow {
            rtype,
            seed: seed.to_string(),
            query: format!("q_w{};size={}", well, read_size),
            hit: seed.to_string(),
            well,
            read_size,
            cluster_size: 10,
            cluster_wells: 0,
            domain: (rtype == RowType::S).then(|| "NRPS".to_string()),
            seq: (rtype == RowType::S).then(|| "ACGT".to_string()),
        }
    }

    #[test]
    fn uc_records_become_merged_rows() {
        use crate::table::uc::{UcRecord, UcType};

        let uc = |rtype, query: &str, hit: &str, length| UcRecord {
            rtype,
            cluster: 0,
            length,
            ident: "*".to_string(),
            strand: "*".to_string(),
            align: "*".to_string(),
            query: query.to_string(),
            hit: hit.to_string(),
        };
        let records = vec![
            uc(UcType::Seed, "r_w1;size=10", "r_w1;size=10", 250),
            uc(UcType::Hit, "r_w2;size=4", "r_w1;size=10", 250),
            uc(UcType::Hit, "s_w2;size=6", "r_w1;size=10", 250),
            uc(UcType::Cluster, "r_w1;size=10", "r_w1;size=10", 3),
        ];
        let mut seqs = FxHashMap::default();
        seqs.insert("r_w1;size=10".to_string(), "ACGT".to_string());

        let rows = build_cluster_rows(&records, &seqs, "NRPS").unwrap();
        //the two well-2 members merge into one row with summed read sizes
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.seed == "r_w1;size=3"));
        assert!(rows.iter().all(|r| r.cluster_wells == 2));
        let seed = rows.iter().find(|r| r.rtype == RowType::S).unwrap();
        assert_eq!(seed.well, 1);
        assert_eq!(seed.seq.as_deref(), Some("ACGT"));
        assert_eq!(seed.domain.as_deref(), Some("NRPS"));
        let member = rows.iter().find(|r| r.rtype == RowType::H).unwrap();
        assert_eq!(member.well, 2);
        assert_eq!(member.read_size, 10);
        assert!(member.seq.is_none());
    }

    #[test]
    fn well_parsing() {
        assert_eq!(parse_well("sample_w123;size=4").unwrap(), 123);
        assert_eq!(parse_well("AB00042;size=4").unwrap(), 42);
        assert!(parse_well("nothing_here").is_err());
    }

    #[test]
    fn subpool_filter_counts_distinct_wells() {
        let mut rows = vec![
            row(RowType::S, "a;size=10", 1, 5),
            row(RowType::H, "a;size=10", 2, 5),
            row(RowType::S, "b;size=10", 3, 5),
        ];
        annotate_cluster_wells(&mut rows);
        let kept = filter_min_subpools(rows, 2);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.seed == "a;size=10"));
    }

    #[test]
    fn relative_size_keeps_seed_rows() {
        let rows = vec![
            row(RowType::S, "a;size=10", 1, 1),
            row(RowType::H, "a;size=10", 2, 100),
            row(RowType::H, "a;size=10", 3, 2),
        ];
        let kept = filter_relative_size(rows, 0.05);
        //the well-3 member sits below 100*0.05 but the small seed row stays
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().any(|r| r.rtype == RowType::S));
        assert!(kept.iter().any(|r| r.well == 2));
    }

    #[test]
    fn cross_plate_dedup_keeps_biggest_copy() {
        //wells 5 and 389 share the same position on plates 0 and 1
        let rows = vec![
            row(RowType::S, "a;size=10", 5, 3),
            row(RowType::H, "a;size=10", 389, 50),
            row(RowType::H, "a;size=10", 6, 7),
        ];
        let kept = dedup_cross_plate(rows);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().any(|r| r.well == 389));
        assert!(!kept.iter().any(|r| r.well == 5));
    }

    #[test]
    fn orphan_clusters_are_dropped() {
        let rows = vec![
            row(RowType::H, "a;size=10", 1, 5),
            row(RowType::S, "b;size=10", 2, 5),
        ];
        let kept = drop_orphan_clusters(rows);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].seed, "b;size=10");
    }
}
