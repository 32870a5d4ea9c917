use std::path::Path;

use anyhow::{bail, Context, Result};
use itertools::Itertools;
use log::{debug, info};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use super::stats::fisher_exact;
use crate::table::ClusterRow;

pub const DEFAULT_MIN_PAIR_COUNT: u32 = 3;

/// One unordered seed pair co-observed in at least min_pair_count wells,
/// with its 2x2 contingency table and exact-test result
#[derive(Debug, Clone)]
pub struct OccurrenceRecord {
    pub seed1: String,
    pub seed2: String,
    /// total well-occupancy of each seed
    pub ov1: u32,
    pub ov2: u32,
    /// wells in which both seeds were observed, sorted
    pub wells: Vec<u32>,
    pub count: u32,
    //contingency table: a shared, b seed1 only, c seed2 only, d neither
    pub a: u64,
    pub b: u64,
    pub c: u64,
    pub d: u64,
    pub odds: f64,
    pub pvalue: f64,
    /// -log10(pvalue), for ranking
    pub score: f64,
}

///////////////////////////////
/// Count pairwise co-occurrence of seeds across wells and score each
/// surviving pair with a two-sided exact test.
///
/// total_wells overrides the declared well count; by default it is the
/// number of distinct wells in the table. Observing more distinct wells
/// than declared is a data-consistency violation and aborts the run
pub fn calc_occurrences(
    rows: &[ClusterRow],
    min_pair_count: u32,
    total_wells: Option<usize>,
) -> Result<Vec<OccurrenceRecord>> {
    //Intern seed ids; pair keys stay cheap u32 tuples
    let mut names: Vec<&str> = Vec::new();
    let mut ids: FxHashMap<&str, u32> = FxHashMap::default();

    //Per well, the set of distinct seeds present; per seed, its wells
    let mut well_seeds: FxHashMap<u32, FxHashSet<u32>> = FxHashMap::default();
    let mut seed_wells: FxHashMap<u32, FxHashSet<u32>> = FxHashMap::default();
    for row in rows {
        let sid = *ids.entry(&row.seed).or_insert_with(|| {
            names.push(&row.seed);
            (names.len() - 1) as u32
        });
        well_seeds.entry(row.well).or_default().insert(sid);
        seed_wells.entry(sid).or_default().insert(row.well);
    }

    let n_wells = total_wells.unwrap_or(well_seeds.len());
    info!("{} subpools found...", n_wells);
    if well_seeds.len() > n_wells {
        bail!(
            "{} distinct wells observed but only {} declared",
            well_seeds.len(),
            n_wells
        );
    }

    //Enumerate unordered seed pairs per well under a canonical sorted key
    info!("Counting pair occurrences...");
    let mut pairs: FxHashMap<(u32, u32), Vec<u32>> = FxHashMap::default();
    for (counter, (&well, seeds)) in well_seeds.iter().enumerate() {
        if counter % 96 == 0 {
            debug!("{} wells processed...", counter);
        }
        let mut seeds: Vec<u32> = seeds.iter().copied().collect();
        seeds.sort_unstable();
        for (s1, s2) in seeds.iter().copied().tuple_combinations() {
            pairs.entry((s1, s2)).or_default().push(well);
        }
    }
    info!("Current pair count {}", pairs.len());

    //Most pairs co-occur once or twice across the plates; drop them before
    //the exact test
    let before = pairs.len();
    pairs.retain(|_, wells| wells.len() >= min_pair_count as usize);
    info!(
        "{} pairs below min_pair_count {} removed, {} left...",
        before - pairs.len(),
        min_pair_count,
        pairs.len()
    );

    info!("Performing pair-wise Fisher tests...");
    let mut records = Vec::with_capacity(pairs.len());
    for ((s1, s2), mut wells) in pairs {
        wells.sort_unstable();
        let ov1 = seed_wells[&s1].len() as u32;
        let ov2 = seed_wells[&s2].len() as u32;
        let count = wells.len() as u32;

        let a = count as u64;
        let mut b = (ov1 - count) as u64;
        let mut c = (ov2 - count) as u64;
        let d = n_wells as u64 - a - b - c;
        let (odds, pvalue) = fisher_exact(a, b, c, d);

        //Order the pair by name so records do not depend on interning
        //order; b stays the seed1-only count and c the seed2-only count
        let (mut seed1, mut ov1) = (names[s1 as usize].to_string(), ov1);
        let (mut seed2, mut ov2) = (names[s2 as usize].to_string(), ov2);
        if seed2 < seed1 {
            std::mem::swap(&mut seed1, &mut seed2);
            std::mem::swap(&mut ov1, &mut ov2);
            std::mem::swap(&mut b, &mut c);
        }

        records.push(OccurrenceRecord {
            seed1,
            seed2,
            ov1,
            ov2,
            wells,
            count,
            a,
            b,
            c,
            d,
            odds,
            pvalue,
            score: -pvalue.log10(),
        });
    }
    records.sort_by(|x, y| (&x.seed1, &x.seed2).cmp(&(&y.seed1, &y.seed2)));

    info!("Fisher tests done");
    Ok(records)
}

//CSV image of an occurrence record; shared wells underscore-joined
#[derive(Serialize, Deserialize)]
struct OccurrenceCsvRow {
    seed1: String,
    seed2: String,
    ov1: u32,
    ov2: u32,
    wells: String,
    count: u32,
    a: u64,
    b: u64,
    c: u64,
    d: u64,
    odds: f64,
    pvalue: f64,
    score: f64,
}

pub fn write_occurrence_table(path: &Path, records: &[OccurrenceRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("unable to write occurrence table {}", path.display()))?;
    for rec in records {
        writer.serialize(OccurrenceCsvRow {
            seed1: rec.seed1.clone(),
            seed2: rec.seed2.clone(),
            ov1: rec.ov1,
            ov2: rec.ov2,
            wells: rec.wells.iter().map(|w| w.to_string()).join("_"),
            count: rec.count,
            a: rec.a,
            b: rec.b,
            c: rec.c,
            d: rec.d,
            odds: rec.odds,
            pvalue: rec.pvalue,
            score: rec.score,
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_occurrence_table(path: &Path) -> Result<Vec<OccurrenceRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("unable to load occurrence table {}", path.display()))?;
    let mut records = Vec::new();
    for row in reader.deserialize() {
        let row: OccurrenceCsvRow = row?;
        let wells: Vec<u32> = if row.wells.is_empty() {
            Vec::new()
        } else {
            row.wells
                .split('_')
                .map(|w| w.parse().context("bad well in occurrence table"))
                .collect::<Result<_>>()?
        };
        records.push(OccurrenceRecord {
            seed1: row.seed1,
            seed2: row.seed2,
            ov1: row.ov1,
            ov2: row.ov2,
            wells,
            count: row.count,
            a: row.a,
            b: row.b,
            c: row.c,
            d: row.d,
            odds: row.odds,
            pvalue: row.pvalue,
            score: row.score,
        });
    }
    Ok(records)
}
