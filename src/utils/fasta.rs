use std::path::Path;

use anyhow::{Context, Result};
use bio::io::fasta;
use rustc_hash::FxHashMap;

///////////////////////////////
/// Load a FASTA file into an id -> sequence map
pub fn read_fasta_map(path: &Path) -> Result<FxHashMap<String, String>> {
    let reader = fasta::Reader::from_file(path)
        .with_context(|| format!("unable to load sequences from {}", path.display()))?;
    let mut seqs = FxHashMap::default();
    for record in reader.records() {
        let record = record?;
        seqs.insert(
            record.id().to_string(),
            String::from_utf8_lossy(record.seq()).to_string(),
        );
    }
    Ok(seqs)
}

/// Write (id, sequence) pairs as FASTA
pub fn write_fasta<'a>(
    path: &Path,
    records: impl IntoIterator<Item = (&'a str, &'a str)>,
) -> Result<()> {
    let mut writer = fasta::Writer::to_file(path)
        .with_context(|| format!("unable to write sequences to {}", path.display()))?;
    for (id, seq) in records {
        writer.write_record(&fasta::Record::with_attrs(id, None, seq.as_bytes()))?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fasta_roundtrip() {
        let f = tempfile::NamedTempFile::new().unwrap();
        write_fasta(f.path(), [("a;size=3", "ACGT"), ("b;size=1", "TTTT")]).unwrap();
        let seqs = read_fasta_map(f.path()).unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs["a;size=3"], "ACGT");
        assert_eq!(seqs["b;size=1"], "TTTT");
    }
}
