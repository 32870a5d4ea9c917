use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use clap::Args;
use log::{info, warn};

use crate::utils;

pub const DEFAULT_CLUSTER_ID: f64 = 0.95;
pub const DEFAULT_HOST_MAXINDEL: u32 = 10;
pub const DEFAULT_HOST_MINID: f64 = 0.95;

/// Process demultiplexed subpool reads into a domain clustering table
#[derive(Args)]
pub struct ClusterCMD {
    /// Subpool demultiplexed read files directory
    #[arg(short = 'i', long = "inpath", value_parser = clap::value_parser!(PathBuf))]
    pub inpath: PathBuf,

    /// Output directory for processed files
    #[arg(short = 'o', long = "outpath", value_parser = clap::value_parser!(PathBuf))]
    pub outpath: PathBuf,

    /// Sample name for output files
    #[arg(short = 's', long = "sample-name")]
    pub sample_name: String,

    /// Number of bases to strip (typically primer length)
    #[arg(short = 'l', long = "strip-left")]
    pub strip_left: u32,

    /// Number of bases to keep
    #[arg(short = 't', long = "truncate")]
    pub truncate: u32,

    /// Identity threshold for amplicon clustering
    #[arg(short = 'c', long = "cluster-id", default_value_t = DEFAULT_CLUSTER_ID)]
    pub cluster_id: f64,

    /// Host reference FASTA; when given, host-mapped reads are removed
    #[arg(long = "host-path", value_parser = clap::value_parser!(PathBuf))]
    pub host_path: Option<PathBuf>,

    /// Number of threads used by the external tools
    #[arg(long = "threads", default_value_t = 1)]
    pub threads: u32,

    /// Do not keep processed read files
    #[arg(long = "remove-files")]
    pub remove_files: bool,
}

impl ClusterCMD {
    pub fn try_execute(&mut self) -> Result<()> {
        utils::check_vsearch()?;
        if self.host_path.is_some() {
            utils::check_bbmap()?;
            utils::check_samtools()?;
        }

        info!("Building clustering table from amplicon data...");
        let trim_dir = self.outpath.join("trim");
        let derep_dir = self.outpath.join("derep");
        fs::create_dir_all(&trim_dir)?;
        fs::create_dir_all(&derep_dir)?;

        //Trim and dereplicate every subpool read file
        let mut demux_files: Vec<PathBuf> = fs::read_dir(&self.inpath)
            .with_context(|| format!("unable to list {}", self.inpath.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        demux_files.sort();

        let mut derep_files = Vec::new();
        for (i, input) in demux_files.iter().enumerate() {
            if i % 100 == 0 {
                info!("{} files processed...", i);
            }

            let name = input
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let trimmed = trim_dir.join(format!("{}.trim.fna", name));
            let mut cmd = Command::new("vsearch");
            cmd.arg("--threads")
                .arg(self.threads.to_string())
                .arg("--fastx_filter")
                .arg(input)
                .arg("--fastaout")
                .arg(&trimmed)
                .arg("--fastq_stripleft")
                .arg(self.strip_left.to_string())
                .arg("--fastq_trunclen")
                .arg(self.truncate.to_string());
            utils::run_tool(&mut cmd)?;

            let dereplicated = derep_dir.join(format!("{}.derep.fna", name));
            let mut cmd = Command::new("vsearch");
            cmd.arg("--threads")
                .arg(self.threads.to_string())
                .arg("--derep_fulllength")
                .arg(&trimmed)
                .arg("--strand")
                .arg("plus")
                .arg("--output")
                .arg(&dereplicated)
                .arg("-sizeout")
                .arg("--fasta_width")
                .arg("0");
            utils::run_tool(&mut cmd)?;
            derep_files.push(dereplicated);
        }

        //Merge all dereplicated subpools into one read collection
        let mut merged_file = self.outpath.join(format!("{}.fna", self.sample_name));
        info!("Merging de-replicated reads -> {}...", merged_file.display());
        concat_files(&derep_files, &merged_file)?;

        if let Some(host_path) = &self.host_path {
            let cleaned = self.outpath.join(format!("{}_HOST_CLEAN.fna", self.sample_name));
            info!("Mapping reads to reference file -> {}...", host_path.display());
            clean_host_reads(&merged_file, host_path, &cleaned, self.threads)?;
            merged_file = cleaned;
        }

        if self.remove_files {
            info!("Removing processed read files...");
            for dir in [&trim_dir, &derep_dir] {
                if let Err(e) = fs::remove_dir_all(dir) {
                    warn!("Unable to remove {}: {}", dir.display(), e);
                }
            }
        }

        //Sort by length; equal-length reads sort by read count
        info!("Sorting merged reads...");
        let sorted_file = self.outpath.join(format!("{}_SORTED.fna", self.sample_name));
        let mut cmd = Command::new("vsearch");
        cmd.arg("--threads")
            .arg(self.threads.to_string())
            .arg("--sortbylength")
            .arg(&merged_file)
            .arg("--output")
            .arg(&sorted_file);
        utils::run_tool(&mut cmd)?;

        info!("Clustering merged reads...");
        let centroids_file = self.outpath.join(format!("{}_OTU.fna", self.sample_name));
        let table_file = self.outpath.join(format!("{}_OTU.txt", self.sample_name));
        let mut cmd = Command::new("vsearch");
        cmd.arg("--threads")
            .arg(self.threads.to_string())
            .arg("--cluster_size")
            .arg(&sorted_file)
            .arg("--id")
            .arg(self.cluster_id.to_string())
            .arg("--iddef")
            .arg("1")
            .arg("--sizein")
            .arg("--sizeout")
            .arg("--centroids")
            .arg(&centroids_file)
            .arg("--uc")
            .arg(&table_file);
        utils::run_tool(&mut cmd)?;

        info!("Amplicon domain clustering table saved -> {}...", table_file.display());
        info!("Amplicon domain centroid sequences saved -> {}...", centroids_file.display());
        Ok(())
    }
}

fn concat_files(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let mut out = File::create(output)
        .with_context(|| format!("unable to write {}", output.display()))?;
    for input in inputs {
        let mut file = File::open(input)
            .with_context(|| format!("unable to read {}", input.display()))?;
        std::io::copy(&mut file, &mut out)?;
    }
    out.flush()?;
    Ok(())
}

///////////////////////////////
/// Remove host-mapped reads: map against the host reference, keep the
/// unmapped output, convert it back to FASTA. The intermediate BAM is
/// removed afterwards
fn clean_host_reads(
    input: &Path,
    host_ref: &Path,
    output: &Path,
    threads: u32,
) -> Result<()> {
    let bam_file = input.with_extension("bam");

    let mut cmd = Command::new("bbmap.sh");
    cmd.arg(format!("in={}", input.display()))
        .arg(format!("ref={}", host_ref.display()))
        .arg(format!("outu={}", bam_file.display()))
        .arg(format!("maxindel={}", DEFAULT_HOST_MAXINDEL))
        .arg(format!("minid={}", DEFAULT_HOST_MINID))
        .arg(format!("t={}", threads));
    utils::run_tool(&mut cmd)?;

    let mut cmd = Command::new("samtools");
    cmd.arg("fasta").arg(&bam_file);
    let out = utils::run_tool(&mut cmd)?;
    fs::write(output, &out.stdout)
        .with_context(|| format!("unable to write {}", output.display()))?;

    if let Err(e) = fs::remove_file(&bam_file) {
        warn!("Unable to remove {}: {}", bam_file.display(), e);
    }
    Ok(())
}
