mod detect_software;
mod exec;
mod fasta;

pub use detect_software::check_bbmap;
pub use detect_software::check_samtools;
pub use detect_software::check_vsearch;

pub use exec::command_to_string;
pub use exec::run_tool;

pub use fasta::read_fasta_map;
pub use fasta::write_fasta;
