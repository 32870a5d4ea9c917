use log::debug;
use log::info;
use std::process::Command;
use anyhow::bail;

pub fn check_vsearch() -> anyhow::Result<()> {
    debug!("Checking for vsearch");
    if let Ok(_output) = Command::new("vsearch").arg("--version").output() {
        info!("Found vsearch");
        Ok(())
    } else {
        bail!("Vsearch is either not installed or not in PATH")
    }
}

pub fn check_bbmap() -> anyhow::Result<()> {
    debug!("Checking for bbmap");
    if let Ok(_output) = Command::new("bbmap.sh").arg("--version").output() {
        info!("Found bbmap");
        Ok(())
    } else {
        bail!("Bbmap.sh is either not installed or not in PATH")
    }
}

pub fn check_samtools() -> anyhow::Result<()> {
    debug!("Checking for samtools");
    if let Ok(_output) = Command::new("samtools").output() {
        info!("Found samtools");
        Ok(())
    } else {
        bail!("Samtools is either not installed or not in PATH")
    }
}
