//! JSON output
//!
//! Writes profile snapshots as JSON for further analysis

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use tickprof_shared::ProfileSnapshot;
use tracing::info;

use crate::profile::CpuProfile;

/// Serialize a profile's snapshot to a JSON string
pub fn to_json(profile: &CpuProfile) -> Result<String> {
    serde_json::to_string_pretty(&profile.snapshot())
        .context("Failed to serialize profile to JSON")
}

/// Write a profile's snapshot to `output_path`
pub fn generate_json(profile: &CpuProfile, output_path: &str) -> Result<()> {
    info!("Generating JSON output: {}", output_path);

    let file = File::create(output_path)
        .with_context(|| format!("Failed to create output file: {}", output_path))?;

    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, &profile.snapshot())
        .context("Failed to serialize profile to JSON")?;

    info!("JSON output written to {}", output_path);

    Ok(())
}

/// Read back a snapshot written by [`generate_json`]
pub fn load_json(input_path: &str) -> Result<ProfileSnapshot> {
    let file = File::open(input_path)
        .with_context(|| format!("Failed to open profile: {}", input_path))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse profile: {}", input_path))
}
