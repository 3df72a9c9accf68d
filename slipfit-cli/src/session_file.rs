//! JSON session snapshots and CSV exports.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use slipfit_algorithms::{PowderHistogram, RefineConfig};
use slipfit_core::{DiffractionImage, PanelArena, PanelGeometry, PanelId, ScoringConfig};

use crate::{CliError, Result};

/// One named panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelRecord {
    /// Panel name.
    pub name: String,
    /// Committed geometry.
    pub geometry: PanelGeometry,
}

/// Everything needed to score and refine a detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFile {
    /// Detector panels in arena order.
    pub panels: Vec<PanelRecord>,
    /// Indexed images.
    #[serde(default)]
    pub images: Vec<DiffractionImage>,
    /// Scoring thresholds.
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Refinement presets.
    #[serde(default)]
    pub refine: RefineConfig,
}

impl SessionFile {
    /// Reads a session snapshot.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Writes the snapshot as pretty-printed JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Builds the panel arena.
    pub fn arena(&self) -> Result<PanelArena> {
        Ok(PanelArena::from_geometries(
            self.panels
                .iter()
                .map(|p| (p.name.as_str(), p.geometry.clone())),
        )?)
    }

    /// Replaces the panel list with the committed geometry of `arena`,
    /// including any panels added by splitting.
    pub fn update_panels(&mut self, arena: &PanelArena) {
        self.panels = arena
            .iter()
            .map(|p| PanelRecord {
                name: p.name().to_string(),
                geometry: p.backup().clone(),
            })
            .collect();
    }
}

/// Resolves panel names to ids; an empty list selects every panel.
pub fn resolve_panels(arena: &PanelArena, names: &[String]) -> Result<Vec<PanelId>> {
    if names.is_empty() {
        return Ok(arena.ids().collect());
    }
    names
        .iter()
        .map(|name| {
            arena
                .find(name)
                .ok_or_else(|| CliError::UnknownPanel(name.clone()))
        })
        .collect()
}

/// Writes the occupied bins of a powder histogram as CSV.
pub fn write_powder_csv<P: AsRef<Path>>(path: P, histogram: &PowderHistogram) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "q,count")?;
    for (q, count) in histogram.occupied() {
        writeln!(writer, "{q},{count}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes predicted-minus-observed offsets as CSV.
pub fn write_offsets_csv<P: AsRef<Path>>(path: P, offsets: &[[f64; 2]]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "dfs,dss")?;
    for [dfs, dss] in offsets {
        writeln!(writer, "{dfs},{dss}")?;
    }
    writer.flush()?;
    Ok(())
}
