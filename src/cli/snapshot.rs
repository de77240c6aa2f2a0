use std::{
    io::{self, Write},
    path::PathBuf,
};

use anyhow::{bail, Context};
use clap::Parser;

use crate::{
    config::CanopyConfig,
    interface::FullSnapshot,
    reconstruct::reconstruct,
    scan::describe_path,
    sorting::sort_recursive,
};

use super::resolve_path;

/// Scan a directory once and print its tree as a full snapshot.
#[derive(Debug, Parser)]
pub struct SnapshotCommand {
    /// Directory to scan.
    pub path: PathBuf,

    /// Config file providing ignore patterns and sort order. Defaults to
    /// `canopy.toml` inside the scanned directory if it exists.
    #[clap(long)]
    pub config: Option<PathBuf>,
}

impl SnapshotCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let path = resolve_path(&self.path)?;
        if !path.is_dir() {
            bail!("{} is not a directory", path.display());
        }

        let config = match &self.config {
            Some(config_path) => CanopyConfig::load(&resolve_path(config_path)?)?,
            None => CanopyConfig::load_from_dir(&path)?.unwrap_or_default(),
        };

        let mut descriptor = describe_path(&path, &config.scan_rules()?)
            .with_context(|| format!("Could not scan {}", path.display()))?;
        reconstruct(&mut descriptor);
        sort_recursive(&mut descriptor, &config.sort);

        let snapshot = FullSnapshot {
            descriptor,
            current_version: 0,
        };

        let mut stdout = io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &snapshot)?;
        writeln!(stdout)?;

        Ok(())
    }
}
