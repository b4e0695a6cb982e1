use std::path::Path;

use anyhow::bail;
use lbgrid_core::LbGridConfig;

pub fn init(path: &str) -> anyhow::Result<()> {
    let output = write_scaffold(Path::new(path))?;
    println!("✓ Generated {}", output.display());
    Ok(())
}

fn write_scaffold(dir: &Path) -> anyhow::Result<std::path::PathBuf> {
    let output = dir.join("lbgrid.toml");
    if output.exists() {
        bail!("{} already exists", output.display());
    }
    std::fs::write(&output, LbGridConfig::scaffold().to_toml_string()?)?;
    Ok(output)
}
