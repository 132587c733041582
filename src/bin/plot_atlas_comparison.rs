//! Compare the functional connectomes of three brain atlases on a resting-state fMRI cohort.
//!
//! Downloads the Destrieux, Yeo and Harvard-Oxford atlases and 10 subjects of the ADHD-200
//! sample on first use, then writes one connectome plot per atlas. Set `RUST_LOG=info` to
//! follow the progress.

use anyhow::Context;
use log::info;

use neuroconnectome::{compare_atlases, default_atlases, plot_connectomes, Config, DiskMemory, Fetcher, FigureQueue};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let config = Config::default();

    let fetcher = Fetcher::new(&config.data_dir).context("Failed to set up the dataset downloader")?;
    let atlases = default_atlases(&fetcher).context("Failed to fetch the atlases")?;
    info!("{}", atlases);
    let dataset = fetcher.fetch_adhd(config.n_subjects).context("Failed to fetch the ADHD dataset")?;

    let memory = DiskMemory::new(&config.cache_dir);
    let connectomes = compare_atlases(&atlases, &dataset, &config, &memory).context("Failed to compute the connectomes")?;

    let threshold = config.edge_threshold()?;
    let mut queue = FigureQueue::new();
    plot_connectomes(&connectomes, &threshold, &mut queue)?;
    let paths = queue
        .show(&config.output_dir)
        .with_context(|| format!("Failed to write the figures to '{}'", config.output_dir.display()))?;
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}
