use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, info};

use crate::cli::FetchArgs;
use crate::config::{RasterConfig, StoreConfig};
use crate::model::Page;
use crate::pipeline::render_pages;
use crate::rasterize::Rasterizer;
use crate::util::ensure_directory;
use crate::window::window;

pub fn run(args: FetchArgs) -> Result<()> {
    let raster = RasterConfig::from_args(&args.raster)?;
    let store_config = StoreConfig::from_args(&args.store)?;
    let store = store_config
        .open()
        .context("failed to open vector store")?;

    let info = store.get(&store_config.collection)?.info()?;
    let Some(max_page) = info.max_page() else {
        bail!("collection '{}' is empty", info.name);
    };
    if args.page > max_page {
        bail!(
            "page {} is outside collection '{}' (pages 0-{max_page})",
            args.page,
            info.name
        );
    }

    let wanted = window(args.page, 0, max_page);
    let rasterizer = raster.build(info.dpi);
    debug!(dpi = rasterizer.dpi(), recorded = ?info.dpi, "rendering window");
    let pages = render_pages(&rasterizer, &store, &store_config.collection, &wanted)
        .with_context(|| format!("failed to render pages {wanted:?}"))?;

    ensure_directory(&args.out_dir)?;
    for page in &pages {
        let path = write_page(&args.out_dir, page)?;
        info!(page = page.index, path = %path.display(), "wrote page image");
    }
    info!(
        collection = %info.name,
        centre = args.page,
        pages = pages.len(),
        "fetch completed"
    );
    Ok(())
}

fn write_page(out_dir: &Path, page: &Page) -> Result<PathBuf> {
    let path = out_dir.join(format!("page-{}.png", page.index));
    fs::write(&path, &page.image)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
