use std::io::{self, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::cli::QueryArgs;
use crate::config::QueryConfig;
use crate::embedding::PageEmbedder;
use crate::pipeline::RetrievalPipeline;
use crate::rasterize::PdftoppmRasterizer;
use crate::window::QueryWindows;

#[derive(Debug, Serialize)]
struct QueryResponse<'r> {
    collection: &'r str,
    top_k: usize,
    results: &'r [QueryWindows],
}

pub fn run(args: QueryArgs) -> Result<()> {
    let config = QueryConfig::from_args(&args)?;

    let embedder = config.embedder.build()?;
    let store = config
        .store
        .open()
        .context("failed to open vector store")?;
    // Search never renders pages; the rasterizer only satisfies the pipeline.
    let rasterizer = PdftoppmRasterizer::default();
    let pipeline = RetrievalPipeline::new(
        &rasterizer,
        PageEmbedder::new(embedder.as_ref(), 1, 1),
        &store,
    );

    info!(
        collection = %config.store.collection,
        queries = config.queries.len(),
        top_k = config.top_k,
        "query requested"
    );
    let results = pipeline
        .search(&config.queries, &config.store.collection, config.top_k)
        .with_context(|| format!("query against '{}' failed", config.store.collection))?;

    if config.json {
        write_json_response(&config.store.collection, config.top_k, &results)
    } else {
        write_text_response(&config.store.collection, &results)
    }
}

fn write_json_response(collection: &str, top_k: usize, results: &[QueryWindows]) -> Result<()> {
    let response = QueryResponse {
        collection,
        top_k,
        results,
    };

    let mut output = io::BufWriter::new(io::stdout().lock());
    serde_json::to_writer_pretty(&mut output, &response)
        .context("failed to serialize query json output")?;
    writeln!(output)?;
    output.flush()?;
    Ok(())
}

pub(crate) fn write_text_response(collection: &str, results: &[QueryWindows]) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());
    render_text(&mut output, collection, results)?;
    output.flush()?;
    Ok(())
}

fn render_text(output: &mut impl Write, collection: &str, results: &[QueryWindows]) -> Result<()> {
    writeln!(output, "Collection: {collection}")?;
    for entry in results {
        writeln!(output, "Query: {}", entry.query)?;
        if entry.ids.is_empty() {
            writeln!(output, "\t(no matches)")?;
            continue;
        }
        for (rank, (id, window)) in entry.ids.iter().zip(&entry.windows).enumerate() {
            writeln!(
                output,
                "{}.\tpage {}\twindow {}",
                rank + 1,
                id,
                format_window(window)
            )?;
        }
    }
    Ok(())
}

fn format_window(window: &[u32]) -> String {
    match (window.first(), window.last()) {
        (Some(first), Some(last)) if first != last => format!("{first}-{last}"),
        (Some(first), _) => first.to_string(),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_render_as_ranges() {
        assert_eq!(format_window(&[4, 5, 6]), "4-6");
        assert_eq!(format_window(&[0]), "0");
        assert_eq!(format_window(&[]), "-");
    }

    #[test]
    fn text_output_lists_each_query() {
        let results = vec![
            QueryWindows {
                query: "flood".to_string(),
                ids: vec!["7".to_string()],
                windows: vec![vec![6, 7, 8]],
            },
            QueryWindows {
                query: "drought".to_string(),
                ids: Vec::new(),
                windows: Vec::new(),
            },
        ];

        let mut buffer = Vec::new();
        render_text(&mut buffer, "pdf_pages", &results).expect("render");
        let text = String::from_utf8(buffer).expect("utf8");
        assert_eq!(
            text,
            "Collection: pdf_pages\nQuery: flood\n1.\tpage 7\twindow 6-8\nQuery: drought\n\t(no matches)\n"
        );
    }
}
