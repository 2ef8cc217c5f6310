use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::chat::{
    ChatMessage, ChatProvider, History, PageSearchTool, TaggedDelta, ToolRunner, TurnStream,
};
use crate::cli::ChatArgs;
use crate::config::ChatConfig;
use crate::embedding::PageEmbedder;
use crate::error::PipelineError;
use crate::pipeline::RetrievalPipeline;
use crate::store::VectorStore;

const SYSTEM_PROMPT: &str = "You answer questions about an indexed document. \
Use the search_pages tool to look up the relevant pages before answering, \
sending several short, focused queries when a question has multiple parts. \
Base answers on the retrieved page images and name the pages you used.";

pub fn run(args: ChatArgs) -> Result<()> {
    let config = ChatConfig::from_args(&args)?;
    let chat = config.build_chat()?;
    let embedder = config.embedder.build()?;
    let store = config
        .store
        .open()
        .context("failed to open vector store")?;
    let recorded_dpi = store
        .get(&config.store.collection)
        .and_then(|collection| collection.info())
        .ok()
        .and_then(|info| info.dpi);
    let rasterizer = config.raster.build(recorded_dpi);
    let pipeline = RetrievalPipeline::new(
        &rasterizer,
        PageEmbedder::new(embedder.as_ref(), 1, 1),
        &store,
    );
    let search = PageSearchTool::new(
        &pipeline,
        config.store.collection.clone(),
        config.top_k,
        config.max_context_pages,
    );

    let tools_enabled =
        config.tools_enabled && collection_available(&store, &config.store.collection);
    let tools: Option<&dyn ToolRunner> = if tools_enabled {
        Some(&search as &dyn ToolRunner)
    } else {
        None
    };

    info!(
        model = %chat.model(),
        collection = %config.store.collection,
        tools = tools_enabled,
        history_limit = config.history_limit,
        "chat session started; empty line or 'exit' quits"
    );

    let mut history = History::new(config.history_limit);
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout().lock();

    loop {
        write!(output, "> ")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line).context("failed to read from stdin")? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() || prompt == "exit" || prompt == "quit" {
            break;
        }

        history.push(ChatMessage::user(prompt));
        let mut stream = TurnStream::new(&chat, history.request(Some(SYSTEM_PROMPT)), tools);
        let mut current_turn = None;
        for delta in stream.by_ref() {
            match delta {
                Ok(delta) => render_delta(&mut output, &mut current_turn, &delta)?,
                Err(err) => {
                    error!(error = %err, "turn failed");
                    break;
                }
            }
        }
        writeln!(output)?;

        for turn in stream.finish() {
            if let Some(message) = turn.history_message() {
                history.push(message);
            }
        }
    }

    info!(messages = history.len(), "chat session ended");
    Ok(())
}

fn collection_available(store: &VectorStore, collection: &str) -> bool {
    match store.get(collection) {
        Ok(_) => true,
        Err(PipelineError::CollectionUnavailable(reason)) => {
            warn!(%reason, "page search disabled");
            false
        }
        Err(err) => {
            warn!(error = %err, "page search disabled");
            false
        }
    }
}

/// Writes one delta, separating turns with a blank line.
fn render_delta(
    output: &mut impl Write,
    current_turn: &mut Option<Uuid>,
    delta: &TaggedDelta,
) -> Result<()> {
    if current_turn.is_some_and(|turn_id| turn_id != delta.turn_id) {
        writeln!(output)?;
        writeln!(output)?;
    }
    *current_turn = Some(delta.turn_id);
    write!(output, "{}", delta.text)?;
    output.flush()?;
    Ok(())
}
