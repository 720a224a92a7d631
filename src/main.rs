use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::Parser;
use docsift::{
    CancellationToken,
    DataDir,
    DocumentCatalog,
    DocumentId,
    Error,
    IndexConfig,
    Result,
    SearchEngine,
    SearchRequest,
    catalog::MODEL_ID_SETTING,
    cli::{self, Cli, Command, EmbedderKind, ModelAction},
    embedding::{Dimension, Embedder, HashEmbedder},
    fuzzy::SUGGESTION_THRESHOLD,
    model_manager::{ColbertEmbedder, MODEL_ENV_VAR, resolve_model_id},
    search::{self, SearchMode},
    text_util::single_line,
    walker,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use kdam::{BarExt, tqdm};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    if let Command::Model { action } = &cli.command {
        return cmd_model(&data_dir, cli.model.as_deref(), action);
    }

    // redb allows one handle per file, so the stored model is read before
    // the engine opens the database.
    let stored_model = {
        let catalog = DocumentCatalog::open(&data_dir.index_db())?;
        catalog.get_setting(MODEL_ID_SETTING)?
    };
    let embedder = build_embedder(&cli, stored_model.as_deref())?;

    let mut config = IndexConfig::default();
    match &cli.command {
        Command::Index(args) => {
            config.chunking.chunk_size = args.chunk_size;
            config.chunking.overlap = args.overlap;
        }
        Command::Search(args) => config.fuzzy_threshold = args.threshold,
        _ => {}
    }

    let engine = SearchEngine::new(data_dir.index_db(), config, embedder);
    engine.initialize()?;

    match cli.command {
        Command::Index(args) => cmd_index(&engine, &args, cli.quiet)?,
        Command::Search(args) => cmd_search(&engine, &args)?,
        Command::Delete(args) => {
            let id = engine.resolve_document_id(&args.document)?;
            if !engine.delete_document(&id)? {
                return Err(Error::NotFound {
                    kind: "document",
                    name: args.document,
                });
            }
            println!("Deleted document {}", DocumentId::from_full(&id));
        }
        Command::List(args) => cmd_list(&engine, args.json)?,
        Command::Show(args) => cmd_show(&engine, &args)?,
        Command::Suggest(args) => {
            for term in engine.suggest_corrections(&args.query, args.count)? {
                println!("{term}");
            }
        }
        Command::Status(args) => cmd_status(&engine, &data_dir, args.json)?,
        Command::Model { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn build_embedder(
    cli: &Cli,
    stored_model: Option<&str>,
) -> Result<Arc<dyn Embedder>> {
    Ok(match cli.embedder {
        EmbedderKind::Hash => {
            Arc::new(HashEmbedder::new(Dimension::new(cli.dimension)?))
        }
        EmbedderKind::Colbert => {
            let model_id = resolve_model_id(cli.model.as_deref(), stored_model);
            Arc::new(ColbertEmbedder::new(model_id))
        }
    })
}

fn cmd_model(
    data_dir: &DataDir,
    explicit: Option<&str>,
    action: &ModelAction,
) -> Result<()> {
    let catalog = DocumentCatalog::open(&data_dir.index_db())?;

    match action {
        ModelAction::Show { json } => {
            let stored = catalog.get_setting(MODEL_ID_SETTING)?;
            let env = std::env::var(MODEL_ENV_VAR).ok();
            let resolved = resolve_model_id(explicit, stored.as_deref());
            let source = if explicit.is_some() {
                "cli"
            } else if env.is_some() {
                "env"
            } else if stored.is_some() {
                "config"
            } else {
                "default"
            };

            if *json {
                let body = serde_json::json!({
                    "resolved": resolved,
                    "source": source,
                    "cli": explicit,
                    "env": env,
                    "config": stored,
                });
                println!("{body}");
            } else {
                println!("{resolved} ({source})");
            }
        }
        ModelAction::Set { model } => {
            catalog.set_setting(MODEL_ID_SETTING, model)?;
            println!("Model set to {model}");
        }
        ModelAction::Clear => {
            if catalog.remove_setting(MODEL_ID_SETTING)? {
                println!("Model setting cleared");
            } else {
                println!("No model setting stored");
            }
        }
    }
    Ok(())
}

fn build_globs(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::Config(format!("invalid glob pattern {pattern:?}: {e}"))
        })?;
        builder.add(glob);
    }
    let globs = builder
        .build()
        .map_err(|e| Error::Config(format!("invalid glob set: {e}")))?;
    Ok(Some(globs))
}

/// Expand directories into the supported files below them. Explicit file
/// arguments are kept even when unsupported so the failure is reported.
fn collect_paths(
    engine: &SearchEngine,
    inputs: &[PathBuf],
    globs: Option<&GlobSet>,
) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let found = walker::discover_files(input, engine.parsers(), globs)?;
            paths.extend(found.into_iter().map(|f| f.absolute_path));
        } else {
            paths.push(input.clone());
        }
    }
    Ok(paths)
}

fn cmd_index(
    engine: &SearchEngine,
    args: &cli::IndexArgs,
    quiet: bool,
) -> Result<()> {
    let globs = build_globs(&args.glob)?;
    let paths = collect_paths(engine, &args.paths, globs.as_ref())?;

    let mut bar = tqdm!(
        total = paths.len(),
        desc = "Indexing",
        unit = " files",
        disable = quiet || args.json
    );
    let cancel = CancellationToken::new();
    let results = engine.index_documents(&paths, &cancel, &mut |progress| {
        bar.set_postfix(format!(
            "{} {}",
            display_name(progress.path),
            progress.file.stage
        ));
        let _ = bar.update_to(progress.file_index);
    })?;
    bar.update_to(paths.len())?;
    if !(quiet || args.json) {
        eprintln!();
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    let mut failed = 0;
    for result in &results {
        match (&result.document_id, &result.error) {
            (Some(id), _) => println!(
                "indexed {} {} ({} chunks, {} ms)",
                DocumentId::from_full(id),
                result.source_path.display(),
                result.total_chunks,
                result.duration_ms
            ),
            (None, error) => {
                failed += 1;
                eprintln!(
                    "failed  {}: {}",
                    result.source_path.display(),
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }
    println!("{} indexed, {failed} failed", results.len() - failed);
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn cmd_search(engine: &SearchEngine, args: &cli::SearchArgs) -> Result<()> {
    let mut request = SearchRequest::new(&args.query)
        .limit(args.count)
        .mode(args.mode);
    if let Some(document) = &args.document {
        request = request.document(engine.resolve_document_id(document)?);
    }
    if let Some(page) = args.page {
        request = request.page(page);
    }

    let hits = engine.search(&request)?;
    if args.json {
        return search::format_json(&hits, &args.query);
    }

    search::format_human(&hits, &args.query);
    if hits.is_empty() && args.mode != SearchMode::Semantic {
        let suggestions = engine.suggest_corrections(&args.query, 5)?;
        if !suggestions.is_empty() {
            println!(
                "Did you mean: {} (similarity >= {SUGGESTION_THRESHOLD})",
                suggestions.join(", ")
            );
        }
    }
    Ok(())
}

fn cmd_list(engine: &SearchEngine, json: bool) -> Result<()> {
    let documents = engine.list_documents()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&documents)?);
    } else if documents.is_empty() {
        println!("No documents indexed.");
    } else {
        for doc in &documents {
            println!(
                "{}\t{}\t{} chunks\t{}",
                DocumentId::from_full(&doc.id),
                doc.file_type,
                doc.total_chunks,
                doc.source_path
            );
        }
    }
    Ok(())
}

fn cmd_show(engine: &SearchEngine, args: &cli::ShowArgs) -> Result<()> {
    let id = engine.resolve_document_id(&args.document)?;
    let document = engine.get_document(&id)?.ok_or_else(|| Error::NotFound {
        kind: "document",
        name: args.document.clone(),
    })?;
    let chunks = if args.chunks {
        engine.document_chunks(&id)?
    } else {
        Vec::new()
    };

    if args.json {
        let mut body = serde_json::to_value(&document)?;
        if args.chunks {
            body["chunks"] = serde_json::to_value(&chunks)?;
        }
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!("id: {}", document.id);
    println!("file: {}", document.source_path);
    println!("type: {}", document.file_type);
    println!("size: {} bytes", document.size_bytes);
    println!("chunks: {}", document.total_chunks);
    println!("indexed at: {}", document.indexed_at);
    for (key, value) in &document.metadata {
        println!("{key}: {value}");
    }
    for chunk in &chunks {
        let page = chunk
            .page
            .map(|p| format!(" p.{p}"))
            .unwrap_or_default();
        println!(
            "\n[{}{page}] {}..{}",
            chunk.chunk_index, chunk.char_start, chunk.char_end
        );
        println!("{}", single_line(&chunk.content));
    }
    Ok(())
}

fn cmd_status(engine: &SearchEngine, data_dir: &DataDir, json: bool) -> Result<()> {
    let status = engine.status()?;

    if json {
        let body = serde_json::json!({
            "data_dir": data_dir.root(),
            "index": status,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {}", status.model.as_deref().unwrap_or("unknown"));
        println!("Dimension: {}", status.dimension);
        println!("Documents: {}", status.documents);
        println!("Chunks: {}", status.chunks);
        println!("Vectors: {}", status.vectors);
    }
    Ok(())
}
