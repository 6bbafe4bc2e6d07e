//! HealthGuard CLI
//!
//! A command-line interface for the HealthGuard diagnosis pipeline.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use healthguard_agents::care::DEFAULT_SEARCH_RADIUS_KM;
use healthguard_agents::{
    CareFinder, CareReport, GeoPoint, ItemStatus, Pipeline, PipelineConfig, PipelineResult, Settings,
};
use healthguard_core::{ChunkConfig, Corpus, DiagnosisItem};
use healthguard_index::{
    load_index, save_index, EmbeddingIndex, EmbeddingProvider, IndexHandle, SharedIndex,
};
use std::io::{self, BufRead, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// HealthGuard - Cited differential diagnosis from clinical notes
#[derive(Parser)]
#[command(name = "healthguard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Corpus JSON file (defaults to the built-in corpus)
    #[arg(short, long)]
    corpus: Option<PathBuf>,

    /// Index snapshot path (defaults to ~/.healthguard/index.json)
    #[arg(short, long)]
    index_path: Option<PathBuf>,

    /// Build the index in memory and never touch the snapshot
    #[arg(long)]
    memory: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the diagnosis pipeline on a clinical note
    Diagnose {
        /// Note text (reads from --file or stdin if not provided)
        note: Option<String>,

        /// Read the note from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Number of literature chunks to retrieve
        #[arg(short, long = "top-k")]
        k: Option<usize>,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search the literature index
    Search {
        /// Search query
        query: String,

        /// Maximum results
        #[arg(short, long = "top-k", default_value = "5")]
        k: usize,
    },

    /// Rebuild the index from the corpus and save it
    BuildIndex {
        /// Chunk size in characters
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Overlap between consecutive chunks in characters
        #[arg(long)]
        overlap: Option<usize>,
    },

    /// List indexed documents
    Corpus,

    /// Show the embedding dimension from the active embeddings provider
    EmbeddingDim {
        /// Optional text to embed (defaults to "dimension probe")
        text: Option<String>,
    },

    /// Delete the saved index snapshot
    ResetIndex,

    /// Check that the configured embedding and LLM services are reachable
    Health,

    /// Suggest a specialty and nearby facilities for a diagnosis
    Hospitals {
        /// Condition to route (otherwise the note is diagnosed first)
        #[arg(long, conflicts_with = "note")]
        condition: Option<String>,

        /// Clinical note to diagnose
        #[arg(long)]
        note: Option<String>,

        /// Address or place name to search around
        #[arg(short, long, conflicts_with_all = ["lat", "lon"])]
        location: Option<String>,

        #[arg(long, requires = "lon", allow_negative_numbers = true)]
        lat: Option<f64>,

        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        lon: Option<f64>,

        /// Search radius in kilometres
        #[arg(short, long, default_value_t = DEFAULT_SEARCH_RADIUS_KM)]
        radius: f64,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive mode
    Interactive,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Logs go to stderr so `--json` output stays parseable
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let index_path = match &cli.index_path {
        Some(path) => path.clone(),
        None => default_index_path()?,
    };

    if let Commands::ResetIndex = cli.command {
        return cmd_reset_index(&index_path);
    }

    let settings = Settings::from_env().context("Invalid configuration")?;
    let embedder = settings.embedding.provider();

    if let Commands::EmbeddingDim { text } = &cli.command {
        return cmd_embedding_dim(embedder.as_ref(), text.as_deref()).await;
    }

    if let Commands::Health = cli.command {
        return cmd_health(&settings).await;
    }

    if let Commands::Hospitals {
        condition: Some(condition),
        location,
        lat,
        lon,
        radius,
        json,
        ..
    } = &cli.command
    {
        let origin = resolve_origin(location.as_deref(), *lat, *lon).await?;
        let item = DiagnosisItem::new(condition.clone(), 1);
        return cmd_hospitals(&item, origin, *radius, *json).await;
    }

    let corpus = load_corpus_source(cli.corpus.as_deref())?;

    if let Commands::BuildIndex { chunk_size, overlap } = &cli.command {
        let target = (!cli.memory).then_some(index_path.as_path());
        return cmd_build_index(&corpus, &settings, embedder.as_ref(), *chunk_size, *overlap, target).await;
    }

    let index = open_index(
        &corpus,
        settings.pipeline.chunking,
        embedder.as_ref(),
        &index_path,
        cli.memory,
    )
    .await?;

    match cli.command {
        Commands::Diagnose { note, file, k, json } => {
            let config = match k {
                Some(k) => settings.pipeline.clone().with_top_k(k),
                None => settings.pipeline.clone(),
            };
            let pipeline = build_pipeline(&settings, embedder, index, config)?;
            let note = read_note(note, file)?;
            cmd_diagnose(&pipeline, &note, json).await?;
        }
        Commands::Search { query, k } => {
            cmd_search(&index, embedder.as_ref(), &query, k).await?;
        }
        Commands::Corpus => {
            cmd_corpus(&index);
        }
        Commands::Interactive => {
            let pipeline = build_pipeline(&settings, embedder, index, settings.pipeline.clone())?;
            cmd_interactive(pipeline).await?;
        }
        Commands::Hospitals {
            note,
            location,
            lat,
            lon,
            radius,
            json,
            ..
        } => {
            let origin = resolve_origin(location.as_deref(), lat, lon).await?;
            let pipeline = build_pipeline(&settings, embedder, index, settings.pipeline.clone())?;
            let note = read_note(note, None)?;
            let result = pipeline.run_pipeline(&note).await;
            if let Some(failure) = &result.failure {
                anyhow::bail!(
                    "Pipeline failed during {} ({}): {}",
                    failure.stage,
                    failure.kind,
                    failure.message
                );
            }
            let item = result
                .top_item()
                .context("No diagnosis to route; try --condition")?;
            cmd_hospitals(item, origin, radius, json).await?;
        }
        Commands::BuildIndex { .. }
        | Commands::EmbeddingDim { .. }
        | Commands::ResetIndex
        | Commands::Health => {
            // Handled before index setup.
        }
    }

    Ok(())
}

fn default_index_path() -> Result<PathBuf> {
    let mut path = dirs::home_dir().context("Could not find home directory")?;
    path.push(".healthguard");
    path.push("index.json");
    Ok(path)
}

fn load_corpus_source(path: Option<&Path>) -> Result<Corpus> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read corpus: {}", path.display()))?;
            Corpus::from_json(&json)
                .with_context(|| format!("Failed to load corpus from: {}", path.display()))
        }
        None => Corpus::builtin().context("Failed to load built-in corpus"),
    }
}

/// Use the saved snapshot when it was built from this corpus and chunking
/// with the active embedder, else build in memory
async fn open_index(
    corpus: &Corpus,
    chunking: ChunkConfig,
    embedder: &dyn EmbeddingProvider,
    path: &Path,
    memory: bool,
) -> Result<IndexHandle> {
    if !memory && path.exists() {
        match load_index(path) {
            Ok(index)
                if index.model_id() != embedder.model_id()
                    || index.dimension() != embedder.dimensions() =>
            {
                warn!(
                    "Snapshot at {} was built with {}, building a fresh index",
                    path.display(),
                    index.model_id()
                )
            }
            Ok(index) if !index.is_built_from(corpus, chunking) => warn!(
                "Snapshot at {} does not match the corpus or chunking, building a fresh index",
                path.display()
            ),
            Ok(index) => {
                info!("Using index {} from {}", index.generation(), path.display());
                return Ok(index.into_handle());
            }
            Err(e) => warn!("Ignoring snapshot at {}: {}", path.display(), e),
        }
    }

    let index = EmbeddingIndex::build(corpus, chunking, embedder)
        .await
        .context("Failed to build index")?;
    Ok(index.into_handle())
}

fn build_pipeline(
    settings: &Settings,
    embedder: Arc<dyn EmbeddingProvider>,
    index: IndexHandle,
    config: PipelineConfig,
) -> Result<Pipeline> {
    let agent = settings.agent()?;
    Ok(Pipeline::new(agent, embedder, SharedIndex::from_handle(index), config)?)
}

fn read_note(note: Option<String>, file: Option<PathBuf>) -> Result<String> {
    let note = match (note, file) {
        (Some(note), _) => note,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read file: {}", path.display()))?,
        (None, None) => {
            eprintln!("Enter clinical note (Ctrl+D to finish):");
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    if note.trim().is_empty() {
        anyhow::bail!("Clinical note cannot be empty");
    }
    Ok(note)
}

async fn cmd_diagnose(pipeline: &Pipeline, note: &str, json: bool) -> Result<()> {
    let result = pipeline.run_pipeline(note).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if let Some(failure) = &result.failure {
        anyhow::bail!(
            "Pipeline failed during {} ({}): {}",
            failure.stage,
            failure.kind,
            failure.message
        );
    }
    Ok(())
}

fn print_result(result: &PipelineResult) {
    println!("Run {} ({} agent)", result.run_id, result.agent);
    println!("State: {}", result.state);

    if let Some(finding) = &result.finding {
        println!("\nFindings ({}):", finding.len());
        for (category, entry) in finding.entries() {
            let value = entry.value.as_deref().map(|v| format!(": {}", v)).unwrap_or_default();
            println!("  • {}{} [{}]", entry.name, value, category);
        }
    }

    if let Some(retrieval) = &result.retrieval {
        println!("\nEvidence ({}):", retrieval.len());
        for evidence in &retrieval.evidence {
            println!(
                "  {}. {} {} (score {:.3})",
                evidence.result.rank,
                evidence.title,
                evidence.citation(),
                evidence.result.score
            );
        }
    }

    if result.is_done() {
        println!("\nDiagnosis:");
        for validated in &result.diagnosis {
            let item = &validated.item;
            let confidence = item.confidence.map(|c| format!(" ({})", c)).unwrap_or_default();
            let mark = match &validated.status {
                ItemStatus::Verified => "✓ verified".to_string(),
                ItemStatus::Unverified { reasons } => format!("✗ unverified: {}", reasons.join("; ")),
            };
            println!("  {}. {}{} {}", item.rank, item.condition_name, confidence, mark);
            if !item.rationale.is_empty() {
                println!("     {}", item.rationale);
            }
            for citation in &item.citations {
                println!("     cites {}", citation);
            }
        }
        if !result.rejected.is_empty() {
            println!("\nRejected ({}):", result.rejected.len());
            for validated in &result.rejected {
                println!("  • {}", validated.item.condition_name);
            }
        }
        if result.no_supported_diagnosis() {
            println!("\nNo supported diagnosis: no condition is backed by retrieved evidence.");
        }
    }
}

async fn cmd_search(
    index: &IndexHandle,
    embedder: &dyn EmbeddingProvider,
    query: &str,
    k: usize,
) -> Result<()> {
    let results = index.query(query, embedder, k).await?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} results:\n", results.len());

    for r in &results {
        let title = index
            .document(&r.document_id)
            .map(|doc| doc.title.as_str())
            .unwrap_or("(untitled)");
        println!("{}. {} (score {:.3})", r.rank, title, r.score);
        println!("   Chunk: {}", r.chunk_id);

        if let Some(chunk) = index.chunk(&r.chunk_id) {
            let preview: String = chunk.text.chars().take(200).collect();
            let more = if chunk.text.chars().count() > 200 { "..." } else { "" };
            println!("   {}{}", preview, more);
        }
        println!();
    }

    Ok(())
}

fn cmd_corpus(index: &IndexHandle) {
    let chunking = index.chunking();
    println!(
        "Corpus: {} documents, {} chunks (model {}, dim {})",
        index.documents().len(),
        index.len(),
        index.model_id(),
        index.dimension()
    );
    println!(
        "Index {} built {} (chunk size {}, overlap {})\n",
        index.generation(),
        index.built_at().format("%Y-%m-%d %H:%M:%S UTC"),
        chunking.chunk_size,
        chunking.overlap
    );

    for doc in index.documents() {
        println!("• {} [{}] {} chunks", doc.title, doc.id, index.chunk_count(&doc.id));
        println!("  {}", doc.source_ref);
    }
}

async fn cmd_build_index(
    corpus: &Corpus,
    settings: &Settings,
    embedder: &dyn EmbeddingProvider,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
    target: Option<&Path>,
) -> Result<()> {
    let defaults = settings.pipeline.chunking;
    let chunking = ChunkConfig::new(
        chunk_size.unwrap_or(defaults.chunk_size),
        overlap.unwrap_or(defaults.overlap),
    )
    .context("Invalid chunking")?;

    let index = EmbeddingIndex::build(corpus, chunking, embedder)
        .await
        .context("Failed to build index")?;

    println!(
        "✓ Built index {} ({} chunks from {} documents)",
        index.generation(),
        index.len(),
        index.documents().len()
    );

    match target {
        Some(path) => {
            save_index(&index, path)
                .with_context(|| format!("Failed to save index to {}", path.display()))?;
            println!("✓ Saved to {}", path.display());
        }
        None => println!("In-memory index, not saved"),
    }

    Ok(())
}

async fn cmd_embedding_dim(embedder: &dyn EmbeddingProvider, text: Option<&str>) -> Result<()> {
    let probe = text.unwrap_or("dimension probe");
    let embedding = embedder.embed(probe).await.with_context(|| {
        format!("Embeddings provider {} is not reachable", embedder.model_id())
    })?;
    println!("Model: {}", embedder.model_id());
    println!("Embedding dimension: {}", embedding.len());
    Ok(())
}

async fn cmd_health(settings: &Settings) -> Result<()> {
    let mut healthy = true;

    match settings.embedding.remote_client() {
        Some(client) => {
            let ok = client.health().await.unwrap_or(false);
            healthy &= ok;
            let mark = if ok { "✓" } else { "✗" };
            println!("{} Embeddings ({}): {}", mark, client.model_id(), client.base_url());
        }
        None => println!("✓ Embeddings: offline hashing embedder"),
    }

    match &settings.llm {
        Some(llm) => {
            let client = llm.client();
            let ok = client.health().await.unwrap_or(false);
            healthy &= ok;
            let mark = if ok { "✓" } else { "✗" };
            println!("{} LLM ({}): {}", mark, llm.model, client.base_url());
        }
        None => println!("- LLM: not configured, using the rule-based agent"),
    }

    if !healthy {
        anyhow::bail!("One or more services are unavailable");
    }
    Ok(())
}

async fn resolve_origin(location: Option<&str>, lat: Option<f64>, lon: Option<f64>) -> Result<GeoPoint> {
    match (location, lat, lon) {
        (_, Some(lat), Some(lon)) => Ok(GeoPoint::new(lat, lon)?),
        (Some(place), _, _) => {
            let finder = CareFinder::from_env()?;
            finder
                .geocode(place)
                .await
                .with_context(|| format!("Failed to geocode {}", place))?
                .with_context(|| format!("Location not found: {}", place))
        }
        _ => anyhow::bail!("Provide --location or both --lat and --lon"),
    }
}

async fn cmd_hospitals(item: &DiagnosisItem, origin: GeoPoint, radius_km: f64, json: bool) -> Result<()> {
    let finder = CareFinder::from_env()?;
    let report = finder
        .recommend(item, origin, radius_km)
        .await
        .with_context(|| format!("Facility search failed at {}", finder.overpass_url()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_care_report(&report);
    }
    Ok(())
}

fn print_care_report(report: &CareReport) {
    let care = &report.recommendation;
    println!("Condition: {}", care.condition);
    println!("Specialty: {}", care.specialty);
    println!("Urgency: {}", care.urgency);

    if report.facilities.is_empty() {
        println!(
            "\nNo hospitals or clinics found within {} km. Try a larger radius or another location.",
            report.radius_km
        );
        return;
    }

    println!("\nFound {} facilities within {} km:\n", report.facilities.len(), report.radius_km);
    for (i, facility) in report.facilities.iter().enumerate() {
        let mut flags = Vec::new();
        if facility.specialty_match {
            flags.push("specialty match");
        }
        if facility.emergency {
            flags.push("emergency");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!("{}. {} ({}) {:.2} km{}", i + 1, facility.name, facility.kind, facility.distance_km, flags);
        for line in [&facility.address, &facility.phone, &facility.website].into_iter().flatten() {
            println!("   {}", line);
        }
    }
}

fn cmd_reset_index(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("Failed to remove index at {}", path.display()))?;
        println!("✓ Removed index at {}", path.display());
    } else {
        println!("Index not found at {}, nothing to remove", path.display());
    }
    Ok(())
}

async fn cmd_interactive(pipeline: Pipeline) -> Result<()> {
    println!("HealthGuard - Interactive Mode");
    println!("Commands: diagnose, search, corpus, help, quit");
    println!();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("healthguard> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break; // EOF
        }

        let (cmd, arg) = match line.trim().split_once(' ') {
            Some((cmd, arg)) => (cmd, arg.trim()),
            None => (line.trim(), ""),
        };

        match cmd {
            "" => continue,

            "diagnose" | "d" => {
                if arg.is_empty() {
                    println!("Usage: diagnose <note>");
                    continue;
                }
                let result = pipeline.run_pipeline(arg).await;
                print_result(&result);
                if let Some(failure) = &result.failure {
                    println!("Failed during {} ({}): {}", failure.stage, failure.kind, failure.message);
                }
            }

            "search" | "s" => {
                if arg.is_empty() {
                    println!("Usage: search <query>");
                    continue;
                }
                let index = pipeline.index().current().await;
                if let Err(e) = cmd_search(&index, pipeline.embedder().as_ref(), arg, 5).await {
                    println!("Error: {}", e);
                }
            }

            "corpus" | "c" => {
                cmd_corpus(&pipeline.index().current().await);
            }

            "help" | "h" | "?" => {
                println!("Commands:");
                println!("  diagnose <note>  - Run the pipeline on a note");
                println!("  search <query>   - Search the literature");
                println!("  corpus           - List indexed documents");
                println!("  quit             - Exit");
            }

            "quit" | "q" | "exit" => {
                println!("Goodbye!");
                break;
            }

            _ => {
                println!("Unknown command: {}. Type 'help' for available commands.", cmd);
            }
        }

        println!();
    }

    Ok(())
}
