//! Curator CLI: fragment daemon and store administration.
//!
//! Usage:
//!   curator run [--dataset path] [--config path] [--db path]
//!   curator startup
//!   curator fragment <subcommand>
//!   curator sink <subcommand>

use clap::{Parser, Subcommand};
use curator::config::default_db_path;
use curator::{
    CancellationToken, Curator, CuratorConfig, DatasetResolver, FragmentId, OpenStore, PatternSet,
    PluginCatalog, PullOutcome, SinkId, SinkRequest, Slot, SqliteStore, TriplePattern,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(
    name = "curator",
    version,
    about = "Fragment collection and consumption engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Path to SQLite database file (overrides the config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// JSON triple dataset to resolve patterns against
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,
    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean up and run the scheduler until Ctrl-C
    Run,
    /// Clear locks, pulling flags and stream buffers left by a previous process
    Startup,
    /// Manage fragments
    Fragment {
        #[command(subcommand)]
        action: FragmentAction,
    },
    /// Manage sinks
    Sink {
        #[command(subcommand)]
        action: SinkAction,
    },
}

#[derive(Subcommand)]
enum FragmentAction {
    /// Register a pattern set and subscribe a first sink to it, one
    /// "subject predicate object" per argument
    ///
    /// `?name` is a variable, `"text"` a literal, anything else a value.
    Register {
        #[arg(required = true)]
        patterns: Vec<String>,
        /// Sink type of the first subscriber
        #[arg(long, default_value = "delivery")]
        sink_type: String,
        /// Pattern renaming, e.g. `p1=people`
        #[arg(long = "map")]
        mappings: Vec<String>,
    },
    /// List all fragments
    List,
    /// Show a fragment's contexts and sinks (wakes on-demand fragments)
    Show { id: String },
    /// Run one pull cycle now
    Pull { id: String },
}

#[derive(Subcommand)]
enum SinkAction {
    /// Subscribe to a fragment
    Create {
        fragment: String,
        /// Sink type, selects the delivering plugins
        #[arg(long, default_value = "delivery")]
        sink_type: String,
        /// Pattern renaming, e.g. `p1=people`
        #[arg(long = "map")]
        mappings: Vec<String>,
    },
    /// Cancel a sink; the last one destroys its fragment
    Cancel { id: String },
}

fn load_config(cli: &Cli) -> Result<CuratorConfig, String> {
    let mut config = match &cli.config {
        Some(path) => CuratorConfig::load(path).map_err(|e| e.to_string())?,
        None => CuratorConfig::default(),
    };
    if let Some(db) = &cli.db {
        config.db = Some(db.clone());
    }
    Ok(config)
}

fn open_curator(cli: &Cli) -> Result<Curator, String> {
    let config = load_config(cli)?;
    let db_path = config.db.clone().unwrap_or_else(default_db_path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let store = SqliteStore::open(&db_path).map_err(|e| format!("Failed to open database: {}", e))?;
    let resolver = match &cli.dataset {
        Some(path) => DatasetResolver::from_json_file(path).map_err(|e| e.to_string())?,
        None => DatasetResolver::new(),
    };
    Curator::from_config(
        Arc::new(store),
        Arc::new(resolver),
        config,
        &PluginCatalog::builtin(),
    )
    .map_err(|e| e.to_string())
}

fn parse_slot(term: &str) -> Slot {
    if let Some(name) = term.strip_prefix('?') {
        Slot::variable(name)
    } else if term.len() >= 2 && term.starts_with('"') && term.ends_with('"') {
        Slot::literal(&term[1..term.len() - 1])
    } else {
        Slot::value(term.trim_start_matches('<').trim_end_matches('>'))
    }
}

fn parse_pattern(raw: &str) -> Result<TriplePattern, String> {
    let parts: Vec<&str> = raw.split_whitespace().collect();
    match parts.as_slice() {
        [s, p, o] => Ok(TriplePattern::new(
            parse_slot(s),
            p.trim_start_matches('<').trim_end_matches('>'),
            parse_slot(o),
        )),
        _ => Err(format!("expected 'subject predicate object', got '{}'", raw)),
    }
}

fn sink_request(sink_type: &str, mappings: &[String]) -> Result<SinkRequest, String> {
    let mut request = SinkRequest::new(sink_type);
    for mapping in mappings {
        match mapping.split_once('=') {
            Some((from, to)) => request = request.with_mapping(from, to),
            None => return Err(format!("mapping '{}' is not of the form from=to", mapping)),
        }
    }
    Ok(request)
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))
}

fn cmd_run(curator: &Curator) -> i32 {
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if let Err(e) = curator.startup() {
        eprintln!("Error: {}", e);
        return 1;
    }
    rt.block_on(async {
        let token = CancellationToken::new();
        let signal = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, shutting down");
                signal.cancel();
            }
        });
        let outcomes = curator.run(token).await;
        tracing::info!(drained = outcomes.len(), "scheduler stopped");
    });
    0
}

fn cmd_startup(curator: &Curator) -> i32 {
    match curator.startup() {
        Ok(report) => {
            println!(
                "Cleared {} locks and {} transient keys",
                report.locks_cleared, report.transient_keys_cleared
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_fragment_register(curator: &Curator, raw: &[String], sink_type: &str, mappings: &[String]) -> i32 {
    let patterns: Result<PatternSet, String> = raw.iter().map(|p| parse_pattern(p)).collect();
    let (patterns, request) = match patterns.and_then(|p| Ok((p, sink_request(sink_type, mappings)?))) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match curator.subscribe(&patterns, request) {
        Ok(sub) if sub.created => {
            println!("Registered fragment {} with sink {}", sub.fragment, sub.sink.id);
            0
        }
        Ok(sub) => {
            println!(
                "Fragment {} already registered; created sink {} ({})",
                sub.fragment, sub.sink.id, sub.sink.status
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_fragment_list(curator: &Curator) -> i32 {
    let fragments = match curator.fragments() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    if fragments.is_empty() {
        println!("No fragments registered.");
        return 0;
    }
    println!("{:<36}  {:<9}  {:>8}  {:>5}", "ID", "STATE", "PATTERNS", "SINKS");
    println!("{}", "-".repeat(64));
    for f in fragments {
        println!(
            "{:<36}  {:<9}  {:>8}  {:>5}",
            f.id,
            f.state,
            f.patterns.len(),
            f.subscribers.len()
        );
    }
    0
}

fn cmd_fragment_show(curator: &Curator, id: &str) -> i32 {
    match curator.read_fragment(&FragmentId::from(id)) {
        Ok(view) => match serde_json::to_string_pretty(&view) {
            Ok(json) => {
                println!("{}", json);
                0
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_fragment_pull(curator: &Curator, id: &str) -> i32 {
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let outcome = rt.block_on(curator.pull(&FragmentId::from(id)));
    println!("{}", outcome);
    if matches!(outcome, PullOutcome::Deferred(_)) {
        2
    } else {
        0
    }
}

fn cmd_sink_create(curator: &Curator, fragment: &str, sink_type: &str, mappings: &[String]) -> i32 {
    let request = match sink_request(sink_type, mappings) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match curator.create_sink(&FragmentId::from(fragment), request) {
        Ok(sink) => {
            println!("Created sink {} ({})", sink.id, sink.status);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_sink_cancel(curator: &Curator, id: &str) -> i32 {
    let rt = match runtime() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match rt.block_on(curator.cancel_sink(&SinkId::from(id))) {
        Ok(cancelled) if cancelled.fragment_destroyed => {
            println!("Cancelled sink {}; fragment {} destroyed", id, cancelled.fragment);
            0
        }
        Ok(_) => {
            println!("Cancelled sink {}", id);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    curator::logging::init(&cli.log_level);

    let curator = match open_curator(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let code = match &cli.command {
        Commands::Run => cmd_run(&curator),
        Commands::Startup => cmd_startup(&curator),
        Commands::Fragment { action } => match action {
            FragmentAction::Register {
                patterns,
                sink_type,
                mappings,
            } => cmd_fragment_register(&curator, patterns, sink_type, mappings),
            FragmentAction::List => cmd_fragment_list(&curator),
            FragmentAction::Show { id } => cmd_fragment_show(&curator, id),
            FragmentAction::Pull { id } => cmd_fragment_pull(&curator, id),
        },
        Commands::Sink { action } => match action {
            SinkAction::Create {
                fragment,
                sink_type,
                mappings,
            } => cmd_sink_create(&curator, fragment, sink_type, mappings),
            SinkAction::Cancel { id } => cmd_sink_cancel(&curator, id),
        },
    };
    std::process::exit(code);
}
