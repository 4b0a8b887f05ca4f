//! ontomem CLI: ontology-governed memory for LLM agents.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use ontomem::config::Settings;
use ontomem::graph::Format;
use ontomem::memory::Memory;

#[derive(Parser)]
#[command(name = "ontomem", version, about = "Ontology-governed RDF memory for LLM agents")]
struct Cli {
    /// Settings file (TOML).
    #[arg(long, short, global = true, default_value = "ontomem.toml")]
    config: PathBuf,

    /// Ontology file (Turtle), overriding the settings file.
    #[arg(long, global = true)]
    ontology: Option<PathBuf>,

    /// Memory group, e.g. a user or conversation id.
    #[arg(long, global = true)]
    id: Option<String>,

    /// Extra namespace binding, `prefix=iri`. Repeatable.
    #[arg(long = "prefix", global = true, value_parser = parse_prefix)]
    prefixes: Vec<(String, String)>,

    /// Keep everything in process, never touching a store.
    #[arg(long, global = true)]
    ephemeral: bool,

    /// Verbose logging, including prompts and generated instructions.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Commit the facts in a message to memory.
    Retain {
        /// Free-text message.
        message: String,
    },

    /// Summarize what is remembered, optionally focused on a question.
    Recall {
        /// Question or topic to focus on.
        message: Option<String>,
    },

    /// Print raw facts from the triple store.
    Query {
        /// Facts touching this IRI or CURIE.
        #[arg(long)]
        uri: Option<String>,

        /// Raw SPARQL query; takes precedence over --uri.
        #[arg(long)]
        sparql: Option<String>,
    },

    /// Load the group's memory from the triple store and render it.
    Render {
        /// turtle, ntriples, json-ld, text or dot.
        #[arg(long, default_value = "turtle")]
        format: Format,
    },

    /// Delete everything stored for the group.
    Forget,
}

fn parse_prefix(arg: &str) -> std::result::Result<(String, String), String> {
    match arg.split_once('=') {
        Some((prefix, iri)) if !prefix.is_empty() && !iri.is_empty() => {
            Ok((prefix.to_string(), iri.to_string()))
        }
        _ => Err(format!("expected prefix=iri, got \"{arg}\"")),
    }
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut settings = if cli.config.exists() {
        Settings::load(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "no settings file, using defaults");
        Settings::default()
    };
    if let Some(ontology) = cli.ontology {
        settings.ontology = Some(ontology);
    }
    for (prefix, iri) in cli.prefixes {
        settings.namespaces.insert(prefix, iri);
    }
    settings.memory.ephemeral |= cli.ephemeral;
    settings.memory.debug |= cli.debug;

    let mut memory = Memory::from_settings(&settings)?;
    let id = cli.id.as_deref();

    match cli.command {
        Commands::Retain { message } => {
            let report = memory.retain(&message, id)?;
            match &report.commit {
                Some(commit) if commit.succeeded => println!(
                    "Committed {} change(s) in {} attempt(s).",
                    commit.changed, commit.attempts
                ),
                Some(commit) => println!(
                    "Nothing committed after {} attempt(s): {}",
                    commit.attempts,
                    commit.last_error.as_deref().unwrap_or("unknown error")
                ),
                None => println!("Nothing committed: the text backend did not answer."),
            }
            if let Some(update) = &report.update {
                if update.removed > 0 {
                    println!("Retired {} superseded fact(s).", update.removed);
                }
                if !update.inconsistent_ids.is_empty() {
                    println!(
                        "Warning: {} fact(s) were removed from the triple store but are still indexed.",
                        update.inconsistent_ids.len()
                    );
                }
            }
            if settings.memory.ephemeral {
                print!("{}", memory.render(Format::Turtle)?);
            } else if !report.persisted {
                miette::bail!("the memory could not be persisted; see the log for details");
            }
        }

        Commands::Recall { message } => {
            println!("{}", memory.recall(message.as_deref(), id)?);
        }

        Commands::Query { uri, sparql } => {
            if uri.is_none() && sparql.is_none() {
                miette::bail!("give --uri or --sparql");
            }
            let facts = memory.query(id, uri.as_deref(), sparql.as_deref())?;
            for fact in &facts {
                println!("{fact}");
            }
            eprintln!("{} fact(s)", facts.len());
        }

        Commands::Render { format } => {
            if !settings.memory.ephemeral {
                memory.remember(id)?;
            }
            print!("{}", memory.render(format)?);
        }

        Commands::Forget => {
            memory.forget(id)?;
            println!("Forgot memory group {}.", id.unwrap_or("(default)"));
        }
    }

    std::io::Write::flush(&mut std::io::stdout()).into_diagnostic()?;
    Ok(())
}
