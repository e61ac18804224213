use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use log::{error, info};
use minigen_export::{ModelShape, init_model};
use minigen_inference::{InferenceConfigBuilder, run_inference};

/// Define the init subcommand.
fn init_subcommand() -> Command {
    Command::new("init")
        .about("Write a randomly initialised model artifact for a vocabulary")
        .arg(Arg::new("VOCAB_PATH")
            .help("Vocabulary source: JSON with word_to_id, JSON word array, or a plain word list")
            .required(true)
            .index(1))
        .arg(Arg::new("OUTPUT_PATH")
            .help("Output checkpoint path; the vocabulary is written next to it as <OUTPUT_PATH>.vocab.json")
            .required(true)
            .index(2))
        .arg(Arg::new("dim")
            .long("dim")
            .short('d')
            .help("Embedding dimension")
            .value_name("INT")
            .default_value("64")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("hidden")
            .long("hidden")
            .help("Feed-forward hidden dimension")
            .value_name("INT")
            .default_value("256")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("blocks")
            .long("blocks")
            .short('b')
            .help("Number of transformer blocks")
            .value_name("INT")
            .default_value("2")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("heads")
            .long("heads")
            .help("Number of attention heads, must divide dim")
            .value_name("INT")
            .default_value("4")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("context")
            .long("context")
            .short('c')
            .help("Maximum context length")
            .value_name("INT")
            .default_value("32")
            .value_parser(clap::value_parser!(usize)))
        .arg(Arg::new("seed")
            .long("seed")
            .short('s')
            .help("Random seed for weight initialisation")
            .value_name("INT")
            .default_value("42")
            .value_parser(clap::value_parser!(u64)))
}

/// Define the generate subcommand.
fn generate_subcommand() -> Command {
    Command::new("generate")
        .about("Generate text from a prompt")
        .arg(
            Arg::new("checkpoint")
                .help("Model checkpoint file")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("input")
                .short('i')
                .long("input")
                .value_name("STRING")
                .help("Input prompt; lines are read from stdin when omitted"),
        )
        .arg(
            Arg::new("max-new-tokens")
                .short('n')
                .long("max-new-tokens")
                .value_name("INT")
                .help("Maximum number of generated tokens, default 64")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("temperature")
                .short('t')
                .long("temperature")
                .value_name("FLOAT")
                .help("Temperature for sampling in [0, inf], 0 is greedy, default 1.0")
                .default_value("1.0")
                .value_parser(clap::value_parser!(f32)),
        )
        .arg(
            Arg::new("seed")
                .short('s')
                .long("seed")
                .value_name("INT")
                .help("Random seed")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("context")
                .short('c')
                .long("context")
                .value_name("INT")
                .help("Context window size, (default) = max_context_length")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("heads")
                .long("heads")
                .value_name("INT")
                .help("Attention heads, (default) = checkpoint metadata or 4")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .value_name("INT")
                .help("Per-request time budget in milliseconds")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("max-chars")
                .long("max-chars")
                .value_name("INT")
                .help("Maximum characters of returned text, default 2000")
                .value_parser(clap::value_parser!(usize)),
        )
}

/// Run the init command with the provided arguments
fn run_init_command(matches: &ArgMatches) -> Result<()> {
    let vocab_path = matches.get_one::<String>("VOCAB_PATH").map(String::as_str).unwrap_or_default();
    let output_path = matches.get_one::<String>("OUTPUT_PATH").map(String::as_str).unwrap_or_default();
    let seed = matches.get_one::<u64>("seed").copied().unwrap_or_default();

    if !Path::new(vocab_path).exists() {
        anyhow::bail!("Vocabulary file does not exist: {vocab_path}");
    }

    let value = |name: &str| matches.get_one::<usize>(name).copied().unwrap_or_default();
    let shape = ModelShape {
        dim: value("dim"),
        hidden_dim: value("hidden"),
        n_blocks: value("blocks"),
        n_heads: value("heads"),
        max_context_length: value("context"),
    };

    info!("");
    info!("🚀 minigen model initialiser");
    info!("📁 Vocabulary: {vocab_path}");
    info!("💾 Output path: {output_path}");
    info!("🔢 Shape: {shape:?}, seed {seed}\n");

    init_model(vocab_path, output_path, shape, seed)
}

/// Run the generate command with the provided arguments
fn run_generate_command(matches: &ArgMatches) -> Result<()> {
    let config = InferenceConfigBuilder::default()
        .checkpoint_path(matches.get_one::<String>("checkpoint"))
        .prompt(matches.get_one::<String>("input"))
        .max_new_tokens(matches.get_one::<usize>("max-new-tokens").copied())
        .temperature(matches.get_one::<f32>("temperature").copied())
        .seed(matches.get_one::<u64>("seed").copied())
        .ctx_length(matches.get_one::<usize>("context").copied())
        .n_heads(matches.get_one::<usize>("heads").copied())
        .timeout(matches.get_one::<u64>("timeout-ms").map(|ms| Duration::from_millis(*ms)))
        .max_output_chars(matches.get_one::<usize>("max-chars").copied())
        .build()
        .map_err(|e| anyhow::anyhow!(e))?;

    run_inference(config).map_err(|e| anyhow::anyhow!("Generation failed: {e:#}"))?;

    Ok(())
}

fn execute_commands() -> Result<()> {
    // Initialize logger with clean format (no timestamp/module prefix)
    env_logger::Builder::from_default_env()
        .format(|buf, record| {
            use std::io::Write;
            writeln!(buf, "{}", record.args())
        })
        .init();

    let matches = Command::new("minigen")
        .about("minigen CLI: initialise and run small word-level transformer models")
        .subcommand(init_subcommand())
        .subcommand(generate_subcommand())
        .get_matches();

    match matches.subcommand() {
        Some(("init", matches)) => run_init_command(matches),
        Some(("generate", matches)) => run_generate_command(matches),
        _ => anyhow::bail!("No subcommand specified. Use -h to print help information."),
    }
}

fn main() {
    if let Err(e) = execute_commands() {
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}
