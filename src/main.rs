use anyhow::Context;
use aspectcore::config::{ConfigLoader, RuntimeConfig};
use aspectcore::logging::init_logging;
use aspectcore::pointcut::{Joinpoint, PointcutPattern};
use aspectcore::wildcard::WildcardPattern;
use clap::{Args, Parser, Subcommand};

/// aspectcore 命令行
#[derive(Parser, Debug)]
#[command(author, version, about = "Wildcard and pointcut tooling for aspectcore rule sets", long_about = None)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Match an input against a wildcard pattern and print its groups
    #[command(alias = "m")]
    Match(MatchArgs),

    /// Evaluate a pointcut pattern against a join-point
    #[command(alias = "pc")]
    Pointcut(PointcutArgs),

    /// Print the effective settings as TOML
    Config,
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// Wildcard pattern (`*`, `?`, `+`, `**`, `\` escapes)
    pattern: String,

    /// Input to test
    input: String,

    /// Separator that single wildcards do not cross
    #[arg(short, long)]
    separator: Option<String>,

    /// Print groups last to first
    #[arg(short, long)]
    reverse: bool,
}

#[derive(Args, Debug)]
struct PointcutArgs {
    /// Container (activity) pattern
    #[arg(long = "container-pattern")]
    container_pattern: Option<String>,

    /// Provider pattern; prefix with `class:` to match the class name
    #[arg(long = "provider-pattern")]
    provider_pattern: Option<String>,

    /// Operation pattern
    #[arg(long = "operation-pattern")]
    operation_pattern: Option<String>,

    #[arg(long)]
    container: Option<String>,

    #[arg(long = "provider-id", default_value = "")]
    provider_id: String,

    #[arg(long = "provider-class", default_value = "")]
    provider_class: String,

    #[arg(long, default_value = "")]
    operation: String,
}

fn load_config(path: Option<&str>) -> anyhow::Result<RuntimeConfig> {
    let loader = match path {
        Some(path) => ConfigLoader::with_config_file(path),
        None => ConfigLoader::new(),
    };
    loader
        .load_config()
        .with_context(|| format!("loading settings from {}", loader.config_path().display()))
}

fn run_match(args: &MatchArgs) -> anyhow::Result<()> {
    let pattern = match &args.separator {
        Some(separator) => WildcardPattern::with_separator(&args.pattern, separator),
        None => WildcardPattern::compile(&args.pattern),
    }
    .with_context(|| format!("compiling pattern '{}'", args.pattern))?;

    let Some(matched) = pattern.captures(&args.input) else {
        println!("no match");
        return Ok(());
    };

    println!("match ({} group(s))", matched.group_count());
    let groups: Vec<&str> = if args.reverse {
        matched.groups().rev().collect()
    } else {
        matched.groups().collect()
    };
    for (index, group) in groups.iter().enumerate() {
        println!("  [{}] {:?}", index, group);
    }
    Ok(())
}

fn run_pointcut(args: &PointcutArgs) -> anyhow::Result<()> {
    let pattern = PointcutPattern::new(
        args.container_pattern.as_deref(),
        args.provider_pattern.as_deref(),
        args.operation_pattern.as_deref(),
    )
    .context("compiling pointcut pattern")?;

    let joinpoint = Joinpoint::operation(&args.provider_id, &args.provider_class, &args.operation)
        .with_container(args.container.as_deref());

    match pattern.captures(&joinpoint) {
        Some(matched) => {
            println!("match");
            println!("  container: {:?}", matched.container);
            println!("  provider:  {:?}", matched.provider);
            println!("  operation: {:?}", matched.operation);
        }
        None => println!("no match"),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // 订阅者已存在时忽略
    let _ = init_logging(config.logging.to_logging_config()?);
    tracing::debug!("Running {:?}", cli.command);

    match &cli.command {
        Command::Match(args) => run_match(args),
        Command::Pointcut(args) => run_pointcut(args),
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
