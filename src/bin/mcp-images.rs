//! CLI for mcp-images: MCP server and one-shot image generation.

use clap::{Args, Parser, Subcommand, ValueEnum};
use mcp_images::image::ProviderKind;
use mcp_images::mcp::McpServer;
use mcp_images::{describe_result, Generator, GeneratorConfig};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mcp-images")]
#[command(about = "Generate images via Stability AI or Black Forest Labs, as an MCP server or from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Default output directory
    #[arg(long, global = true, env = "IMAGES_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Default filename template
    #[arg(long, global = true, env = "IMAGES_FILENAME_TEMPLATE")]
    filename_template: Option<String>,

    /// Per-request HTTP timeout in seconds
    #[arg(long, global = true, default_value_t = 120)]
    timeout: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as MCP server over stdio (default)
    Serve,

    /// Generate one image and save it
    Generate(GenerateArgs),

    /// List providers, models and API key status
    Providers,
}

#[derive(Args)]
struct GenerateArgs {
    /// The text prompt describing the image
    prompt: String,

    /// Provider to use
    #[arg(short, long, value_enum, default_value = "stability")]
    provider: ProviderArg,

    /// Model variant (provider default when omitted)
    #[arg(short, long)]
    model: Option<String>,

    /// What to keep out of the image
    #[arg(short, long)]
    negative_prompt: Option<String>,

    /// Aspect ratio, e.g. 16:9
    #[arg(short, long, default_value = "1:1")]
    aspect_ratio: String,

    /// Guidance scale (1-10)
    #[arg(short, long, alias = "cfg-scale")]
    guidance_scale: Option<f64>,

    /// Seed for reproducible generation
    #[arg(short, long)]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Stability,
    Bfl,
}

impl From<ProviderArg> for ProviderKind {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Stability => ProviderKind::Stability,
            ProviderArg::Bfl => ProviderKind::Bfl,
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // stdout carries JSON-RPC.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = GeneratorConfig::from_env().with_http_timeout(Duration::from_secs(cli.timeout));
    if let Some(dir) = cli.output_dir {
        config = config.with_output_dir(dir);
    }
    if let Some(template) = cli.filename_template {
        config = config.with_filename_template(template);
    }
    let generator = Generator::new(config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_mcp_server(generator).await?,
        Commands::Generate(args) => generate(&generator, args, cli.json).await?,
        Commands::Providers => list_providers(&generator, cli.json)?,
    }

    Ok(())
}

async fn run_mcp_server(generator: Generator) -> anyhow::Result<()> {
    tracing::info!("starting MCP server on stdio");
    McpServer::new(generator).run().await?;
    Ok(())
}

async fn generate(generator: &Generator, args: GenerateArgs, json_output: bool) -> anyhow::Result<()> {
    let provider: ProviderKind = args.provider.into();
    let mut request = generator
        .request(args.prompt)
        .with_provider(provider.as_str())
        .with_aspect_ratio(args.aspect_ratio);

    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    if let Some(negative) = args.negative_prompt {
        request = request.with_negative_prompt(negative);
    }
    if let Some(scale) = args.guidance_scale {
        request = request.with_guidance_scale(scale);
    }
    if let Some(seed) = args.seed {
        request = request.with_seed(seed);
    }

    let result = generator.run(&request).await?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", describe_result(&result));
    }
    Ok(())
}

fn list_providers(generator: &Generator, json_output: bool) -> anyhow::Result<()> {
    #[derive(serde::Serialize)]
    struct ProviderInfo {
        name: &'static str,
        kind: &'static str,
        env_var: &'static str,
        api_key_set: bool,
        default_model: &'static str,
        models: &'static [&'static str],
    }

    let providers: Vec<ProviderInfo> = ProviderKind::ALL
        .iter()
        .map(|kind| {
            let spec = generator.spec(*kind);
            ProviderInfo {
                name: kind.display_name(),
                kind: kind.as_str(),
                env_var: kind.api_key_env_var(),
                api_key_set: generator.config().is_configured(*kind),
                default_model: spec.default_model,
                models: spec.models,
            }
        })
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&providers)?);
    } else {
        println!("Available providers:\n");
        for p in &providers {
            let status = if p.api_key_set { "✓" } else { "✗" };
            println!("  {} {} ({})", status, p.name, p.kind);
            println!("    API key: {}", p.env_var);
            println!("    Models: {} (default {})", p.models.join(", "), p.default_model);
        }
    }

    Ok(())
}
