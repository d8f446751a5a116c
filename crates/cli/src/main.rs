//! # imagemeta-cli
//!
//! Command-line front end for the `imagemeta` pipeline: alt text, dense
//! captions, and the full metadata record as JSON on stdout.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use imagemeta::{
    Backend, ImageReference, MetadataPipeline, MetadataPipelineBuilder, PipelineMode,
    PipelineOptions,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// --- CLI Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Image captioning and metadata extraction", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a one-sentence accessibility description
    AltText(AltTextArgs),
    /// Generate a caption for an image
    Caption(CaptionArgs),
    /// Run the metadata pipeline and print the full JSON record
    Metadata(MetadataArgs),
}

/// Exactly one image source must be given.
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct ImageArgs {
    /// HTTP/HTTPS URL of the image
    #[arg(long)]
    image_url: Option<String>,
    /// Local file path to the image
    #[arg(long)]
    file_path: Option<PathBuf>,
}

impl ImageArgs {
    fn into_reference(self) -> Result<ImageReference> {
        Ok(ImageReference::from_parts(self.image_url, self.file_path)?)
    }
}

#[derive(Args, Debug)]
struct AltTextArgs {
    #[command(flatten)]
    image: ImageArgs,
    /// Maximum number of words
    #[arg(long, default_value_t = 20)]
    max_words: usize,
    /// Model override for the caption backend
    #[arg(long)]
    model: Option<String>,
    /// Extra free-text context to bias the description
    #[arg(long)]
    context: Option<String>,
}

#[derive(Args, Debug)]
struct CaptionArgs {
    #[command(flatten)]
    image: ImageArgs,
    /// Custom captioning prompt
    #[arg(long)]
    prompt: Option<String>,
    /// Backend for the caption step: openrouter, local, or ollama
    #[arg(long, value_parser = parse_backend)]
    backend: Option<Backend>,
    /// Model override for the chosen backend
    #[arg(long)]
    model: Option<String>,
    /// Model id for the local backend
    #[arg(long)]
    local_model_id: Option<String>,
    /// Extra free-text context to bias the caption
    #[arg(long)]
    context: Option<String>,
}

#[derive(Args, Debug)]
struct MetadataArgs {
    #[command(flatten)]
    image: ImageArgs,
    /// Pipeline mode: double (text metadata) or triple (vision metadata)
    #[arg(long, default_value = "double", value_parser = parse_mode)]
    mode: PipelineMode,
    /// Existing dense caption; skips the caption generation step
    #[arg(long)]
    caption_override: Option<String>,
    /// Model config JSON merged over the defaults
    #[arg(long)]
    config_path: Option<PathBuf>,
    #[arg(long)]
    caption_model: Option<String>,
    #[arg(long)]
    metadata_text_model: Option<String>,
    #[arg(long)]
    metadata_vision_model: Option<String>,
    /// Extra free-text context to bias extraction
    #[arg(long)]
    context: Option<String>,
    /// Print compact JSON instead of pretty-printed
    #[arg(long)]
    compact: bool,
}

fn parse_backend(raw: &str) -> Result<Backend, String> {
    raw.parse::<Backend>().map_err(|e| e.to_string())
}

fn parse_mode(raw: &str) -> Result<PipelineMode, String> {
    raw.parse::<PipelineMode>().map_err(|e| e.to_string())
}

// --- Main Application Entry ---

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let pipeline: MetadataPipeline = MetadataPipelineBuilder::new().build()?;

    match cli.command {
        Commands::AltText(args) => {
            let image = args.image.into_reference()?;
            let opts = PipelineOptions {
                caption_model: args.model,
                context: args.context,
                max_alt_words: Some(args.max_words),
                ..Default::default()
            };
            let alt = pipeline.alt_text(&image, &opts).await?;
            println!("{alt}");
        }
        Commands::Caption(args) => {
            let image = args.image.into_reference()?;
            let opts = PipelineOptions {
                caption_backend: args.backend,
                caption_model: args.model,
                local_vlm_id: args.local_model_id,
                context: args.context,
                ..Default::default()
            };
            let caption = pipeline.caption(&image, args.prompt.as_deref(), &opts).await?;
            println!("{caption}");
        }
        Commands::Metadata(args) => {
            let image = args.image.into_reference()?;
            let opts = PipelineOptions {
                mode: args.mode,
                caption_override: args.caption_override,
                config_path: args.config_path,
                caption_model: args.caption_model,
                metadata_text_model: args.metadata_text_model,
                metadata_vision_model: args.metadata_vision_model,
                context: args.context,
                ..Default::default()
            };
            let output = pipeline.run(&image, &opts).await?;
            let rendered = if args.compact {
                serde_json::to_string(&output)?
            } else {
                serde_json::to_string_pretty(&output)?
            };
            println!("{rendered}");
        }
    }

    Ok(())
}
