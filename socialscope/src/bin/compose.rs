//! One-shot pipeline run from the command line, for checking credentials and prompts
//! without starting the server.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use common::Config;

use socialscope::pipeline::{Pipeline, PostRequest};

#[derive(Parser, Debug)]
#[command(name = "compose", about = "Generate one social post and print it")]
struct Args {
    /// Topic to search news for
    topic: String,

    /// Target platform, e.g. LinkedIn, X, Instagram
    #[arg(long, default_value = "LinkedIn")]
    platform: String,

    /// Number of articles to use
    #[arg(long)]
    articles: Option<usize>,

    /// Also generate an image (printed as a data URI length only)
    #[arg(long)]
    image: bool,

    /// Path to config.toml
    #[arg(long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();
    let args = Args::parse();

    let default_path = PathBuf::from("config.default.toml");
    let config = Config::load_with_defaults(Some(default_path.as_path()), Some(args.config.as_path())).await?;
    let request = PostRequest::validated(
        &args.topic,
        &args.platform,
        args.image,
        args.articles,
        config.pipeline.max_article_count,
    )
    .map_err(anyhow::Error::msg)?;
    let pipeline = Pipeline::from_config(&config)?;

    println!("\n{}", "=".repeat(60));
    println!("Topic: {}", request.topic);
    println!("Platform: {}", request.platform);
    println!("{}", "=".repeat(60));

    match pipeline.generate(&request).await {
        Ok(post) => {
            println!("\n{}\n", post.text);
            match post.image_data_uri {
                Some(uri) => println!("[image: {} byte data URI]", uri.len()),
                None if request.include_image => println!("[image: not generated]"),
                None => {}
            }
        }
        Err(e) => {
            eprintln!("✗ Failed: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
