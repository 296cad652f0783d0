//! Basic image generation example.
//!
//! Run with: `cargo run --example generate_image -- "a lighthouse in a storm"`
//!
//! Requires `STABILITY_API_KEY` (or `BFL_API_KEY` with `PROVIDER=bfl`).

use mcp_images::{describe_result, Generator, GeneratorConfig};

#[tokio::main]
async fn main() -> mcp_images::Result<()> {
    let prompt = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "A golden retriever puppy playing in snow".to_string());
    let provider = std::env::var("PROVIDER").unwrap_or_else(|_| "stability".to_string());

    let generator = Generator::new(GeneratorConfig::from_env());
    let request = generator
        .request(prompt)
        .with_provider(provider)
        .with_aspect_ratio("16:9")
        .with_filename_template("{{.Timestamp}}-{{.Provider}}-{{.Subject}}");

    let result = generator.run(&request).await?;
    println!("{}", describe_result(&result));

    Ok(())
}
