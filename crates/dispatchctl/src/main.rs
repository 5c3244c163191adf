use anyhow::Result;
use clap::Parser;
use dispatchctl::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .init();

    let output = dispatchctl::run(args).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
