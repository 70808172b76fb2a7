mod cli;
mod upload;

use std::path::Path;

use clap::Parser;
use credstore_core::config::Config;
use credstore_core::error::Result;
use credstore_datastore::open_datastore;
use tracing_subscriber::EnvFilter;

use crate::cli::Args;
use crate::upload::UploadRequest;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // usage errors exit with code 2 before anything is opened
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(key) => println!("{key}"),
        Err(e) => {
            eprintln!("fatal: {e}");
            std::process::exit(1);
        }
    }
}

async fn run(args: Args) -> Result<String> {
    let mut config = Config::load(Path::new(&args.config))?;
    args.apply_overrides(&mut config);

    let backend = args.backend();
    let store = open_datastore(backend, &config)?;
    tracing::info!(%backend, file = %args.file, "uploading");

    let contents = upload::load_source(&args.file, &config).await?;
    let request = UploadRequest {
        key: args.key,
        email: args.email,
        encode_key: args.encode_key,
    };
    upload::upload(store.as_ref(), &request, &contents).await
}
