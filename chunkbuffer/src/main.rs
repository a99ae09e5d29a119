use anyhow::Context;
use chunkbuffer::{ChunkBuffer, ChunkBufferConfig, FilePile, Pile, S3Config, S3Pile};
use clap::Parser;
use cli::{Args, Backend, Command};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the data stream; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = ChunkBufferConfig::default()
        .with_chunk_size(args.chunk_size)
        .with_workers(args.workers);
    let pile = open_pile(&args).await?;

    match &args.command {
        Command::Put { name } => {
            let mut buf = ChunkBuffer::with_config(name.as_str(), pile, config)?;
            let mut stdin = tokio::io::stdin();
            let copied = buf
                .copy_from(&mut stdin)
                .await
                .with_context(|| format!("failed to write buffer {name}"))?;
            buf.close()
                .await
                .with_context(|| format!("failed to close buffer {name}"))?;
            info!(name = %name, bytes = copied, "stored buffer");
        }
        Command::Get { name } => {
            let mut buf = ChunkBuffer::with_config(name.as_str(), pile, config)?;
            let mut stdout = tokio::io::stdout();
            let mut chunk = vec![0u8; config.read_size];
            loop {
                let n = buf
                    .read(&mut chunk)
                    .await
                    .with_context(|| format!("failed to read buffer {name}"))?;
                if n == 0 {
                    break;
                }
                stdout.write_all(&chunk[..n]).await?;
            }
            stdout.flush().await?;
            info!(name = %name, bytes = buf.bytes_read(), "read buffer");
        }
    }
    Ok(())
}

async fn open_pile(args: &Args) -> anyhow::Result<Arc<dyn Pile>> {
    Ok(match args.backend {
        Backend::Fs => {
            let pile = match &args.root {
                Some(root) => FilePile::new(root),
                None => FilePile::temp(),
            };
            info!("using filesystem pile at {}", pile.root().display());
            Arc::new(pile)
        }
        Backend::S3 => {
            let bucket = args
                .bucket
                .clone()
                .context("the s3 backend needs --bucket")?;
            let config = S3Config {
                bucket,
                region: args.region.clone(),
                endpoint_url: args.endpoint.clone(),
                force_path_style: args.path_style,
                ..S3Config::default()
            };
            info!("using s3 pile in bucket {}", config.bucket);
            Arc::new(S3Pile::connect(config).await)
        }
    })
}
