use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub(crate) struct Args {
    /// Pile backend holding the chunks
    #[arg(short, long, env = "CHUNKBUFFER_BACKEND", value_enum, default_value_t = Backend::Fs)]
    pub(crate) backend: Backend,

    /// Base directory of the filesystem pile (defaults to the temp dir)
    #[arg(long, env = "CHUNKBUFFER_ROOT")]
    pub(crate) root: Option<PathBuf>,

    /// Bucket of the S3 pile
    #[arg(long, env = "CHUNKBUFFER_S3_BUCKET", required_if_eq("backend", "s3"))]
    pub(crate) bucket: Option<String>,

    /// S3 region
    #[arg(long, env = "CHUNKBUFFER_S3_REGION")]
    pub(crate) region: Option<String>,

    /// Custom S3 endpoint, e.g. a local MinIO
    #[arg(long, env = "CHUNKBUFFER_S3_ENDPOINT")]
    pub(crate) endpoint: Option<String>,

    /// Use path-style bucket addressing
    #[arg(long, env = "CHUNKBUFFER_S3_PATH_STYLE")]
    pub(crate) path_style: bool,

    /// Chunk size in bytes
    #[arg(long, env = "CHUNKBUFFER_CHUNK_SIZE", default_value_t = chunkbuffer::config::DEFAULT_CHUNK_SIZE)]
    pub(crate) chunk_size: u64,

    /// Parallel fetch workers when reading
    #[arg(long, env = "CHUNKBUFFER_WORKERS", default_value_t = chunkbuffer::config::DEFAULT_WORKERS)]
    pub(crate) workers: usize,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Stream stdin into a buffer
    Put { name: String },
    /// Stream a buffer to stdout
    Get { name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Backend {
    Fs,
    S3,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_put_fs() {
        let args = Args::try_parse_from([
            "chunkbuffer",
            "--root",
            "/tmp/piles",
            "--chunk-size",
            "1024",
            "put",
            "logs",
        ])
        .unwrap();
        assert_eq!(args.backend, Backend::Fs);
        assert_eq!(args.chunk_size, 1024);
        assert!(matches!(args.command, Command::Put { ref name } if name == "logs"));
    }

    #[test]
    fn test_s3_requires_bucket() {
        let res = Args::try_parse_from(["chunkbuffer", "--backend", "s3", "get", "logs"]);
        // The bucket may come from the environment when the test runs.
        if std::env::var_os("CHUNKBUFFER_S3_BUCKET").is_none() {
            assert!(res.is_err());
        }
    }
}
