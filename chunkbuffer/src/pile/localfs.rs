//! Local directory pile: chunk `(name, part)` lives at `{root}/{name}/{part}`.
//!
//! A chunk is written to `{part}.partial` and renamed into place on close, so
//! readers never see a chunk that is still being written.

use super::{ChunkRead, ChunkWrite, Pile};
use crate::error::{ChunkBufferError, Result, io_error};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
};

#[derive(Clone, Debug)]
pub struct FilePile {
    root: PathBuf,
}

impl FilePile {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Pile rooted at the system temporary directory.
    pub fn temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str, part: u64) -> PathBuf {
        self.root.join(name).join(part.to_string())
    }
}

#[async_trait]
impl Pile for FilePile {
    async fn chunk_reader(&self, name: &str, part: u64) -> Result<Box<dyn ChunkRead>> {
        let path = self.path_for(name, part);
        let file = fs::File::open(&path)
            .await
            .map_err(|e| io_error(name, part, e))?;
        Ok(Box::new(FileChunkReader {
            name: name.to_string(),
            part,
            path,
            file: Some(file),
        }))
    }

    async fn chunk_writer(&self, name: &str, part: u64) -> Result<Box<dyn ChunkWrite>> {
        let path = self.path_for(name, part);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| ChunkBufferError::backend(name, part, e))?;
        }
        let partial = path.with_extension("partial");
        let file = fs::File::create(&partial)
            .await
            .map_err(|e| ChunkBufferError::backend(name, part, e))?;
        Ok(Box::new(FileChunkWriter {
            pile: self.clone(),
            name: name.to_string(),
            part,
            path,
            partial,
            file: Some(BufWriter::new(file)),
        }))
    }
}

struct FileChunkReader {
    name: String,
    part: u64,
    path: PathBuf,
    file: Option<fs::File>,
}

#[async_trait]
impl ChunkRead for FileChunkReader {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.file.as_mut() {
            Some(file) => file
                .read(buf)
                .await
                .map_err(|e| ChunkBufferError::backend(&self.name, self.part, e)),
            None => Ok(0),
        }
    }

    async fn last(&mut self) -> Result<bool> {
        match fs::metadata(&self.path).await {
            Ok(meta) => Ok(meta.len() == 0),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(ChunkBufferError::backend(&self.name, self.part, e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.file.take();
        Ok(())
    }
}

struct FileChunkWriter {
    pile: FilePile,
    name: String,
    part: u64,
    path: PathBuf,
    partial: PathBuf,
    file: Option<BufWriter<fs::File>>,
}

#[async_trait]
impl ChunkWrite for FileChunkWriter {
    async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Err(ChunkBufferError::backend(
                &self.name,
                self.part,
                "write to closed chunk",
            ));
        };
        file.write_all(buf)
            .await
            .map_err(|e| ChunkBufferError::backend(&self.name, self.part, e))?;
        Ok(buf.len())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| ChunkBufferError::backend(&self.name, self.part, e))?;
            file.shutdown()
                .await
                .map_err(|e| ChunkBufferError::backend(&self.name, self.part, e))?;
            fs::rename(&self.partial, &self.path)
                .await
                .map_err(|e| ChunkBufferError::backend(&self.name, self.part, e))?;
        }
        Ok(())
    }

    async fn set_last(&mut self) -> Result<()> {
        self.pile.mark_last(&self.name, self.part + 1).await
    }
}
