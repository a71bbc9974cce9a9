use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::machine::ScriptMachine;
use crate::thread::ScmThread;

/// Persistent script state: global memory plus every live thread.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScriptSnapshot {
    pub globals: Vec<u8>,
    pub threads: Vec<ScmThread>,
}

impl ScriptSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut rdr = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let mut buffer = Vec::new();
        rdr.read_to_end(&mut buffer)?;
        Self::from_bytes(&buffer)
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let buffer = self.to_bytes()?;
        let mut wtr = File::create(path)?;
        wtr.write_all(&buffer)?;
        Ok(())
    }
}

impl<C> ScriptMachine<C> {
    /// Capture globals and threads, including ones not yet promoted.
    pub fn snapshot(&self) -> ScriptSnapshot {
        ScriptSnapshot {
            globals: self.globals.clone(),
            threads: self.threads.iter().chain(&self.pending).cloned().collect(),
        }
    }

    /// Replace globals and threads with a snapshot taken from the same file.
    ///
    /// Refused while a thread is executing.
    pub fn restore(&mut self, snapshot: ScriptSnapshot) -> Result<()> {
        if self.running.is_some() {
            bail!("cannot restore script state from inside an opcode handler");
        }
        if snapshot.globals.len() != self.globals.len() {
            bail!(
                "snapshot has {} bytes of globals, script expects {}",
                snapshot.globals.len(),
                self.globals.len()
            );
        }
        if let Some(bad) = snapshot.threads.iter().find(|t| !t.locals_are_valid()) {
            bail!("snapshot thread {} has a corrupt frame", bad.name());
        }

        log::info!("restoring {} script threads", snapshot.threads.len());
        self.globals = snapshot.globals;
        self.threads = snapshot.threads;
        self.pending.clear();
        Ok(())
    }
}
