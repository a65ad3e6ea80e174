//! Versioned, checksummed envelope for aggregate state.
//!
//! Layout: `b"RILS" | version: u8 | payload length: u64 LE | payload | crc32: u32 LE`
//! where the payload is the bincode encoding of a list of [`SavedAggregate`].

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::{Store, StoreState};
use crate::{EngineResult, PersistenceError, PersistenceResult};

const MAGIC: [u8; 4] = *b"RILS";
const FORMAT_VERSION: u8 = 1;

/// Persisted state of one aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedAggregate {
    /// Aggregate name within its store.
    pub name: String,
    /// Canonical type tag at save time.
    pub kind: String,
    /// Opaque state produced by the aggregate.
    pub state: Vec<u8>,
}

/// Writes a complete envelope.
pub fn write_envelope<W: Write>(
    mut writer: W,
    entries: &[SavedAggregate],
) -> PersistenceResult<()> {
    let payload = bincode::serialize(entries)?;
    writer.write_all(&MAGIC)?;
    writer.write_all(&[FORMAT_VERSION])?;
    writer.write_all(&(payload.len() as u64).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Reads and validates an envelope. Nothing is decoded before the length
/// and checksum have been verified.
pub fn read_envelope<R: Read>(mut reader: R) -> PersistenceResult<Vec<SavedAggregate>> {
    let mut magic = [0_u8; 4];
    read_exact(&mut reader, &mut magic)?;
    if magic != MAGIC {
        return Err(PersistenceError::BadMagic);
    }
    let mut version = [0_u8; 1];
    read_exact(&mut reader, &mut version)?;
    if version[0] != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(version[0]));
    }
    let mut length = [0_u8; 8];
    read_exact(&mut reader, &mut length)?;
    let length = u64::from_le_bytes(length);

    let mut payload = Vec::new();
    reader.by_ref().take(length).read_to_end(&mut payload)?;
    if (payload.len() as u64) < length {
        return Err(PersistenceError::Truncated);
    }
    let mut checksum = [0_u8; 4];
    read_exact(&mut reader, &mut checksum)?;
    let stored = u32::from_le_bytes(checksum);
    let computed = crc32fast::hash(&payload);
    if stored != computed {
        return Err(PersistenceError::ChecksumMismatch { stored, computed });
    }
    Ok(bincode::deserialize(&payload)?)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> PersistenceResult<()> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => PersistenceError::Truncated,
        _ => PersistenceError::Io(err),
    })
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_file(path: &Path, entries: &[SavedAggregate]) -> PersistenceResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    write_envelope(&mut writer, entries)?;
    writer.into_inner().map_err(|err| err.into_error())?.sync_all()?;
    Ok(())
}

impl StoreState {
    fn saved_aggregates(&self) -> PersistenceResult<Vec<SavedAggregate>> {
        self.slots
            .iter()
            .map(|slot| {
                let state = slot
                    .aggregate
                    .save_state()
                    .map_err(|source| PersistenceError::State {
                        aggregate: slot.name.clone(),
                        source,
                    })?;
                Ok(SavedAggregate {
                    name: slot.name.clone(),
                    kind: slot.aggregate.kind().to_string(),
                    state,
                })
            })
            .collect()
    }

    /// Applies every saved state or none of them.
    fn restore(&mut self, entries: &[SavedAggregate]) -> PersistenceResult<()> {
        let mut targets = Vec::with_capacity(entries.len());
        for entry in entries {
            let position = self
                .position(&entry.name)
                .ok_or_else(|| PersistenceError::UnknownAggregate(entry.name.clone()))?;
            let live = self.slots[position].aggregate.kind();
            if live != entry.kind {
                return Err(PersistenceError::KindMismatch {
                    aggregate: entry.name.clone(),
                    live: live.to_string(),
                    saved: entry.kind.clone(),
                });
            }
            targets.push(position);
        }

        let backups = targets
            .iter()
            .map(|&position| {
                let slot = &self.slots[position];
                slot.aggregate
                    .save_state()
                    .map_err(|source| PersistenceError::State {
                        aggregate: slot.name.clone(),
                        source,
                    })
            })
            .collect::<PersistenceResult<Vec<_>>>()?;

        for (applied, (entry, &position)) in entries.iter().zip(&targets).enumerate() {
            if let Err(source) = self.slots[position].aggregate.load_state(&entry.state) {
                for (&position, backup) in targets[..=applied].iter().zip(&backups) {
                    let slot = &mut self.slots[position];
                    if let Err(error) = slot.aggregate.load_state(backup) {
                        warn!(
                            aggregate = %slot.name,
                            error = %error,
                            "failed to roll back aggregate state"
                        );
                    }
                }
                return Err(PersistenceError::State {
                    aggregate: entry.name.clone(),
                    source,
                });
            }
        }
        Ok(())
    }

    /// Resets and re-attaches every aggregate downstream of a restored one
    /// that the envelope did not carry, so it tracks the restored inputs.
    fn resynchronise_unsaved(&mut self, entries: &[SavedAggregate]) -> EngineResult<Vec<String>> {
        let saved = |name: &str| entries.iter().any(|entry| entry.name == name);
        let mut stale: Vec<String> = Vec::new();
        for entry in entries {
            for name in self.graph.downstream(&entry.name) {
                if !saved(&name) && !stale.contains(&name) {
                    stale.push(name);
                }
            }
        }
        stale.sort_by_key(|name| self.position(name));
        self.reattach_all(&stale)?;
        Ok(stale)
    }
}

impl Store {
    /// Writes the state of every aggregate as one envelope.
    pub fn save_state<W: Write>(&self, writer: W) -> EngineResult<()> {
        let entries = self.with_open_state(|state| Ok(state.saved_aggregates()?))?;
        write_envelope(writer, &entries)?;
        info!(store = %self.name(), aggregates = entries.len(), "aggregate state saved");
        Ok(())
    }

    /// Restores aggregate state from an envelope.
    ///
    /// Every saved aggregate must exist with the same type. Aggregates absent
    /// from the envelope keep their current state, except those reading a
    /// restored aggregate directly or transitively: they are reset and
    /// re-attached to the restored inputs. If a saved state is rejected no
    /// aggregate is modified.
    pub fn load_state<R: Read>(&self, reader: R) -> EngineResult<()> {
        let entries = read_envelope(reader)?;
        let resynchronised = self.with_open_state(|state| {
            state.restore(&entries)?;
            state.resynchronise_unsaved(&entries)
        })?;
        info!(
            store = %self.name(),
            aggregates = entries.len(),
            resynchronised = resynchronised.len(),
            "aggregate state loaded"
        );
        Ok(())
    }

    /// Saves to `path` through a sibling temporary file renamed into place,
    /// so a failed save never clobbers the previous file.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        let entries = self.with_open_state(|state| Ok(state.saved_aggregates()?))?;
        let temp = temp_path(path);
        let written = write_file(&temp, &entries)
            .and_then(|()| fs::rename(&temp, path).map_err(PersistenceError::from));
        if let Err(err) = written {
            if temp.exists() {
                if let Err(cleanup) = fs::remove_file(&temp) {
                    warn!(
                        path = %temp.display(),
                        error = %cleanup,
                        "failed to remove temporary state file"
                    );
                }
            }
            return Err(err.into());
        }
        info!(
            store = %self.name(),
            path = %path.display(),
            aggregates = entries.len(),
            "aggregate state saved"
        );
        Ok(())
    }

    /// Loads state previously written by [`Store::save_to_path`].
    pub fn load_from_path(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let file = File::open(path.as_ref()).map_err(PersistenceError::from)?;
        self.load_state(BufReader::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<SavedAggregate> {
        vec![
            SavedAggregate {
                name: "win".into(),
                kind: "timeSeriesWinBuf".into(),
                state: vec![1, 2, 3],
            },
            SavedAggregate {
                name: "ema".into(),
                kind: "ema".into(),
                state: vec![],
            },
        ]
    }

    fn encoded() -> Vec<u8> {
        let mut bytes = Vec::new();
        write_envelope(&mut bytes, &entries()).unwrap();
        bytes
    }

    #[test]
    fn envelope_round_trips() {
        let bytes = encoded();
        assert_eq!(&bytes[..4], b"RILS");
        assert_eq!(read_envelope(bytes.as_slice()).unwrap(), entries());
    }

    #[test]
    fn rejects_every_truncation() {
        let bytes = encoded();
        for cut in 0..bytes.len() {
            let err = read_envelope(&bytes[..cut]).unwrap_err();
            assert!(
                matches!(err, PersistenceError::Truncated),
                "cut at {cut}: {err}"
            );
        }
    }

    #[test]
    fn detects_corruption() {
        let mut bytes = encoded();
        let last_payload_byte = bytes.len() - 5;
        bytes[last_payload_byte] ^= 0xff;
        assert!(matches!(
            read_envelope(bytes.as_slice()),
            Err(PersistenceError::ChecksumMismatch { .. })
        ));

        let mut bytes = encoded();
        bytes[0] = b'X';
        assert!(matches!(
            read_envelope(bytes.as_slice()),
            Err(PersistenceError::BadMagic)
        ));

        let mut bytes = encoded();
        bytes[4] = 9;
        assert!(matches!(
            read_envelope(bytes.as_slice()),
            Err(PersistenceError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn temporary_file_is_a_sibling() {
        assert_eq!(
            temp_path(Path::new("/var/lib/rill/trades.state")),
            PathBuf::from("/var/lib/rill/trades.state.tmp")
        );
    }
}
