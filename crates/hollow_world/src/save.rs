//! The on-disk world format.
//!
//! A world save is a directory:
//!
//! ```text
//! <root>/world.conf          key = value; statements, # comments
//! <root>/players/<name>      one file per known player, same syntax
//! <root>/chunks/x/y/z.gz     gzip of the 16384-byte block array
//! ```
//!
//! Reads distinguish *missing* (fall back to generation or defaults) from
//! *unreadable* (an error the caller treats as fatal for the world).
//! Writes report errors so the caller can log and retry next tick.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use hollow_shared::math::{IVec3, Quat, Vec3};

use crate::chunk::{Chunk, BLOCK_DATA_SIZE};

/// Errors from the save layer.
#[derive(Debug, Error)]
pub enum SaveError {
    /// Filesystem trouble.
    #[error("save io: {0}")]
    Io(#[from] std::io::Error),
    /// A file exists but its contents make no sense.
    #[error("malformed save data: {0}")]
    Malformed(String),
}

/// Result alias for the save layer.
pub type SaveResult<T> = Result<T, SaveError>;

/// Recognized contents of `world.conf`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WorldConf {
    /// Chunk position new players spawn in.
    pub spawn: IVec3,
    /// Generator seed.
    pub seed: u64,
}

/// Persisted player state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayerRecord {
    /// Chunk part of the player position.
    pub chunk: IVec3,
    /// Block part of the player position.
    pub position: Vec3,
    /// Orientation quaternion.
    pub orientation: Quat,
    /// Look pitch in radians.
    pub pitch: f32,
    /// Look yaw in radians.
    pub yaw: f32,
    /// Selected inventory slot.
    pub slot: u8,
}

impl Default for PlayerRecord {
    fn default() -> Self {
        Self {
            chunk: IVec3::ZERO,
            position: Vec3::splat(8.0),
            orientation: Quat::IDENTITY,
            pitch: 0.0,
            yaw: 0.0,
            slot: 0,
        }
    }
}

/// Handle to a world save directory.
pub struct WorldSave {
    root: PathBuf,
}

impl WorldSave {
    /// Points at (but does not create) a save directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The save directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn conf_path(&self) -> PathBuf {
        self.root.join("world.conf")
    }

    fn player_path(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.root.join("players").join(safe)
    }

    fn chunk_path(&self, pos: IVec3) -> PathBuf {
        self.root
            .join("chunks")
            .join(pos.x.to_string())
            .join(pos.y.to_string())
            .join(format!("{}.gz", pos.z))
    }

    /// True if the save exists on disk.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.root.is_dir() && self.conf_path().is_file()
    }

    // ------------------------------------------------------------------
    // world.conf

    /// Reads the world configuration.
    pub fn read_world_conf(&self) -> SaveResult<WorldConf> {
        let text = fs::read_to_string(self.conf_path())?;
        let mut conf = WorldConf::default();
        for (key, value) in parse_statements(&text)? {
            match key.as_str() {
                "spawn" => conf.spawn = parse_ivec3(&value)?,
                "seed" => {
                    conf.seed = value
                        .parse()
                        .map_err(|_| SaveError::Malformed(format!("bad seed: {value}")))?;
                }
                _ => {} // unknown keys are carried by newer versions
            }
        }
        Ok(conf)
    }

    /// Writes the world configuration, creating the save directory.
    pub fn write_world_conf(&self, conf: &WorldConf) -> SaveResult<()> {
        fs::create_dir_all(&self.root)?;
        let mut out = String::new();
        out.push_str("# world configuration\n");
        out.push_str(&format!(
            "spawn = <{}, {}, {}>;\n",
            conf.spawn.x, conf.spawn.y, conf.spawn.z
        ));
        out.push_str(&format!("seed = {};\n", conf.seed));
        fs::write(self.conf_path(), out)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // players

    /// True if the named player has saved state.
    #[must_use]
    pub fn player_exists(&self, name: &str) -> bool {
        self.player_path(name).is_file()
    }

    /// Reads a player file.
    pub fn read_player(&self, name: &str) -> SaveResult<PlayerRecord> {
        let text = fs::read_to_string(self.player_path(name))?;
        let mut record = PlayerRecord::default();
        for (key, value) in parse_statements(&text)? {
            match key.as_str() {
                "chunk" => record.chunk = parse_ivec3(&value)?,
                "position" => record.position = parse_vec3(&value)?,
                "orientation" => record.orientation = parse_quat(&value)?,
                "pitch" => record.pitch = parse_float(&value)?,
                "yaw" => record.yaw = parse_float(&value)?,
                "slot" => {
                    record.slot = value
                        .parse()
                        .map_err(|_| SaveError::Malformed(format!("bad slot: {value}")))?;
                }
                _ => {}
            }
        }
        Ok(record)
    }

    /// Writes a player file, creating the players directory.
    pub fn write_player(&self, name: &str, record: &PlayerRecord) -> SaveResult<()> {
        fs::create_dir_all(self.root.join("players"))?;
        let mut out = String::new();
        out.push_str(&format!(
            "chunk = <{}, {}, {}>;\n",
            record.chunk.x, record.chunk.y, record.chunk.z
        ));
        out.push_str(&format!(
            "position = <{}, {}, {}>;\n",
            record.position.x, record.position.y, record.position.z
        ));
        let q = record.orientation;
        out.push_str(&format!("orientation = <{}, {}, {}, {}>;\n", q.w, q.x, q.y, q.z));
        out.push_str(&format!("pitch = {};\n", record.pitch));
        out.push_str(&format!("yaw = {};\n", record.yaw));
        out.push_str(&format!("slot = {};\n", record.slot));
        fs::write(self.player_path(name), out)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // chunks

    /// True if the chunk at `pos` has been saved.
    #[must_use]
    pub fn chunk_exists(&self, pos: IVec3) -> bool {
        self.chunk_path(pos).is_file()
    }

    /// Reads a chunk's blocks from its gzip file.
    pub fn read_chunk(&self, chunk: &mut Chunk) -> SaveResult<()> {
        let path = self.chunk_path(chunk.position());
        let file = fs::File::open(path)?;
        let mut decoder = GzDecoder::new(file);
        decoder.read_exact(chunk.block_data_mut()).map_err(|e| {
            SaveError::Malformed(format!(
                "chunk {:?}: expected {BLOCK_DATA_SIZE} block bytes: {e}",
                chunk.position()
            ))
        })?;
        chunk.invalidate();
        chunk.clear_save();
        Ok(())
    }

    /// Writes a chunk's blocks as a gzip file, creating directories.
    pub fn write_chunk(&self, chunk: &mut Chunk) -> SaveResult<()> {
        let path = self.chunk_path(chunk.position());
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let file = fs::File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(chunk.block_data())?;
        encoder.finish()?;
        chunk.clear_save();
        Ok(())
    }
}

// ----------------------------------------------------------------------
// the `key = value;` token format

/// Splits text into `(key, value)` statements, dropping `#` comments.
fn parse_statements(text: &str) -> SaveResult<Vec<(String, String)>> {
    let mut stripped = String::with_capacity(text.len());
    for line in text.lines() {
        let line = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        stripped.push_str(line);
        stripped.push('\n');
    }

    let mut statements = Vec::new();
    for stmt in stripped.split(';') {
        let stmt = stmt.trim();
        if stmt.is_empty() {
            continue;
        }
        let (key, value) = stmt
            .split_once('=')
            .ok_or_else(|| SaveError::Malformed(format!("statement without '=': {stmt}")))?;
        statements.push((key.trim().to_string(), value.trim().to_string()));
    }
    Ok(statements)
}

fn parse_components(value: &str, expected: usize) -> SaveResult<Vec<f64>> {
    let inner = value
        .strip_prefix('<')
        .and_then(|v| v.strip_suffix('>'))
        .ok_or_else(|| SaveError::Malformed(format!("expected <...> vector: {value}")))?;
    let parts: Result<Vec<f64>, _> = inner.split(',').map(|p| p.trim().parse()).collect();
    let parts = parts.map_err(|_| SaveError::Malformed(format!("bad vector: {value}")))?;
    if parts.len() != expected {
        return Err(SaveError::Malformed(format!(
            "expected {expected} components: {value}"
        )));
    }
    Ok(parts)
}

fn parse_ivec3(value: &str) -> SaveResult<IVec3> {
    let c = parse_components(value, 3)?;
    Ok(IVec3::new(c[0] as i32, c[1] as i32, c[2] as i32))
}

fn parse_vec3(value: &str) -> SaveResult<Vec3> {
    let c = parse_components(value, 3)?;
    Ok(Vec3::new(c[0] as f32, c[1] as f32, c[2] as f32))
}

fn parse_quat(value: &str) -> SaveResult<Quat> {
    let c = parse_components(value, 4)?;
    Ok(Quat::new(c[0] as f32, c[1] as f32, c[2] as f32, c[3] as f32))
}

fn parse_float(value: &str) -> SaveResult<f32> {
    value
        .parse()
        .map_err(|_| SaveError::Malformed(format!("bad number: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "hollow-save-{tag}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_world_conf_round_trip() {
        let save = WorldSave::new(scratch_dir("conf"));
        let conf = WorldConf {
            spawn: IVec3::new(4, -2, 17),
            seed: 0xDEAD_BEEF,
        };
        save.write_world_conf(&conf).expect("write conf");
        assert!(save.exists());
        let read = save.read_world_conf().expect("read conf");
        assert_eq!(read, conf);
    }

    #[test]
    fn test_conf_comments_and_unknown_keys() {
        let dir = scratch_dir("comments");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("world.conf"),
            "# a comment\nspawn = <1, 2, 3>; # trailing\nfuture_key = whatever;\nseed = 9;\n",
        )
        .unwrap();
        let save = WorldSave::new(dir);
        let conf = save.read_world_conf().expect("tolerant read");
        assert_eq!(conf.spawn, IVec3::new(1, 2, 3));
        assert_eq!(conf.seed, 9);
    }

    #[test]
    fn test_player_round_trip() {
        let save = WorldSave::new(scratch_dir("player"));
        let record = PlayerRecord {
            chunk: IVec3::new(-3, 0, 12),
            position: Vec3::new(1.5, 2.25, 3.0),
            orientation: Quat::new(0.9238795, 0.0, 0.3826834, 0.0),
            pitch: -0.5,
            yaw: 2.5,
            slot: 3,
        };
        save.write_player("tester", &record).expect("write player");
        assert!(save.player_exists("tester"));
        let read = save.read_player("tester").expect("read player");
        assert_eq!(read.chunk, record.chunk);
        assert!((read.position - record.position).length() < 1e-5);
        assert!((read.pitch - record.pitch).abs() < 1e-5);
        assert!((read.yaw - record.yaw).abs() < 1e-5);
        assert_eq!(read.slot, record.slot);
    }

    #[test]
    fn test_player_name_sanitized() {
        let save = WorldSave::new(scratch_dir("sanitize"));
        save.write_player("../evil", &PlayerRecord::default())
            .expect("write");
        assert!(save.player_exists("evil"), "path components must be stripped");
    }

    #[test]
    fn test_chunk_round_trip() {
        let save = WorldSave::new(scratch_dir("chunk"));
        let pos = IVec3::new(1, -2, 3);
        let mut chunk = Chunk::new(pos);
        chunk.write_block(0, Block::new(5));
        chunk.write_block(4095, Block::new(9));
        save.write_chunk(&mut chunk).expect("write chunk");
        assert!(save.chunk_exists(pos));
        assert!(!chunk.should_update_save());

        let mut loaded = Chunk::new(pos);
        save.read_chunk(&mut loaded).expect("read chunk");
        assert_eq!(loaded.block_at(0), Block::new(5));
        assert_eq!(loaded.block_at(4095), Block::new(9));
        assert_eq!(loaded.block_at(100), Block::AIR);
    }

    #[test]
    fn test_missing_chunk_is_distinguishable() {
        let save = WorldSave::new(scratch_dir("missing"));
        assert!(!save.chunk_exists(IVec3::ZERO));
        let mut chunk = Chunk::new(IVec3::ZERO);
        match save.read_chunk(&mut chunk) {
            Err(SaveError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("expected io not-found, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_chunk_is_malformed() {
        let dir = scratch_dir("truncated");
        let save = WorldSave::new(dir.clone());
        let pos = IVec3::ZERO;
        let mut chunk = Chunk::new(pos);
        save.write_chunk(&mut chunk).expect("write");

        // truncate the gzip payload
        let path = dir.join("chunks").join("0").join("0").join("0.gz");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let mut loaded = Chunk::new(pos);
        assert!(matches!(
            save.read_chunk(&mut loaded),
            Err(SaveError::Malformed(_)) | Err(SaveError::Io(_))
        ));
    }
}
