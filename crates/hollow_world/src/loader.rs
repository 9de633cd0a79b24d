//! Queue-driven chunk loading: disk first, generator second.
//!
//! The loader drains the store's missing-chunk queue under a per-tick
//! budget so disk latency never stalls a frame. Chunks that were saved
//! before are read back; everything else regenerates deterministically.
//! A second budgeted pass writes edited chunks back out.

use tracing::error;

use crate::generator::Generator;
use crate::save::{SaveError, SaveResult, WorldSave};
use crate::store::ChunkStore;

/// Feeds missing chunks from disk or the generator.
pub struct ChunkLoader {
    save: WorldSave,
}

impl ChunkLoader {
    /// Loader over a save directory.
    #[must_use]
    pub fn new(save: WorldSave) -> Self {
        Self { save }
    }

    /// The backing save.
    #[must_use]
    pub fn save(&self) -> &WorldSave {
        &self.save
    }

    /// Number of chunks the indices are still waiting for.
    #[must_use]
    pub fn to_load(&self, store: &ChunkStore) -> usize {
        store.estimate_missing()
    }

    /// Loads or generates one missing chunk.
    ///
    /// Returns `Ok(true)` if the chunk was generated rather than read.
    /// A present-but-unreadable file is an error; the world is not safe
    /// to run without its saved edits.
    pub fn load_one(&self, store: &mut ChunkStore, generator: &Generator) -> SaveResult<bool> {
        let Some(pos) = store.next_missing() else {
            return Ok(false);
        };
        let Some(handle) = store.allocate(pos) else {
            // allocation failed; the index will ask again next tick
            return Ok(false);
        };

        if self.save.chunk_exists(pos) {
            self.save.read_chunk(store.chunk_mut(handle))?;
            store.scan_lights(handle);
            return Ok(false);
        }

        let blocks = generator.generate(pos);
        for (index, block) in blocks.iter().enumerate() {
            if block.type_id != 0 {
                store.set_block(handle, index, *block);
            }
        }
        // pristine terrain regenerates for free, no need to persist it
        store.chunk_mut(handle).clear_save();
        Ok(true)
    }

    /// Loads up to `n` missing chunks.
    pub fn load_n(&self, store: &mut ChunkStore, generator: &Generator, n: usize) -> SaveResult<usize> {
        let budget = n.min(self.to_load(store));
        let mut loaded = 0;
        while loaded < budget && store.has_missing() {
            self.load_one(store, generator)?;
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Writes up to `n` edited chunks back to disk.
    ///
    /// Failures are logged and left dirty; the next tick retries.
    pub fn store_n(&self, store: &mut ChunkStore, n: usize) -> usize {
        let dirty: Vec<_> = store
            .loaded()
            .filter(|h| store.chunk(*h).should_update_save())
            .take(n)
            .collect();
        let mut written = 0;
        for handle in dirty {
            match self.save.write_chunk(store.chunk_mut(handle)) {
                Ok(()) => written += 1,
                Err(err) => {
                    let pos = store.chunk(handle).position();
                    error!("failed to save chunk {pos:?}: {err}");
                }
            }
        }
        written
    }

    /// True if the error means the file is readable garbage rather than
    /// simply absent.
    #[must_use]
    pub fn is_fatal(err: &SaveError) -> bool {
        !matches!(
            err,
            SaveError::Io(io) if io.kind() == std::io::ErrorKind::NotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;
    use crate::block_type::default_registry;
    use crate::chunk::Chunk;
    use crate::generator::GeneratorConfig;
    use crate::save::WorldSave;
    use hollow_shared::math::IVec3;
    use std::sync::Arc;

    fn scratch_save(tag: &str) -> WorldSave {
        let dir = std::env::temp_dir().join(format!("hollow-loader-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        WorldSave::new(dir)
    }

    fn setup(tag: &str) -> (ChunkStore, Generator, ChunkLoader) {
        let types = Arc::new(default_registry());
        let generator = Generator::new(GeneratorConfig { seed: 11, ..GeneratorConfig::default() }, &types);
        let store = ChunkStore::new(types);
        (store, generator, ChunkLoader::new(scratch_save(tag)))
    }

    #[test]
    fn test_loads_generate_when_no_file() {
        let (mut store, generator, loader) = setup("gen");
        let _index = store.make_index(IVec3::ZERO, 1);
        assert_eq!(loader.to_load(&store), 27);

        let loaded = loader.load_n(&mut store, &generator, 64).expect("load");
        assert_eq!(loaded, 27);
        assert_eq!(store.num_loaded(), 27);
        assert!(!store.has_missing());
    }

    #[test]
    fn test_budget_is_respected() {
        let (mut store, generator, loader) = setup("budget");
        let _index = store.make_index(IVec3::ZERO, 1);
        let loaded = loader.load_n(&mut store, &generator, 5).expect("load");
        assert_eq!(loaded, 5);
        assert_eq!(store.num_loaded(), 5);
        assert!(store.has_missing());
    }

    #[test]
    fn test_disk_round_trip_through_loader() {
        let (mut store, generator, loader) = setup("roundtrip");
        let _index = store.make_index(IVec3::ZERO, 0);
        loader.load_n(&mut store, &generator, 1).expect("load");
        let handle = store.get(IVec3::ZERO).unwrap();

        // edit a cell so the chunk becomes save-dirty, then flush
        store.set_block(handle, Chunk::to_index(IVec3::new(1, 1, 1)), Block::new(2));
        assert!(store.chunk(handle).should_update_save());
        assert_eq!(loader.store_n(&mut store, 8), 1);
        assert!(!store.chunk(handle).should_update_save());

        // a fresh store sees the edited chunk instead of regenerating
        let types = store.types_arc();
        let mut fresh = ChunkStore::new(types);
        let _index2 = fresh.make_index(IVec3::ZERO, 0);
        loader.load_n(&mut fresh, &generator, 1).expect("reload");
        let reloaded = fresh.get(IVec3::ZERO).unwrap();
        assert_eq!(
            fresh.chunk(reloaded).block_at(Chunk::to_index(IVec3::new(1, 1, 1))),
            Block::new(2)
        );
    }

    #[test]
    fn test_generated_chunks_not_marked_dirty() {
        let (mut store, generator, loader) = setup("pristine");
        let _index = store.make_index(IVec3::ZERO, 0);
        loader.load_n(&mut store, &generator, 1).expect("load");
        let handle = store.get(IVec3::ZERO).unwrap();
        assert!(
            !store.chunk(handle).should_update_save(),
            "pristine terrain should not be persisted"
        );
    }
}
