//! A branch: one contiguous, persisted run of headers rooted at a
//! checkpoint.
//!
//! The main branch is rooted at genesis and backed by the
//! `blockchain_headers` file; every other branch is rooted where it forked
//! off its parent and backed by a `forks/fork_<parent>_<checkpoint>` file.
//! Heights below the checkpoint are answered by delegating to the parent.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info, warn};

use plume_chain::block::{Hash, Header, Height};
use plume_chain::parameters::{NetworkParams, CHUNK_SIZE, GENESIS_PREVIOUS_BLOCK_HASH};
use plume_chain::work::difficulty::ExpandedDifficulty;
use plume_chain::work::retarget::{expected_target, HeaderLookup, TargetError};
use plume_chain::BitcoinSerialize;

use crate::error::ValidateError;
use crate::flat_file::{HeaderFile, RECORD_SIZE};

/// The file backing the branch rooted at genesis.
pub(crate) const MAIN_CHAIN_FILE: &str = "blockchain_headers";

/// The registry's working set: branches keyed by checkpoint. Key 0 is
/// always the main branch.
pub(crate) type BranchMap = BTreeMap<u32, Branch>;

/// A persisted chain segment and the identity that names its file.
pub(crate) struct Branch {
    checkpoint: u32,
    parent_id: Option<u32>,
    params: Arc<NetworkParams>,
    headers_dir: PathBuf,
    file: Mutex<HeaderFile>,
}

fn derived_path(headers_dir: &Path, parent_id: Option<u32>, checkpoint: u32) -> PathBuf {
    match parent_id {
        None => headers_dir.join(MAIN_CHAIN_FILE),
        Some(parent) => headers_dir
            .join("forks")
            .join(format!("fork_{}_{}", parent, checkpoint)),
    }
}

impl Branch {
    /// Attaches to the branch's backing file, whatever its current length.
    pub fn open(
        headers_dir: PathBuf,
        params: Arc<NetworkParams>,
        checkpoint: u32,
        parent_id: Option<u32>,
    ) -> Branch {
        let path = derived_path(&headers_dir, parent_id, checkpoint);
        Branch {
            checkpoint,
            parent_id,
            params,
            headers_dir,
            file: Mutex::new(HeaderFile::open(path)),
        }
    }

    /// Creates a new branch rooted at `header`, with a fresh backing file
    /// holding that single header.
    ///
    /// The header is presumed verified against `parent`; the caller admits
    /// the result into the registry.
    pub fn fork(parent: &Branch, header: &Header) -> Result<Branch, ValidateError> {
        let branch = Branch::open(
            parent.headers_dir.clone(),
            parent.params.clone(),
            header.height.0,
            Some(parent.checkpoint),
        );
        branch.lock_file().create()?;
        branch.save_header(header)?;
        Ok(branch)
    }

    fn lock_file(&self) -> MutexGuard<'_, HeaderFile> {
        self.file.lock().expect("branch file lock poisoned")
    }

    pub fn checkpoint(&self) -> u32 {
        self.checkpoint
    }

    pub fn parent_id(&self) -> Option<u32> {
        self.parent_id
    }

    pub fn parent<'a>(&self, chains: &'a BranchMap) -> Option<&'a Branch> {
        self.parent_id.and_then(|id| chains.get(&id))
    }

    /// The file this branch's identity names.
    pub fn path(&self) -> PathBuf {
        derived_path(&self.headers_dir, self.parent_id, self.checkpoint)
    }

    /// Number of headers stored in this branch's own file.
    pub fn size(&self) -> u32 {
        self.lock_file().size()
    }

    /// The absolute height of the branch tip: `checkpoint + size - 1`.
    ///
    /// `-1` for an empty main branch, hence the signed return.
    pub fn height(&self) -> i64 {
        i64::from(self.checkpoint) + i64::from(self.size()) - 1
    }

    /// The branch tip as a height, or `None` while the branch is empty.
    pub fn tip_height(&self) -> Option<Height> {
        let height = self.height();
        if height < 0 {
            None
        } else {
            Some(Height(height as u32))
        }
    }

    /// The highest checkpoint of any direct child branch.
    pub fn max_child(&self, chains: &BranchMap) -> Option<u32> {
        chains
            .values()
            .filter(|other| other.parent_id == Some(self.checkpoint))
            .map(|other| other.checkpoint)
            .max()
    }

    /// The first height this branch exclusively owns: its highest child's
    /// fork point, or its own checkpoint if it has no children.
    pub fn effective_checkpoint(&self, chains: &BranchMap) -> u32 {
        self.max_child(chains).unwrap_or(self.checkpoint)
    }

    /// Number of headers above every child fork point.
    pub fn branch_size(&self, chains: &BranchMap) -> i64 {
        self.height() - i64::from(self.effective_checkpoint(chains)) + 1
    }

    /// A short human label: the leading digits of the hash at the
    /// effective checkpoint, zeros stripped.
    pub fn name(&self, chains: &BranchMap) -> Result<String, ValidateError> {
        let hash = self.hash_at(chains, Height(self.effective_checkpoint(chains)))?;
        Ok(hash
            .to_string()
            .trim_start_matches('0')
            .chars()
            .take(10)
            .collect())
    }

    /// Whether this branch stores `header`'s identity hash at its height.
    pub fn check_header(&self, chains: &BranchMap, header: &Header) -> bool {
        match self.hash_at(chains, header.height) {
            Ok(hash) => hash == header.hash(),
            Err(_) => false,
        }
    }

    /// The identity hash at `height`: from network constants inside the
    /// trusted region, from storage above it.
    ///
    /// Inside the checkpointed region only chunk-terminal positions are
    /// known; anything else reports [`ValidateError::MissingHeader`].
    pub fn hash_at(&self, chains: &BranchMap, height: Height) -> Result<Hash, ValidateError> {
        if height == Height(0) {
            return Ok(self.params.genesis_hash);
        }
        if height < self.params.checkpointed_height() {
            if (height.0 + 1) % CHUNK_SIZE != 0 {
                return Err(ValidateError::MissingHeader(height));
            }
            let index = (height.0 / CHUNK_SIZE) as usize;
            return Ok(self.params.checkpoints[index]);
        }
        match self.read_header(chains, height)? {
            Some(header) => Ok(header.hash()),
            None => Err(ValidateError::MissingHeader(height)),
        }
    }

    /// Reads the stored header at `height`, delegating below the
    /// checkpoint to the parent branch.
    ///
    /// Heights above the tip and zero-filled records read as `None`. A
    /// missing backing file or a short read is an error: the store is
    /// supposed to own these files for the life of the process.
    pub fn read_header(&self, chains: &BranchMap, height: Height) -> io::Result<Option<Header>> {
        if height.0 < self.checkpoint {
            let parent = self.parent(chains).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "parent branch missing from registry",
                )
            })?;
            return parent.read_header(chains, height);
        }
        if i64::from(height.0) > self.height() {
            return Ok(None);
        }
        let delta = height.0 - self.checkpoint;
        let record = self.lock_file().read_record(delta).map_err(|err| {
            if self.headers_dir.exists() {
                err
            } else {
                io::Error::new(
                    err.kind(),
                    "headers directory disappeared while running",
                )
            }
        })?;
        match record {
            None => Ok(None),
            Some(bytes) => Header::parse(&bytes, height)
                .map(Some)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string())),
        }
    }

    /// Checks one header against its expected link and target.
    ///
    /// On testnet only the link is checked; on mainnet, headers above the
    /// checkpointed region must also carry the expected `bits` and a
    /// proof-of-work hash within the target.
    pub fn verify_header(
        &self,
        header: &Header,
        prev_hash: &Hash,
        target: ExpandedDifficulty,
    ) -> Result<(), ValidateError> {
        if *prev_hash != header.previous_block_hash {
            return Err(ValidateError::LinkBroken {
                height: header.height,
                expected: *prev_hash,
                found: header.previous_block_hash,
            });
        }
        if self.params.testnet {
            return Ok(());
        }
        if header.height >= self.params.checkpointed_height() {
            let expected = target.to_compact();
            if expected != header.difficulty_threshold {
                return Err(ValidateError::BitsMismatch {
                    height: header.height,
                    expected,
                    found: header.difficulty_threshold,
                });
            }
            let pow = header.pow_hash();
            if pow > target {
                return Err(ValidateError::InsufficientPow {
                    height: header.height,
                    hash: pow,
                    target,
                });
            }
        }
        Ok(())
    }

    /// Verifies a full chunk of headers starting at `index * 2016` before
    /// anything is written.
    ///
    /// Targets for heights inside the chunk are computed against the
    /// in-memory chunk itself, so verification does not depend on partial
    /// persistence.
    pub fn verify_chunk(
        &self,
        chains: &BranchMap,
        index: u32,
        data: &[u8],
    ) -> Result<(), ValidateError> {
        if data.len() % Header::len() != 0 {
            return Err(ValidateError::RaggedChunk(data.len()));
        }
        let start = index * CHUNK_SIZE;
        let headers = data
            .chunks(Header::len())
            .enumerate()
            .map(|(i, raw)| Header::parse(raw, Height(start + i as u32)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut prev_hash = if start == 0 {
            GENESIS_PREVIOUS_BLOCK_HASH
        } else {
            self.hash_at(chains, Height(start - 1))?
        };
        let view = HeaderView {
            branch: self,
            chains,
            chunk: Some((start, &headers)),
        };
        for header in &headers {
            let target = expected_target(&self.params, header.height, &view)?;
            self.verify_header(header, &prev_hash, target)?;
            prev_hash = header.hash();
        }
        Ok(())
    }

    /// Whether `header` extends this branch's tip.
    ///
    /// With `check_height` unset only linkage and proof of work are
    /// checked; the registry uses that mode when re-admitting fork files
    /// at startup.
    pub fn can_connect(&self, chains: &BranchMap, header: &Header, check_height: bool) -> bool {
        let height = header.height;
        if check_height && self.height() != i64::from(height.0) - 1 {
            return false;
        }
        if height == Height(0) {
            return header.hash() == self.params.genesis_hash;
        }
        let prev_hash = match self.hash_at(chains, height - 1) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        if prev_hash != header.previous_block_hash {
            return false;
        }
        let view = HeaderView {
            branch: self,
            chains,
            chunk: None,
        };
        let target = match expected_target(&self.params, height, &view) {
            Ok(target) => target,
            Err(_) => return false,
        };
        self.verify_header(header, &prev_hash, target).is_ok()
    }

    /// Appends one verified header at the tip.
    pub fn save_header(&self, header: &Header) -> Result<(), ValidateError> {
        let data = header.bitcoin_serialize_to_vec()?;
        let mut file = self.lock_file();
        let delta = i64::from(header.height.0) - i64::from(self.checkpoint);
        assert_eq!(
            delta,
            i64::from(file.size()),
            "single headers are only ever appended at the tip"
        );
        file.write(&data, delta as u64 * RECORD_SIZE, true)
            .map_err(ValidateError::Io)
    }

    /// Writes a verified chunk at its height-derived offset.
    ///
    /// A chunk overlapping the region below the checkpoint has the overlap
    /// dropped. Truncation is suppressed for chunks inside the
    /// checkpointed prefix, so a slow backfill cannot erase
    /// already-present later headers.
    pub fn save_chunk(&self, index: u32, data: &[u8]) -> Result<(), ValidateError> {
        let mut offset =
            (i64::from(index) * i64::from(CHUNK_SIZE) - i64::from(self.checkpoint))
                * RECORD_SIZE as i64;
        let mut data = data;
        if offset < 0 {
            let cut = (-offset) as usize;
            data = if cut >= data.len() { &[] } else { &data[cut..] };
            offset = 0;
        }
        let truncate = index >= self.params.checkpoints.len() as u32;
        self.lock_file()
            .write(data, offset as u64, truncate)
            .map_err(ValidateError::Io)
    }

    /// The terminal hash of every fully stored chunk, suitable for
    /// persisting as a checkpoint list.
    pub fn get_checkpoints(&self, chains: &BranchMap) -> Result<Vec<Hash>, ValidateError> {
        let chunks = self.height().div_euclid(i64::from(CHUNK_SIZE));
        (0..chunks)
            .map(|i| self.hash_at(chains, Height(((i + 1) * i64::from(CHUNK_SIZE) - 1) as u32)))
            .collect()
    }

    fn exchange_payloads(&mut self, parent: &mut Branch, parent_branch_size: u32) -> io::Result<()> {
        let offset = u64::from(self.checkpoint - parent.checkpoint) * RECORD_SIZE;
        let my_file = self.file.get_mut().expect("branch file lock poisoned");
        let parent_file = parent.file.get_mut().expect("branch file lock poisoned");

        let my_data = my_file.read_all()?;
        let parent_data =
            parent_file.read_range(offset, parent_branch_size as usize * RECORD_SIZE as usize)?;

        my_file.write(&parent_data, 0, true)?;
        parent_file.write(&my_data, offset, true)?;
        Ok(())
    }

    fn swap_identity(&mut self, other: &mut Branch) {
        mem::swap(&mut self.checkpoint, &mut other.checkpoint);
        mem::swap(&mut self.parent_id, &mut other.parent_id);
        // the backing files already hold the exchanged payloads, so each
        // file follows the identity it now serves
        mem::swap(&mut self.file, &mut other.file);
    }

    fn file_path(&self) -> PathBuf {
        self.lock_file().path().to_path_buf()
    }

    fn set_file_path(&mut self, path: PathBuf) {
        self.file
            .get_mut()
            .expect("branch file lock poisoned")
            .set_path(path);
    }
}

/// Promotes the branch at `checkpoint` over its parent if it has strictly
/// outgrown the parent's overlapping tail.
///
/// The payloads of the two backing files are cross-written, identities
/// (checkpoint, parent pointer, backing file) are exchanged, stale sibling
/// file names are repaired, and the registry is re-keyed. Callers hold the
/// registry write lock for the whole operation.
pub(crate) fn swap_with_parent(map: &mut BranchMap, checkpoint: u32) -> bool {
    let (parent_id, parent_branch_size) = {
        let branch = match map.get(&checkpoint) {
            Some(branch) => branch,
            None => return false,
        };
        let parent_id = match branch.parent_id() {
            Some(id) => id,
            None => return false,
        };
        let parent = match map.get(&parent_id) {
            Some(parent) => parent,
            None => {
                warn!(checkpoint, parent_id, "branch has no parent in the registry");
                return false;
            }
        };
        let parent_branch_size = parent.height() - i64::from(checkpoint) + 1;
        if parent_branch_size >= i64::from(branch.size()) {
            return false;
        }
        if parent_branch_size <= 0 {
            warn!(
                checkpoint,
                parent_id, "parent chain ends below the fork point, not swapping"
            );
            return false;
        }
        (parent_id, parent_branch_size as u32)
    };

    info!(checkpoint, parent = parent_id, "branch outgrew its parent, swapping");

    let mut branch = map.remove(&checkpoint).expect("present, checked above");
    let mut parent = map.remove(&parent_id).expect("present, checked above");

    if let Err(err) = branch.exchange_payloads(&mut parent, parent_branch_size) {
        error!(%err, checkpoint, "payload exchange failed, leaving branches in place");
        map.insert(branch.checkpoint(), branch);
        map.insert(parent.checkpoint(), parent);
        return false;
    }
    branch.swap_identity(&mut parent);

    // sibling identity tuples are untouched, so in practice their names
    // still match; repair any that diverged
    for other in map.values_mut() {
        let current = other.file_path();
        let derived = other.path();
        if current != derived {
            info!(from = %current.display(), to = %derived.display(), "renaming branch file");
            match fs::rename(&current, &derived) {
                Ok(()) => other.set_file_path(derived),
                Err(err) => error!(%err, "branch file rename failed"),
            }
        }
    }

    map.insert(branch.checkpoint(), branch);
    map.insert(parent.checkpoint(), parent);
    true
}

/// Header lookups for target computation: the in-memory chunk being
/// verified first, then this branch and its ancestors.
struct HeaderView<'a> {
    branch: &'a Branch,
    chains: &'a BranchMap,
    chunk: Option<(u32, &'a [Header])>,
}

impl HeaderLookup for HeaderView<'_> {
    fn header_at(&self, height: Height) -> Result<Header, TargetError> {
        if let Some((start, headers)) = self.chunk {
            if height.0 >= start {
                return headers
                    .get((height.0 - start) as usize)
                    .copied()
                    .ok_or(TargetError::MissingHeader(height));
            }
        }
        match self.branch.read_header(self.chains, height)? {
            Some(header) => Ok(header),
            None => Err(TargetError::MissingHeader(height)),
        }
    }
}
