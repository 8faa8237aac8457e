//! The branch registry: every known branch keyed by its checkpoint, with
//! startup loading, header dispatch, and the connect entry points the
//! network layer calls.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{info, warn};

use plume_chain::block::{Hash, Header, Height};
use plume_chain::parameters::NetworkParams;

use crate::branch::{self, Branch, BranchMap, MAIN_CHAIN_FILE};
use crate::config::Config;
use crate::error::ValidateError;

lazy_static! {
    static ref FORK_FILE_RE: Regex =
        Regex::new(r"^fork_(\d+)_(\d+)$").expect("hard-coded regex compiles");
}

/// The set of known branches.
///
/// The main branch always sits under key 0. Mutating operations (admit,
/// connect, swap) serialize through the registry write lock; readers share
/// the read lock and the per-branch file mutexes.
pub struct Chains {
    branches: RwLock<BranchMap>,
    headers_dir: PathBuf,
    params: Arc<NetworkParams>,
}

impl Chains {
    /// Loads the registry from `config.headers_dir`.
    ///
    /// Creates the main chain file and the `forks` directory when absent,
    /// then re-admits every `fork_<parent>_<checkpoint>` file whose first
    /// header still connects to its parent; the rest are skipped with a
    /// warning and left on disk.
    pub fn load(config: &Config, params: Arc<NetworkParams>) -> Result<Chains, ValidateError> {
        let headers_dir = config.headers_dir.clone();
        fs::create_dir_all(config.forks_dir())?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .open(headers_dir.join(MAIN_CHAIN_FILE))?;

        let mut branches = BranchMap::new();
        branches.insert(
            0,
            Branch::open(headers_dir.clone(), params.clone(), 0, None),
        );

        let mut fork_files: Vec<(u32, u32)> = Vec::new();
        for entry in fs::read_dir(config.forks_dir())? {
            let entry = entry?;
            let name = entry.file_name();
            let captures = match name.to_str().and_then(|name| FORK_FILE_RE.captures(name)) {
                Some(captures) => captures,
                None => continue,
            };
            let parent_id: u32 = match captures[1].parse() {
                Ok(id) => id,
                Err(_) => continue,
            };
            let checkpoint: u32 = match captures[2].parse() {
                Ok(checkpoint) => checkpoint,
                Err(_) => continue,
            };
            fork_files.push((parent_id, checkpoint));
        }
        // parents first, so forks of forks find their parent admitted
        fork_files.sort();

        for (parent_id, checkpoint) in fork_files {
            let candidate =
                Branch::open(headers_dir.clone(), params.clone(), checkpoint, Some(parent_id));
            let admitted = match candidate.read_header(&branches, Height(checkpoint)) {
                Ok(Some(first_header)) => branches
                    .get(&parent_id)
                    .map(|parent| parent.can_connect(&branches, &first_header, false))
                    .unwrap_or(false),
                _ => false,
            };
            if admitted {
                info!(checkpoint, parent = parent_id, "loaded fork branch");
                branches.insert(checkpoint, candidate);
            } else {
                warn!(
                    checkpoint,
                    parent = parent_id,
                    "fork branch no longer connects to its parent, skipping"
                );
            }
        }

        Ok(Chains {
            branches: RwLock::new(branches),
            headers_dir,
            params,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, BranchMap> {
        self.branches.read().expect("registry lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, BranchMap> {
        self.branches.write().expect("registry lock poisoned")
    }

    /// The branch that already stores `header`, by identity hash.
    pub fn check_header(&self, header: &Header) -> Option<u32> {
        let map = self.read();
        map.values()
            .find(|branch| branch.check_header(&map, header))
            .map(Branch::checkpoint)
    }

    /// The first branch whose tip `header` would extend.
    pub fn can_connect(&self, header: &Header) -> Option<u32> {
        let map = self.read();
        map.values()
            .find(|branch| branch.can_connect(&map, header, true))
            .map(Branch::checkpoint)
    }

    /// Verifies and appends one header to the branch at `at`, then
    /// evaluates promotion over its parent.
    ///
    /// The target is computed from persisted headers only, so deep in the
    /// per-block retarget era a freshly forked branch needs its 480-header
    /// history reachable through its parents.
    pub fn connect_header(&self, at: u32, header: &Header) -> bool {
        {
            let map = self.read();
            let branch = match map.get(&at) {
                Some(branch) => branch,
                None => return false,
            };
            if !branch.can_connect(&map, header, true) {
                return false;
            }
        }

        let mut map = self.write();
        {
            let branch = match map.get(&at) {
                Some(branch) => branch,
                None => return false,
            };
            if let Err(err) = branch.save_header(header) {
                warn!(height = %header.height, %err, "failed to persist header");
                return false;
            }
        }
        branch::swap_with_parent(&mut map, at);
        true
    }

    /// Verifies a chunk of headers starting at `index * 2016` against the
    /// branch at `at`, persists it, and evaluates promotion.
    ///
    /// Any verification or storage failure is logged and reported as plain
    /// rejection; nothing is written unless the whole chunk verified.
    pub fn connect_chunk(&self, at: u32, index: u32, data: &[u8]) -> bool {
        {
            let map = self.read();
            let branch = match map.get(&at) {
                Some(branch) => branch,
                None => return false,
            };
            if let Err(err) = branch.verify_chunk(&map, index, data) {
                warn!(index, %err, "chunk failed verification");
                return false;
            }
        }

        let mut map = self.write();
        {
            let branch = match map.get(&at) {
                Some(branch) => branch,
                None => return false,
            };
            if let Err(err) = branch.save_chunk(index, data) {
                warn!(index, %err, "failed to persist chunk");
                return false;
            }
        }
        branch::swap_with_parent(&mut map, at);
        true
    }

    /// Creates a branch rooted at `header` forking off the branch at
    /// `parent`, and admits it into the registry.
    ///
    /// The header is presumed to have been checked against the parent
    /// chain (it links at `height - 1` but disagrees with the stored
    /// header at its own height).
    pub fn fork(&self, parent: u32, header: &Header) -> Result<u32, ValidateError> {
        let mut map = self.write();
        let child = {
            let parent_branch = map.get(&parent).ok_or(ValidateError::UnknownBranch(parent))?;
            Branch::fork(parent_branch, header)?
        };
        let checkpoint = child.checkpoint();
        info!(checkpoint, parent, "forked new branch");
        map.insert(checkpoint, child);
        Ok(checkpoint)
    }

    /// Reads the stored header at `height` on the main chain.
    pub fn read_header(&self, height: Height) -> Result<Option<Header>, ValidateError> {
        let map = self.read();
        let main = map.get(&0).ok_or(ValidateError::UnknownBranch(0))?;
        Ok(main.read_header(&map, height)?)
    }

    /// The identity hash at `height` on the main chain.
    pub fn get_hash(&self, height: Height) -> Option<Hash> {
        self.branch_hash(0, height)
    }

    /// The identity hash at `height` as seen from the branch at `at`.
    pub fn branch_hash(&self, at: u32, height: Height) -> Option<Hash> {
        let map = self.read();
        map.get(&at)
            .and_then(|branch| branch.hash_at(&map, height).ok())
    }

    /// The terminal hash of every fully stored main-chain chunk, suitable
    /// for persisting into a checkpoint list.
    pub fn get_checkpoints(&self) -> Result<Vec<Hash>, ValidateError> {
        let map = self.read();
        let main = map.get(&0).ok_or(ValidateError::UnknownBranch(0))?;
        main.get_checkpoints(&map)
    }

    /// Checkpoints of all known branches, main branch included.
    pub fn branch_ids(&self) -> Vec<u32> {
        self.read().keys().copied().collect()
    }

    /// The tip height of the branch at `at`, or `None` while it is empty
    /// or unknown.
    pub fn branch_tip(&self, at: u32) -> Option<Height> {
        self.read().get(&at).and_then(Branch::tip_height)
    }

    /// The parent checkpoint of the branch at `at` (`None` for the main
    /// branch).
    pub fn branch_parent(&self, at: u32) -> Option<u32> {
        self.read().get(&at).and_then(Branch::parent_id)
    }

    /// Number of headers the branch at `at` owns above its children's fork
    /// points.
    pub fn branch_size(&self, at: u32) -> Option<i64> {
        let map = self.read();
        map.get(&at).map(|branch| branch.branch_size(&map))
    }

    /// A short display label for the branch at `at`.
    pub fn branch_name(&self, at: u32) -> Option<String> {
        let map = self.read();
        map.get(&at).and_then(|branch| branch.name(&map).ok())
    }

    /// The directory this registry stores under.
    pub fn headers_dir(&self) -> &std::path::Path {
        &self.headers_dir
    }

    /// The network parameters this registry validates against.
    pub fn params(&self) -> &NetworkParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};
    use tempdir::TempDir;

    use plume_chain::block::merkle;
    use plume_chain::parameters::{CHUNK_SIZE, GENESIS_PREVIOUS_BLOCK_HASH};
    use plume_chain::work::difficulty::{CompactDifficulty, ExpandedDifficulty};
    use plume_chain::BitcoinSerialize;

    /// Parameters for a synthetic testnet chain: proof of work is skipped,
    /// so link continuity is the only consensus rule in play.
    fn test_params(genesis_hash: Hash) -> Arc<NetworkParams> {
        Arc::new(NetworkParams {
            testnet: true,
            genesis_hash,
            checkpoints: Vec::new(),
            post_checkpoint_target: ExpandedDifficulty::zero(),
        })
    }

    /// A linked run of headers starting at `height` on top of `prev`.
    ///
    /// `salt` varies the nonce so two runs from the same parent fork.
    fn make_headers(prev: Hash, height: u32, count: u32, salt: u32) -> Vec<Header> {
        let mut headers = Vec::with_capacity(count as usize);
        let mut prev = prev;
        for i in 0..count {
            let at = height + i;
            let header = Header::new(
                1,
                prev,
                merkle::Root([0x22; 32]),
                Utc.timestamp(1_400_000_000 + i64::from(at) * 150, 0),
                CompactDifficulty(0x1d00ffff),
                salt.wrapping_add(at),
                Height(at),
            );
            prev = header.hash();
            headers.push(header);
        }
        headers
    }

    fn serialize_chunk(headers: &[Header]) -> Vec<u8> {
        let mut data = Vec::with_capacity(headers.len() * Header::len());
        for header in headers {
            header
                .bitcoin_serialize(&mut data)
                .expect("serializing to a Vec is infallible");
        }
        data
    }

    fn fresh_chains(dir: &TempDir, params: Arc<NetworkParams>) -> Chains {
        let config = Config {
            headers_dir: dir.path().to_path_buf(),
        };
        Chains::load(&config, params).expect("registry loads")
    }

    #[test]
    fn connected_chunk_is_readable_back() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let headers = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, CHUNK_SIZE + 1, 0);
        let chains = fresh_chains(&dir, test_params(headers[0].hash()));

        assert!(chains.connect_chunk(0, 0, &serialize_chunk(&headers[..CHUNK_SIZE as usize])));
        assert_eq!(chains.branch_tip(0), Some(Height(CHUNK_SIZE - 1)));

        for &at in [0u32, 1, 1000, CHUNK_SIZE - 1].iter() {
            assert_eq!(
                chains.get_hash(Height(at)),
                Some(headers[at as usize].hash()),
                "stored hash disagrees at height {}",
                at
            );
            let read = chains
                .read_header(Height(at))
                .expect("read succeeds")
                .expect("header present");
            assert_eq!(read, headers[at as usize]);
        }

        // a chunk only counts as a checkpoint once the chain has moved past it
        assert_eq!(chains.get_checkpoints().expect("hashes present"), vec![]);
        assert!(chains.connect_header(0, &headers[CHUNK_SIZE as usize]));
        assert_eq!(
            chains.get_checkpoints().expect("hashes present"),
            vec![headers[CHUNK_SIZE as usize - 1].hash()]
        );
    }

    #[test]
    fn shorter_rewrite_truncates_outside_checkpointed_prefix() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let headers = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, CHUNK_SIZE, 0);
        let chains = fresh_chains(&dir, test_params(headers[0].hash()));

        assert!(chains.connect_chunk(0, 0, &serialize_chunk(&headers)));
        assert!(chains.connect_chunk(0, 0, &serialize_chunk(&headers[..1008])));
        assert_eq!(chains.branch_tip(0), Some(Height(1007)));
    }

    #[test]
    fn rewrite_inside_checkpointed_prefix_keeps_tail() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let headers = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, CHUNK_SIZE, 0);
        let params = NetworkParams {
            testnet: true,
            genesis_hash: headers[0].hash(),
            checkpoints: vec![headers[CHUNK_SIZE as usize - 1].hash()],
            post_checkpoint_target: ExpandedDifficulty::zero(),
        };
        let chains = fresh_chains(&dir, Arc::new(params));

        assert!(chains.connect_chunk(0, 0, &serialize_chunk(&headers)));
        // a backfill of the first half arrives late; the tail must survive
        assert!(chains.connect_chunk(0, 0, &serialize_chunk(&headers[..1008])));
        assert_eq!(chains.branch_tip(0), Some(Height(CHUNK_SIZE - 1)));
    }

    #[test]
    fn chunk_above_a_checkpoint_leaves_absent_prefix() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let chunk0 = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, CHUNK_SIZE, 0);
        let terminal = chunk0[CHUNK_SIZE as usize - 1].hash();
        let chunk1 = make_headers(terminal, CHUNK_SIZE, CHUNK_SIZE, 0);

        let params = NetworkParams {
            testnet: true,
            genesis_hash: chunk0[0].hash(),
            checkpoints: vec![terminal],
            post_checkpoint_target: ExpandedDifficulty::zero(),
        };
        let chains = fresh_chains(&dir, Arc::new(params));

        // the second chunk lands without the first ever arriving
        assert!(chains.connect_chunk(0, 1, &serialize_chunk(&chunk1)));
        assert_eq!(chains.branch_tip(0), Some(Height(2 * CHUNK_SIZE - 1)));

        // the checkpointed boundary hash comes from constants
        assert_eq!(chains.get_hash(Height(CHUNK_SIZE - 1)), Some(terminal));
        // the zero-filled hole below reads as absent
        assert_eq!(
            chains.read_header(Height(100)).expect("read succeeds"),
            None
        );
    }

    #[test]
    fn broken_link_chunk_rejected() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let mut headers = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, 64, 0);
        let chains = fresh_chains(&dir, test_params(headers[0].hash()));

        // corrupt one backwards reference mid-chunk
        let replacement = Header::new(
            1,
            Hash([0xaa; 32]),
            headers[40].merkle_root,
            headers[40].time,
            headers[40].difficulty_threshold,
            headers[40].nonce,
            headers[40].height,
        );
        headers[40] = replacement;

        assert!(!chains.connect_chunk(0, 0, &serialize_chunk(&headers)));
        // nothing was persisted
        assert_eq!(chains.branch_tip(0), None);
    }

    #[test]
    fn ragged_chunk_rejected() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let headers = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, 8, 0);
        let chains = fresh_chains(&dir, test_params(headers[0].hash()));

        let mut data = serialize_chunk(&headers);
        data.pop();
        assert!(!chains.connect_chunk(0, 0, &data));
        assert_eq!(chains.branch_tip(0), None);
    }

    #[test]
    fn headers_connect_one_by_one() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let headers = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, 12, 0);
        let chains = fresh_chains(&dir, test_params(headers[0].hash()));

        for header in &headers {
            let at = chains.can_connect(header).expect("tip extension accepted");
            assert_eq!(at, 0);
            assert!(chains.connect_header(at, header));
        }
        assert_eq!(chains.branch_tip(0), Some(Height(11)));

        // a header that does not link is dispatched nowhere and rejected
        let stranger = make_headers(Hash([0xdd; 32]), 12, 1, 9)[0];
        assert_eq!(chains.can_connect(&stranger), None);
        assert!(!chains.connect_header(0, &stranger));
        assert_eq!(chains.branch_tip(0), Some(Height(11)));

        // an already stored header is recognized, a fresh one is not
        assert_eq!(chains.check_header(&headers[7]), Some(0));
        assert_eq!(chains.check_header(&stranger), None);
    }

    /// The promotion scenario: a fork created below the main tip overtakes
    /// it, and the registry swaps the two branches.
    #[test]
    fn longer_fork_swaps_into_main_position() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let main_headers = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, 101, 0);
        let chains = fresh_chains(&dir, test_params(main_headers[0].hash()));
        assert!(chains.connect_chunk(0, 0, &serialize_chunk(&main_headers)));
        assert_eq!(chains.branch_tip(0), Some(Height(100)));

        // a competing miner builds on height 89
        let fork_headers = make_headers(main_headers[89].hash(), 90, 16, 0x5eed);
        assert_ne!(fork_headers[0].hash(), main_headers[90].hash());

        let fork_id = chains
            .fork(0, &fork_headers[0])
            .expect("fork branch created");
        assert_eq!(fork_id, 90);
        assert_eq!(chains.branch_parent(90), Some(0));

        // heights 91..=100: the fork is still shorter, no promotion
        for header in &fork_headers[1..11] {
            assert_eq!(chains.can_connect(header), Some(90));
            assert!(chains.connect_header(90, header));
        }
        assert_eq!(chains.branch_tip(0), Some(Height(100)));
        assert_eq!(chains.branch_tip(90), Some(Height(100)));

        // height 101 outgrows the main tail; the swap fires
        for header in &fork_headers[11..] {
            let at = chains.can_connect(header).expect("fork tip extends");
            assert!(chains.connect_header(at, header));
        }

        assert_eq!(chains.branch_ids(), vec![0, 90]);
        assert_eq!(chains.branch_tip(0), Some(Height(105)));
        assert_eq!(chains.branch_tip(90), Some(Height(100)));

        // the main position now ends in the fork's tip
        assert_eq!(
            chains.get_hash(Height(105)),
            Some(fork_headers[15].hash())
        );
        assert_eq!(chains.get_hash(Height(90)), Some(fork_headers[0].hash()));
        // history below the fork point is untouched
        assert_eq!(chains.get_hash(Height(89)), Some(main_headers[89].hash()));
        // the demoted branch is the stub of the old main tail
        assert_eq!(
            chains.branch_hash(90, Height(100)),
            Some(main_headers[100].hash())
        );
        assert_eq!(chains.branch_parent(90), Some(0));

        // and the files carry the swapped identities
        assert!(dir.path().join("forks").join("fork_0_90").exists());
    }

    #[test]
    fn registry_reloads_from_disk() {
        plume_test::init();
        let dir = TempDir::new("plume-chains").expect("temp dir");

        let main_headers = make_headers(GENESIS_PREVIOUS_BLOCK_HASH, 0, 101, 0);
        let params = test_params(main_headers[0].hash());
        {
            let chains = fresh_chains(&dir, params.clone());
            assert!(chains.connect_chunk(0, 0, &serialize_chunk(&main_headers)));
            let fork_header = make_headers(main_headers[89].hash(), 90, 1, 0x5eed)[0];
            chains.fork(0, &fork_header).expect("fork branch created");
        }

        // a stray file that matches the name pattern but not the chain
        std::fs::write(dir.path().join("forks").join("fork_0_33"), [0xcc; 80])
            .expect("write succeeds");

        let reloaded = fresh_chains(&dir, params);
        assert_eq!(reloaded.branch_ids(), vec![0, 90]);
        assert_eq!(reloaded.branch_tip(0), Some(Height(100)));
        assert_eq!(reloaded.branch_tip(90), Some(Height(90)));
        // the main branch exclusively owns everything above the fork point
        assert_eq!(reloaded.branch_size(0), Some(11));
        assert!(reloaded.branch_name(90).is_some());
    }
}
