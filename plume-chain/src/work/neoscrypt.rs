//! The NeoScrypt mining hash.
//!
//! NeoScrypt with the default profile, as mined since the hash-change
//! fork: a FastKDF stage built on keyed BLAKE2s-256 stretches the 80-byte
//! header into 256 bytes of state, two scrypt-style memory-hard lanes
//! (Salsa20/8 and ChaCha20/8, N = 128, r = 2) mix independent copies of
//! that state, and a final FastKDF pass over the XOR of the lanes produces
//! the 32-byte digest.
//!
//! No registry crate provides this algorithm, so the reference behavior is
//! carried here; only the keyed-BLAKE2s PRF comes from a library.

/// Size of the FastKDF ring buffer.
const KDF_BUF_SIZE: usize = 256;
/// Bytes of ring buffer hashed per PRF call.
const PRF_INPUT_SIZE: usize = 64;
/// Bytes of ring buffer keyed into each PRF call.
const PRF_KEY_SIZE: usize = 32;
/// PRF digest length.
const PRF_OUTPUT_SIZE: usize = 32;
/// PRF rounds per FastKDF invocation.
const KDF_ITERATIONS: usize = 32;

/// One Salsa/ChaCha block.
const BLOCK_SIZE: usize = 64;
/// Blocks per mixing state: 2r with r = 2.
const MIX_BLOCKS: usize = 4;
/// Bytes of mixing state per lane.
const STATE_SIZE: usize = MIX_BLOCKS * BLOCK_SIZE;
/// Cost parameter: memory cells per lane.
const N: usize = 128;

/// The NeoScrypt digest of `input` (an 80-byte header in this codebase,
/// though any length works).
pub fn hash(input: &[u8]) -> [u8; 32] {
    let mut salsa_lane = [0u8; STATE_SIZE];
    fastkdf(input, input, &mut salsa_lane);

    let mut chacha_lane = salsa_lane;
    smix(&mut chacha_lane, chacha_8);
    smix(&mut salsa_lane, salsa_8);

    for (salsa_byte, chacha_byte) in salsa_lane.iter_mut().zip(chacha_lane.iter()) {
        *salsa_byte ^= chacha_byte;
    }

    let mut output = [0u8; 32];
    fastkdf(input, &salsa_lane, &mut output);
    output
}

/// Keyed BLAKE2s-256 over one PRF window.
fn prf(input: &[u8], key: &[u8]) -> [u8; PRF_OUTPUT_SIZE] {
    let digest = blake2s_simd::Params::new()
        .hash_length(PRF_OUTPUT_SIZE)
        .key(key)
        .hash(input);
    let mut output = [0u8; PRF_OUTPUT_SIZE];
    output.copy_from_slice(digest.as_bytes());
    output
}

/// The FastKDF stage: a 256-byte ring buffer of salt material is
/// repeatedly re-keyed at a digest-dependent offset, then folded with the
/// password buffer to produce `output.len()` bytes.
fn fastkdf(password: &[u8], salt: &[u8], output: &mut [u8]) {
    // password and salt buffers carry an oversize tail mirroring their
    // head, so PRF windows near the end of the ring never wrap mid-read
    let mut password_buf = [0u8; KDF_BUF_SIZE + PRF_INPUT_SIZE];
    let mut salt_buf = [0u8; KDF_BUF_SIZE + PRF_KEY_SIZE];
    for (i, byte) in password_buf.iter_mut().enumerate() {
        *byte = password[i % password.len()];
    }
    for (i, byte) in salt_buf.iter_mut().enumerate() {
        *byte = salt[i % salt.len()];
    }

    let mut bufidx = 0usize;
    for _ in 0..KDF_ITERATIONS {
        let digest = prf(
            &password_buf[bufidx..bufidx + PRF_INPUT_SIZE],
            &salt_buf[bufidx..bufidx + PRF_KEY_SIZE],
        );

        // the next offset is the byte sum of the digest, mod ring size
        bufidx = digest
            .iter()
            .map(|&byte| usize::from(byte))
            .sum::<usize>()
            & (KDF_BUF_SIZE - 1);
        for (j, &byte) in digest.iter().enumerate() {
            salt_buf[bufidx + j] ^= byte;
        }

        // keep the mirror tail coherent with the modified region
        let (ring, tail) = salt_buf.split_at_mut(KDF_BUF_SIZE);
        if bufidx < PRF_KEY_SIZE {
            let n = PRF_KEY_SIZE - bufidx;
            tail[bufidx..bufidx + n].copy_from_slice(&ring[bufidx..bufidx + n]);
        } else if KDF_BUF_SIZE - bufidx < PRF_OUTPUT_SIZE {
            let n = PRF_OUTPUT_SIZE - (KDF_BUF_SIZE - bufidx);
            ring[..n].copy_from_slice(&tail[..n]);
        }
    }

    // fold the password buffer in and emit, wrapping around the ring
    let remaining = KDF_BUF_SIZE - bufidx;
    if remaining >= output.len() {
        for (j, byte) in output.iter_mut().enumerate() {
            salt_buf[bufidx + j] ^= password_buf[j];
            *byte = salt_buf[bufidx + j];
        }
    } else {
        for j in 0..remaining {
            salt_buf[bufidx + j] ^= password_buf[j];
        }
        for j in 0..output.len() - remaining {
            salt_buf[j] ^= password_buf[remaining + j];
        }
        output[..remaining].copy_from_slice(&salt_buf[bufidx..KDF_BUF_SIZE]);
        let wrapped = output.len() - remaining;
        output[remaining..].copy_from_slice(&salt_buf[..wrapped]);
    }
}

/// The sequential memory-hard stage of one lane.
fn smix(state: &mut [u8; STATE_SIZE], core: fn(&mut [u32; 16])) {
    let mut cells = vec![[0u8; STATE_SIZE]; N];
    for cell in cells.iter_mut() {
        *cell = *state;
        blkmix(state, core);
    }
    for _ in 0..N {
        let j = integerify(state) & (N - 1);
        for (state_byte, cell_byte) in state.iter_mut().zip(cells[j].iter()) {
            *state_byte ^= cell_byte;
        }
        blkmix(state, core);
    }
}

/// The data-dependent cell index: the first word of the last block.
fn integerify(state: &[u8; STATE_SIZE]) -> usize {
    let offset = (MIX_BLOCKS - 1) * BLOCK_SIZE;
    u32::from_le_bytes([
        state[offset],
        state[offset + 1],
        state[offset + 2],
        state[offset + 3],
    ]) as usize
}

/// One block-mix round: chain the core through the four blocks, then swap
/// the middle pair.
fn blkmix(state: &mut [u8; STATE_SIZE], core: fn(&mut [u32; 16])) {
    xor_block(state, 0, 3 * BLOCK_SIZE);
    core_block(state, 0, core);
    xor_block(state, BLOCK_SIZE, 0);
    core_block(state, BLOCK_SIZE, core);
    xor_block(state, 2 * BLOCK_SIZE, BLOCK_SIZE);
    core_block(state, 2 * BLOCK_SIZE, core);
    xor_block(state, 3 * BLOCK_SIZE, 2 * BLOCK_SIZE);
    core_block(state, 3 * BLOCK_SIZE, core);

    for i in 0..BLOCK_SIZE {
        state.swap(BLOCK_SIZE + i, 2 * BLOCK_SIZE + i);
    }
}

fn xor_block(state: &mut [u8; STATE_SIZE], dst: usize, src: usize) {
    for i in 0..BLOCK_SIZE {
        state[dst + i] ^= state[src + i];
    }
}

/// Runs the cipher core over one 64-byte block in place.
fn core_block(state: &mut [u8; STATE_SIZE], offset: usize, core: fn(&mut [u32; 16])) {
    let mut words = [0u32; 16];
    for (i, word) in words.iter_mut().enumerate() {
        let at = offset + 4 * i;
        *word = u32::from_le_bytes([state[at], state[at + 1], state[at + 2], state[at + 3]]);
    }
    core(&mut words);
    for (i, word) in words.iter().enumerate() {
        state[offset + 4 * i..offset + 4 * i + 4].copy_from_slice(&word.to_le_bytes());
    }
}

/// Salsa20/8 core with the feed-forward addition, as in scrypt.
fn salsa_8(block: &mut [u32; 16]) {
    let mut x = *block;
    for _ in 0..4 {
        // column round
        x[4] ^= x[0].wrapping_add(x[12]).rotate_left(7);
        x[8] ^= x[4].wrapping_add(x[0]).rotate_left(9);
        x[12] ^= x[8].wrapping_add(x[4]).rotate_left(13);
        x[0] ^= x[12].wrapping_add(x[8]).rotate_left(18);
        x[9] ^= x[5].wrapping_add(x[1]).rotate_left(7);
        x[13] ^= x[9].wrapping_add(x[5]).rotate_left(9);
        x[1] ^= x[13].wrapping_add(x[9]).rotate_left(13);
        x[5] ^= x[1].wrapping_add(x[13]).rotate_left(18);
        x[14] ^= x[10].wrapping_add(x[6]).rotate_left(7);
        x[2] ^= x[14].wrapping_add(x[10]).rotate_left(9);
        x[6] ^= x[2].wrapping_add(x[14]).rotate_left(13);
        x[10] ^= x[6].wrapping_add(x[2]).rotate_left(18);
        x[3] ^= x[15].wrapping_add(x[11]).rotate_left(7);
        x[7] ^= x[3].wrapping_add(x[15]).rotate_left(9);
        x[11] ^= x[7].wrapping_add(x[3]).rotate_left(13);
        x[15] ^= x[11].wrapping_add(x[7]).rotate_left(18);
        // row round
        x[1] ^= x[0].wrapping_add(x[3]).rotate_left(7);
        x[2] ^= x[1].wrapping_add(x[0]).rotate_left(9);
        x[3] ^= x[2].wrapping_add(x[1]).rotate_left(13);
        x[0] ^= x[3].wrapping_add(x[2]).rotate_left(18);
        x[6] ^= x[5].wrapping_add(x[4]).rotate_left(7);
        x[7] ^= x[6].wrapping_add(x[5]).rotate_left(9);
        x[4] ^= x[7].wrapping_add(x[6]).rotate_left(13);
        x[5] ^= x[4].wrapping_add(x[7]).rotate_left(18);
        x[11] ^= x[10].wrapping_add(x[9]).rotate_left(7);
        x[8] ^= x[11].wrapping_add(x[10]).rotate_left(9);
        x[9] ^= x[8].wrapping_add(x[11]).rotate_left(13);
        x[10] ^= x[9].wrapping_add(x[8]).rotate_left(18);
        x[12] ^= x[15].wrapping_add(x[14]).rotate_left(7);
        x[13] ^= x[12].wrapping_add(x[15]).rotate_left(9);
        x[14] ^= x[13].wrapping_add(x[12]).rotate_left(13);
        x[15] ^= x[14].wrapping_add(x[13]).rotate_left(18);
    }
    for (out, mixed) in block.iter_mut().zip(x.iter()) {
        *out = out.wrapping_add(*mixed);
    }
}

/// ChaCha20/8 core with the feed-forward addition.
fn chacha_8(block: &mut [u32; 16]) {
    fn quarter(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
        x[a] = x[a].wrapping_add(x[b]);
        x[d] = (x[d] ^ x[a]).rotate_left(16);
        x[c] = x[c].wrapping_add(x[d]);
        x[b] = (x[b] ^ x[c]).rotate_left(12);
        x[a] = x[a].wrapping_add(x[b]);
        x[d] = (x[d] ^ x[a]).rotate_left(8);
        x[c] = x[c].wrapping_add(x[d]);
        x[b] = (x[b] ^ x[c]).rotate_left(7);
    }

    let mut x = *block;
    for _ in 0..4 {
        quarter(&mut x, 0, 4, 8, 12);
        quarter(&mut x, 1, 5, 9, 13);
        quarter(&mut x, 2, 6, 10, 14);
        quarter(&mut x, 3, 7, 11, 15);
        quarter(&mut x, 0, 5, 10, 15);
        quarter(&mut x, 1, 6, 11, 12);
        quarter(&mut x, 2, 7, 8, 13);
        quarter(&mut x, 3, 4, 9, 14);
    }
    for (out, mixed) in block.iter_mut().zip(x.iter()) {
        *out = out.wrapping_add(*mixed);
    }
}
