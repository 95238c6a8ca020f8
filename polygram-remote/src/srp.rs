//! SRP math for the service's 2FA password check.
//!
//! The service hands out a [`PasswordChallenge`] (group parameters, two
//! salts, its ephemeral public value `g_b`); the client derives the password
//! key with the salted-SHA-256 / PBKDF2-HMAC-SHA-512 tree, picks an
//! ephemeral secret `a` and answers with [`SrpProof`] — its public value
//! `g_a` and the transcript hash `M1`. All big-number images are padded to
//! 256 big-endian bytes before hashing.
//!
//! The server side of the exchange ([`issue_challenge`] / [`verify_proof`])
//! exists for the loopback service, which checks proofs by recomputing the
//! transcript from the stored password.

use hmac::Hmac;
use num_bigint::{BigInt, Sign};
use num_traits::ops::euclid::Euclid;
use num_traits::Zero;
use sha2::{Digest, Sha256, Sha512};

use crate::errors::RemoteError;

// ─── Challenge & proof ────────────────────────────────────────────────────────

/// SRP parameters for one password check, as issued by the service.
#[derive(Clone, Debug, PartialEq)]
pub struct PasswordChallenge {
    /// Correlates the proof with the challenge; single use.
    pub srp_id: i64,
    pub g:      u32,
    /// Group modulus, big-endian.
    pub p:      Vec<u8>,
    pub salt1:  Vec<u8>,
    pub salt2:  Vec<u8>,
    /// Server ephemeral public value, big-endian.
    pub g_b:    Vec<u8>,
    /// Password hint set by the account owner, if any.
    pub hint:   Option<String>,
}

/// The client's answer to a [`PasswordChallenge`].
#[derive(Clone, Debug, PartialEq)]
pub struct SrpProof {
    pub srp_id: i64,
    pub g_a:    [u8; 256],
    pub m1:     [u8; 32],
}

// ─── Hash tree ────────────────────────────────────────────────────────────────

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut h = Sha256::new();
    for p in parts {
        h.update(p);
    }
    h.finalize().into()
}

fn salted(data: &[u8], salt: &[u8]) -> [u8; 32] {
    sha256(&[salt, data, salt])
}

fn password_hash_1(password: &[u8], salt1: &[u8], salt2: &[u8]) -> [u8; 32] {
    salted(&salted(password, salt1), salt2)
}

/// The full password key derivation: salted hashes around a 100 000-round
/// PBKDF2-HMAC-SHA-512.
fn password_hash_2(password: &[u8], salt1: &[u8], salt2: &[u8]) -> [u8; 32] {
    let hash1 = password_hash_1(password, salt1, salt2);
    let mut dk = [0u8; 64];
    // Infallible for a fixed non-empty output length.
    let _ = pbkdf2::pbkdf2::<Hmac<Sha512>>(&hash1, salt1, 100_000, &mut dk);
    salted(&dk, salt2)
}

fn pad256(data: &[u8]) -> [u8; 256] {
    let mut out = [0u8; 256];
    let start = 256usize.saturating_sub(data.len());
    out[start..].copy_from_slice(&data[data.len().saturating_sub(256)..]);
    out
}

fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

fn big(bytes: &[u8]) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, bytes)
}

/// `k = H(p | g)` — the multiplier binding the group parameters.
fn multiplier_k(p: &[u8], g: u32) -> BigInt {
    big(&sha256(&[p, &pad256(&[g as u8])]))
}

/// `x` — the password key as a big integer.
fn password_x(password: &str, salt1: &[u8], salt2: &[u8]) -> BigInt {
    big(&password_hash_2(password.as_bytes(), salt1, salt2))
}

/// The transcript hash `M1` both sides must arrive at.
fn transcript_m1(
    p:     &[u8],
    g:     u32,
    salt1: &[u8],
    salt2: &[u8],
    g_a:   &[u8; 256],
    g_b:   &[u8; 256],
    k_a:   &[u8; 32],
) -> [u8; 32] {
    let h_p = sha256(&[p]);
    let h_g = sha256(&[&pad256(&[g as u8])]);
    let pg  = xor32(&h_p, &h_g);
    sha256(&[&pg, &sha256(&[salt1]), &sha256(&[salt2]), g_a, g_b, k_a])
}

// ─── Client side ──────────────────────────────────────────────────────────────

/// Compute the proof for `challenge` using a fresh random ephemeral secret.
pub fn prove(challenge: &PasswordChallenge, password: &str) -> Result<SrpProof, RemoteError> {
    let mut a = [0u8; 256];
    getrandom::getrandom(&mut a)
        .map_err(|e| RemoteError::Payload(format!("no entropy for SRP ephemeral: {e}")))?;
    Ok(prove_with_secret(challenge, password, &a))
}

/// Deterministic core of [`prove`] — `a` is the client's ephemeral secret.
pub fn prove_with_secret(
    challenge: &PasswordChallenge,
    password:  &str,
    a:         &[u8; 256],
) -> SrpProof {
    let big_p = big(&challenge.p);
    let big_g = BigInt::from(challenge.g);
    let big_a = big(a);
    let g_b   = pad256(&challenge.g_b);

    let g_a = pad256(&big_g.modpow(&big_a, &big_p).to_bytes_be().1);

    let u = big(&sha256(&[&g_a, &g_b]));
    let x = password_x(password, &challenge.salt1, &challenge.salt2);

    // t = g_b - k·v (mod p); s_a = t^(a + u·x)
    let k      = multiplier_k(&challenge.p, challenge.g);
    let v      = big_g.modpow(&x, &big_p);
    let kv     = (k * v) % &big_p;
    let t      = (big(&g_b) - kv).rem_euclid(&big_p);
    let s_a    = t.modpow(&(big_a + u * x), &big_p);
    let k_a    = sha256(&[&pad256(&s_a.to_bytes_be().1)]);

    let m1 = transcript_m1(
        &challenge.p,
        challenge.g,
        &challenge.salt1,
        &challenge.salt2,
        &g_a,
        &g_b,
        &k_a,
    );

    SrpProof { srp_id: challenge.srp_id, g_a, m1 }
}

// ─── Server side (loopback) ───────────────────────────────────────────────────

/// A 2048-bit group modulus (RFC 3526 group 14) with generator 3.
const GROUP_P_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
    "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
    "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
    "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
    "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
    "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
    "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
    "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
    "15728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

const GROUP_G: u32 = 3;

fn decode_hex(s: &str) -> Vec<u8> {
    s.as_bytes()
        .chunks(2)
        .map(|pair| {
            let hi = (pair[0] as char).to_digit(16).unwrap_or(0);
            let lo = (pair[1] as char).to_digit(16).unwrap_or(0);
            (hi * 16 + lo) as u8
        })
        .collect()
}

/// The group modulus used by [`issue_challenge`].
pub fn group_modulus() -> Vec<u8> {
    decode_hex(GROUP_P_HEX)
}

/// Build a challenge for `password` with fresh salts and ephemeral secret.
/// Returns the challenge plus the server's secret `b`, which the caller must
/// keep to verify the eventual proof.
pub fn issue_challenge(
    srp_id:   i64,
    password: &str,
    hint:     Option<String>,
) -> Result<(PasswordChallenge, [u8; 256]), RemoteError> {
    let mut salt1 = [0u8; 8];
    let mut salt2 = [0u8; 8];
    let mut b     = [0u8; 256];
    getrandom::getrandom(&mut salt1)
        .and_then(|_| getrandom::getrandom(&mut salt2))
        .and_then(|_| getrandom::getrandom(&mut b))
        .map_err(|e| RemoteError::Payload(format!("no entropy for SRP challenge: {e}")))?;

    let p     = group_modulus();
    let big_p = big(&p);
    let big_g = BigInt::from(GROUP_G);

    // g_b = k·v + g^b (mod p)
    let x   = password_x(password, &salt1, &salt2);
    let v   = big_g.modpow(&x, &big_p);
    let k   = multiplier_k(&p, GROUP_G);
    let g_b = (k * v + big_g.modpow(&big(&b), &big_p)) % &big_p;

    let challenge = PasswordChallenge {
        srp_id,
        g: GROUP_G,
        p,
        salt1: salt1.to_vec(),
        salt2: salt2.to_vec(),
        g_b: pad256(&g_b.to_bytes_be().1).to_vec(),
        hint,
    };
    Ok((challenge, b))
}

/// Verify a client proof against the stored password, recomputing the
/// transcript with the server secret `b` from [`issue_challenge`].
pub fn verify_proof(
    challenge: &PasswordChallenge,
    b:         &[u8; 256],
    password:  &str,
    proof:     &SrpProof,
) -> bool {
    if proof.srp_id != challenge.srp_id {
        return false;
    }
    let big_p = big(&challenge.p);
    let big_a = big(&proof.g_a);
    if big_a.is_zero() || big_a >= big_p {
        return false;
    }

    let g_a = pad256(&proof.g_a);
    let g_b = pad256(&challenge.g_b);

    let u = big(&sha256(&[&g_a, &g_b]));
    let x = password_x(password, &challenge.salt1, &challenge.salt2);
    let v = BigInt::from(challenge.g).modpow(&x, &big_p);

    // s = (A · v^u)^b
    let s   = (big_a * v.modpow(&u, &big_p)).modpow(&big(b), &big_p);
    let k_a = sha256(&[&pad256(&s.to_bytes_be().1)]);

    let expected = transcript_m1(
        &challenge.p,
        challenge.g,
        &challenge.salt1,
        &challenge.salt2,
        &g_a,
        &g_b,
        &k_a,
    );
    expected == proof.m1
}
