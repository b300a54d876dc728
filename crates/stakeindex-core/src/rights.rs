//! Deterministic stake-weighted sampler — reproduces the chain's own
//! baking/attesting committee selection for a cycle.
//!
//! Same seed + same stake table must yield a byte-identical assignment on
//! every run and across re-implementations, so the pseudo-random stream is
//! a plain SHA-256 ratchet rather than a platform RNG, and every step of
//! the pipeline (ordering, zero-weight handling, draw order) is pinned.

use sha2::{Digest, Sha256};

use crate::error::IndexerError;
use crate::models::{BakingRight, RightKind};
use crate::types::{AccountId, CycleIndex, Level, Mutez};

// ─── Seed stream ─────────────────────────────────────────────────────────────

/// Deterministic unbounded byte stream derived from a cycle seed.
///
/// `state₀ = SHA-256(seed)`; each draw takes the first 8 state bytes
/// big-endian, then ratchets `state = SHA-256(state)`.
#[derive(Debug, Clone)]
pub struct SeedStream {
    state: [u8; 32],
}

impl SeedStream {
    pub fn new(seed: &[u8]) -> Self {
        Self { state: Sha256::digest(seed).into() }
    }

    pub fn next_u64(&mut self) -> u64 {
        let value = u64::from_be_bytes(self.state[..8].try_into().expect("state is 32 bytes"));
        self.state = Sha256::digest(self.state).into();
        value
    }

    /// Uniform draw in `[0, bound)` via rejection sampling, so the result
    /// is unbiased and independent of platform integer width.
    pub fn draw(&mut self, bound: u64) -> u64 {
        debug_assert!(bound > 0);
        let zone = (u64::MAX / bound) * bound;
        loop {
            let value = self.next_u64();
            if value < zone {
                return value % bound;
            }
        }
    }
}

/// Derive the seed of `cycle` from its predecessor's seed.
pub fn next_cycle_seed(prev_seed: &[u8; 32], cycle: CycleIndex) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_seed);
    hasher.update((cycle as u64).to_be_bytes());
    hasher.finalize().into()
}

/// Seed of cycle 0, derived from the genesis block hash.
pub fn genesis_seed(genesis_hash: &str) -> [u8; 32] {
    Sha256::digest(genesis_hash.as_bytes()).into()
}

// ─── Candidates ──────────────────────────────────────────────────────────────

/// Candidate ordering rule. Differs across protocol version families; each
/// version pins its own rule as a constant, verified by golden vectors —
/// never inferred from an adjacent version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Order by raw address bytes only.
    AddressBytes,
    /// Order by `(first byte of public key) ++ raw address bytes`.
    PubkeyPrefixed,
}

/// One sampling candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub baker_id: AccountId,
    /// Raw address bytes (tie-break input).
    pub address: Vec<u8>,
    /// First byte of the revealed public key, when known.
    pub pubkey_first_byte: u8,
    /// Sampling weight. Stake below the protocol minimum is passed as 0 —
    /// the candidate keeps its position in the ordered list.
    pub stake: Mutez,
}

impl Candidate {
    fn order_key(&self, tie_break: TieBreak) -> Vec<u8> {
        match tie_break {
            TieBreak::AddressBytes => self.address.clone(),
            TieBreak::PubkeyPrefixed => {
                let mut key = Vec::with_capacity(self.address.len() + 1);
                key.push(self.pubkey_first_byte);
                key.extend_from_slice(&self.address);
                key
            }
        }
    }
}

/// Sort candidates descending by the tie-break key. Ties in stake are
/// broken purely by this ordering, never by insertion order.
pub fn order_candidates(mut candidates: Vec<Candidate>, tie_break: TieBreak) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.order_key(tie_break).cmp(&a.order_key(tie_break)));
    candidates
}

// ─── Generator ───────────────────────────────────────────────────────────────

/// Per-cycle rights generator.
pub struct RightsGenerator {
    ordered: Vec<Candidate>,
    cumulative: Vec<Mutez>,
    total: Mutez,
}

impl RightsGenerator {
    /// Build the cumulative-stake table over the ordered candidate list.
    pub fn new(candidates: Vec<Candidate>, tie_break: TieBreak) -> Self {
        let ordered = order_candidates(candidates, tie_break);
        let mut cumulative = Vec::with_capacity(ordered.len());
        let mut total: Mutez = 0;
        for c in &ordered {
            total += c.stake;
            cumulative.push(total);
        }
        Self { ordered, cumulative, total }
    }

    /// Total sampling weight. Zero means no candidate is eligible.
    pub fn total_stake(&self) -> Mutez {
        self.total
    }

    fn pick(&self, point: u64) -> AccountId {
        let point = point as Mutez;
        // First candidate whose cumulative stake exceeds the drawn point.
        let idx = self.cumulative.partition_point(|&c| c <= point);
        self.ordered[idx].baker_id
    }

    /// Produce the full ordered assignment for one cycle.
    ///
    /// Draw order is pinned: levels ascending; within a level, one draw per
    /// baking round, then one per attesting slot.
    pub fn generate(
        &self,
        seed: &[u8],
        cycle: CycleIndex,
        first_level: Level,
        last_level: Level,
        baking_rounds: u32,
        attester_slots: u32,
    ) -> Result<Vec<BakingRight>, IndexerError> {
        if self.total <= 0 {
            return Err(IndexerError::Validation(format!(
                "cycle {cycle}: no staking power to sample from"
            )));
        }
        let mut stream = SeedStream::new(seed);
        let mut rights = Vec::new();
        for level in first_level..=last_level {
            for round in 0..baking_rounds {
                let baker_id = self.pick(stream.draw(self.total as u64));
                rights.push(BakingRight {
                    cycle,
                    level,
                    kind: RightKind::Baking,
                    round: round as i32,
                    baker_id,
                });
            }
            for slot in 0..attester_slots {
                let baker_id = self.pick(stream.draw(self.total as u64));
                rights.push(BakingRight {
                    cycle,
                    level,
                    kind: RightKind::Attesting,
                    round: slot as i32,
                    baker_id,
                });
            }
        }
        Ok(rights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate { baker_id: 1, address: vec![0x01, 0x01], pubkey_first_byte: 0x30, stake: 3000 },
            Candidate { baker_id: 2, address: vec![0x02, 0x02], pubkey_first_byte: 0x20, stake: 1000 },
            Candidate { baker_id: 3, address: vec![0x03, 0x03], pubkey_first_byte: 0x05, stake: 0 },
            Candidate { baker_id: 4, address: vec![0x01, 0x02], pubkey_first_byte: 0x10, stake: 2000 },
        ]
    }

    #[test]
    fn stream_golden_u64s() {
        let mut stream = SeedStream::new(b"cycle-seed-0");
        assert_eq!(stream.next_u64(), 499810503333110077);
        assert_eq!(stream.next_u64(), 17285297428362410976);
        assert_eq!(stream.next_u64(), 14255987422577752973);
        assert_eq!(stream.next_u64(), 15063543174935166358);
    }

    #[test]
    fn stream_golden_draws() {
        let mut stream = SeedStream::new(b"cycle-seed-0");
        let draws: Vec<u64> = (0..8).map(|_| stream.draw(6000)).collect();
        assert_eq!(draws, vec![2077, 2976, 4973, 358, 1173, 1480, 4239, 5163]);
    }

    #[test]
    fn ordering_per_tie_break() {
        let by_pk = order_candidates(candidates(), TieBreak::PubkeyPrefixed);
        let ids: Vec<_> = by_pk.iter().map(|c| c.baker_id).collect();
        assert_eq!(ids, vec![1, 2, 4, 3]);

        let by_addr = order_candidates(candidates(), TieBreak::AddressBytes);
        let ids: Vec<_> = by_addr.iter().map(|c| c.baker_id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }

    #[test]
    fn golden_assignment_pubkey_prefixed() {
        let gen = RightsGenerator::new(candidates(), TieBreak::PubkeyPrefixed);
        assert_eq!(gen.total_stake(), 6000);
        let rights = gen.generate(b"cycle-seed-0", 0, 10, 12, 2, 2).unwrap();
        let expected: Vec<(RightKind, Level, i32, AccountId)> = vec![
            (RightKind::Baking, 10, 0, 4),
            (RightKind::Baking, 10, 1, 4),
            (RightKind::Attesting, 10, 0, 1),
            (RightKind::Attesting, 10, 1, 2),
            (RightKind::Baking, 11, 0, 4),
            (RightKind::Baking, 11, 1, 4),
            (RightKind::Attesting, 11, 0, 1),
            (RightKind::Attesting, 11, 1, 1),
            (RightKind::Baking, 12, 0, 4),
            (RightKind::Baking, 12, 1, 1),
            (RightKind::Attesting, 12, 0, 4),
            (RightKind::Attesting, 12, 1, 1),
        ];
        let actual: Vec<_> = rights.iter().map(|r| (r.kind, r.level, r.round, r.baker_id)).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn golden_assignment_address_bytes() {
        // Same seed, different tie-break rule: a different assignment.
        let gen = RightsGenerator::new(candidates(), TieBreak::AddressBytes);
        let rights = gen.generate(b"cycle-seed-0", 0, 10, 10, 2, 2).unwrap();
        let actual: Vec<_> = rights.iter().map(|r| (r.kind, r.round, r.baker_id)).collect();
        assert_eq!(
            actual,
            vec![
                (RightKind::Baking, 0, 4),
                (RightKind::Baking, 1, 4),
                (RightKind::Attesting, 0, 1),
                (RightKind::Attesting, 1, 2),
            ]
        );
    }

    #[test]
    fn repeated_generation_is_identical() {
        let gen = RightsGenerator::new(candidates(), TieBreak::PubkeyPrefixed);
        let a = gen.generate(b"cycle-seed-0", 0, 10, 12, 2, 2).unwrap();
        let b = gen.generate(b"cycle-seed-0", 0, 10, 12, 2, 2).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn zero_weight_candidate_never_drawn_but_keeps_position() {
        let gen = RightsGenerator::new(candidates(), TieBreak::AddressBytes);
        // Candidate 3 sorts first under AddressBytes but has zero stake.
        assert_eq!(gen.ordered[0].baker_id, 3);
        let rights = gen.generate(b"cycle-seed-0", 0, 1, 50, 2, 2).unwrap();
        assert!(rights.iter().all(|r| r.baker_id != 3));
    }

    #[test]
    fn empty_stake_table_is_rejected() {
        let gen = RightsGenerator::new(
            vec![Candidate { baker_id: 1, address: vec![1], pubkey_first_byte: 0, stake: 0 }],
            TieBreak::AddressBytes,
        );
        assert!(gen.generate(b"seed", 0, 1, 2, 1, 0).is_err());
    }

    #[test]
    fn cycle_seed_chain_golden() {
        let seed0 = genesis_seed("BLockGenesisGenesis11111111111111111111111111111111");
        assert_eq!(
            hex::encode(seed0),
            "3d0b46ef3e0b1d88f9db1a372d3ff760229fd91f26838b16a3cacb912da963f5"
        );
        let seed1 = next_cycle_seed(&seed0, 1);
        assert_eq!(
            hex::encode(seed1),
            "7880863411c1a4b15ae25080a5cd678cce5335b89f62bab67b4be608405365b1"
        );
    }
}
