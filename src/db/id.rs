//! Sortable document id generation.

use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;

/// 2016-01-01T00:00:00Z in milliseconds since the Unix epoch.
const ID_EPOCH_MS: i64 = 1_451_606_400_000;

const TIME_DIGITS: usize = 8;
const SEQUENCE_DIGITS: usize = 4;
const RANDOM_DIGITS: usize = 4;
const SEQUENCE_LIMIT: u64 = 36u64.pow(SEQUENCE_DIGITS as u32);

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Default)]
struct IdState {
    last_ms: u64,
    sequence: u64,
}

/// Generates ids that strictly increase in collation order.
///
/// Each id is the time since 2016 in base 36, then a per-millisecond
/// sequence, then a random suffix that keeps two generators apart.
#[derive(Debug, Default)]
pub struct IdGenerator {
    state: Mutex<IdState>,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let now = (Utc::now().timestamp_millis() - ID_EPOCH_MS).max(0) as u64;
        self.next_at(now)
    }

    fn next_at(&self, now_ms: u64) -> String {
        let (time, sequence) = {
            let mut state = match self.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };

            // The clock may step backwards; never let it.
            if now_ms > state.last_ms {
                state.last_ms = now_ms;
                state.sequence = 0;
            } else {
                state.sequence += 1;
                if state.sequence >= SEQUENCE_LIMIT {
                    state.last_ms += 1;
                    state.sequence = 0;
                }
            }

            (state.last_ms, state.sequence)
        };

        let mut id = String::with_capacity(TIME_DIGITS + SEQUENCE_DIGITS + RANDOM_DIGITS);
        push_base36(&mut id, time, TIME_DIGITS);
        push_base36(&mut id, sequence, SEQUENCE_DIGITS);

        let mut rng = rand::thread_rng();
        for _ in 0..RANDOM_DIGITS {
            id.push(ALPHABET[rng.gen_range(0..ALPHABET.len())] as char);
        }

        id
    }
}

/// Append `value` as exactly `width` base-36 digits, keeping the low digits.
fn push_base36(out: &mut String, mut value: u64, width: usize) {
    let mut digits = vec![b'0'; width];
    for slot in digits.iter_mut().rev() {
        *slot = ALPHABET[(value % 36) as usize];
        value /= 36;
    }
    out.extend(digits.into_iter().map(char::from));
}
