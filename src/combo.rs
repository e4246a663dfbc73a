//! Held-key tracking and hold-time accumulation for key combos.

/// Bit standing for "some key with index ≥ 31 is held".
const WIDE_KEY_BIT: u32 = 1 << 31;

/// Set of currently held keys.
///
/// Indices 0..=30 map to their own bit. Higher indices are tracked
/// individually but reported through the shared [`WIDE_KEY_BIT`] so they
/// still break any combo. Repeated transitions are idempotent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeldKeys {
    bits: u32,
    wide: [u32; 8],
}

impl HeldKeys {
    pub const fn new() -> Self {
        Self {
            bits: 0,
            wide: [0; 8],
        }
    }

    pub fn apply(&mut self, index: u8, down: bool) {
        let (word, bit) = if index < 31 {
            (&mut self.bits, 1u32 << index)
        } else {
            (
                &mut self.wide[usize::from(index / 32)],
                1u32 << (index % 32),
            )
        };
        if down {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }

    pub fn mask(&self) -> u32 {
        if self.wide.iter().any(|&w| w != 0) {
            self.bits | WIDE_KEY_BIT
        } else {
            self.bits
        }
    }
}

/// Accumulates how long one held-key mask has been held.
///
/// Time only advances from successive timestamps handed in by the caller;
/// any change of the mask restarts accumulation from zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComboTimer {
    held: u32,
    held_ms: u32,
    last_stamp: u32,
    fired: bool,
}

impl ComboTimer {
    pub const fn new() -> Self {
        Self {
            held: 0,
            held_ms: 0,
            last_stamp: 0,
            fired: false,
        }
    }

    /// Record the held mask observed at `stamp`.
    pub fn update(&mut self, held: u32, stamp: u32) {
        if held != self.held {
            self.held = held;
            self.held_ms = 0;
            self.last_stamp = stamp;
            self.fired = false;
        } else {
            self.advance(stamp);
        }
    }

    /// Advance accumulated hold time to `now`.
    ///
    /// Stamps older than the last one seen add nothing.
    pub fn advance(&mut self, now: u32) {
        let delta = now.wrapping_sub(self.last_stamp);
        if (delta as i32) > 0 {
            self.held_ms = self.held_ms.saturating_add(delta);
            self.last_stamp = now;
        }
    }

    /// Returns `true` exactly once per hold when `combo` has been held
    /// alone for at least `threshold_ms`.
    pub fn check(&mut self, combo: u32, threshold_ms: u32) -> bool {
        if self.fired || combo == 0 || self.held != combo || self.held_ms < threshold_ms {
            return false;
        }
        self.fired = true;
        true
    }

    pub fn held(&self) -> u32 {
        self.held
    }

    pub fn held_ms(&self) -> u32 {
        self.held_ms
    }

    pub fn fired(&self) -> bool {
        self.fired
    }
}
