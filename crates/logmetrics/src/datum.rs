//! Atomic numeric value cell.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The mutable value behind one label set.
///
/// Stores an `f64` as raw bits so reads and writes are lock-free. A datum
/// serializes as a plain JSON number; non-finite values serialize as `null`
/// (what `serde_json` does for them) and `null` decodes back to NaN, so a bad
/// value survives a round trip as something consumers can reject.
#[derive(Debug, Default)]
pub struct Datum(AtomicU64);

impl Datum {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Atomic read of the current value.
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    pub fn add(&self, delta: f64) {
        // The closure always returns Some, so the update cannot fail.
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }
}

impl Serialize for Datum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.get())
    }
}

impl<'de> Deserialize<'de> for Datum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Option::<f64>::deserialize(deserializer)?;
        Ok(Self::new(value.unwrap_or(f64::NAN)))
    }
}
