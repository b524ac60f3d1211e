//! Persisted rolling-average history
//!
//! A fixed-capacity circular buffer of raw market prices (per kWh, before
//! the cost formula) covering a trailing 72-hour window. The buffer is
//! persisted as a fixed-size little-endian blob with a magic+version
//! header so an incompatible or corrupted blob is detected on load and
//! reset instead of poisoning the average.
//!
//! The store itself has no gating logic: idempotent ingestion is driven
//! by the caller through the `last_slot_key` watermark, because only the
//! caller knows the slot identity of each sample.

use crate::error::{ElspotError, Result};
use crate::state::Resolution;
use crate::storage::{BlobStore, HISTORY_BLOB_KEY};

/// Wall-clock duration the window represents
pub const WINDOW_HOURS: u16 = 72;

/// Physical capacity: 72 hours at the finest (15-minute) resolution
pub const MAX_WINDOW_SAMPLES: usize = (WINDOW_HOURS as usize) * 4;

/// Raw per-kWh average assumed while no history exists. Keeps the
/// classifier away from a zero baseline ("free energy").
pub const DEFAULT_RAW_AVERAGE_PER_KWH: f64 = 1.0;

const BLOB_MAGIC: u32 = 0x4E50_4D41;
const BLOB_VERSION: u16 = 3;
const SLOT_KEY_BYTES: usize = 20;
const BLOB_LEN: usize = 4 + 2 + 2 + 2 + 2 + 2 + SLOT_KEY_BYTES + MAX_WINDOW_SAMPLES * 4;

/// Number of window samples a resolution needs to span 72 hours
pub fn window_samples_for(resolution: Resolution) -> u16 {
    (WINDOW_HOURS * 60) / resolution.minutes()
}

/// Rolling-average store state
#[derive(Debug, Clone)]
pub struct MovingAverageStore {
    /// Resolution this instance was built for
    pub resolution: Resolution,

    /// Logical window length in samples (shrinks at coarser resolutions
    /// so the window always spans the same wall-clock duration)
    pub window_samples: u16,

    /// Samples currently held, <= window_samples
    pub count: u16,

    /// Next write cursor
    pub head: u16,

    /// Most recent interval key already folded into the buffer.
    /// Never decreases across appends once non-empty.
    pub last_slot_key: String,

    values: [f32; MAX_WINDOW_SAMPLES],
}

impl Default for MovingAverageStore {
    fn default() -> Self {
        Self {
            resolution: Resolution::Hour,
            window_samples: window_samples_for(Resolution::Hour),
            count: 0,
            head: 0,
            last_slot_key: String::new(),
            values: [0.0; MAX_WINDOW_SAMPLES],
        }
    }
}

impl MovingAverageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reinitialize all fields to defaults. Always succeeds.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Reset and retarget if the stored shape does not match the
    /// requested resolution; a shape change invalidates the samples.
    pub fn ensure_shape(&mut self, resolution: Resolution) {
        let target_window = window_samples_for(resolution);
        if self.resolution != resolution || self.window_samples != target_window {
            self.reset();
            self.resolution = resolution;
            self.window_samples = target_window;
        }
    }

    /// Add a raw sample at the write cursor, overwriting the oldest
    /// sample once the logical window is full
    pub fn append(&mut self, raw_value: f32) {
        let window = usize::from(self.window_samples).clamp(1, MAX_WINDOW_SAMPLES);
        let head = usize::from(self.head) % window;
        self.values[head] = raw_value;
        self.head = ((head + 1) % window) as u16;
        if usize::from(self.count) < window {
            self.count += 1;
        }
    }

    /// Whether `key` is past the ingestion watermark
    pub fn is_new_slot(&self, key: &str) -> bool {
        self.last_slot_key.is_empty() || key > self.last_slot_key.as_str()
    }

    /// Advance the watermark after folding a slot into the buffer
    pub fn record_slot(&mut self, key: &str) {
        let mut truncated = key.to_string();
        truncated.truncate(SLOT_KEY_BYTES - 1);
        self.last_slot_key = truncated;
    }

    /// Arithmetic mean of the held raw samples; a fixed placeholder when
    /// the buffer is empty
    pub fn mean(&self) -> f64 {
        let count = usize::from(self.count).min(MAX_WINDOW_SAMPLES);
        if count == 0 {
            return DEFAULT_RAW_AVERAGE_PER_KWH;
        }
        let sum: f64 = self.values[..count].iter().map(|v| f64::from(*v)).sum();
        sum / count as f64
    }

    /// Serialize to the stable on-disk layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(BLOB_LEN);
        out.extend_from_slice(&BLOB_MAGIC.to_le_bytes());
        out.extend_from_slice(&BLOB_VERSION.to_le_bytes());
        out.extend_from_slice(&self.resolution.minutes().to_le_bytes());
        out.extend_from_slice(&self.window_samples.to_le_bytes());
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&self.head.to_le_bytes());

        let mut key = [0u8; SLOT_KEY_BYTES];
        let raw = self.last_slot_key.as_bytes();
        let n = raw.len().min(SLOT_KEY_BYTES - 1);
        key[..n].copy_from_slice(&raw[..n]);
        out.extend_from_slice(&key);

        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Parse the on-disk layout, failing on a length, magic or version
    /// mismatch so the caller resets instead of trusting garbage
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != BLOB_LEN {
            return Err(ElspotError::schema(format!(
                "history blob length {} != {}",
                bytes.len(),
                BLOB_LEN
            )));
        }

        let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if magic != BLOB_MAGIC {
            return Err(ElspotError::schema(format!(
                "history blob magic {:#010x} != {:#010x}",
                magic, BLOB_MAGIC
            )));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != BLOB_VERSION {
            return Err(ElspotError::schema(format!(
                "history blob version {} != {}",
                version, BLOB_VERSION
            )));
        }

        let resolution_minutes = u16::from_le_bytes([bytes[6], bytes[7]]);
        let window_samples = u16::from_le_bytes([bytes[8], bytes[9]]);
        let count = u16::from_le_bytes([bytes[10], bytes[11]]);
        let head = u16::from_le_bytes([bytes[12], bytes[13]]);

        let key_raw = &bytes[14..14 + SLOT_KEY_BYTES];
        let key_end = key_raw.iter().position(|b| *b == 0).unwrap_or(SLOT_KEY_BYTES);
        let last_slot_key = String::from_utf8_lossy(&key_raw[..key_end]).to_string();

        let mut values = [0.0f32; MAX_WINDOW_SAMPLES];
        let mut offset = 14 + SLOT_KEY_BYTES;
        for v in &mut values {
            *v = f32::from_le_bytes([
                bytes[offset],
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
            ]);
            offset += 4;
        }

        let window = window_samples.clamp(1, MAX_WINDOW_SAMPLES as u16);
        Ok(Self {
            resolution: Resolution::from_minutes(resolution_minutes),
            window_samples: window,
            count: count.min(window),
            head: head % window,
            last_slot_key,
            values,
        })
    }

    /// Load from durable storage. Ok(None) when no blob was ever saved;
    /// a schema error when one exists but fails the header check.
    /// Never auto-repairs; the caller resets explicitly.
    pub fn load<S: BlobStore>(store: &S) -> Result<Option<Self>> {
        match store.load(HISTORY_BLOB_KEY)? {
            None => Ok(None),
            Some(bytes) => Self::from_bytes(&bytes).map(Some),
        }
    }

    /// Write the full blob to durable storage
    pub fn save<S: BlobStore>(&self, store: &S) -> Result<()> {
        store.save(HISTORY_BLOB_KEY, &self.to_bytes())
    }
}
