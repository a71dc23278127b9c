use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};

/// Groups arriving frames into fixed-size windows and reports when a window
/// holds its full complement. Frame order within a window is irrelevant on
/// the way in; `flush` always hands the indices back in ascending order.
///
/// The last window of a bounded run may stay short; everything else must
/// reach `window_size` before it is considered complete.
pub struct WindowTracker {
    window_size: u64,
    counts: BTreeMap<u64, u64>,
    received: BTreeSet<u64>,
}

impl WindowTracker {
    pub fn new(window_size: u64) -> Self {
        assert!(window_size > 0, "window size must be positive");
        Self {
            window_size,
            counts: BTreeMap::new(),
            received: BTreeSet::new(),
        }
    }

    /// Registers one frame arrival and returns the window it belongs to.
    /// The filename must end in `_<number>.<ext>` with a 1-based number;
    /// anything else is a violation of the input contract.
    pub fn add_frame(&mut self, name: &str) -> Result<u64> {
        let index = frame_index(name)?;
        self.received.insert(index);
        let window = index / self.window_size;
        *self.counts.entry(window).or_insert(0) += 1;
        Ok(window)
    }

    pub fn is_complete(&self, window: u64) -> bool {
        self.counts.get(&window) == Some(&self.window_size)
    }

    /// The sole still-open window, if exactly one remains tracked. Used at
    /// end-of-stream to find a trailing partial window.
    pub fn last_window(&self) -> Option<u64> {
        if self.counts.len() == 1 {
            self.counts.keys().next().copied()
        } else {
            None
        }
    }

    /// Removes the window and returns its frame indices in ascending order.
    /// Stops at the first index that never arrived, so a short terminal
    /// window flushes only what it received.
    pub fn flush(&mut self, window: u64) -> Result<Vec<u64>> {
        if self.counts.remove(&window).is_none() {
            bail!("flush of untracked window {window}");
        }
        let mut frames = Vec::with_capacity(self.window_size as usize);
        for offset in 0..self.window_size {
            let index = offset + window * self.window_size;
            if !self.received.remove(&index) {
                break;
            }
            frames.push(index);
        }
        Ok(frames)
    }
}

/// Extracts the 0-based frame index from a name like `img_17.png`: the digit
/// run between the last `_` and the extension, 1-based in the name.
fn frame_index(name: &str) -> Result<u64> {
    let (stem, _ext) = name
        .rsplit_once('.')
        .with_context(|| format!("frame name {name:?} has no extension"))?;
    let (_, digits) = stem
        .rsplit_once('_')
        .with_context(|| format!("frame name {name:?} has no _<number> suffix"))?;
    let number: u64 = digits
        .parse()
        .with_context(|| format!("frame name {name:?} has a non-numeric index"))?;
    if number == 0 {
        bail!("frame name {name:?} must carry a 1-based index");
    }
    Ok(number - 1)
}
