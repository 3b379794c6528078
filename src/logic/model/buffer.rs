//! Sequence Buffer - Sliding window for the reconstruction detector
//!
//! One buffer per engine, shared by every flow the engine scores. Push and
//! window read happen under one lock so a caller always gets the window
//! that ends with its own vector. Every reset starts a new generation, and a
//! push tagged with an older generation is dropped.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug)]
pub struct SequenceBuffer {
    inner: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    vectors: VecDeque<Vec<f64>>,
    capacity: usize,
    generation: u64,
}

impl SequenceBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Window {
                vectors: VecDeque::with_capacity(capacity),
                capacity,
                generation: 0,
            }),
        }
    }

    // ========================================================================
    // BUFFER OPERATIONS
    // ========================================================================

    /// Push a normalized vector; returns the flattened window once full
    pub fn push(&self, vector: &[f64]) -> Option<Vec<f64>> {
        let mut window = self.inner.lock();
        Self::push_locked(&mut window, vector)
    }

    /// Push only if no reset happened since `generation` was read
    pub fn push_in(&self, generation: u64, vector: &[f64]) -> Option<Vec<f64>> {
        let mut window = self.inner.lock();
        if window.generation != generation {
            return None;
        }
        Self::push_locked(&mut window, vector)
    }

    fn push_locked(window: &mut Window, vector: &[f64]) -> Option<Vec<f64>> {
        window.vectors.push_back(vector.to_vec());
        while window.vectors.len() > window.capacity {
            window.vectors.pop_front();
        }

        if window.vectors.len() < window.capacity {
            return None;
        }
        Some(window.vectors.iter().flatten().copied().collect())
    }

    /// Current window, oldest first, if full
    pub fn window(&self) -> Option<Vec<Vec<f64>>> {
        let window = self.inner.lock();
        (window.vectors.len() >= window.capacity).then(|| window.vectors.iter().cloned().collect())
    }

    pub fn is_ready(&self) -> bool {
        let window = self.inner.lock();
        window.vectors.len() >= window.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    pub fn clear(&self) {
        self.inner.lock().vectors.clear();
    }

    /// Empty the buffer and change its window length
    pub fn reset(&self, capacity: usize) {
        let mut window = self.inner.lock();
        window.vectors.clear();
        window.capacity = capacity.max(1);
        window.generation += 1;
    }

    pub fn status(&self) -> BufferStatus {
        let window = self.inner.lock();
        let current = window.vectors.len();
        let required = window.capacity;

        BufferStatus {
            current_size: current,
            required_size: required,
            is_ready: current >= required,
            fill_percent: (current as f32 / required as f32 * 100.0).min(100.0),
        }
    }
}

impl Default for SequenceBuffer {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_SEQUENCE_LENGTH)
    }
}

/// Buffer status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferStatus {
    pub current_size: usize,
    pub required_size: usize,
    pub is_ready: bool,
    pub fill_percent: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_until_full() {
        let buffer = SequenceBuffer::new(3);
        assert!(buffer.is_empty());
        assert!(buffer.push(&[1.0, 2.0]).is_none());
        assert!(buffer.push(&[3.0, 4.0]).is_none());
        assert!(!buffer.is_ready());

        let window = buffer.push(&[5.0, 6.0]).unwrap();
        assert_eq!(window, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert!(buffer.is_ready());
    }

    #[test]
    fn test_window_slides() {
        let buffer = SequenceBuffer::new(2);
        buffer.push(&[1.0]);
        buffer.push(&[2.0]);
        let window = buffer.push(&[3.0]).unwrap();
        assert_eq!(window, vec![2.0, 3.0]);
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.window(), Some(vec![vec![2.0], vec![3.0]]));
    }

    #[test]
    fn test_reset_and_status() {
        let buffer = SequenceBuffer::new(4);
        buffer.push(&[1.0]);
        let status = buffer.status();
        assert_eq!(status.current_size, 1);
        assert_eq!(status.required_size, 4);
        assert!(!status.is_ready);
        assert_eq!(status.fill_percent, 25.0);

        buffer.reset(2);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    fn test_push_from_stale_generation_is_dropped() {
        let buffer = SequenceBuffer::new(2);
        let before = buffer.generation();
        buffer.push_in(before, &[1.0]);

        buffer.reset(2);
        assert_ne!(buffer.generation(), before);
        assert!(buffer.push_in(before, &[2.0]).is_none());
        assert!(buffer.is_empty());

        let current = buffer.generation();
        assert!(buffer.push_in(current, &[3.0]).is_none());
        assert_eq!(buffer.push_in(current, &[4.0]), Some(vec![3.0, 4.0]));
    }
}
