//! Stereo sample frame

use std::ops::{Add, AddAssign, Mul};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Frame {
    pub left: f64,
    pub right: f64,
}

impl Frame {
    pub const SILENT: Frame = Frame { left: 0.0, right: 0.0 };

    pub fn new(left: f64, right: f64) -> Self {
        Self { left, right }
    }

    /// Same sample on both channels
    pub fn mono(sample: f64) -> Self {
        Self { left: sample, right: sample }
    }

    /// Larger absolute value of the two channels
    pub fn peak(&self) -> f64 {
        self.left.abs().max(self.right.abs())
    }
}

impl Add for Frame {
    type Output = Frame;

    fn add(self, other: Frame) -> Frame {
        Frame::new(self.left + other.left, self.right + other.right)
    }
}

impl AddAssign for Frame {
    fn add_assign(&mut self, other: Frame) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl Mul<f64> for Frame {
    type Output = Frame;

    fn mul(self, gain: f64) -> Frame {
        Frame::new(self.left * gain, self.right * gain)
    }
}
