//! Seams to the camera and the target-detection primitive
//!
//! The landing controller only needs a non-blocking frame poll and a
//! detector that turns a frame into a normalized target fix; both are
//! supplied from outside (camera SDK, OpenCV pipeline, simulator).

/// One video frame in whatever pixel layout the detector expects
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A detected landing target
///
/// Offsets are normalized to `[-1, 1]` from the image center; `radius` is
/// the apparent target size in pixels and grows as the vehicle descends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetFix {
    pub offset_x: f32,
    pub offset_y: f32,
    pub radius: f32,
}

/// Frame supplier with a non-blocking poll
pub trait VideoSource: Send {
    /// Next frame if one is ready; `None` is not an error
    fn try_frame(&mut self) -> Option<Frame>;

    /// Release the underlying device; called once when the control loop exits
    fn release(&mut self) {}
}

/// Target detection primitive
pub trait TargetDetector: Send {
    /// Locate the landing target in `frame`, if it is visible
    fn detect(&mut self, frame: &Frame) -> Option<TargetFix>;
}
