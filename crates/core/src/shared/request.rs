use serde::Serialize;

/// Query flags of a processing request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RenderFlags {
    /// Include an encoded image in the response.
    pub return_image: bool,
    /// Draw skeletons onto the returned frame.
    pub draw: bool,
    /// Return a transparent skeleton-only PNG instead of the annotated frame.
    pub overlay: bool,
    /// Allow downscaling and background dispatch.
    pub resize: bool,
}

impl Default for RenderFlags {
    fn default() -> Self {
        Self {
            return_image: true,
            draw: true,
            overlay: true,
            resize: true,
        }
    }
}

/// A click in original-frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ClickPoint {
    pub x: i64,
    pub y: i64,
}

impl ClickPoint {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }

    /// Position relative to a `width` x `height` frame.
    pub fn normalized(&self, width: u32, height: u32) -> (f64, f64) {
        (
            self.x as f64 / width.max(1) as f64,
            self.y as f64 / height.max(1) as f64,
        )
    }
}

/// Everything besides the frame itself that changes a response.
///
/// Two requests for the same bytes only share a cached result when their
/// variants are equal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RequestVariant {
    pub flags: RenderFlags,
    pub click: Option<ClickPoint>,
}

impl RequestVariant {
    pub fn new(flags: RenderFlags, click: Option<ClickPoint>) -> Self {
        Self { flags, click }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_flags_are_all_on() {
        let flags = RenderFlags::default();
        assert!(flags.return_image && flags.draw && flags.overlay && flags.resize);
    }

    #[test]
    fn test_click_normalization() {
        let (x, y) = ClickPoint::new(160, 60).normalized(320, 240);
        assert_relative_eq!(x, 0.5);
        assert_relative_eq!(y, 0.25);
    }

    #[test]
    fn test_variants_differ_by_click() {
        let a = RequestVariant::new(RenderFlags::default(), None);
        let b = RequestVariant::new(RenderFlags::default(), Some(ClickPoint::new(1, 1)));
        assert_ne!(a, b);
    }
}
