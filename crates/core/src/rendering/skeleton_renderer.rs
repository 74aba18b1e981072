use image::{Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, BresenhamLineIter, Canvas};

use crate::detection::domain::pose::PoseCandidate;
use crate::detection::domain::skeleton::LIMBS;

const KEYPOINT_RADIUS: i32 = 10;
/// Limbs are stamped with discs of this radius, giving a 4 px stroke.
const LIMB_RADIUS: i32 = 2;

/// Keypoints at or below this confidence are not drawn, nor are limbs
/// touching them.
const DRAW_VISIBILITY: f64 = 0.5;

const SELECTED_RGB: [u8; 3] = [255, 255, 0];
const DEFAULT_RGB: [u8; 3] = [0, 255, 0];

/// Which poses to draw and which one to highlight.
///
/// With a selection only the selected pose is drawn; without one every
/// pose is drawn in the default color.
#[derive(Clone, Copy, Debug)]
pub struct DrawPlan {
    pub selected: Option<usize>,
    pub click_requested: bool,
}

impl DrawPlan {
    fn should_draw(&self, index: usize) -> bool {
        !self.click_requested || self.selected == Some(index)
    }

    fn color(&self, index: usize) -> [u8; 3] {
        if self.selected == Some(index) {
            SELECTED_RGB
        } else {
            DEFAULT_RGB
        }
    }
}

/// Draw skeletons onto an RGB frame in place.
pub fn draw_on_frame(image: &mut RgbImage, poses: &[PoseCandidate], plan: DrawPlan) {
    for (i, pose) in poses.iter().enumerate() {
        if plan.should_draw(i) {
            draw_pose(image, pose, Rgb(plan.color(i)));
        }
    }
}

/// Skeletons on a fully transparent canvas of the given size.
pub fn draw_overlay(width: u32, height: u32, poses: &[PoseCandidate], plan: DrawPlan) -> RgbaImage {
    let mut canvas = RgbaImage::new(width, height);
    for (i, pose) in poses.iter().enumerate() {
        if plan.should_draw(i) {
            let [r, g, b] = plan.color(i);
            draw_pose(&mut canvas, pose, Rgba([r, g, b, 255]));
        }
    }
    canvas
}

fn draw_pose<C: Canvas>(canvas: &mut C, pose: &PoseCandidate, color: C::Pixel) {
    let (w, h) = canvas.dimensions();
    let (w, h) = (w as f64, h as f64);
    let points: Vec<Option<(i32, i32)>> = pose
        .keypoints()
        .iter()
        .map(|k| {
            (k.visibility > DRAW_VISIBILITY).then(|| ((k.x * w) as i32, (k.y * h) as i32))
        })
        .collect();

    for &(a, b) in LIMBS.iter() {
        if let (Some(Some(p0)), Some(Some(p1))) = (points.get(a), points.get(b)) {
            draw_thick_line(canvas, *p0, *p1, color);
        }
    }
    for &center in points.iter().flatten() {
        draw_filled_circle_mut(canvas, center, KEYPOINT_RADIUS, color);
    }
}

fn draw_thick_line<C: Canvas>(canvas: &mut C, from: (i32, i32), to: (i32, i32), color: C::Pixel) {
    let start = (from.0 as f32, from.1 as f32);
    let end = (to.0 as f32, to.1 as f32);
    for point in BresenhamLineIter::new(start, end) {
        draw_filled_circle_mut(canvas, point, LIMB_RADIUS, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::pose::{Keypoint, RawPose};
    use crate::detection::domain::skeleton::{LEFT_SHOULDER, NUM_KEYPOINTS, RIGHT_SHOULDER};

    /// Only the shoulders are visible, at the given x positions on row y.
    fn shoulders(left_x: f64, right_x: f64, y: f64) -> PoseCandidate {
        let keypoints = (0..NUM_KEYPOINTS)
            .map(|i| match i {
                LEFT_SHOULDER => Keypoint::new(left_x, y, 0.0, 0.9),
                RIGHT_SHOULDER => Keypoint::new(right_x, y, 0.0, 0.9),
                _ => Keypoint::new(0.0, 0.0, 0.0, 0.1),
            })
            .collect();
        PoseCandidate::from_raw(RawPose::new(keypoints)).unwrap()
    }

    const ALL: DrawPlan = DrawPlan {
        selected: None,
        click_requested: false,
    };

    #[test]
    fn test_overlay_without_poses_is_transparent() {
        let canvas = draw_overlay(30, 20, &[], ALL);
        assert_eq!(canvas.dimensions(), (30, 20));
        assert!(canvas.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_limb_and_keypoints_are_drawn_green() {
        let canvas = draw_overlay(200, 100, &[shoulders(0.2, 0.8, 0.5)], ALL);
        // Midpoint of the shoulder line.
        assert_eq!(canvas.get_pixel(100, 50).0, [0, 255, 0, 255]);
        // Invisible keypoints at the origin are skipped.
        assert_eq!(canvas.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn test_selected_pose_only_is_drawn_in_yellow() {
        let poses = vec![shoulders(0.1, 0.3, 0.5), shoulders(0.6, 0.9, 0.5)];
        let plan = DrawPlan {
            selected: Some(1),
            click_requested: true,
        };
        let canvas = draw_overlay(200, 100, &poses, plan);
        assert_eq!(canvas.get_pixel(40, 50).0[3], 0);
        assert_eq!(canvas.get_pixel(150, 50).0, [255, 255, 0, 255]);
    }

    #[test]
    fn test_click_without_selection_draws_nothing() {
        let plan = DrawPlan {
            selected: None,
            click_requested: true,
        };
        let canvas = draw_overlay(100, 100, &[shoulders(0.2, 0.8, 0.5)], plan);
        assert!(canvas.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn test_draw_on_frame_keeps_background() {
        let mut frame = RgbImage::from_pixel(100, 100, Rgb([7, 7, 7]));
        draw_on_frame(&mut frame, &[shoulders(0.3, 0.7, 0.5)], ALL);
        assert_eq!(frame.get_pixel(50, 50).0, [0, 255, 0]);
        assert_eq!(frame.get_pixel(50, 5).0, [7, 7, 7]);
    }

    #[test]
    fn test_drawing_near_edges_does_not_panic() {
        let mut frame = RgbImage::new(10, 10);
        draw_on_frame(&mut frame, &[shoulders(0.0, 1.0, 1.0)], ALL);
    }
}
