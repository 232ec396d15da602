//! Free-flying first-person camera.
//!
//! The camera is a plain state machine: the frame loop feeds it elapsed time
//! plus a [`MovementIntent`] and a pointer delta, and reads back the view and
//! projection matrices the two GPU stages consume. Nothing here touches the
//! device.

use glam::{Mat4, Vec2, Vec3};

/// Pitch is kept strictly away from the poles so `direction x up` never
/// degenerates.
pub const PITCH_LIMIT_DEGREES: f32 = 89.0;

const WORLD_UP: Vec3 = Vec3::Y;

/// How the toggle-look flag flips look mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LookToggle {
    /// Flip once per press; holding the key does nothing further.
    #[default]
    Edge,
    /// Flip on every frame the key is down.
    Level,
}

/// The seven per-frame input flags the camera reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MovementIntent {
    pub forward: bool,
    pub backward: bool,
    pub strafe_left: bool,
    pub strafe_right: bool,
    pub ascend: bool,
    pub descend: bool,
    pub toggle_look: bool,
}

/// Initial pose and lens of the camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    pub position: Vec3,
    pub direction: Vec3,
    /// World units per second.
    pub speed: f32,
    pub fov_degrees: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    direction: Vec3,
    yaw: f32,
    pitch: f32,
    speed: f32,
    fov_degrees: f32,
    aspect_ratio: f32,
    near: f32,
    far: f32,
    can_look: bool,
    look_toggle: LookToggle,
    toggle_held: bool,
}

impl Camera {
    /// Builds a camera facing `params.direction`.
    ///
    /// Yaw and pitch are derived from the direction so the first look update
    /// continues from the current heading instead of snapping to +X. The
    /// stored direction is the normalized input, not a round trip through the
    /// angles.
    pub fn new(params: CameraParams) -> Self {
        let direction = params.direction.try_normalize().unwrap_or(Vec3::NEG_Z);
        let pitch = direction
            .y
            .clamp(-1.0, 1.0)
            .asin()
            .to_degrees()
            .clamp(-PITCH_LIMIT_DEGREES, PITCH_LIMIT_DEGREES);
        let yaw = direction.z.atan2(direction.x).to_degrees();

        Self {
            position: params.position,
            direction,
            yaw,
            pitch,
            speed: params.speed.max(0.0),
            fov_degrees: params.fov_degrees,
            aspect_ratio: sanitize_aspect(params.aspect_ratio),
            near: params.near,
            far: params.far,
            can_look: false,
            look_toggle: LookToggle::default(),
            toggle_held: false,
        }
    }

    pub fn with_look_toggle(mut self, mode: LookToggle) -> Self {
        self.look_toggle = mode;
        self
    }

    pub fn with_look_enabled(mut self, enabled: bool) -> Self {
        self.can_look = enabled;
        self
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn direction(&self) -> Vec3 {
        self.direction
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.aspect_ratio
    }

    pub fn can_look(&self) -> bool {
        self.can_look
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.aspect_ratio = sanitize_aspect(aspect_ratio);
    }

    /// Moves the camera for one frame and applies the look toggle.
    ///
    /// Each active flag contributes `speed * elapsed` along its axis; the
    /// contributions are summed without renormalising, so diagonals are faster
    /// than single axes. Negative or non-finite elapsed time counts as zero.
    pub fn advance_position(&mut self, elapsed_seconds: f32, intent: MovementIntent) {
        let elapsed = if elapsed_seconds.is_finite() {
            elapsed_seconds.max(0.0)
        } else {
            0.0
        };
        let velocity = self.speed * elapsed;
        let right = self.right();

        let mut displacement = Vec3::ZERO;
        if intent.forward {
            displacement += self.direction * velocity;
        }
        if intent.backward {
            displacement -= self.direction * velocity;
        }
        if intent.strafe_left {
            displacement -= right * velocity;
        }
        if intent.strafe_right {
            displacement += right * velocity;
        }
        if intent.ascend {
            displacement += WORLD_UP * velocity;
        }
        if intent.descend {
            displacement -= WORLD_UP * velocity;
        }
        self.position += displacement;

        self.apply_toggle(intent.toggle_look);
    }

    fn apply_toggle(&mut self, key_down: bool) {
        let flip = match self.look_toggle {
            LookToggle::Level => key_down,
            LookToggle::Edge => key_down && !self.toggle_held,
        };
        self.toggle_held = key_down;
        if flip {
            self.can_look = !self.can_look;
            tracing::debug!(can_look = self.can_look, "look mode toggled");
        }
    }

    /// Rotates the camera by a pointer delta in pixels.
    ///
    /// Returns `false` without touching any state when look mode is off. The
    /// caller recenters the pointer whenever this returns `true`.
    pub fn update_orientation(&mut self, pointer_delta: Vec2, sensitivity: f32) -> bool {
        if !self.can_look {
            return false;
        }
        if !pointer_delta.is_finite() || !sensitivity.is_finite() {
            return true;
        }

        self.yaw += pointer_delta.x * sensitivity;
        self.pitch -= pointer_delta.y * sensitivity;
        self.pitch = self.pitch.clamp(-PITCH_LIMIT_DEGREES, PITCH_LIMIT_DEGREES);
        self.yaw %= 360.0;

        let (yaw_sin, yaw_cos) = self.yaw.to_radians().sin_cos();
        let (pitch_sin, pitch_cos) = self.pitch.to_radians().sin_cos();
        let front = Vec3::new(yaw_cos * pitch_cos, pitch_sin, yaw_sin * pitch_cos);
        self.direction = front.normalize();
        true
    }

    /// Unit vector to the camera's right, on the horizontal plane.
    pub fn right(&self) -> Vec3 {
        self.direction.cross(WORLD_UP).normalize_or_zero()
    }

    /// Look-at from the camera position towards `position + direction`.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.direction, WORLD_UP)
    }

    /// Rotation-only view: look-at from the origin towards `direction`.
    ///
    /// The compute program builds world-space ray directions from this and
    /// adds the camera position itself.
    pub fn origin_centered_view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(Vec3::ZERO, self.direction, WORLD_UP)
    }

    /// OpenGL-convention perspective (clip z in -1..1), matching what the
    /// GLSL programs expect.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(
            self.fov_degrees.to_radians(),
            self.aspect_ratio,
            self.near,
            self.far,
        )
    }
}

fn sanitize_aspect(aspect_ratio: f32) -> f32 {
    if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
        aspect_ratio
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn params() -> CameraParams {
        CameraParams {
            position: Vec3::ZERO,
            direction: Vec3::NEG_Z,
            speed: 5.0,
            fov_degrees: 100.0,
            aspect_ratio: 4.0 / 3.0,
            near: 0.1,
            far: 100.0,
        }
    }

    fn forward() -> MovementIntent {
        MovementIntent {
            forward: true,
            ..MovementIntent::default()
        }
    }

    fn toggle() -> MovementIntent {
        MovementIntent {
            toggle_look: true,
            ..MovementIntent::default()
        }
    }

    #[test]
    fn holding_forward_for_two_seconds_moves_ten_units() {
        let mut camera = Camera::new(params());
        camera.advance_position(1.0, forward());
        camera.advance_position(1.0, forward());
        assert!(camera.position().distance(Vec3::new(0.0, 0.0, -10.0)) < EPSILON);
    }

    #[test]
    fn each_axis_moves_speed_times_elapsed() {
        let cases = [
            (
                MovementIntent {
                    backward: true,
                    ..MovementIntent::default()
                },
                Vec3::new(0.0, 0.0, 1.0),
            ),
            (
                MovementIntent {
                    strafe_left: true,
                    ..MovementIntent::default()
                },
                Vec3::new(-1.0, 0.0, 0.0),
            ),
            (
                MovementIntent {
                    strafe_right: true,
                    ..MovementIntent::default()
                },
                Vec3::new(1.0, 0.0, 0.0),
            ),
            (
                MovementIntent {
                    ascend: true,
                    ..MovementIntent::default()
                },
                Vec3::Y,
            ),
            (
                MovementIntent {
                    descend: true,
                    ..MovementIntent::default()
                },
                Vec3::NEG_Y,
            ),
        ];

        for elapsed in [0.0_f32, 0.016, 0.5, 3.0] {
            for (intent, axis) in cases {
                let mut camera = Camera::new(params());
                camera.advance_position(elapsed, intent);
                let expected = axis * 5.0 * elapsed;
                assert!(
                    camera.position().distance(expected) < EPSILON,
                    "{intent:?} over {elapsed}s moved to {:?}",
                    camera.position()
                );
            }
        }
    }

    #[test]
    fn diagonal_movement_is_not_normalized() {
        let mut forward_only = Camera::new(params());
        forward_only.advance_position(0.5, forward());

        let mut strafe_only = Camera::new(params());
        strafe_only.advance_position(
            0.5,
            MovementIntent {
                strafe_right: true,
                ..MovementIntent::default()
            },
        );

        let mut both = Camera::new(params());
        both.advance_position(
            0.5,
            MovementIntent {
                forward: true,
                strafe_right: true,
                ..MovementIntent::default()
            },
        );

        let sum = forward_only.position() + strafe_only.position();
        assert!(both.position().distance(sum) < EPSILON);
        assert!(both.position().length() > forward_only.position().length());
    }

    #[test]
    fn negative_elapsed_is_clamped_to_zero() {
        let mut camera = Camera::new(params());
        camera.advance_position(-1.0, forward());
        camera.advance_position(f32::NAN, forward());
        assert_eq!(camera.position(), Vec3::ZERO);
    }

    #[test]
    fn orientation_is_ignored_until_look_is_enabled() {
        let mut camera = Camera::new(params());
        assert!(!camera.update_orientation(Vec2::new(100.0, 50.0), 0.1));
        assert_eq!(camera.direction(), Vec3::NEG_Z);
    }

    #[test]
    fn pitch_stays_clamped_and_direction_unit_length() {
        let mut camera = Camera::new(params()).with_look_enabled(true);
        let deltas = [
            Vec2::new(13.0, -2000.0),
            Vec2::new(-400.0, 3000.0),
            Vec2::new(7.5, 0.25),
            Vec2::new(0.0, -900.0),
            Vec2::new(1.0e4, 1.0e4),
            Vec2::ZERO,
        ];
        for delta in deltas {
            assert!(camera.update_orientation(delta, 0.1));
            assert!(camera.pitch() >= -PITCH_LIMIT_DEGREES);
            assert!(camera.pitch() <= PITCH_LIMIT_DEGREES);
            assert!((camera.direction().length() - 1.0).abs() < EPSILON);
        }
    }

    #[test]
    fn orientation_follows_spherical_coordinates() {
        let mut camera = Camera::new(params()).with_look_enabled(true);
        // Initial yaw is -90 degrees (facing -Z); turn right by 90.
        camera.update_orientation(Vec2::new(900.0, 0.0), 0.1);
        assert!((camera.yaw() - 0.0).abs() < 1e-3);
        assert!(camera.direction().distance(Vec3::X) < 1e-4);

        camera.update_orientation(Vec2::new(0.0, -450.0), 0.1);
        assert!((camera.pitch() - 45.0).abs() < 1e-3);
        let expected = Vec3::new(1.0, 1.0, 0.0).normalize();
        assert!(camera.direction().distance(expected) < 1e-4);
    }

    #[test]
    fn zero_input_is_idempotent() {
        let mut camera = Camera::new(params()).with_look_enabled(true);
        let before = camera.clone();
        camera.advance_position(1.0, MovementIntent::default());
        assert_eq!(camera.position(), before.position());
        assert!(camera.can_look());

        let mut idle = Camera::new(params());
        idle.update_orientation(Vec2::ZERO, 0.1);
        assert_eq!(idle.direction(), Vec3::NEG_Z);
    }

    #[test]
    fn origin_centered_view_of_default_camera_is_identity() {
        let camera = Camera::new(params());
        let expected = Mat4::look_at_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        assert_eq!(camera.origin_centered_view_matrix(), expected);
        assert_eq!(camera.origin_centered_view_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn origin_centered_view_ignores_translation() {
        let mut camera = Camera::new(params());
        camera.advance_position(2.0, forward());
        assert_eq!(camera.origin_centered_view_matrix(), Mat4::IDENTITY);
        let translated = camera.view_matrix();
        assert_eq!(
            translated.w_axis.truncate(),
            Vec3::new(0.0, 0.0, -camera.position().z)
        );
    }

    #[test]
    fn edge_toggle_flips_once_per_press() {
        let mut camera = Camera::new(params()).with_look_toggle(LookToggle::Edge);
        for _ in 0..5 {
            camera.advance_position(0.016, toggle());
        }
        assert!(camera.can_look());
        camera.advance_position(0.016, MovementIntent::default());
        camera.advance_position(0.016, toggle());
        assert!(!camera.can_look());
    }

    #[test]
    fn level_toggle_flips_every_held_frame() {
        let mut camera = Camera::new(params()).with_look_toggle(LookToggle::Level);
        for _ in 0..5 {
            camera.advance_position(0.016, toggle());
        }
        assert!(camera.can_look());
        camera.advance_position(0.016, toggle());
        assert!(!camera.can_look());
    }

    #[test]
    fn projection_tracks_aspect_ratio() {
        let mut camera = Camera::new(params());
        camera.set_aspect_ratio(2.0);
        let proj = camera.projection_matrix();
        let expected = Mat4::perspective_rh_gl(100f32.to_radians(), 2.0, 0.1, 100.0);
        assert_eq!(proj, expected);

        camera.set_aspect_ratio(0.0);
        assert_eq!(camera.aspect_ratio(), 1.0);
    }
}
