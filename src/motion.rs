//! Panorama movement integrator.
//!
//! The camera sits at the centre of a textured sphere and never rotates; looking
//! around means rotating the sphere. Held keys push the camera along its view
//! direction and velocity decays every frame. `frontend/viewer.js` mirrors
//! [`ViewerState::advance`] line for line and receives its tunables from
//! [`MotionConfig`] through the rendered page.

use glam::{Vec2, Vec3};
use serde::Serialize;
use std::collections::HashSet;

pub const DEFAULT_FORWARD_ACCELERATION: f32 = 0.08;
pub const DEFAULT_BACKWARD_ACCELERATION: f32 = 0.05;
pub const DEFAULT_MAX_SPEED: f32 = 2.0;
pub const DEFAULT_FRICTION: f32 = 0.85;
pub const DEFAULT_IDLE_FRICTION: f32 = 0.95;
pub const DEFAULT_IDLE_EPSILON: f32 = 0.01;
pub const DEFAULT_ROTATION_SPEED: f32 = 0.005;
pub const DEFAULT_MOVE_SPEED: f32 = 0.5;
pub const DEFAULT_ZOOM_SPEED: f32 = 1.0;
pub const DEFAULT_STEP_INCREMENT: f32 = 0.05;
pub const DEFAULT_BOB_AMPLITUDE: f32 = 0.02;
pub const DEFAULT_DRAG_FACTOR: f32 = 0.008;
pub const DEFAULT_MIN_FOV: f32 = 30.0;
pub const DEFAULT_MAX_FOV: f32 = 90.0;
pub const DEFAULT_INITIAL_FOV: f32 = 75.0;

/// Duration of one nominal display frame; all per-frame tunables are expressed
/// against it.
pub const NOMINAL_FRAME_SECS: f32 = 1.0 / 60.0;
/// Upper bound on nominal frames integrated by a single `advance` call.
pub const MAX_FRAME_CATCHUP: f32 = 4.0;

/// The camera looks down -Z for its whole lifetime.
const VIEW_FORWARD: Vec3 = Vec3::NEG_Z;

/// Tunable movement parameters, serialized verbatim into the viewer page.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionConfig {
    pub forward_acceleration: f32,
    pub backward_acceleration: f32,
    pub max_speed: f32,
    /// Multiplicative velocity decay applied every frame.
    pub friction: f32,
    /// Extra decay applied while not pushing forward.
    pub idle_friction: f32,
    /// Speed below which `idle_friction` no longer applies.
    pub idle_epsilon: f32,
    pub rotation_speed: f32,
    pub move_speed: f32,
    pub zoom_speed: f32,
    pub step_increment: f32,
    pub bob_amplitude: f32,
    pub drag_factor: f32,
    pub min_fov: f32,
    pub max_fov: f32,
    pub initial_fov: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            forward_acceleration: DEFAULT_FORWARD_ACCELERATION,
            backward_acceleration: DEFAULT_BACKWARD_ACCELERATION,
            max_speed: DEFAULT_MAX_SPEED,
            friction: DEFAULT_FRICTION,
            idle_friction: DEFAULT_IDLE_FRICTION,
            idle_epsilon: DEFAULT_IDLE_EPSILON,
            rotation_speed: DEFAULT_ROTATION_SPEED,
            move_speed: DEFAULT_MOVE_SPEED,
            zoom_speed: DEFAULT_ZOOM_SPEED,
            step_increment: DEFAULT_STEP_INCREMENT,
            bob_amplitude: DEFAULT_BOB_AMPLITUDE,
            drag_factor: DEFAULT_DRAG_FACTOR,
            min_fov: DEFAULT_MIN_FOV,
            max_fov: DEFAULT_MAX_FOV,
            initial_fov: DEFAULT_INITIAL_FOV,
        }
    }
}

/// Logical controls the keyboard maps onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Control {
    Forward,
    Backward,
    RotateLeft,
    RotateRight,
    Up,
    Down,
    ZoomOut,
    ZoomIn,
}

impl Control {
    /// Maps a DOM `KeyboardEvent.key` value, case-insensitively.
    pub fn from_key(key: &str) -> Option<Self> {
        let control = match key.to_ascii_lowercase().as_str() {
            "w" => Control::Forward,
            "s" => Control::Backward,
            "a" | "arrowleft" => Control::RotateLeft,
            "d" | "arrowright" => Control::RotateRight,
            "arrowup" => Control::Up,
            "arrowdown" => Control::Down,
            "q" => Control::ZoomOut,
            "e" => Control::ZoomIn,
            _ => return None,
        };
        Some(control)
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct DragState {
    active: bool,
    last: Vec2,
}

/// What the renderer has to do after a frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    pub projection_changed: bool,
}

/// Per-page viewer state: camera, sphere orientation and input.
#[derive(Clone, Debug)]
pub struct ViewerState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub fov: f32,
    pub aspect: f32,
    /// Euler angles (x = pitch, y = yaw) of the panorama sphere.
    pub sphere_rotation: Vec3,
    step_phase: f32,
    /// Lower-cased names of the bound keys currently down.
    held: HashSet<String>,
    drag: DragState,
    projection_dirty: bool,
}

impl ViewerState {
    pub fn new(config: &MotionConfig, aspect: f32) -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            fov: config.initial_fov.clamp(config.min_fov, config.max_fov),
            aspect,
            sphere_rotation: Vec3::ZERO,
            step_phase: 0.0,
            held: HashSet::new(),
            drag: DragState::default(),
            projection_dirty: false,
        }
    }

    /// Records a key press. Returns `false` for keys with no binding.
    pub fn key_down(&mut self, key: &str) -> bool {
        if Control::from_key(key).is_none() {
            return false;
        }
        self.held.insert(key.to_ascii_lowercase());
        true
    }

    pub fn key_up(&mut self, key: &str) {
        self.held.remove(&key.to_ascii_lowercase());
    }

    /// A control is active while any key bound to it is down.
    pub fn is_held(&self, control: Control) -> bool {
        self.held
            .iter()
            .any(|key| Control::from_key(key) == Some(control))
    }

    pub fn pointer_down(&mut self, x: f32, y: f32) {
        self.drag = DragState {
            active: true,
            last: Vec2::new(x, y),
        };
    }

    pub fn pointer_up(&mut self) {
        self.drag.active = false;
    }

    /// Rotates the sphere by the pointer delta while a button is held.
    pub fn pointer_move(&mut self, config: &MotionConfig, x: f32, y: f32) {
        if !self.drag.active {
            return;
        }
        let current = Vec2::new(x, y);
        let delta = current - self.drag.last;
        self.sphere_rotation.y += delta.x * config.drag_factor;
        self.sphere_rotation.x += delta.y * config.drag_factor;
        self.drag.last = current;
    }

    pub fn resize(&mut self, width: f32, height: f32) {
        if height <= 0.0 {
            return;
        }
        self.aspect = width / height;
        self.projection_dirty = true;
    }

    pub fn speed(&self) -> f32 {
        self.velocity.length()
    }

    /// Integrates exactly one nominal frame.
    pub fn step(&mut self, config: &MotionConfig) -> FrameOutcome {
        self.integrate(config, 1.0)
    }

    /// Integrates `elapsed_secs` of wall time, scaling every per-frame constant
    /// by the number of nominal frames it covers.
    pub fn advance(&mut self, config: &MotionConfig, elapsed_secs: f32) -> FrameOutcome {
        let frames = (elapsed_secs / NOMINAL_FRAME_SECS).clamp(0.0, MAX_FRAME_CATCHUP);
        self.integrate(config, frames)
    }

    fn integrate(&mut self, config: &MotionConfig, frames: f32) -> FrameOutcome {
        let forward_held = self.is_held(Control::Forward);

        if forward_held {
            self.velocity += VIEW_FORWARD * config.forward_acceleration * frames;
            self.step_phase += config.step_increment * frames;
            self.position.y += self.step_phase.sin() * config.bob_amplitude * frames;
        }
        if self.is_held(Control::Backward) {
            self.velocity -= VIEW_FORWARD * config.backward_acceleration * frames;
        }

        if self.is_held(Control::RotateLeft) {
            self.sphere_rotation.y += config.rotation_speed * frames;
        }
        if self.is_held(Control::RotateRight) {
            self.sphere_rotation.y -= config.rotation_speed * frames;
        }

        if self.is_held(Control::Up) {
            self.position.y += config.move_speed * frames;
        }
        if self.is_held(Control::Down) {
            self.position.y -= config.move_speed * frames;
        }

        let mut fov = self.fov;
        if self.is_held(Control::ZoomOut) {
            fov += config.zoom_speed * frames;
        }
        if self.is_held(Control::ZoomIn) {
            fov -= config.zoom_speed * frames;
        }
        let fov = fov.clamp(config.min_fov, config.max_fov);
        if fov != self.fov {
            self.fov = fov;
            self.projection_dirty = true;
        }

        self.velocity = self.velocity.clamp_length_max(config.max_speed);
        self.position += self.velocity * frames;
        self.velocity *= decay(config.friction, frames);

        if !forward_held && self.velocity.length() > config.idle_epsilon {
            self.velocity *= decay(config.idle_friction, frames);
        }

        FrameOutcome {
            projection_changed: std::mem::take(&mut self.projection_dirty),
        }
    }
}

fn decay(factor: f32, frames: f32) -> f32 {
    if frames == 1.0 {
        factor
    } else {
        factor.powf(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-6;

    fn state() -> (MotionConfig, ViewerState) {
        let config = MotionConfig::default();
        let state = ViewerState::new(&config, 16.0 / 9.0);
        (config, state)
    }

    #[test]
    fn idle_velocity_decays_monotonically() {
        let (config, mut state) = state();
        state.velocity = Vec3::new(0.5, -0.2, -1.0);
        let mut previous = state.speed();
        for _ in 0..120 {
            state.step(&config);
            let speed = state.speed();
            assert!(speed >= 0.0);
            assert!(speed < previous, "speed {speed} did not drop below {previous}");
            previous = speed;
        }
        assert!(previous < 1e-6);
    }

    #[test]
    fn fov_stays_within_bounds() {
        let (config, mut state) = state();
        state.key_down("q");
        for _ in 0..500 {
            state.step(&config);
            assert!((config.min_fov..=config.max_fov).contains(&state.fov));
        }
        assert_eq!(state.fov, config.max_fov);

        state.key_up("q");
        state.key_down("e");
        for _ in 0..500 {
            state.step(&config);
            assert!((config.min_fov..=config.max_fov).contains(&state.fov));
        }
        assert_eq!(state.fov, config.min_fov);
    }

    #[test]
    fn velocity_is_clamped_to_max_speed() {
        let (config, mut state) = state();
        state.velocity = Vec3::new(10.0, 0.0, 0.0);
        state.key_down("w");
        state.step(&config);
        assert!(state.speed() <= config.max_speed + EPS);

        let (config, mut state) = self::state();
        state.velocity = Vec3::new(10.0, 0.0, 0.0);
        state.step(&config);
        assert!((state.position.x - config.max_speed).abs() < EPS);
        assert!(state.speed() <= config.max_speed);
    }

    #[test]
    fn forward_key_accelerates_along_view_direction_with_bob() {
        let (config, mut state) = state();
        state.key_down("W");
        state.step(&config);

        assert!((state.position.z + config.forward_acceleration).abs() < EPS);
        let expected_bob = config.step_increment.sin() * config.bob_amplitude;
        assert!((state.position.y - expected_bob).abs() < EPS);
        let expected_velocity = -config.forward_acceleration * config.friction;
        assert!((state.velocity.z - expected_velocity).abs() < EPS);
    }

    #[test]
    fn backward_key_applies_idle_decay() {
        let (config, mut state) = state();
        state.key_down("s");
        state.step(&config);

        assert!((state.position.z - config.backward_acceleration).abs() < EPS);
        assert_eq!(state.position.y, 0.0);
        let expected =
            config.backward_acceleration * config.friction * config.idle_friction;
        assert!((state.velocity.z - expected).abs() < EPS);
    }

    #[test]
    fn rotation_keys_turn_the_sphere() {
        let (config, mut state) = state();
        state.key_down("a");
        state.step(&config);
        assert!((state.sphere_rotation.y - config.rotation_speed).abs() < EPS);

        state.key_up("a");
        state.key_down("ArrowRight");
        state.step(&config);
        state.step(&config);
        assert!((state.sphere_rotation.y + config.rotation_speed).abs() < EPS);
    }

    #[test]
    fn drag_rotates_only_while_pressed() {
        let (config, mut state) = state();
        state.pointer_move(&config, 50.0, 50.0);
        assert_eq!(state.sphere_rotation, Vec3::ZERO);

        state.pointer_down(10.0, 10.0);
        state.pointer_move(&config, 20.0, 15.0);
        assert!((state.sphere_rotation.y - 10.0 * config.drag_factor).abs() < EPS);
        assert!((state.sphere_rotation.x - 5.0 * config.drag_factor).abs() < EPS);

        state.pointer_up();
        state.pointer_move(&config, 100.0, 100.0);
        assert!((state.sphere_rotation.y - 10.0 * config.drag_factor).abs() < EPS);
    }

    #[test]
    fn vertical_keys_translate_camera() {
        let (config, mut state) = state();
        state.key_down("ArrowUp");
        state.step(&config);
        state.step(&config);
        assert!((state.position.y - 2.0 * config.move_speed).abs() < EPS);

        state.key_up("arrowup");
        state.key_down("arrowdown");
        state.step(&config);
        assert!((state.position.y - config.move_speed).abs() < EPS);
    }

    #[test]
    fn projection_dirty_only_when_fov_or_aspect_changes() {
        let (config, mut state) = state();
        assert!(!state.step(&config).projection_changed);

        state.key_down("q");
        assert!(state.step(&config).projection_changed);

        state.fov = config.max_fov;
        assert!(!state.step(&config).projection_changed);

        state.key_up("q");
        state.resize(800.0, 400.0);
        assert_eq!(state.aspect, 2.0);
        assert!(state.step(&config).projection_changed);
        assert!(!state.step(&config).projection_changed);
    }

    #[test]
    fn rotation_continues_while_another_bound_key_is_down() {
        let (config, mut state) = state();
        state.key_down("a");
        state.key_down("ArrowLeft");
        state.key_up("a");
        state.step(&config);
        assert!((state.sphere_rotation.y - config.rotation_speed).abs() < EPS);

        state.key_up("arrowleft");
        assert!(!state.is_held(Control::RotateLeft));

        state.key_down("D");
        state.key_down("arrowright");
        state.key_up("ArrowRight");
        assert!(state.is_held(Control::RotateRight));
    }

    #[test]
    fn unbound_keys_are_ignored() {
        let (_config, mut state) = state();
        assert!(!state.key_down("x"));
        assert!(state.key_down("d"));
        assert!(state.is_held(Control::RotateRight));
    }

    #[test]
    fn advance_by_one_frame_matches_step() {
        let (config, mut fixed) = state();
        let mut timed = fixed.clone();
        for state in [&mut fixed, &mut timed] {
            state.key_down("w");
            state.key_down("a");
            state.velocity = Vec3::new(0.3, 0.0, 0.0);
        }
        for _ in 0..10 {
            fixed.step(&config);
            timed.advance(&config, NOMINAL_FRAME_SECS);
        }
        assert!((fixed.position - timed.position).length() < 1e-4);
        assert!((fixed.velocity - timed.velocity).length() < 1e-4);
        assert!((fixed.sphere_rotation - timed.sphere_rotation).length() < 1e-4);
    }

    #[test]
    fn advance_caps_long_gaps() {
        let (config, mut state) = state();
        state.key_down("a");
        state.advance(&config, 10.0);
        let expected = config.rotation_speed * MAX_FRAME_CATCHUP;
        assert!((state.sphere_rotation.y - expected).abs() < EPS);
    }

    #[test]
    fn config_serializes_in_camel_case() {
        let json = serde_json::to_value(MotionConfig::default()).expect("serialize");
        assert_eq!(json["maxSpeed"], 2.0);
        assert_eq!(json["minFov"], 30.0);
        assert!(json.get("forwardAcceleration").is_some());
    }
}
