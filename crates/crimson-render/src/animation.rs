//! Keyframe sampling and skeletal pose evaluation.

use crimson_core::constants::DEFAULT_TICKS_PER_SECOND;
use glam::{Mat4, Quat, Vec3};

use crate::scene::{Animation, NodeChannel, QuatKey, SceneNode, VectorKey};
use crate::skeleton::BoneMap;

trait Keyframe {
    fn time(&self) -> f64;
}

impl Keyframe for VectorKey {
    fn time(&self) -> f64 {
        self.time
    }
}

impl Keyframe for QuatKey {
    fn time(&self) -> f64 {
        self.time
    }
}

/// Index of the key starting the segment that contains `time`.
///
/// Returns the first `i` with `time < keys[i + 1].time`, or `0` when no such
/// key exists.
fn key_index<K: Keyframe>(keys: &[K], time: f64) -> usize {
    keys.windows(2)
        .position(|pair| time < pair[1].time())
        .unwrap_or(0)
}

/// Segment index and blend factor in `[0, 1]`.
fn segment<K: Keyframe>(keys: &[K], time: f64) -> (usize, f32) {
    let index = key_index(keys, time);
    let start = keys[index].time();
    let span = keys[index + 1].time() - start;
    let factor = if span > 0.0 {
        ((time - start) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    (index, factor as f32)
}

fn sample_vector(keys: &[VectorKey], time: f64, fallback: Vec3) -> Vec3 {
    match keys {
        [] => fallback,
        [only] => only.value,
        _ => {
            let (i, factor) = segment(keys, time);
            keys[i].value.lerp(keys[i + 1].value, factor)
        }
    }
}

/// Interpolated translation at `time` (ticks).
pub fn sample_position(keys: &[VectorKey], time: f64) -> Vec3 {
    sample_vector(keys, time, Vec3::ZERO)
}

/// Interpolated scale at `time` (ticks).
pub fn sample_scaling(keys: &[VectorKey], time: f64) -> Vec3 {
    sample_vector(keys, time, Vec3::ONE)
}

/// Spherically interpolated rotation at `time` (ticks).
pub fn sample_rotation(keys: &[QuatKey], time: f64) -> Quat {
    match keys {
        [] => Quat::IDENTITY,
        [only] => only.value,
        _ => {
            let (i, factor) = segment(keys, time);
            keys[i].value.slerp(keys[i + 1].value, factor).normalize()
        }
    }
}

/// Local transform of an animated node: translation * rotation * scale.
pub fn channel_transform(channel: &NodeChannel, time: f64) -> Mat4 {
    Mat4::from_scale_rotation_translation(
        sample_scaling(&channel.scalings, time),
        sample_rotation(&channel.rotations, time),
        sample_position(&channel.positions, time),
    )
}

/// Advance an animation clock by `dt` seconds, wrapping at the duration.
pub fn advance_time(animation: &Animation, time: f64, dt: f64) -> f64 {
    let ticks_per_second = if animation.ticks_per_second != 0.0 {
        animation.ticks_per_second
    } else {
        DEFAULT_TICKS_PER_SECOND
    };

    if animation.duration <= 0.0 {
        return 0.0;
    }
    (time + dt * ticks_per_second) % animation.duration
}

/// Walk the hierarchy at `time`, writing `global_inverse * global * offset`
/// into `out` for every node that names a bone.
pub fn evaluate_pose(
    node: &SceneNode,
    animation: &Animation,
    time: f64,
    parent: Mat4,
    global_inverse: Mat4,
    bones: &BoneMap,
    out: &mut [Mat4],
) {
    let local = animation
        .channel(&node.name)
        .map_or(node.transform, |channel| channel_transform(channel, time));
    let global = parent * local;

    if let Some(index) = bones.index_of(&node.name) {
        if let (Some(offset), Some(slot)) = (bones.offset(index), out.get_mut(index)) {
            *slot = global_inverse * global * offset;
        }
    }

    for child in &node.children {
        evaluate_pose(child, animation, time, global, global_inverse, bones, out);
    }
}

/// Playback state for a skinned model.
#[derive(Debug, Clone)]
pub struct Animator {
    animations: Vec<Animation>,
    root: SceneNode,
    global_inverse: Mat4,
    bones: BoneMap,
    current: usize,
    time: f64,
    final_transforms: Vec<Mat4>,
}

impl Animator {
    /// `root` is the scene root; its inverse transform becomes the global
    /// inverse.
    pub fn new(root: SceneNode, animations: Vec<Animation>, bones: BoneMap) -> Self {
        let global_inverse = root.transform.inverse();
        let final_transforms = vec![Mat4::IDENTITY; bones.len()];
        Self {
            animations,
            root,
            global_inverse,
            bones,
            current: 0,
            time: 0.0,
            final_transforms,
        }
    }

    pub fn has_animations(&self) -> bool {
        !self.animations.is_empty()
    }

    pub fn animation_count(&self) -> usize {
        self.animations.len()
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Current clock in ticks.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Select an animation and rewind; out-of-range indices are ignored.
    pub fn set_animation(&mut self, index: usize) -> bool {
        if index < self.animations.len() {
            self.current = index;
            self.time = 0.0;
            true
        } else {
            false
        }
    }

    /// Advance by `dt` seconds and recompute every bone transform.
    pub fn update(&mut self, dt: f32) {
        let Some(animation) = self.animations.get(self.current) else {
            return;
        };

        self.time = advance_time(animation, self.time, f64::from(dt));
        evaluate_pose(
            &self.root,
            animation,
            self.time,
            Mat4::IDENTITY,
            self.global_inverse,
            &self.bones,
            &mut self.final_transforms,
        );
    }

    /// Final skinning matrices indexed by bone index.
    pub fn bone_transforms(&self) -> &[Mat4] {
        &self.final_transforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn vkey(time: f64, value: Vec3) -> VectorKey {
        VectorKey { time, value }
    }

    #[test]
    fn key_search_picks_bracketing_segment() {
        let keys = [
            vkey(0.0, Vec3::ZERO),
            vkey(10.0, Vec3::X),
            vkey(20.0, Vec3::Y),
        ];
        assert_eq!(key_index(&keys, 0.0), 0);
        assert_eq!(key_index(&keys, 9.99), 0);
        assert_eq!(key_index(&keys, 10.0), 1);
        assert_eq!(key_index(&keys, 19.0), 1);
        // Past the last key falls back to the first segment.
        assert_eq!(key_index(&keys, 25.0), 0);
    }

    #[test]
    fn position_is_linearly_interpolated() {
        let keys = [vkey(0.0, Vec3::ZERO), vkey(10.0, Vec3::new(10.0, 0.0, -4.0))];
        let p = sample_position(&keys, 2.5);
        assert_relative_eq!(p.x, 2.5);
        assert_relative_eq!(p.z, -1.0);
    }

    #[test]
    fn single_key_is_used_as_is() {
        let keys = [vkey(5.0, Vec3::splat(2.0))];
        assert_eq!(sample_scaling(&keys, 100.0), Vec3::splat(2.0));
        assert_eq!(sample_scaling(&[], 1.0), Vec3::ONE);
        assert_eq!(sample_position(&[], 1.0), Vec3::ZERO);
    }

    #[test]
    fn rotation_is_slerped() {
        let keys = [
            QuatKey {
                time: 0.0,
                value: Quat::IDENTITY,
            },
            QuatKey {
                time: 2.0,
                value: Quat::from_rotation_z(std::f32::consts::FRAC_PI_2),
            },
        ];
        let (axis, angle) = sample_rotation(&keys, 1.0).to_axis_angle();
        assert_relative_eq!(angle, std::f32::consts::FRAC_PI_4, epsilon = 1e-5);
        assert_relative_eq!(axis.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn clock_wraps_and_defaults_tick_rate() {
        let animation = Animation {
            duration: 50.0,
            ticks_per_second: 0.0,
            ..Default::default()
        };
        // 1.5s at 25 ticks/s = 37.5 ticks
        assert_relative_eq!(advance_time(&animation, 0.0, 1.5), 37.5);
        assert_relative_eq!(advance_time(&animation, 37.5, 1.0), 12.5);

        let fast = Animation {
            duration: 50.0,
            ticks_per_second: 100.0,
            ..Default::default()
        };
        assert_relative_eq!(advance_time(&fast, 0.0, 0.1), 10.0);
    }

    fn two_bone_scene() -> (SceneNode, BoneMap) {
        let mut root = SceneNode::new("root");
        root.transform = Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0));
        let mut upper = SceneNode::new("upper");
        upper.transform = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0));
        let mut lower = SceneNode::new("lower");
        lower.transform = Mat4::from_translation(Vec3::new(0.0, 1.0, 0.0));
        upper.children.push(lower);
        root.children.push(upper);

        let mut bones = BoneMap::new();
        bones.register("upper", Mat4::IDENTITY).unwrap();
        bones
            .register("lower", Mat4::from_translation(Vec3::new(0.0, -2.0, 0.0)))
            .unwrap();
        (root, bones)
    }

    #[test]
    fn static_hierarchy_composes_parent_transforms() {
        let (root, bones) = two_bone_scene();
        let animation = Animation {
            duration: 10.0,
            ..Default::default()
        };
        let global_inverse = root.transform.inverse();
        let mut out = vec![Mat4::ZERO; 2];

        evaluate_pose(&root, &animation, 0.0, Mat4::IDENTITY, global_inverse, &bones, &mut out);

        let upper = out[0].transform_point3(Vec3::ZERO);
        assert_relative_eq!(upper.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(upper.z, 0.0, epsilon = 1e-6);
        // lower sits at y=2; its offset undoes the bind pose.
        let lower = out[1].transform_point3(Vec3::ZERO);
        assert_relative_eq!(lower.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn animated_channel_overrides_node_transform() {
        let (root, bones) = two_bone_scene();
        let animation = Animation {
            name: "lift".into(),
            duration: 10.0,
            ticks_per_second: 1.0,
            channels: vec![NodeChannel {
                node_name: "upper".into(),
                positions: vec![vkey(0.0, Vec3::ZERO), vkey(10.0, Vec3::new(10.0, 0.0, 0.0))],
                ..Default::default()
            }],
        };

        let mut animator = Animator::new(root, vec![animation], bones);
        animator.update(4.0);

        assert_relative_eq!(animator.time(), 4.0);
        let upper = animator.bone_transforms()[0].transform_point3(Vec3::ZERO);
        assert_relative_eq!(upper.x, 4.0, epsilon = 1e-5);
        assert_relative_eq!(upper.y, 0.0, epsilon = 1e-5);
        // Child follows its parent.
        let lower = animator.bone_transforms()[1].transform_point3(Vec3::new(0.0, 2.0, 0.0));
        assert_relative_eq!(lower.x, 4.0, epsilon = 1e-5);
        assert_relative_eq!(lower.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn set_animation_rewinds_and_ignores_bad_index() {
        let (root, bones) = two_bone_scene();
        let animation = Animation {
            duration: 10.0,
            ticks_per_second: 1.0,
            ..Default::default()
        };
        let mut animator = Animator::new(root, vec![animation.clone(), animation], bones);
        animator.update(3.0);

        assert!(!animator.set_animation(7));
        assert_relative_eq!(animator.time(), 3.0);

        assert!(animator.set_animation(1));
        assert_eq!(animator.current(), 1);
        assert_relative_eq!(animator.time(), 0.0);
    }
}
