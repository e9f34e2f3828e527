// Property tests for the sort pass: permutation, depth ordering, padding

use glam::Vec3;
use gsplat_sort::{
    eval_texture_size, is_permutation, padded_count, sort_splats, CameraPose, SortOrder,
    SortScratch,
};
use proptest::prelude::*;

fn vec3(range: std::ops::Range<f32>) -> impl Strategy<Value = Vec3> {
    (range.clone(), range.clone(), range).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

fn pose() -> impl Strategy<Value = CameraPose> {
    (vec3(-200.0..200.0), vec3(-1.0..1.0))
        .prop_map(|(position, direction)| CameraPose::new(position, direction.normalize_or_zero()))
}

fn sorted(centers: &[Vec3], pose: &CameraPose, order: SortOrder) -> Vec<u32> {
    let capacity = eval_texture_size(padded_count(centers.len() as u32)).capacity();
    let mut out = vec![0; capacity];
    sort_splats(centers, pose, order, &mut out, &mut SortScratch::default());
    out
}

fn depth(pose: &CameraPose, center: Vec3) -> f32 {
    pose.depth(center) + 0.0
}

proptest! {
    #[test]
    fn order_is_a_permutation(
        centers in prop::collection::vec(vec3(-100.0..100.0), 0..400),
        pose in pose(),
    ) {
        let order = sorted(&centers, &pose, SortOrder::BackToFront);
        prop_assert!(is_permutation(&order));
    }

    #[test]
    fn back_to_front_depth_never_increases(
        centers in prop::collection::vec(vec3(-100.0..100.0), 1..400),
        pose in pose(),
    ) {
        let order = sorted(&centers, &pose, SortOrder::BackToFront);
        let real = &order[..centers.len()];
        for pair in real.windows(2) {
            let (a, b) = (pair[0] as usize, pair[1] as usize);
            let (da, db) = (depth(&pose, centers[a]), depth(&pose, centers[b]));
            prop_assert!(da >= db, "slot depths {} then {}", da, db);
            if da == db {
                prop_assert!(a < b, "tie must keep index order");
            }
        }
    }

    #[test]
    fn front_to_back_depth_never_decreases(
        centers in prop::collection::vec(vec3(-100.0..100.0), 1..400),
        pose in pose(),
    ) {
        let order = sorted(&centers, &pose, SortOrder::FrontToBack);
        for pair in order[..centers.len()].windows(2) {
            let da = depth(&pose, centers[pair[0] as usize]);
            let db = depth(&pose, centers[pair[1] as usize]);
            prop_assert!(da <= db);
        }
    }

    #[test]
    fn padding_never_precedes_a_real_splat(
        centers in prop::collection::vec(vec3(-100.0..100.0), 1..300),
        pose in pose(),
    ) {
        let count = centers.len();
        let order = sorted(&centers, &pose, SortOrder::BackToFront);
        prop_assert!(order.len() >= padded_count(count as u32) as usize);
        prop_assert!(order[..count].iter().all(|&i| (i as usize) < count));
        for (slot, &index) in order.iter().enumerate().skip(count) {
            prop_assert_eq!(index as usize, slot);
        }
    }

    #[test]
    fn texture_size_covers_count(count in 0u32..2_000_000) {
        let size = eval_texture_size(count);
        prop_assert!(size.capacity() >= count as usize);
        if count > 0 {
            // Never more than one spare row
            prop_assert!(size.capacity() - (count as usize) < size.width as usize);
        }
    }
}
