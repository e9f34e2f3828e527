// Radix Sort Validation Tests
// Tests the splat radix sorter against a std stable-sort reference

use gsplat_sort::{float_to_sortable, RadixSorter};

// Reference: stable sort of (key, value) pairs by key
fn reference_sort(keys: &[u32], values: &[u32]) -> Vec<(u32, u32)> {
    let mut pairs: Vec<(u32, u32)> = keys.iter().copied().zip(values.iter().copied()).collect();
    pairs.sort_by_key(|&(key, _)| key);
    pairs
}

// Verify that an array is sorted
fn is_sorted(keys: &[u32]) -> bool {
    keys.windows(2).all(|w| w[0] <= w[1])
}

fn sort_and_check(mut keys: Vec<u32>, label: &str) {
    let mut values: Vec<u32> = (0..keys.len() as u32).collect();
    let expected = reference_sort(&keys, &values);

    RadixSorter::with_capacity(keys.len()).sort(&mut keys, &mut values);

    assert!(is_sorted(&keys), "Keys should be sorted ({label})");
    let actual: Vec<(u32, u32)> = keys.into_iter().zip(values).collect();
    assert_eq!(actual, expected, "Values should follow their keys stably ({label})");

    println!("✓ Radix sort matches reference ({label})");
}

#[test]
fn test_random_full_range() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let keys: Vec<u32> = (0..1000).map(|_| rng.gen()).collect();
    sort_and_check(keys, "1000 random elements");
}

#[test]
fn test_duplicates() {
    sort_and_check(vec![5, 2, 5, 1, 9, 2, 7, 5, 6, 1], "duplicates");
}

#[test]
fn test_already_sorted() {
    sort_and_check((0..100).collect(), "already sorted");
}

#[test]
fn test_reverse_sorted() {
    sort_and_check((0..100).rev().collect(), "reverse sorted");
}

#[test]
fn test_high_bytes_only() {
    // Only the top digit differs: three passes are skipped
    let keys = (0..64).rev().map(|i| i << 24).collect();
    sort_and_check(keys, "high bytes only");
}

#[test]
fn test_depth_keys_sort_far_to_near() {
    // Descending depth == ascending inverted key
    let depths = [3.5f32, -1.0, 10.0, 0.0, 7.25, -20.0];
    let mut keys: Vec<u32> = depths.iter().map(|&d| !float_to_sortable(d)).collect();
    let mut values: Vec<u32> = (0..depths.len() as u32).collect();

    RadixSorter::new().sort(&mut keys, &mut values);

    let sorted_depths: Vec<f32> = values.iter().map(|&i| depths[i as usize]).collect();
    assert_eq!(sorted_depths, vec![10.0, 7.25, 3.5, 0.0, -1.0, -20.0]);

    println!("✓ Depth keys sort far to near");
}

#[test]
fn test_large_input() {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    // Narrow key range forces many ties
    let keys: Vec<u32> = (0..200_000).map(|_| rng.gen_range(0..4096)).collect();
    sort_and_check(keys, "200k elements, narrow range");
}
