use approx::relative_eq;
use mean3::{mean_all, mean_axis, moving_mean, ExecutionContext, KernelConfig, MeanError, ShapeError};
use ndarray::{ArrayD, Axis, IxDyn};
use proptest::prelude::*;

fn context(threads: usize) -> ExecutionContext {
    ExecutionContext::from_config(
        KernelConfig::default()
            .with_threads(threads)
            .with_parallel_min_elements(0),
    )
    .expect("pool builds")
}

/// Arrays of rank 1 to 3 with every dimension non-empty.
fn shaped_array() -> impl Strategy<Value = ArrayD<f64>> {
    prop::collection::vec(1usize..7, 1..4).prop_flat_map(|shape| {
        let len: usize = shape.iter().product();
        prop::collection::vec(-1000.0f64..1000.0, len).prop_map(move |data| {
            ArrayD::from_shape_vec(IxDyn(&shape), data).expect("length matches shape")
        })
    })
}

fn array_and_axis() -> impl Strategy<Value = (ArrayD<f64>, usize)> {
    shaped_array().prop_flat_map(|array| {
        let ndim = array.ndim();
        (Just(array), 0..ndim)
    })
}

fn close(actual: f64, expected: f64) -> bool {
    relative_eq!(actual, expected, epsilon = 1e-9, max_relative = 1e-12)
}

proptest! {
    #[test]
    fn axis_mean_matches_ndarray((array, axis) in array_and_axis()) {
        let ctx = context(3);
        let ours = mean_axis(array.view(), axis as isize, false, &ctx).unwrap();
        let reference = array.mean_axis(Axis(axis)).unwrap();
        prop_assert_eq!(ours.shape(), reference.shape());
        for (a, b) in ours.iter().zip(reference.iter()) {
            prop_assert!(close(*a, *b), "{} vs {}", a, b);
        }
    }

    #[test]
    fn output_shape_drops_or_keeps_the_axis((array, axis) in array_and_axis()) {
        let ctx = context(2);
        let dropped = mean_axis(array.view(), axis as isize, false, &ctx).unwrap();
        let mut expected: Vec<usize> = array.shape().to_vec();
        expected.remove(axis);
        prop_assert_eq!(dropped.shape(), &expected[..]);

        let kept = mean_axis(array.view(), axis as isize, true, &ctx).unwrap();
        let mut expected: Vec<usize> = array.shape().to_vec();
        expected[axis] = 1;
        prop_assert_eq!(kept.shape(), &expected[..]);
    }

    #[test]
    fn negative_axis_counts_from_the_end((array, axis) in array_and_axis()) {
        let ctx = context(2);
        let negative = axis as isize - array.ndim() as isize;
        let from_end = mean_axis(array.view(), negative, false, &ctx).unwrap();
        let from_start = mean_axis(array.view(), axis as isize, false, &ctx).unwrap();
        prop_assert_eq!(from_end, from_start);
    }

    #[test]
    fn thread_count_does_not_change_axis_means((array, axis) in array_and_axis()) {
        let single = mean_axis(array.view(), axis as isize, false, &context(1)).unwrap();
        for threads in [2, 3, 8] {
            let parallel = mean_axis(array.view(), axis as isize, false, &context(threads)).unwrap();
            prop_assert_eq!(&parallel, &single);
        }
    }

    #[test]
    fn repeated_calls_are_identical((array, axis) in array_and_axis()) {
        let ctx = context(4);
        let first = mean_axis(array.view(), axis as isize, true, &ctx).unwrap();
        let second = mean_axis(array.view(), axis as isize, true, &ctx).unwrap();
        prop_assert_eq!(&first, &second);

        // Averaging the kept length-1 axis again changes nothing.
        let again = mean_axis(first.view(), axis as isize, true, &ctx).unwrap();
        prop_assert_eq!(&again, &first);
    }

    #[test]
    fn inverted_strides_give_the_same_means((array, axis) in array_and_axis()) {
        let ctx = context(3);
        let mut reversed = array.view();
        for dim in 0..reversed.ndim() {
            reversed.invert_axis(Axis(dim));
        }
        let from_view = mean_axis(reversed.clone(), axis as isize, false, &ctx).unwrap();
        let from_copy = mean_axis(reversed.to_owned().view(), axis as isize, false, &ctx).unwrap();
        for (a, b) in from_view.iter().zip(from_copy.iter()) {
            prop_assert!(close(*a, *b), "{} vs {}", a, b);
        }
    }

    #[test]
    fn transposed_views_match_contiguous_copies((array, axis) in array_and_axis(), keepdims in any::<bool>()) {
        let ctx = context(3);
        let transposed = array.view().reversed_axes();
        let copy = transposed.to_owned();
        let from_view = mean_axis(transposed, axis as isize, keepdims, &ctx).unwrap();
        let from_copy = mean_axis(copy.view(), axis as isize, keepdims, &ctx).unwrap();
        prop_assert_eq!(from_view.shape(), from_copy.shape());
        for (a, b) in from_view.iter().zip(from_copy.iter()) {
            prop_assert!(close(*a, *b), "{} vs {}", a, b);
        }
    }

    #[test]
    fn full_mean_matches_sequential_sum(array in shaped_array()) {
        let expected = array.iter().sum::<f64>() / array.len() as f64;
        for threads in [1, 4] {
            let ours = mean_all(array.view(), false, &context(threads)).unwrap();
            let value = *ours.iter().next().unwrap();
            prop_assert!(close(value, expected), "{} vs {}", value, expected);
        }
    }

    #[test]
    fn moving_mean_matches_window_slices((array, axis) in array_and_axis(), window in 1usize..4) {
        let len = array.shape()[axis];
        prop_assume!(window <= len);
        let ctx = context(2);
        let ours = moving_mean(array.view(), window, axis as isize, &ctx).unwrap();
        prop_assert_eq!(ours.shape()[axis], len - window + 1);
        for start in 0..=len - window {
            let slice = array.slice_axis(Axis(axis), (start..start + window).into());
            let expected = slice.mean_axis(Axis(axis)).unwrap();
            let actual = ours.index_axis(Axis(axis), start);
            for (a, b) in actual.iter().zip(expected.iter()) {
                prop_assert!(close(*a, *b), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn empty_axis_is_rejected(shape in prop::collection::vec(1usize..5, 1..4), axis in 0usize..3) {
        let axis = axis % shape.len();
        let mut shape = shape;
        shape[axis] = 0;
        let array = ArrayD::<f64>::zeros(IxDyn(&shape));
        let err = mean_axis(array.view(), axis as isize, false, &context(2)).unwrap_err();
        prop_assert_eq!(err, MeanError::Shape(ShapeError::EmptyReduction));
    }
}
