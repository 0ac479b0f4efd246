//! Generic cartesian-product enumeration over named axes.
//!
//! A [`Permutator`] describes a combinatorial space: an ordered list of axes,
//! an ordered list of legal values per axis, and how to build subjects one
//! axis assignment at a time. [`permute`] walks that space depth-first and
//! returns every fully-assigned subject, stamped with a gapless zero-based
//! identity in output order.
//!
//! Enumeration order is a contract: axes in `axes()` order (outermost to
//! innermost), values in `values_of()` order. Callers may assert exact
//! output sequences.

/// Capability contract a subject type satisfies to be enumerated.
///
/// The engine is axis-agnostic: axes and values are whatever types the
/// implementor declares, checked at compile time.
pub trait Permutator {
    /// One fully- or partially-assigned point in the axis space.
    type Subject;

    /// Identifier for one dimension of variation.
    type Axis: Copy + Eq;

    /// A legal value for some axis.
    type Value: Clone;

    /// The fixed list of axes. Order defines enumeration order.
    fn axes(&self) -> Vec<Self::Axis>;

    /// A fresh subject with no axis assigned, used as the recursion seed.
    /// Must not alias caller-held state.
    fn zero_subject(&self) -> Self::Subject;

    /// All legal values of one axis, in declared order. An empty list makes
    /// every composite containing this axis contribute zero permutations;
    /// that collapse is silent and is a caller bug, not an engine error.
    fn values_of(&self, axis: Self::Axis) -> Vec<Self::Value>;

    /// A new subject equal to `subject` except `axis` is set to `value`.
    /// Copy semantics: the input must not be mutated, so sibling branches
    /// of the recursion never observe each other's assignments.
    fn with_axis_value(
        &self,
        subject: &Self::Subject,
        axis: Self::Axis,
        value: &Self::Value,
    ) -> Self::Subject;

    /// Stamps the permutation identity. Called exactly once per
    /// fully-assigned subject, after all axes are fixed.
    fn assign_identity(&self, subject: Self::Subject, id: usize) -> Self::Subject;
}

/// Returns every permutation defined by the permutator, in the total order
/// given by nested iteration over axes and values, with identities assigned
/// as a strict zero-based sequence in output order.
///
/// With zero axes the result is the single stamped zero subject. Pure
/// enumeration: no I/O, no failure mode.
pub fn permute<P: Permutator>(p: &P) -> Vec<P::Subject> {
    let axes = p.axes();
    if axes.is_empty() {
        return vec![p.assign_identity(p.zero_subject(), 0)];
    }

    let mut perms = Vec::new();
    let mut next_id = 0usize;
    descend(p, &axes, 0, &p.zero_subject(), &mut next_id, &mut perms);
    perms
}

fn descend<P: Permutator>(
    p: &P,
    axes: &[P::Axis],
    depth: usize,
    current: &P::Subject,
    next_id: &mut usize,
    perms: &mut Vec<P::Subject>,
) {
    for value in p.values_of(axes[depth]) {
        let next = p.with_axis_value(current, axes[depth], &value);
        if depth + 1 < axes.len() {
            descend(p, axes, depth + 1, &next, next_id, perms);
        } else {
            perms.push(p.assign_identity(next, *next_id));
            *next_id += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    struct ThreeAxis {
        a: &'static str,
        b: &'static str,
        c: &'static str,
        id: usize,
    }

    struct ThreeAxisSpace;

    impl Permutator for ThreeAxisSpace {
        type Subject = ThreeAxis;
        type Axis = &'static str;
        type Value = &'static str;

        fn axes(&self) -> Vec<&'static str> {
            vec!["a", "b", "c"]
        }

        fn zero_subject(&self) -> ThreeAxis {
            ThreeAxis::default()
        }

        fn values_of(&self, axis: &'static str) -> Vec<&'static str> {
            match axis {
                "a" => vec!["a1", "a2"],
                "b" => vec!["b1", "b2"],
                "c" => vec!["c1", "c2"],
                _ => vec![],
            }
        }

        fn with_axis_value(
            &self,
            subject: &ThreeAxis,
            axis: &'static str,
            value: &&'static str,
        ) -> ThreeAxis {
            let mut next = subject.clone();
            match axis {
                "a" => next.a = *value,
                "b" => next.b = *value,
                "c" => next.c = *value,
                _ => {}
            }
            next
        }

        fn assign_identity(&self, mut subject: ThreeAxis, id: usize) -> ThreeAxis {
            subject.id = id;
            subject
        }
    }

    fn three(a: &'static str, b: &'static str, c: &'static str, id: usize) -> ThreeAxis {
        ThreeAxis { a, b, c, id }
    }

    #[test]
    fn three_axis_space_enumerates_in_nested_loop_order() {
        let perms = permute(&ThreeAxisSpace);
        let expected = vec![
            three("a1", "b1", "c1", 0),
            three("a1", "b1", "c2", 1),
            three("a1", "b2", "c1", 2),
            three("a1", "b2", "c2", 3),
            three("a2", "b1", "c1", 4),
            three("a2", "b1", "c2", 5),
            three("a2", "b2", "c1", 6),
            three("a2", "b2", "c2", 7),
        ];
        assert_eq!(perms, expected);
    }

    #[test]
    fn identities_are_a_gapless_zero_based_sequence() {
        let perms = permute(&ThreeAxisSpace);
        for (n, perm) in perms.iter().enumerate() {
            assert_eq!(perm.id, n, "identity out of order at position {}", n);
        }
    }

    // Uneven value counts, including a single-value axis.
    struct FourAxisSpace;

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    struct FourAxis {
        vals: [&'static str; 4],
        id: usize,
    }

    impl Permutator for FourAxisSpace {
        type Subject = FourAxis;
        type Axis = usize;
        type Value = &'static str;

        fn axes(&self) -> Vec<usize> {
            vec![0, 1, 2, 3]
        }

        fn zero_subject(&self) -> FourAxis {
            FourAxis::default()
        }

        fn values_of(&self, axis: usize) -> Vec<&'static str> {
            match axis {
                0 => vec!["a1", "a2", "a3"],
                1 => vec!["b1", "b2"],
                2 => vec!["c1"],
                3 => vec!["d1", "d2"],
                _ => vec![],
            }
        }

        fn with_axis_value(
            &self,
            subject: &FourAxis,
            axis: usize,
            value: &&'static str,
        ) -> FourAxis {
            let mut next = subject.clone();
            next.vals[axis] = *value;
            next
        }

        fn assign_identity(&self, mut subject: FourAxis, id: usize) -> FourAxis {
            subject.id = id;
            subject
        }
    }

    #[test]
    fn four_axis_space_count_is_product_of_value_counts() {
        let perms = permute(&FourAxisSpace);
        assert_eq!(perms.len(), 3 * 2 * 1 * 2);
        assert_eq!(perms[0].vals, ["a1", "b1", "c1", "d1"]);
        assert_eq!(perms[1].vals, ["a1", "b1", "c1", "d2"]);
        assert_eq!(perms[11].vals, ["a3", "b2", "c1", "d2"]);
    }

    #[test]
    fn sibling_branches_do_not_observe_each_others_assignments() {
        let perms = permute(&FourAxisSpace);
        // Every subject at the same depth-0 value shares it across all
        // deeper variations; a leaked mutation would corrupt the block.
        for perm in &perms[0..4] {
            assert_eq!(perm.vals[0], "a1");
        }
        for perm in &perms[4..8] {
            assert_eq!(perm.vals[0], "a2");
        }
    }

    struct EmptyAxisSpace;

    impl Permutator for EmptyAxisSpace {
        type Subject = FourAxis;
        type Axis = usize;
        type Value = &'static str;

        fn axes(&self) -> Vec<usize> {
            vec![0, 1]
        }

        fn zero_subject(&self) -> FourAxis {
            FourAxis::default()
        }

        fn values_of(&self, axis: usize) -> Vec<&'static str> {
            match axis {
                0 => vec!["a1", "a2"],
                _ => vec![],
            }
        }

        fn with_axis_value(
            &self,
            subject: &FourAxis,
            axis: usize,
            value: &&'static str,
        ) -> FourAxis {
            let mut next = subject.clone();
            next.vals[axis] = *value;
            next
        }

        fn assign_identity(&self, mut subject: FourAxis, id: usize) -> FourAxis {
            subject.id = id;
            subject
        }
    }

    #[test]
    fn empty_value_list_collapses_the_whole_product() {
        assert!(permute(&EmptyAxisSpace).is_empty());
    }

    struct ZeroAxisSpace;

    impl Permutator for ZeroAxisSpace {
        type Subject = FourAxis;
        type Axis = usize;
        type Value = &'static str;

        fn axes(&self) -> Vec<usize> {
            Vec::new()
        }

        fn zero_subject(&self) -> FourAxis {
            FourAxis::default()
        }

        fn values_of(&self, _axis: usize) -> Vec<&'static str> {
            Vec::new()
        }

        fn with_axis_value(
            &self,
            subject: &FourAxis,
            _axis: usize,
            _value: &&'static str,
        ) -> FourAxis {
            subject.clone()
        }

        fn assign_identity(&self, mut subject: FourAxis, id: usize) -> FourAxis {
            subject.id = id;
            subject
        }
    }

    #[test]
    fn zero_axes_yield_the_single_stamped_zero_subject() {
        let perms = permute(&ZeroAxisSpace);
        assert_eq!(perms.len(), 1);
        assert_eq!(perms[0].id, 0);
        assert_eq!(perms[0].vals, ["", "", "", ""]);
    }
}
