use std::collections::BTreeSet;

use proptest::prelude::*;
use tracing::Span;
use wheel_repair::{ExclusionMatcher, ExclusionRule};

fn relative_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z_]{1,6}(\\.so(\\.[0-9])?|\\.py)?", 1..4).prop_map(|parts| parts.join("/"))
}

fn rule() -> impl Strategy<Value = ExclusionRule> {
    prop_oneof![
        "\\*?[a-z_?]{1,5}\\*?(\\.so\\*?)?".prop_map(ExclusionRule::Glob),
        "[a-z_]{1,4}".prop_map(ExclusionRule::Regex),
        prop::sample::select(vec![r"\.so$", r"^[a-z]+/", r"_[a-z]\.so\.[0-9]"])
            .prop_map(|r| ExclusionRule::Regex(r.to_string())),
    ]
}

proptest! {
    #[test]
    fn test_matches_are_a_subset_of_files(
        files in prop::collection::vec(relative_path(), 0..20),
        rules in prop::collection::vec(rule(), 0..6),
    ) {
        let matcher = ExclusionMatcher::new(&rules, Span::none()).unwrap();
        let matched = matcher.matches(&files);
        let all: BTreeSet<String> = files.iter().cloned().collect();
        prop_assert!(matched.is_subset(&all));
    }

    #[test]
    fn test_rule_order_does_not_matter(
        files in prop::collection::vec(relative_path(), 0..20),
        rules in prop::collection::vec(rule(), 0..6),
    ) {
        let forward = ExclusionMatcher::new(&rules, Span::none()).unwrap().matches(&files);

        let mut reversed_rules = rules.clone();
        reversed_rules.reverse();
        let reversed = ExclusionMatcher::new(&reversed_rules, Span::none()).unwrap().matches(&files);

        let mut rotated_rules = rules.clone();
        if !rotated_rules.is_empty() {
            rotated_rules.rotate_left(1);
        }
        let rotated = ExclusionMatcher::new(&rotated_rules, Span::none()).unwrap().matches(&files);

        prop_assert_eq!(&forward, &reversed);
        prop_assert_eq!(&forward, &rotated);
    }

    #[test]
    fn test_union_of_single_rules(
        files in prop::collection::vec(relative_path(), 0..20),
        rules in prop::collection::vec(rule(), 1..6),
    ) {
        let combined = ExclusionMatcher::new(&rules, Span::none()).unwrap().matches(&files);
        let mut union = BTreeSet::new();
        for rule in &rules {
            let single = ExclusionMatcher::new(std::slice::from_ref(rule), Span::none())
                .unwrap()
                .matches(&files);
            union.extend(single);
        }
        prop_assert_eq!(combined, union);
    }
}
