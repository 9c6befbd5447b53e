use slotflow_core::{generate, AnnotationSet, BatchingError, ColumnMatching, ColumnStrategy, DataAnnotationMergeStrategy,
                    DataRow, DataSlot, ExpressionError, KeyExpression, MatchingConfig, MatchingParams, MergeStrategy,
                    StepLimit};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn rows(set: &[usize]) -> BTreeSet<usize> {
    set.iter().copied().collect()
}

fn annotated<T>(payload: T, annotations: &[(&str, &str)]) -> DataRow<T> {
    DataRow::new(payload).with_annotations(annotations.iter().copied())
}

#[test]
fn two_slot_outer_join_example() {
    let a = DataSlot::with_rows("A", vec![annotated(1, &[("cond", "a")]), annotated(2, &[("cond", "b")])]);
    let b = DataSlot::with_rows("B", vec![annotated(10, &[("cond", "a")]), annotated(20, &[("cond", "c")])]);
    let config = MatchingConfig::new(ColumnStrategy::Union).with_merging(false);

    let out = generate(&[a, b], &config).unwrap();
    assert!(!out.has_issues());
    assert_eq!(out.steps.len(), 3);

    let keys: Vec<&str> = out.steps
                             .iter()
                             .map(|s| s.merged_annotations().get("cond").unwrap())
                             .collect();
    assert_eq!(keys, vec!["a", "b", "c"]);

    assert!(out.steps[0].is_complete());
    assert_eq!(out.steps[0].rows("A"), Some(&rows(&[0])));
    assert_eq!(out.steps[0].rows("B"), Some(&rows(&[0])));

    assert!(!out.steps[1].is_complete());
    assert_eq!(out.steps[1].rows("A"), Some(&rows(&[1])));
    assert_eq!(out.steps[1].rows("B"), Some(&rows(&[])));

    assert!(!out.steps[2].is_complete());
    assert_eq!(out.steps[2].rows("A"), Some(&rows(&[])));
    assert_eq!(out.steps[2].rows("B"), Some(&rows(&[1])));
}

#[test]
fn strict_mode_rejects_duplicate_signatures() {
    let a = DataSlot::with_rows("A",
                                vec![annotated((), &[("cond", "a")]),
                                     annotated((), &[("cond", "a")]),
                                     annotated((), &[("cond", "b")])]);
    let b = DataSlot::with_rows("B", vec![annotated((), &[("cond", "a")])]);
    let out = generate(&[a, b], &MatchingConfig::default().with_merging(false)).unwrap();

    assert_eq!(out.issues,
               vec![BatchingError::DuplicateMatch { slot: "A".into(),
                                                    key: "cond=a".into(),
                                                    rows: vec![0, 1] }]);
    assert_eq!(out.steps.len(), 1);
    assert_eq!(out.steps[0].merged_annotations().get("cond"), Some("b"));
    assert_eq!(out.configuration_issues().count(), 1);
    assert!(out.into_result().is_err());
}

#[test]
fn merging_mode_groups_duplicates() {
    let a = DataSlot::with_rows("A", vec![annotated((), &[("cond", "a")]), annotated((), &[("cond", "a")])]);
    let out = generate(&[a], &MatchingConfig::default()).unwrap();
    assert_eq!(out.steps.len(), 1);
    assert_eq!(out.steps[0].rows("A"), Some(&rows(&[0, 1])));
    assert!(out.steps[0].as_single().is_none());
}

#[test]
fn merge_order_is_slot_then_row() {
    let a = DataSlot::with_rows("A",
                                vec![annotated((), &[("cond", "a"), ("note", "1")]),
                                     annotated((), &[("cond", "a"), ("note", "2")])]);
    let b = DataSlot::with_rows("B", vec![annotated((), &[("cond", "a"), ("note", "3")])]);
    let config = MatchingConfig::custom_columns(["cond"]).with_merge_strategy(MergeStrategy::Join(String::new()));

    let forward = generate(&[a.clone(), b.clone()], &config).unwrap();
    assert_eq!(forward.steps[0].merged_annotations().get("note"), Some("123"));

    let reversed = generate(&[b, a], &config).unwrap();
    assert_eq!(reversed.steps[0].merged_annotations().get("note"), Some("312"));
}

#[test]
fn limit_counts_positions_after_skipping() {
    let a = DataSlot::with_rows("A", (0..10).map(|i| annotated(i, &[("cond", format!("v{i}").as_str())])));
    let b = DataSlot::with_rows("B", (0..10).step_by(2).map(|i| annotated(i, &[("cond", format!("v{i}").as_str())])));
    let slots = [a, b];

    let all = generate(&slots, &MatchingConfig::default()).unwrap();
    assert_eq!(all.steps.len(), 10);

    let first_two = generate(&slots, &MatchingConfig::default().with_limit(StepLimit::indices([0, 1]))).unwrap();
    assert_eq!(first_two.steps, all.steps[..2].to_vec());
    assert_eq!(first_two.total_generated, 10);

    let config = MatchingConfig::default().with_skip_incomplete(true)
                                          .with_limit(StepLimit::indices([0, 1, 99]));
    let skipped = generate(&slots, &config).unwrap();
    let cond: Vec<&str> = skipped.steps
                                 .iter()
                                 .map(|s| s.merged_annotations().get("cond").unwrap())
                                 .collect();
    assert_eq!(cond, vec!["v0", "v2"]);
}

#[test]
fn intersection_uses_shared_columns_only() {
    let a = DataSlot::with_rows("A",
                                vec![annotated((), &[("cond", "a"), ("t", "1")]),
                                     annotated((), &[("cond", "a"), ("t", "2")])]);
    let b = DataSlot::with_rows("B", vec![annotated((), &[("cond", "a")])]);
    let out = generate(&[a, b], &MatchingConfig::new(ColumnStrategy::Intersection)).unwrap();

    assert_eq!(out.reference_columns, BTreeSet::from(["cond".to_string()]));
    assert_eq!(out.steps.len(), 1);
    assert!(out.steps[0].is_complete());
    assert_eq!(out.steps[0].merged_annotations().get("t"), Some(r#"["1","2"]"#));
}

#[test]
fn missing_annotation_matches_only_missing_and_sorts_first() {
    let a = DataSlot::with_rows("A", vec![annotated((), &[("cond", "a")]), annotated((), &[("cond", "a"), ("t", "1")])]);
    let b = DataSlot::with_rows("B", vec![annotated((), &[("cond", "a"), ("t", "1")])]);
    let out = generate(&[a, b], &MatchingConfig::new(ColumnStrategy::Union)).unwrap();

    assert!(!out.has_issues());
    assert_eq!(out.steps.len(), 2);
    assert_eq!(out.steps[0].key().to_string(), "cond=a, t=⊥");
    assert_eq!(out.steps[0].rows("A"), Some(&rows(&[0])));
    assert_eq!(out.steps[0].rows("B"), Some(&rows(&[])));
    assert!(!out.steps[0].is_complete());

    assert_eq!(out.steps[1].key().to_string(), "cond=a, t=1");
    assert_eq!(out.steps[1].rows("A"), Some(&rows(&[1])));
    assert_eq!(out.steps[1].rows("B"), Some(&rows(&[0])));
    assert!(out.steps[1].is_complete());
}

#[test]
fn hash_prefixed_columns_drive_the_join() {
    let a = DataSlot::with_rows("A",
                                vec![annotated((), &[("#dataset", "d1"), ("channel", "red")]),
                                     annotated((), &[("#dataset", "d1"), ("channel", "green")]),
                                     annotated((), &[("#dataset", "d2"), ("#well", "w1"), ("channel", "red")])]);
    let b = DataSlot::with_rows("B", vec![annotated((), &[("#dataset", "d1"), ("mask", "m")])]);
    let slots = [a, b];

    let union = generate(&slots, &MatchingConfig::new(ColumnStrategy::PrefixUnion("#".into()))).unwrap();
    assert_eq!(union.reference_columns,
               BTreeSet::from(["#dataset".to_string(), "#well".to_string()]));
    assert_eq!(union.steps.len(), 2);
    assert_eq!(union.steps[0].rows("A"), Some(&rows(&[0, 1])));
    assert_eq!(union.steps[0].rows("B"), Some(&rows(&[0])));
    assert_eq!(union.steps[0].merged_annotations().get("channel"), Some(r#"["red","green"]"#));
    assert_eq!(union.steps[0].merged_annotations().get("mask"), Some("m"));
    assert_eq!(union.steps[1].rows("A"), Some(&rows(&[2])));

    let intersection = generate(&slots, &MatchingConfig::new(ColumnStrategy::PrefixIntersection("#".into()))).unwrap();
    assert_eq!(intersection.reference_columns, BTreeSet::from(["#dataset".to_string()]));
    assert_eq!(intersection.steps.len(), 2);
    assert!(intersection.steps[0].is_complete());
    assert_eq!(intersection.steps[1].merged_annotations().get("#well"), Some("w1"));
}

#[test]
fn merge_all_and_split_all() {
    let a = DataSlot::with_rows("A", vec![annotated((), &[("x", "1")]), annotated((), &[("x", "2")])]);
    let b = DataSlot::with_rows("B", vec![annotated((), &[("y", "1")])]);
    let slots = [a, b];

    let merged = generate(&slots, &MatchingConfig::new(ColumnStrategy::MergeAll)).unwrap();
    assert_eq!(merged.steps.len(), 1);
    assert_eq!(merged.steps[0].row_count(), 3);
    assert!(merged.steps[0].is_complete());

    let split = generate(&slots, &MatchingConfig::new(ColumnStrategy::SplitAll)).unwrap();
    let order: Vec<(String, usize)> = split.steps
                                           .iter()
                                           .map(|s| {
                                               s.rows_by_slot()
                                                .iter()
                                                .find_map(|(slot, r)| r.first().map(|i| (slot.clone(), *i)))
                                                .unwrap()
                                           })
                                           .collect();
    assert_eq!(order, vec![("A".to_string(), 0), ("A".to_string(), 1), ("B".to_string(), 0)]);
    assert_eq!(split.steps[2].merged_annotations().get("y"), Some("1"));
}

#[test]
fn no_column_mode_behaves_like_merge_all() {
    let a = DataSlot::with_rows("A", vec![annotated((), &[("x", "1")]), annotated((), &[("x", "2")])]);
    let params = MatchingParams { column_matching: ColumnMatching::None,
                                  merge_strategy: MergeStrategy::KeepExisting,
                                  ..MatchingParams::default() };
    let out = generate(&[a], &params.into_config(None).unwrap()).unwrap();
    assert_eq!(out.steps.len(), 1);
    assert_eq!(out.steps[0].merged_annotations().get("x"), Some("1"));
}

fn group_by_prefix() -> Arc<dyn KeyExpression> {
    Arc::new(|annotations: &AnnotationSet| -> Result<BTreeMap<String, String>, ExpressionError> {
        let cond = annotations.get("cond")
                              .ok_or_else(|| ExpressionError("missing cond".to_string()))?;
        Ok(BTreeMap::from([("group".to_string(), cond[..1].to_string())]))
    })
}

fn expression_slots() -> Vec<DataSlot<()>> {
    vec![DataSlot::with_rows("A",
                             vec![annotated((), &[("cond", "a1")]),
                                  annotated((), &[("cond", "a2")]),
                                  annotated((), &[("other", "z")])]),
         DataSlot::with_rows("B", vec![annotated((), &[("cond", "b1")])])]
}

#[test]
fn expression_errors_are_isolated_per_row() {
    let config = MatchingConfig::new(ColumnStrategy::ExpressionDerived(group_by_prefix()));
    let out = generate(&expression_slots(), &config).unwrap();

    assert_eq!(out.issues,
               vec![BatchingError::Expression { slot: "A".into(),
                                                row: 2,
                                                message: "missing cond".into() }]);
    assert_eq!(out.reference_columns, BTreeSet::from(["group".to_string()]));
    assert_eq!(out.steps.len(), 2);
    assert_eq!(out.steps[0].rows("A"), Some(&rows(&[0, 1])));
    assert_eq!(out.steps[0].merged_annotations().get("group"), Some("a"));
    assert_eq!(out.steps[0].merged_annotations().get("cond"), Some(r#"["a1","a2"]"#));
    assert_eq!(out.steps[1].rows("B"), Some(&rows(&[0])));
    assert!(out.into_result().is_ok());
}

#[test]
fn expression_error_density_aborts_generation() {
    let config = MatchingConfig::new(ColumnStrategy::ExpressionDerived(group_by_prefix()))
        .with_max_row_error_fraction(0.1);
    let err = generate(&expression_slots(), &config).unwrap_err();
    assert_eq!(err,
               BatchingError::ErrorDensityExceeded { failed: 1,
                                                     total: 4,
                                                     max_fraction: 0.1 });

    let tolerant = MatchingConfig::new(ColumnStrategy::ExpressionDerived(group_by_prefix()))
        .with_max_row_error_fraction(0.5);
    assert!(generate(&expression_slots(), &tolerant).is_ok());
}

#[test]
fn nan_error_fraction_tolerates_no_errors() {
    let mut config = MatchingConfig::new(ColumnStrategy::ExpressionDerived(group_by_prefix()));
    config.max_row_error_fraction = Some(f64::NAN);
    assert!(matches!(generate(&expression_slots(), &config),
                     Err(BatchingError::ErrorDensityExceeded { failed: 1, total: 4, .. })));

    let built = MatchingConfig::new(ColumnStrategy::ExpressionDerived(group_by_prefix()))
        .with_max_row_error_fraction(f64::NAN);
    assert!(generate(&expression_slots(), &built).is_err());
}

#[test]
fn data_annotations_follow_their_strategy() {
    let a = DataSlot::with_rows("A", vec![annotated(1, &[("cond", "a")]).with_data_annotation("roi", 100)]);
    let b = DataSlot::with_rows("B", vec![annotated(2, &[("cond", "a")]).with_data_annotation("roi", 200)]);
    let slots = [a, b];

    let overwrite = generate(&slots, &MatchingConfig::default()).unwrap();
    let roi = &overwrite.steps[0].merged_data_annotations()["roi"];
    assert_eq!(roi.slot, "B");
    assert_eq!(roi.resolve(&slots).map(|v| **v), Some(200));

    let keep = MatchingConfig::default().with_data_merge_strategy(DataAnnotationMergeStrategy::KeepExisting);
    let kept = generate(&slots, &keep).unwrap();
    assert_eq!(kept.steps[0].merged_data_annotations()["roi"].resolve(&slots).map(|v| **v),
               Some(100));
}

#[test]
fn output_context_descends_from_every_input_row() {
    let a = DataSlot::with_rows("A", vec![annotated((), &[("cond", "a")])]);
    let b = DataSlot::with_rows("B", vec![annotated((), &[("cond", "a")])]);
    let slots = [a, b];
    let out = generate(&slots, &MatchingConfig::default()).unwrap();

    let ctx = out.steps[0].derive_context(&slots, Some("node"));
    let expected = vec![slots[0].rows()[0].context.id, slots[1].rows()[0].context.id];
    assert_eq!(ctx.parents, expected);
}
