use serde_json::json;
use soundings::builders::{self, bucket, bucket_float, infer_hist_bucket};
use soundings::executor::{QueryKind, build_pipeline};
use soundings::pipeline::{Op, PipelineStage, render};
use soundings::query::{Aggregate, ColumnCast, Filter, QueryOptions};
use soundings::sample::Namespace;
use soundings::schema::ColumnMeta;

fn latency_meta(min: i64, max: i64) -> ColumnMeta {
    ColumnMeta {
        name: "latency".to_string(),
        inferred_type: Namespace::Integer,
        min_value: Some(min),
        max_value: Some(max),
    }
}

#[test]
fn bucket_arithmetic() {
    assert_eq!(bucket(125, 50), Some(100));
    assert_eq!(bucket(150, 50), Some(150));
    assert_eq!(bucket(0, 21600), Some(0));
    assert_eq!(bucket(21599, 21600), Some(0));
    assert_eq!(bucket(21600, 21600), Some(21600));
    // floors toward negative infinity
    assert_eq!(bucket(-1, 10), Some(-10));
    for value in [-1234, -1, 0, 7, 99, 100, 12345] {
        let b = bucket(value, 100).expect("fits");
        assert_eq!(b % 100, 0);
        assert!(b <= value && value - b < 100);
    }
    // the floor of i64::MIN by 1000 lies below i64::MIN
    assert_eq!(bucket(i64::MIN, 1000), None);
    assert_eq!(bucket(i64::MIN, 1 << 10), Some(i64::MIN));
    assert_eq!(bucket(i64::MAX, 1000), Some(i64::MAX - 807));
    assert_eq!(bucket_float(-12.5, 10), -20.0);
    assert_eq!(bucket_float(12.5, 10), 10.0);
}

#[test]
fn table_groups_by_dimensions() {
    let options = QueryOptions::new().dims(&["region"]).cols(&["latency"]);
    let pipeline = builders::query_table(&options);
    assert_eq!(
        render(&pipeline),
        json!([{
            "$group": {
                "_id": { "region": "$string.region" },
                "count": { "$sum": 1 },
                "latency": { "$avg": "$integer.latency" }
            }
        }])
    );
}

#[test]
fn count_aggregate_ignores_values() {
    let options = QueryOptions::new()
        .dims(&["region"])
        .cols(&["latency"])
        .agg(Aggregate::Count);
    let rendered = render(&builders::query_table(&options));
    assert_eq!(rendered[0]["$group"]["latency"], json!({ "$sum": 1 }));
}

#[test]
fn weighted_table_projects_products() {
    let options = QueryOptions::new()
        .dims(&["region"])
        .cols(&["latency"])
        .weight("weight");
    let pipeline = builders::query_table(&options);
    assert_eq!(pipeline.len(), 2);
    assert_eq!(
        pipeline[0].to_json(),
        json!({
            "$project": {
                "integer.latency": { "$multiply": ["$integer.latency", "$integer.weight"] },
                "weighted_count": "$integer.weight",
                "string.region": 1,
                "integer.time": 1
            }
        })
    );
    assert_eq!(
        pipeline[1].to_json()["$group"]["weighted_count"],
        json!({ "$sum": "$weighted_count" })
    );
}

#[test]
fn weight_column_is_not_multiplied_by_itself() {
    let cols = vec!["weight".to_string(), "latency".to_string()];
    let pipeline = builders::weight_columns(&cols, "weight", &[]);
    let rendered = pipeline[0].to_json();
    assert_eq!(rendered["$project"]["integer.weight"], json!(1));
}

#[test]
fn time_series_adds_bucketed_time() {
    let options = QueryOptions::new().cols(&["latency"]);
    let rendered = render(&builders::query_time_series(&options));
    assert_eq!(
        rendered[0]["$group"]["_id"]["time_bucket"],
        json!({ "$multiply": [{ "$floor": { "$divide": ["$integer.time", 21600] } }, 21600] })
    );

    let rendered = render(&builders::query_time_series(&options.clone().time_bucket(60)));
    assert_eq!(
        rendered[0]["$group"]["_id"]["time_bucket"],
        json!({ "$multiply": [{ "$floor": { "$divide": ["$integer.time", 60] } }, 60] })
    );
}

#[test]
fn histogram_bucket_inference() {
    assert_eq!(infer_hist_bucket(None), 100);
    assert_eq!(infer_hist_bucket(Some(&latency_meta(0, 1000))), 11);
    assert_eq!(infer_hist_bucket(Some(&latency_meta(1000, 0))), 11);
    assert_eq!(infer_hist_bucket(Some(&latency_meta(5, 5))), 1);
    let unranged = ColumnMeta { min_value: None, ..latency_meta(0, 0) };
    assert_eq!(infer_hist_bucket(Some(&unranged)), 100);
    // a range spanning all of i64 still yields a positive size
    assert_eq!(
        infer_hist_bucket(Some(&latency_meta(i64::MIN, i64::MAX))),
        (u64::MAX / 100 + 1) as i64
    );
}

#[test]
fn zero_bucket_sizes_fall_back() {
    let options = QueryOptions::new().cols(&["latency"]).time_bucket(0);
    let rendered = render(&builders::query_time_series(&options));
    assert_eq!(
        rendered[0]["$group"]["_id"]["time_bucket"],
        json!({ "$multiply": [{ "$floor": { "$divide": ["$integer.time", 21600] } }, 21600] })
    );

    let columns = vec![latency_meta(0, 5000)];
    let options = QueryOptions::new().col("latency").hist_bucket(0);
    let rendered = render(&builders::query_hist(&options, &columns));
    assert_eq!(
        rendered[0]["$project"]["bucket"],
        json!({ "$multiply": [{ "$floor": { "$divide": ["$integer.latency", 51] } }, 51] })
    );
}

#[test]
fn histogram_prefers_explicit_bucket() {
    let columns = vec![latency_meta(0, 5000)];
    let options = QueryOptions::new().col("latency");
    let rendered = render(&builders::query_hist(&options, &columns));
    assert_eq!(
        rendered[0]["$project"]["bucket"],
        json!({ "$multiply": [{ "$floor": { "$divide": ["$integer.latency", 51] } }, 51] })
    );

    let rendered = render(&builders::query_hist(&options.clone().hist_bucket(50), &columns));
    assert_eq!(
        rendered[1]["$group"],
        json!({ "_id": { "latency": "$bucket" }, "count": { "$sum": 1 } })
    );
    assert_eq!(
        rendered[0]["$project"]["bucket"],
        json!({ "$multiply": [{ "$floor": { "$divide": ["$integer.latency", 50] } }, 50] })
    );
}

#[test]
fn histogram_target_falls_back_to_first_column() {
    let options = QueryOptions::new().cols(&["size", "latency"]).weight("weight");
    let rendered = render(&builders::query_hist(&options, &[]));
    assert_eq!(rendered[0]["$project"]["integer.weight"], json!(1));
    assert_eq!(rendered[1]["$group"]["_id"], json!({ "size": "$bucket" }));
    assert_eq!(rendered[1]["$group"]["weighted_count"], json!({ "$sum": "$integer.weight" }));
}

#[test]
fn histogram_without_column_keeps_empty_reference() {
    let rendered = render(&builders::query_hist(&QueryOptions::new(), &[]));
    assert_eq!(
        rendered[0]["$project"]["bucket"]["$multiply"][0]["$floor"]["$divide"][0],
        json!("$")
    );
}

#[test]
fn samples_sort_newest_first() {
    assert_eq!(
        render(&builders::query_samples(None)),
        json!([{ "$sort": { "integer.time": -1 } }, { "$limit": 100 }])
    );
    assert_eq!(render(&builders::query_samples(Some(5)))[1], json!({ "$limit": 5 }));
}

#[test]
fn duplicate_filter_operator_keeps_last_value() {
    let filter = Filter::new("integer.latency")
        .with(Op::Gt, 10)
        .with(Op::Lt, 500)
        .with(Op::Gt, 20);
    assert_eq!(
        render(&builders::add_filters(&[filter])),
        json!([{ "$match": { "integer.latency": { "$gt": 20, "$lt": 500 } } }])
    );
}

#[test]
fn one_match_per_filter() {
    let filters = vec![
        Filter::new("string.region").with(Op::Eq, "eu"),
        Filter::new("integer.latency").with(Op::Gte, 5),
    ];
    let pipeline = builders::add_filters(&filters);
    assert_eq!(pipeline.len(), 2);
    assert!(pipeline.iter().all(|stage| matches!(stage, PipelineStage::Match(_))));
}

#[test]
fn filter_without_column_is_still_emitted() {
    let filter = Filter { column: None, ..Filter::default() }.with(Op::Gt, 1);
    assert_eq!(
        render(&builders::add_filters(&[filter])),
        json!([{ "$match": { "": { "$gt": 1 } } }])
    );
}

#[test]
fn time_range_bounds_are_exclusive() {
    assert_eq!(
        render(&builders::time_range(Some(10), Some(20))),
        json!([{ "$match": { "integer.time": { "$gt": 10, "$lt": 20 } } }])
    );
    assert_eq!(
        render(&builders::time_range(None, Some(20))),
        json!([{ "$match": { "integer.time": { "$lt": 20 } } }])
    );
}

#[test]
fn full_sample_trim() {
    assert!(builders::full_samples(&[], &[latency_meta(1, 2)]).is_empty());

    let nan = json!({ "$numberDouble": "NaN" });
    let cols = vec!["latency".to_string(), "size".to_string()];
    let rendered = render(&builders::full_samples(&cols, &[latency_meta(10, 90)]));
    assert_eq!(
        rendered,
        json!([{
            "$match": {
                "$and": [
                    { "$or": [
                        { "integer.latency": { "$gte": 10, "$ne": nan } },
                        { "integer.latency": { "$lt": 90, "$ne": nan } }
                    ] },
                    { "$or": [
                        { "integer.size": { "$gte": 0, "$ne": nan } },
                        { "integer.size": { "$ne": nan } }
                    ] }
                ]
            }
        }])
    );
}

#[test]
fn casts_pass_other_columns_through() {
    let casts = vec![ColumnCast::new(Namespace::String, "code", Namespace::Integer, "code")];
    let cols = vec!["latency".to_string()];
    let dims = vec!["region".to_string()];
    let rendered = render(&builders::cast_columns(&casts, &cols, Some("weight"), &dims));
    assert_eq!(
        rendered,
        json!([{
            "$project": {
                "integer.code": "$string.code",
                "integer.latency": 1,
                "integer.weight": 1,
                "string.region": 1,
                "integer.time": 1
            }
        }])
    );
}

#[test]
fn builders_are_pure() {
    let options = QueryOptions::new()
        .dims(&["region", "host"])
        .cols(&["latency"])
        .weight("weight")
        .filter(Filter::new("string.region").with(Op::Ne, "us"))
        .between(Some(1), Some(100))
        .full_samples(true);
    let columns = vec![latency_meta(3, 300)];
    for kind in [QueryKind::Table, QueryKind::TimeSeries, QueryKind::Histogram, QueryKind::Samples] {
        assert_eq!(
            build_pipeline(kind, &options, &columns),
            build_pipeline(kind, &options, &columns)
        );
    }
}

#[test]
fn grouped_kinds_restrict_before_grouping() {
    let options = QueryOptions::new()
        .cols(&["latency"])
        .filter(Filter::new("string.region").with(Op::Eq, "eu"))
        .between(Some(1), None)
        .full_samples(true);
    let rendered = render(&build_pipeline(QueryKind::Table, &options, &[latency_meta(0, 10)]));
    let stages: Vec<&str> = rendered
        .as_array()
        .map(|stages| {
            stages
                .iter()
                .filter_map(|stage| stage.as_object()?.keys().next().map(String::as_str))
                .collect()
        })
        .unwrap_or_default();
    assert_eq!(stages, vec!["$match", "$match", "$match", "$group"]);
    assert_eq!(rendered[0], json!({ "$match": { "integer.time": { "$gt": 1 } } }));
    assert_eq!(rendered[1], json!({ "$match": { "string.region": { "$eq": "eu" } } }));
}

#[test]
fn samples_are_picked_before_restricting() {
    let options = QueryOptions::new()
        .limit(10)
        .filter(Filter::new("string.region").with(Op::Eq, "eu"));
    let rendered = render(&build_pipeline(QueryKind::Samples, &options, &[]));
    assert_eq!(
        rendered,
        json!([
            { "$sort": { "integer.time": -1 } },
            { "$limit": 10 },
            { "$match": { "string.region": { "$eq": "eu" } } }
        ])
    );
}
