//! Grouping CSV rows into Prometheus-style time series.

use std::collections::HashMap;

use elasticetl_core::{MetricSpec, Sample, TimeSeries};

/// Groups rows by the metric's unique-column tuple. Samples keep
/// row-encounter order and are never sorted; series emit in
/// first-encounter order. Rows too short to hold the value or timestamp
/// column, or whose cells do not parse, are skipped.
pub fn group(rows: &[Vec<String>], spec: &MetricSpec) -> Vec<TimeSeries> {
    let needed = spec.value.max(spec.timestamp);
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, TimeSeries> = HashMap::new();

    for row in rows {
        if row.len() <= needed {
            continue;
        }
        let value: f64 = match row[spec.value].trim().parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let timestamp_ms: i64 = match row[spec.timestamp].trim().parse() {
            Ok(t) => t,
            Err(_) => continue,
        };
        let key = spec
            .unique_fields_index
            .iter()
            .map(|&i| row.get(i).map(String::as_str).unwrap_or_default())
            .collect::<Vec<_>>()
            .join("|");
        let series = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            TimeSeries {
                labels: build_labels(spec, row),
                samples: Vec::new(),
            }
        });
        series.samples.push(Sample {
            timestamp_ms,
            value,
        });
    }

    order.into_iter().filter_map(|k| groups.remove(&k)).collect()
}

fn build_labels(spec: &MetricSpec, row: &[String]) -> Vec<(String, String)> {
    let mut labels = vec![("__name__".to_string(), spec.name.clone())];
    for label in &spec.labels {
        let value = match label.index_in_csv_data {
            Some(i) => row.get(i).cloned().unwrap_or_default(),
            None => label.static_value.clone().unwrap_or_default(),
        };
        labels.push((label.label_name.clone(), value));
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use elasticetl_core::LabelSpec;

    fn rows(raw: &[&[&str]]) -> Vec<Vec<String>> {
        raw.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    fn cpu_spec() -> MetricSpec {
        MetricSpec {
            name: "cpuusage".into(),
            unique_fields_index: vec![0],
            value: 2,
            timestamp: 1,
            labels: vec![
                LabelSpec {
                    label_name: "LB_Name".into(),
                    index_in_csv_data: Some(0),
                    static_value: None,
                },
                LabelSpec {
                    label_name: "job".into(),
                    index_in_csv_data: None,
                    static_value: Some("etl".into()),
                },
            ],
        }
    }

    #[test]
    fn groups_by_unique_columns_preserving_order() {
        let rows = rows(&[
            &["alb1", "712223444", "23.4", "7802"],
            &["alb1", "713223444", "25.4", "7812"],
            &["alb2", "716223444", "21.4", "7842"],
        ]);
        let series = group(&rows, &cpu_spec());
        assert_eq!(series.len(), 2);

        let first = &series[0];
        assert_eq!(first.name(), "cpuusage");
        assert_eq!(first.label("LB_Name"), Some("alb1"));
        assert_eq!(first.label("job"), Some("etl"));
        assert_eq!(
            first.samples,
            vec![
                Sample {
                    timestamp_ms: 712223444,
                    value: 23.4
                },
                Sample {
                    timestamp_ms: 713223444,
                    value: 25.4
                },
            ]
        );

        let second = &series[1];
        assert_eq!(second.label("LB_Name"), Some("alb2"));
        assert_eq!(
            second.samples,
            vec![Sample {
                timestamp_ms: 716223444,
                value: 21.4
            }]
        );
    }

    #[test]
    fn short_and_unparseable_rows_are_skipped() {
        let rows = rows(&[
            &["alb1", "712223444"],
            &["alb1", "not-a-ts", "1.0", "x"],
            &["alb1", "712223444", "nan-ish?", "x"],
            &["alb1", "712223444", "1.5", "x"],
        ]);
        let series = group(&rows, &cpu_spec());
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].samples.len(), 1);
        assert_eq!(series[0].samples[0].value, 1.5);
    }

    #[test]
    fn empty_unique_columns_folds_everything_into_one_series() {
        let mut spec = cpu_spec();
        spec.unique_fields_index = vec![];
        let rows = rows(&[
            &["a", "1", "0.5", ""],
            &["b", "2", "0.6", ""],
        ]);
        let series = group(&rows, &spec);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].samples.len(), 2);
    }
}
