// Deep Inspector (4.2): extends the Value Formatter with attribute/method enumeration and
// specialized records for recognized type families (tabular frame, numeric series,
// n-dimensional array). Never raises to its caller: any failure while collecting a
// best-effort field just omits that field, it never aborts the whole inspection.
use crate::format::{render, truncate, Record};
use crate::settings::Settings;
use crate::value::{NdArray, NumericSeries, ObjectData, TabularFrame, Value};
use serde_json::{Map as JsonMap, Value as Json};
use std::collections::HashSet;

pub fn inspect_value(value: &Value, max_depth: usize, settings: &Settings) -> Record {
    let mut seen = HashSet::new();
    render(value, 0, max_depth, &mut seen, settings, true)
}

pub(crate) fn inspect_object(
    obj: &ObjectData,
    depth: usize,
    max_depth: usize,
    seen: &mut HashSet<usize>,
    settings: &Settings,
) -> Record {
    let mut r = Record::new(obj.type_name.clone()).set("module", "__main__");
    r = r.value(truncate(&format!("<{} object>", obj.type_name), settings.max_value_length));

    // Only publicly named attributes (no leading underscore); callables are skipped here
    // and listed separately as method names.
    let public: Vec<&(String, Value)> = obj.fields.iter().filter(|(name, _)| !name.starts_with('_')).collect();

    let mut attributes = JsonMap::new();
    for (name, value) in public.iter().take(settings.max_collection_items) {
        if value.is_callable() {
            continue;
        }
        attributes.insert((*name).clone(), render(value, depth + 1, max_depth, seen, settings, true).into_json());
    }
    if !attributes.is_empty() {
        r = r.set("attributes", Json::Object(attributes));
    }
    if public.len() > settings.max_collection_items {
        r = r.set("attributes_truncated", true);
    }

    let methods: Vec<Json> = obj
        .fields
        .iter()
        .filter(|(name, value)| !name.starts_with('_') && value.is_callable())
        .take(20)
        .map(|(name, _)| Json::String(name.clone()))
        .collect();
    let total_methods = obj.fields.iter().filter(|(name, value)| !name.starts_with('_') && value.is_callable()).count();
    if !methods.is_empty() {
        r = r.set("methods", Json::Array(methods));
        if total_methods > 20 {
            r = r.set("methods_truncated", true);
        }
    }
    r
}

pub(crate) fn inspect_frame(frame: &TabularFrame) -> Record {
    let (rows, cols) = frame.shape();
    let mut r = Record::new("DataFrame")
        .set("module", "pandas")
        .set("shape", Json::Array(vec![Json::from(rows), Json::from(cols)]))
        .set("rows", rows as u64)
        .set("columns", cols as u64)
        .value(format!("<DataFrame {}x{}>", rows, cols));

    let max_cols = 50usize;
    let mut column_info = Vec::new();
    for (i, name) in frame.columns.iter().enumerate().take(max_cols) {
        let dtype = frame.dtypes.get(i).cloned().unwrap_or_else(|| "object".to_string());
        let mut col = Record::new("column").set("name", name.clone()).set("dtype", dtype);
        let samples: Vec<Json> = frame
            .rows
            .iter()
            .filter_map(|row| row.get(i))
            .filter(|v| !matches!(v, Value::Null))
            .take(3)
            .map(|v| Json::String(truncate(&v.repr(), 50)))
            .collect();
        if !samples.is_empty() {
            col = col.set("samples", Json::Array(samples));
        }
        column_info.push(col.into_json());
    }
    r = r.set("column_info", Json::Array(column_info));
    if frame.columns.len() > max_cols {
        r = r.set("columns_truncated", true);
    }

    r = r.set(
        "index",
        Record::new("RangeIndex").set("dtype", "int64").into_json(),
    );

    // Best-effort memory footprint: a rough estimate, not a real allocator query.
    let memory_usage: usize = frame.rows.iter().map(|row| row.len() * 16).sum();
    r = r.set("memory_usage", memory_usage as u64);

    let preview_rows = rows.min(5);
    let preview_cols = cols.min(10);
    let mut preview = Vec::new();
    for row in frame.rows.iter().take(preview_rows) {
        let mut obj = JsonMap::new();
        for (i, name) in frame.columns.iter().enumerate().take(preview_cols) {
            if let Some(v) = row.get(i) {
                obj.insert(name.clone(), Json::String(v.repr()));
            }
        }
        preview.push(Json::Object(obj));
    }
    r = r.set("preview", Json::Array(preview));
    r
}

pub(crate) fn inspect_series(series: &NumericSeries) -> Record {
    let mut r = Record::new("Series")
        .set("module", "pandas")
        .set("length", series.values.len() as u64)
        .set("dtype", series.dtype.clone())
        .value(format!("<Series length={} dtype={}>", series.values.len(), series.dtype));
    r = r.set("name", series.name.clone().map(Json::String).unwrap_or(Json::Null));

    if is_numeric_dtype(&series.dtype) {
        if let Some(stats) = numeric_stats(&series.values) {
            r = r.set("stats", stats);
        }
    }

    if let Some(histogram) = value_counts(&series.values, 20) {
        r = r.set("value_counts", histogram);
    }

    let samples: Vec<Json> = series.values.iter().take(5).map(|v| Json::String(truncate(&v.repr(), 50))).collect();
    r = r.set("samples", Json::Array(samples));
    r
}

pub(crate) fn inspect_ndarray(arr: &NdArray) -> Record {
    let size = arr.size();
    let mut r = Record::new("ndarray")
        .set("module", "numpy")
        .set("shape", Json::Array(arr.shape.iter().map(|d| Json::from(*d)).collect()))
        .set("dtype", arr.dtype.clone())
        .set("ndim", arr.shape.len() as u64)
        .set("size", size as u64)
        .value(format!("<ndarray shape={:?} dtype={}>", arr.shape, arr.dtype));

    let elem_bytes = dtype_byte_size(&arr.dtype);
    r = r.set("nbytes", (size * elem_bytes) as u64);

    if is_numeric_dtype(&arr.dtype) && size > 0 {
        if let Some(stats) = numeric_stats(&arr.data) {
            r = r.set("stats", stats);
        }
    }

    const MAX_ARRAY_PREVIEW: usize = 10;
    let preview_count = arr.data.len().min(MAX_ARRAY_PREVIEW);
    let preview: Vec<Json> = arr.data.iter().take(preview_count).map(|v| Json::String(truncate(&v.repr(), 50))).collect();
    r = r.set("preview", Json::Array(preview));
    if arr.data.len() > preview_count {
        r = r.set("preview_truncated", true);
    }
    r
}

fn is_numeric_dtype(dtype: &str) -> bool {
    matches!(dtype, "int64" | "int32" | "uint64" | "uint32" | "float64" | "float32" | "complex128")
}

fn dtype_byte_size(dtype: &str) -> usize {
    match dtype {
        "int64" | "float64" | "uint64" | "complex128" => 8,
        "int32" | "float32" | "uint32" => 4,
        _ => 8,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn numeric_stats(values: &[Value]) -> Option<Json> {
    let nums: Vec<f64> = values.iter().filter_map(as_f64).collect();
    if nums.is_empty() {
        return None;
    }
    let min = nums.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    let variance = nums.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / nums.len() as f64;
    let std = variance.sqrt();
    let mut m = JsonMap::new();
    m.insert("min".to_string(), json_f64(min));
    m.insert("max".to_string(), json_f64(max));
    m.insert("mean".to_string(), json_f64(mean));
    m.insert("std".to_string(), json_f64(std));
    Some(Json::Object(m))
}

fn json_f64(f: f64) -> Json {
    serde_json::Number::from_f64(f).map(Json::Number).unwrap_or(Json::Null)
}

/// A value-count histogram, returned only when cardinality is below `max_cardinality`.
fn value_counts(values: &[Value], max_cardinality: usize) -> Option<Json> {
    let mut counts: Vec<(String, u64)> = Vec::new();
    for v in values {
        let key = v.repr();
        if let Some(entry) = counts.iter_mut().find(|(k, _)| *k == key) {
            entry.1 += 1;
        } else {
            if counts.len() >= max_cardinality {
                return None;
            }
            counts.push((key, 1));
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    let mut m = JsonMap::new();
    for (k, v) in counts.into_iter().take(10) {
        m.insert(k, Json::from(v));
    }
    Some(Json::Object(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SeqKind;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn settings() -> Settings {
        Settings::default()
    }

    #[test]
    fn inspects_object_attributes_and_methods() {
        let obj = ObjectData {
            type_name: "Point".to_string(),
            fields: vec![
                ("x".to_string(), Value::Int(1)),
                ("_hidden".to_string(), Value::Int(2)),
                ("y".to_string(), Value::Int(3)),
                ("move_to".to_string(), Value::Native("move_to")),
            ],
        };
        let r = inspect_value(&Value::Object(Rc::new(RefCell::new(obj))), 2, &settings());
        let attrs = r.0["attributes"].as_object().unwrap();
        assert!(attrs.contains_key("x"));
        assert!(attrs.contains_key("y"));
        assert!(!attrs.contains_key("_hidden"));
        assert!(!attrs.contains_key("move_to"));
        let methods = r.0["methods"].as_array().unwrap();
        assert_eq!(methods.len(), 1);
    }

    #[test]
    fn inspects_empty_dataframe_without_panicking() {
        let frame = TabularFrame::default();
        let r = inspect_frame(&frame);
        assert_eq!(r.0["rows"], 0);
        assert_eq!(r.0["columns"], 0);
    }

    #[test]
    fn series_reports_numeric_stats() {
        let series = NumericSeries {
            name: Some("x".to_string()),
            dtype: "int64".to_string(),
            values: vec![Value::Int(1), Value::Int(2), Value::Int(3)],
        };
        let r = inspect_series(&series);
        let stats = &r.0["stats"];
        assert_eq!(stats["min"], 1.0);
        assert_eq!(stats["max"], 3.0);
        assert_eq!(stats["mean"], 2.0);
    }

    #[test]
    fn ndarray_preview_is_capped() {
        let arr = NdArray { shape: vec![20], dtype: "int64".to_string(), data: (0..20).map(Value::Int).collect() };
        let r = inspect_ndarray(&arr);
        assert_eq!(r.0["preview"].as_array().unwrap().len(), 10);
        assert_eq!(r.0["preview_truncated"], true);
    }

    #[test]
    fn deep_inspect_on_a_list_still_bounds_items() {
        let v = Value::Seq(SeqKind::List, Rc::new(RefCell::new((0..5).map(Value::Int).collect())));
        let r = inspect_value(&v, 2, &settings());
        assert_eq!(r.0["length"], 5);
    }
}
