//! Tools computed in-process. Pure math, no host round trip.

use chrono::Utc;
use serde_json::{json, Map, Value};

use super::LocalTool;
use crate::bridge::{BridgeError, BridgeResult};

type Point = [f64; 3];

fn point(params: &Map<String, Value>, key: &str) -> BridgeResult<Point> {
    let coords: Vec<f64> = params
        .get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default();
    <Point>::try_from(coords.as_slice())
        .map_err(|_| BridgeError::invalid_params(format!("'{key}' must be a point [x, y, z]")))
}

fn sub(a: Point, b: Point) -> Point {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn length(v: Point) -> f64 {
    v.iter().map(|c| c * c).sum::<f64>().sqrt()
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Runs a local tool on prepared parameters.
///
/// # Errors
///
/// Returns `InvalidParams` when the inputs admit no answer.
pub fn run(tool: LocalTool, params: &Map<String, Value>) -> BridgeResult<Map<String, Value>> {
    match tool {
        LocalTool::MeasureDistance => measure_distance(params),
        LocalTool::MeasureAngle => measure_angle(params),
        LocalTool::AnalysisReport => Ok(analysis_report(params)),
    }
}

fn measure_distance(params: &Map<String, Value>) -> BridgeResult<Map<String, Value>> {
    let delta = sub(point(params, "point2")?, point(params, "point1")?);
    let kind = params
        .get("measurement_type")
        .and_then(Value::as_str)
        .unwrap_or("linear");
    let distance = match kind {
        "delta_x" => delta[0].abs(),
        "delta_y" => delta[1].abs(),
        "delta_z" => delta[2].abs(),
        _ => length(delta),
    };

    Ok(into_map(json!({
        "distance": distance,
        "delta_x": delta[0],
        "delta_y": delta[1],
        "delta_z": delta[2],
        "measurement_type": kind,
        "units": "mm",
    })))
}

fn measure_angle(params: &Map<String, Value>) -> BridgeResult<Map<String, Value>> {
    let vertex = point(params, "vertex")?;
    let v1 = sub(point(params, "point1")?, vertex);
    let v2 = sub(point(params, "point2")?, vertex);
    let (len1, len2) = (length(v1), length(v2));
    if len1 == 0.0 || len2 == 0.0 {
        return Err(BridgeError::invalid_params(
            "cannot measure an angle: a point coincides with the vertex",
        ));
    }

    let dot: f64 = v1.iter().zip(v2).map(|(a, b)| a * b).sum();
    let radians = (dot / (len1 * len2)).clamp(-1.0, 1.0).acos();

    Ok(into_map(json!({
        "angle_radians": radians,
        "angle_degrees": radians.to_degrees(),
        "vertex": vertex,
        "vector1_length": len1,
        "vector2_length": len2,
    })))
}

fn analysis_report(params: &Map<String, Value>) -> Map<String, Value> {
    let results = params
        .get("analysis_results")
        .and_then(Value::as_array)
        .map_or(&[][..], Vec::as_slice);
    let format = params
        .get("report_format")
        .and_then(Value::as_str)
        .unwrap_or("detailed");
    let include_images = params
        .get("include_images")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    let mut analysis_types = Vec::new();
    let mut key_findings = Vec::new();
    let mut recommendations = Vec::new();
    let mut detailed = Vec::new();

    for (i, result) in results.iter().enumerate() {
        let analysis_type = result
            .get("analysis_type")
            .and_then(Value::as_str)
            .map_or_else(|| format!("analysis_{}", i + 1), str::to_string);
        let metrics = result.get("analysis_results").cloned().unwrap_or(json!({}));

        if let Some(stress) = metrics.pointer("/max_stress/value") {
            key_findings.push(format!("Maximum stress: {stress} MPa"));
        }
        if let Some(factor) = metrics.pointer("/safety_factor/min_value") {
            key_findings.push(format!("Minimum safety factor: {factor}"));
        }
        let advice = result
            .get("recommendations")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        recommendations.extend(advice.iter().cloned());

        let succeeded = result.get("success").and_then(Value::as_bool).unwrap_or(false);
        detailed.push(json!({
            "analysis_id": i + 1,
            "analysis_type": analysis_type,
            "status": if succeeded { "completed" } else { "failed" },
            "key_metrics": metrics,
            "convergence": result.get("convergence_info").cloned().unwrap_or(json!({})),
            "recommendations": advice,
        }));
        analysis_types.push(analysis_type);
    }

    let conclusions: &[&str] = if key_findings.is_empty() {
        &[]
    } else {
        &[
            "All analyses completed",
            "Review key findings against the design requirements",
            "Apply the listed recommendations before release",
        ]
    };
    let report_files: &[&str] = match format {
        "summary" => &["summary_report.pdf"],
        "presentation" => &["presentation.pptx", "key_results.png"],
        _ => &["analysis_report.pdf", "stress_contours.png", "displacement_plot.png"],
    };

    into_map(json!({
        "report_content": {
            "report_info": {
                "generated_at": Utc::now().to_rfc3339(),
                "format": format,
                "includes_images": include_images,
                "total_analyses": results.len(),
            },
            "executive_summary": {
                "analysis_types": analysis_types,
                "key_findings": key_findings,
                "recommendations": recommendations,
            },
            "detailed_results": detailed,
            "conclusions": conclusions,
        },
        "report_files": report_files,
        "format": format,
        "total_pages": 15 + results.len() * 3,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        into_map(value)
    }

    #[test]
    fn linear_and_axis_distances() {
        let p = params(json!({"point1": [0.0, 0.0, 0.0], "point2": [3.0, -4.0, 0.0]}));
        let out = run(LocalTool::MeasureDistance, &p).unwrap();
        assert!((out["distance"].as_f64().unwrap() - 5.0).abs() < 1e-9);

        let p = params(json!({
            "point1": [0.0, 0.0, 0.0],
            "point2": [3.0, -4.0, 0.0],
            "measurement_type": "delta_y"
        }));
        let out = run(LocalTool::MeasureDistance, &p).unwrap();
        assert!((out["distance"].as_f64().unwrap() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn right_angle() {
        let p = params(json!({
            "point1": [1.0, 0.0, 0.0],
            "vertex": [0.0, 0.0, 0.0],
            "point2": [0.0, 2.0, 0.0]
        }));
        let out = run(LocalTool::MeasureAngle, &p).unwrap();
        assert!((out["angle_degrees"].as_f64().unwrap() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn zero_length_vector_is_invalid() {
        let p = params(json!({
            "point1": [1.0, 1.0, 1.0],
            "vertex": [1.0, 1.0, 1.0],
            "point2": [0.0, 2.0, 0.0]
        }));
        assert!(run(LocalTool::MeasureAngle, &p).is_err());
    }

    #[test]
    fn report_collects_findings() {
        let p = params(json!({
            "analysis_results": [{
                "success": true,
                "analysis_type": "stress",
                "analysis_results": {
                    "max_stress": {"value": 125.5},
                    "safety_factor": {"min_value": 2.74}
                },
                "recommendations": ["Thicken the web"]
            }],
            "report_format": "summary"
        }));
        let out = run(LocalTool::AnalysisReport, &p).unwrap();
        let summary = &out["report_content"]["executive_summary"];
        assert_eq!(summary["key_findings"].as_array().unwrap().len(), 2);
        assert_eq!(summary["recommendations"][0], "Thicken the web");
        assert_eq!(out["report_files"], json!(["summary_report.pdf"]));
        assert_eq!(out["total_pages"], 18);
    }
}
