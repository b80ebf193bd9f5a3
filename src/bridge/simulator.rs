//! In-memory mock executor used in Simulated mode.
//!
//! Keeps a tiny model of the design (sketches, features, components,
//! parameters) so that results are deterministic and carry the same fields a
//! real host returns. Nothing here touches the network.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use super::codec::{CommandEnvelope, ResultEnvelope};
use super::error::BridgeError;

const SIMULATED_DOCUMENT: &str = "Simulated Design";
const PLANES: [&str; 3] = ["XY", "XZ", "YZ"];

#[derive(Debug, Clone)]
struct SimSketch {
    plane: String,
    curves: u32,
}

#[derive(Debug, Clone)]
struct SimFeature {
    name: String,
    kind: &'static str,
}

#[derive(Debug, Clone)]
struct SimParameter {
    value: Value,
    units: String,
    comment: String,
}

/// Deterministic stand-in for the CAD host.
#[derive(Debug, Default)]
pub struct MockExecutor {
    sketches: IndexMap<String, SimSketch>,
    features: Vec<SimFeature>,
    components: IndexMap<String, String>,
    parameters: IndexMap<String, SimParameter>,
    counters: IndexMap<&'static str, u32>,
    executed: u64,
}

type SimResult = Result<Map<String, Value>, String>;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn number(params: &Map<String, Value>, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn text<'a>(params: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn list_len(params: &Map<String, Value>, key: &str) -> usize {
    params.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

impl MockExecutor {
    /// Creates an empty simulated design.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commands executed since creation or the last reset.
    #[must_use]
    pub const fn executed(&self) -> u64 {
        self.executed
    }

    /// Forgets the simulated design.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn next_name(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_insert(0);
        *counter += 1;
        format!("{prefix}{counter}")
    }

    fn add_feature(&mut self, prefix: &'static str, kind: &'static str) -> String {
        let name = self.next_name(prefix);
        self.features.push(SimFeature {
            name: name.clone(),
            kind,
        });
        name
    }

    /// Resolves the target sketch, defaulting to the most recent one.
    ///
    /// Sketches known to the design intent store but not to this model (for
    /// instance after a session resume) are adopted.
    fn target_sketch(&mut self, params: &Map<String, Value>) -> Result<String, String> {
        let name = match text(params, "sketch_name") {
            Some(name) => name.to_string(),
            None => self
                .sketches
                .keys()
                .last()
                .cloned()
                .ok_or_else(|| "No sketch available, create a sketch first".to_string())?,
        };
        self.sketches.entry(name.clone()).or_insert(SimSketch {
            plane: "XY".to_string(),
            curves: 0,
        });
        Ok(name)
    }

    fn add_curves(&mut self, params: &Map<String, Value>, curves: u32) -> Result<String, String> {
        let name = self.target_sketch(params)?;
        if let Some(sketch) = self.sketches.get_mut(&name) {
            sketch.curves += curves;
        }
        Ok(name)
    }

    /// Executes one command against the simulated design.
    ///
    /// Unknown commands and invalid requests fail the way a host would, with
    /// `HostRejected`.
    pub fn execute(&mut self, envelope: &CommandEnvelope) -> ResultEnvelope {
        self.executed += 1;
        match self.run(envelope.command(), envelope.parameters()) {
            Ok(payload) => ResultEnvelope::success(envelope.id(), payload),
            Err(message) => {
                ResultEnvelope::failure(envelope.id(), &BridgeError::HostRejected { message })
            }
        }
    }

    fn run(&mut self, command: &str, p: &Map<String, Value>) -> SimResult {
        match command {
            "get_design_info" => Ok(self.design_info()),
            "get_features" => Ok(self.features_info()),
            "create_sketch" => self.create_sketch(p),
            "get_sketch_info" => self.sketch_info(p),
            "draw_line" => {
                let sketch = self.add_curves(p, 1)?;
                let (sx, sy) = (number(p, "start_x", 0.0), number(p, "start_y", 0.0));
                let (ex, ey) = (number(p, "end_x", 10.0), number(p, "end_y", 10.0));
                Ok(object(json!({
                    "sketch_name": sketch,
                    "line_created": true,
                    "start_point": [sx, sy],
                    "end_point": [ex, ey],
                    "length": (ex - sx).hypot(ey - sy),
                })))
            }
            "draw_rectangle" => {
                let sketch = self.add_curves(p, 4)?;
                Ok(object(json!({
                    "sketch_name": sketch,
                    "rectangle_created": true,
                    "width": number(p, "width", 0.0),
                    "height": number(p, "height", 0.0),
                    "center": [number(p, "center_x", 0.0), number(p, "center_y", 0.0)],
                })))
            }
            "draw_circle" => {
                let sketch = self.add_curves(p, 1)?;
                Ok(object(json!({
                    "sketch_name": sketch,
                    "circle_created": true,
                    "radius": number(p, "radius", 0.0),
                    "center": [number(p, "center_x", 0.0), number(p, "center_y", 0.0)],
                })))
            }
            "draw_arc" => {
                let sketch = self.add_curves(p, 1)?;
                Ok(object(json!({
                    "sketch_name": sketch,
                    "arc_created": true,
                    "center": [number(p, "center_x", 0.0), number(p, "center_y", 0.0)],
                    "radius": number(p, "radius", 0.0),
                    "start_angle": number(p, "start_angle", 0.0),
                    "end_angle": number(p, "end_angle", 0.0),
                })))
            }
            "draw_polygon" => {
                let sides = p.get("sides").and_then(Value::as_u64).unwrap_or(0);
                if sides < 3 {
                    return Err("Polygon must have at least 3 sides".to_string());
                }
                let sketch = self.add_curves(p, u32::try_from(sides).unwrap_or(u32::MAX))?;
                Ok(object(json!({
                    "sketch_name": sketch,
                    "polygon_created": true,
                    "center": [number(p, "center_x", 0.0), number(p, "center_y", 0.0)],
                    "radius": number(p, "radius", 0.0),
                    "sides": sides,
                    "lines_count": sides,
                })))
            }
            "add_geometric_constraint" | "add_dimensional_constraint" => {
                let sketch = self.target_sketch(p)?;
                let kind = text(p, "constraint_type")
                    .or_else(|| text(p, "dimension_type"))
                    .unwrap_or("unspecified");
                Ok(object(json!({
                    "sketch_name": sketch,
                    "constraint_created": true,
                    "constraint_type": kind,
                    "entity_count": list_len(p, "entities"),
                })))
            }
            "create_extrude" => {
                let sketch = self.target_sketch(p)?;
                let feature = self.add_feature("Extrude", "extrude");
                Ok(object(json!({
                    "sketch_name": sketch,
                    "extrude_created": true,
                    "distance": number(p, "distance", 0.0),
                    "operation": text(p, "operation").unwrap_or("new_body"),
                    "feature_name": feature,
                })))
            }
            "create_revolve" => {
                let sketch = self.target_sketch(p)?;
                let feature = self.add_feature("Revolve", "revolve");
                Ok(object(json!({
                    "sketch_name": sketch,
                    "revolve_created": true,
                    "angle": number(p, "angle", 360.0),
                    "operation": text(p, "operation").unwrap_or("new_body"),
                    "feature_name": feature,
                })))
            }
            "create_sweep" => {
                let feature = self.add_feature("Sweep", "sweep");
                Ok(object(json!({
                    "sweep_created": true,
                    "profile_sketch_name": text(p, "profile_sketch_name"),
                    "path_sketch_name": text(p, "path_sketch_name"),
                    "twist_angle": number(p, "twist_angle", 0.0),
                    "feature_name": feature,
                })))
            }
            "create_loft" => {
                let profiles = list_len(p, "profile_sketch_names");
                if profiles < 2 {
                    return Err("Loft requires at least 2 profiles".to_string());
                }
                let feature = self.add_feature("Loft", "loft");
                Ok(object(json!({
                    "loft_created": true,
                    "profile_count": profiles,
                    "feature_name": feature,
                })))
            }
            "create_fillet" => self.edge_feature(p, "Fillet", "fillet", "radius"),
            "create_chamfer" => self.edge_feature(p, "Chamfer", "chamfer", "distance"),
            "create_shell" => {
                let feature = self.add_feature("Shell", "shell");
                Ok(object(json!({
                    "shell_created": true,
                    "thickness": number(p, "thickness", 0.0),
                    "faces_removed": list_len(p, "faces_to_remove"),
                    "feature_name": feature,
                })))
            }
            "boolean_operation" => {
                let feature = self.add_feature("Combine", "combine");
                Ok(object(json!({
                    "boolean_created": true,
                    "operation": text(p, "operation").unwrap_or("join"),
                    "tool_body_count": list_len(p, "tool_body_ids"),
                    "feature_name": feature,
                })))
            }
            "split_body" => {
                let keep_both = p
                    .get("keep_both_sides")
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                let bodies = if keep_both { 2 } else { 1 };
                let feature = self.add_feature("Split", "split");
                Ok(object(json!({
                    "split_created": true,
                    "resulting_bodies": bodies,
                    "feature_name": feature,
                })))
            }
            "create_pattern_rectangular" => {
                let q1 = p.get("quantity1").and_then(Value::as_u64).unwrap_or(1);
                let q2 = p.get("quantity2").and_then(Value::as_u64).unwrap_or(1);
                let feature = self.add_feature("RectangularPattern", "pattern");
                Ok(object(json!({
                    "pattern_created": true,
                    "instance_count": q1 * q2,
                    "feature_name": feature,
                })))
            }
            "create_pattern_circular" => {
                let quantity = p.get("quantity").and_then(Value::as_u64).unwrap_or(1);
                let feature = self.add_feature("CircularPattern", "pattern");
                Ok(object(json!({
                    "pattern_created": true,
                    "instance_count": quantity,
                    "angle": number(p, "angle", 360.0),
                    "feature_name": feature,
                })))
            }
            "create_mirror" => {
                let feature = self.add_feature("Mirror", "mirror");
                Ok(object(json!({
                    "mirror_created": true,
                    "mirror_plane": "Custom Plane",
                    "feature_name": feature,
                })))
            }
            "create_component" => {
                let name = match text(p, "name") {
                    Some(name) => name.to_string(),
                    None => self.next_name("Component"),
                };
                if self.components.contains_key(&name) {
                    return Err(format!("Component already exists: {name}"));
                }
                let id = format!("sim-component-{}", self.components.len() + 1);
                self.components.insert(name.clone(), id.clone());
                Ok(object(json!({"component_name": name, "component_id": id})))
            }
            "insert_component_from_file" => {
                let path = text(p, "file_path").ok_or("File path not specified")?;
                let name = match text(p, "name") {
                    Some(name) => name.to_string(),
                    None => std::path::Path::new(path)
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .map_or_else(|| self.next_name("Component"), str::to_string),
                };
                let id = format!("sim-component-{}", self.components.len() + 1);
                self.components.insert(name.clone(), id);
                Ok(object(json!({
                    "file_path": path,
                    "component_name": name,
                    "component_inserted": true,
                })))
            }
            "get_assembly_info" => {
                let names: Vec<&String> = self.components.keys().collect();
                Ok(object(json!({
                    "root_component": "Root Component",
                    "components": names,
                    "component_count": names.len(),
                })))
            }
            "create_mate_constraint" => {
                let name = self.next_name("Mate");
                Ok(object(json!({
                    "constraint_created": true,
                    "constraint_name": name,
                    "constraint_type": text(p, "constraint_type"),
                    "offset": number(p, "offset", 0.0),
                })))
            }
            "create_joint" => {
                let name = self.next_name("Joint");
                Ok(object(json!({
                    "joint_created": true,
                    "joint_name": name,
                    "joint_type": text(p, "joint_type"),
                })))
            }
            "create_motion_study" => Ok(object(json!({
                "study_created": true,
                "study_name": text(p, "name"),
                "joint_count": list_len(p, "joint_ids"),
                "duration": number(p, "duration", 10.0),
                "steps": p.get("steps").and_then(Value::as_u64).unwrap_or(100),
            }))),
            "check_interference" => Ok(object(json!({
                "interference_checked": true,
                "interferences": [],
                "interference_count": 0,
                "tolerance": number(p, "tolerance", 0.001),
            }))),
            "create_exploded_view" => Ok(object(json!({
                "exploded_view_created": true,
                "view_name": text(p, "name"),
                "explosion_distance": number(p, "explosion_distance", 100.0),
            }))),
            "animate_assembly" => Ok(object(json!({
                "animation_created": true,
                "animation_name": text(p, "name"),
                "keyframe_count": list_len(p, "keyframes"),
                "duration": number(p, "duration", 5.0),
                "loop": p.get("loop").and_then(Value::as_bool).unwrap_or(false),
            }))),
            "measure_area" => Ok(object(json!({
                "entity_id": text(p, "entity_id"),
                "entity_type": text(p, "entity_type").unwrap_or("face"),
                "area": 100.0,
                "units": "mm^2",
            }))),
            "measure_volume" => Ok(object(json!({
                "body_id": text(p, "body_id"),
                "volume": 1000.0,
                "units": "mm^3",
            }))),
            "calculate_mass_properties" => {
                let bodies = list_len(p, "body_ids").max(1);
                let density = number(p, "material_density", 7.85);
                #[allow(clippy::cast_precision_loss)]
                let volume = 1000.0 * bodies as f64;
                Ok(object(json!({
                    "body_count": bodies,
                    "volume": volume,
                    "volume_units": "mm^3",
                    "mass": volume * density / 1000.0,
                    "mass_units": "g",
                    "center_of_mass": [0.0, 0.0, 0.0],
                    "material_density": density,
                })))
            }
            "create_section_analysis" => Ok(object(json!({
                "section_created": true,
                "section_name": self.next_name("Section"),
                "body_count": list_len(p, "body_ids"),
            }))),
            "perform_stress_analysis" => Ok(object(json!({
                "analysis_type": "static_stress",
                "study_name": self.next_name("StressStudy"),
                "max_von_mises_stress": 120.5,
                "max_displacement": 0.042,
                "min_safety_factor": 2.1,
                "units": {"stress": "MPa", "displacement": "mm"},
                "load_count": list_len(p, "loads"),
            }))),
            "perform_modal_analysis" => {
                let modes = p
                    .get("number_of_modes")
                    .and_then(Value::as_u64)
                    .unwrap_or(10);
                #[allow(clippy::cast_precision_loss)]
                let frequencies: Vec<f64> = (1..=modes).map(|i| 100.0 * i as f64).collect();
                Ok(object(json!({
                    "analysis_type": "modal",
                    "study_name": self.next_name("ModalStudy"),
                    "natural_frequencies": frequencies,
                    "units": "Hz",
                })))
            }
            "perform_thermal_analysis" => Ok(object(json!({
                "analysis_type": "thermal",
                "study_name": self.next_name("ThermalStudy"),
                "max_temperature": 85.0,
                "min_temperature": 20.0,
                "units": "C",
                "thermal_load_count": list_len(p, "thermal_loads"),
            }))),
            "create_parameter" => {
                let name = text(p, "name").ok_or("Parameter name not specified")?;
                if self.parameters.contains_key(name) {
                    return Err(format!("Parameter already exists: {name}"));
                }
                let parameter = SimParameter {
                    value: p.get("value").cloned().unwrap_or(Value::Null),
                    units: text(p, "units").unwrap_or("mm").to_string(),
                    comment: text(p, "comment").unwrap_or_default().to_string(),
                };
                let payload = object(json!({
                    "parameter_name": name,
                    "value": parameter.value,
                    "units": parameter.units,
                    "comment": parameter.comment,
                }));
                self.parameters.insert(name.to_string(), parameter);
                Ok(payload)
            }
            "update_parameter" => {
                let name = text(p, "name").ok_or("Parameter name not specified")?;
                let value = p.get("value").cloned().unwrap_or(Value::Null);
                let parameter = self
                    .parameters
                    .entry(name.to_string())
                    .or_insert_with(|| SimParameter {
                        value: Value::Null,
                        units: "mm".to_string(),
                        comment: String::new(),
                    });
                parameter.value = value;
                Ok(object(json!({
                    "parameter_name": name,
                    "value": parameter.value,
                    "units": parameter.units,
                })))
            }
            "rename_entity" => {
                let category = text(p, "category").unwrap_or_default();
                let from = text(p, "name").ok_or("Entity name not specified")?;
                let to = text(p, "new_name").ok_or("New name not specified")?;
                match category {
                    "sketch" => rename_key(&mut self.sketches, from, to),
                    "component" => rename_key(&mut self.components, from, to),
                    "parameter" => rename_key(&mut self.parameters, from, to),
                    _ => {
                        if let Some(feature) = self.features.iter_mut().find(|f| f.name == from) {
                            feature.name = to.to_string();
                        }
                    }
                }
                Ok(object(json!({
                    "renamed": true,
                    "category": category,
                    "old_name": from,
                    "new_name": to,
                })))
            }
            "delete_entity" => {
                let category = text(p, "category").unwrap_or_default();
                let name = text(p, "name").ok_or("Entity name not specified")?;
                match category {
                    "sketch" => {
                        self.sketches.shift_remove(name);
                    }
                    "component" => {
                        self.components.shift_remove(name);
                    }
                    "parameter" => {
                        self.parameters.shift_remove(name);
                    }
                    _ => self.features.retain(|f| f.name != name),
                }
                Ok(object(json!({"deleted": true, "category": category, "name": name})))
            }
            other => Err(format!("Unknown command: {other}")),
        }
    }

    fn design_info(&self) -> Map<String, Value> {
        object(json!({
            "design_name": SIMULATED_DOCUMENT,
            "design_info": {
                "name": SIMULATED_DOCUMENT,
                "rootComponent": "Root Component",
                "component_count": self.components.len(),
                "features": self.features.len(),
                "sketches": self.sketches.len(),
                "bodies": self.features.iter().filter(|f| f.kind != "pattern").count(),
                "parameters": self.parameters.len(),
                "units": "mm",
                "isParametric": true,
            }
        }))
    }

    fn features_info(&self) -> Map<String, Value> {
        let features: Vec<Value> = self
            .features
            .iter()
            .map(|f| json!({"name": f.name, "type": f.kind, "isValid": true, "isVisible": true}))
            .collect();
        object(json!({"total_count": features.len(), "features": features}))
    }

    fn create_sketch(&mut self, p: &Map<String, Value>) -> SimResult {
        let plane = text(p, "plane").unwrap_or("XY").to_ascii_uppercase();
        if !PLANES.contains(&plane.as_str()) {
            return Err(format!("Unsupported plane: {plane}"));
        }
        let name = match text(p, "name") {
            Some(name) => name.trim().to_string(),
            None => self.next_name("Sketch"),
        };
        if self.sketches.contains_key(&name) {
            return Err(format!("Sketch already exists: {name}"));
        }
        self.sketches.insert(
            name.clone(),
            SimSketch {
                plane: plane.clone(),
                curves: 0,
            },
        );
        Ok(object(json!({"sketch_name": name, "plane": plane})))
    }

    fn sketch_info(&self, p: &Map<String, Value>) -> SimResult {
        let describe = |name: &String, sketch: &SimSketch| {
            json!({
                "name": name,
                "plane": sketch.plane,
                "curves": sketch.curves,
                "profiles": u32::from(sketch.curves > 0),
                "isVisible": true,
            })
        };
        if let Some(name) = text(p, "sketch_name") {
            let sketch = self
                .sketches
                .get_key_value(name)
                .ok_or_else(|| format!("Sketch not found: {name}"))?;
            return Ok(object(json!({"sketch": describe(sketch.0, sketch.1)})));
        }
        let sketches: Vec<Value> = self
            .sketches
            .iter()
            .map(|(name, sketch)| describe(name, sketch))
            .collect();
        Ok(object(json!({"total_count": sketches.len(), "sketches": sketches})))
    }

    fn edge_feature(
        &mut self,
        p: &Map<String, Value>,
        prefix: &'static str,
        kind: &'static str,
        size_key: &str,
    ) -> SimResult {
        let edges = list_len(p, "edge_ids");
        if edges == 0 {
            return Err(format!("No edges specified for {kind}"));
        }
        let feature = self.add_feature(prefix, kind);
        let mut payload = object(json!({
            "edge_count": edges,
            "feature_name": feature,
        }));
        payload.insert(format!("{kind}_created"), Value::Bool(true));
        payload.insert(size_key.to_string(), json!(number(p, size_key, 0.0)));
        Ok(payload)
    }
}

fn rename_key<V>(map: &mut IndexMap<String, V>, from: &str, to: &str) {
    if let Some((index, _, value)) = map.shift_remove_full(from) {
        map.shift_insert(index, to.to_string(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::ErrorKind;

    fn run(sim: &mut MockExecutor, command: &str, params: Value) -> ResultEnvelope {
        sim.execute(&CommandEnvelope::new(command, object(params)))
    }

    #[test]
    fn sketch_names_are_deterministic() {
        let mut sim = MockExecutor::new();
        let first = run(&mut sim, "create_sketch", json!({}));
        let second = run(&mut sim, "create_sketch", json!({"plane": "xz"}));
        assert_eq!(first.payload["sketch_name"], "Sketch1");
        assert_eq!(second.payload["sketch_name"], "Sketch2");
        assert_eq!(second.payload["plane"], "XZ");
    }

    #[test]
    fn results_carry_no_mode_marker() {
        let mut sim = MockExecutor::new();
        let result = run(&mut sim, "get_design_info", json!({}));
        assert!(result.is_success());
        assert!(!result.payload.contains_key("mode"));
        assert_eq!(result.payload["design_name"], SIMULATED_DOCUMENT);
    }

    #[test]
    fn extrude_reports_feature_name() {
        let mut sim = MockExecutor::new();
        run(&mut sim, "create_sketch", json!({"name": "Base"}));
        run(&mut sim, "draw_rectangle", json!({"sketch_name": "Base", "width": 10, "height": 5}));
        let result = run(
            &mut sim,
            "create_extrude",
            json!({"sketch_name": "Base", "distance": 3}),
        );
        assert_eq!(result.payload["feature_name"], "Extrude1");
        let info = run(&mut sim, "get_sketch_info", json!({"sketch_name": "Base"}));
        assert_eq!(info.payload["sketch"]["curves"], 4);
    }

    #[test]
    fn unknown_command_is_host_rejected() {
        let mut sim = MockExecutor::new();
        let result = run(&mut sim, "teleport", json!({}));
        assert_eq!(result.kind(), Some(ErrorKind::HostRejected));
        assert_eq!(result.error.as_deref(), Some("Unknown command: teleport"));
    }

    #[test]
    fn invalid_plane_and_polygon_are_rejected() {
        let mut sim = MockExecutor::new();
        assert!(!run(&mut sim, "create_sketch", json!({"plane": "AB"})).is_success());
        run(&mut sim, "create_sketch", json!({}));
        assert!(!run(&mut sim, "draw_polygon", json!({"sides": 2, "radius": 1})).is_success());
    }

    #[test]
    fn reset_forgets_the_design() {
        let mut sim = MockExecutor::new();
        run(&mut sim, "create_sketch", json!({}));
        sim.reset();
        assert_eq!(sim.executed(), 0);
        let again = run(&mut sim, "create_sketch", json!({}));
        assert_eq!(again.payload["sketch_name"], "Sketch1");
    }
}
