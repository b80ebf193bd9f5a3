//! The tool table.

use super::{DefaultValue as D, LocalTool, ParamKind as K, ParamSpec as P, Route, SessionTool, ToolSpec};

const SIZE_MM: (f64, f64) = (0.001, 10_000.0);
const RADIUS_MM: (f64, f64) = (0.001, 5_000.0);
const SKETCH_ANGLE: (f64, f64) = (-360.0, 360.0);
const EXTRUDE_MM: (f64, f64) = (0.001, 10_000.0);
const REVOLVE_ANGLE: (f64, f64) = (0.1, 360.0);
const FILLET_MM: (f64, f64) = (0.001, 100.0);

const FEATURE_OPERATIONS: &[&str] = &["new_body", "join", "cut", "intersect"];
const FEATURE_WIRE_NAMES: &[(&str, &str)] = &[("new_body", "new")];
const JOINT_TYPES: &[&str] = &[
    "rigid",
    "revolute",
    "slider",
    "cylindrical",
    "pin_slot",
    "planar",
    "ball",
];
const CATEGORIES: &[&str] = &["sketch", "body", "component", "parameter"];

const fn sketch_target(description: &'static str) -> P {
    P::optional("sketch_name", K::Text, description)
}

const fn operation() -> P {
    P::optional("operation", K::Text, "Operation type: new_body, join, cut or intersect")
        .or(D::Text("new_body"))
        .one_of(FEATURE_OPERATIONS)
        .sent_as(FEATURE_WIRE_NAMES)
}

const fn radius(description: &'static str) -> P {
    P::required("radius", K::Number, description).within(RADIUS_MM.0, RADIUS_MM.1)
}

const fn category(description: &'static str) -> P {
    P::required("category", K::Text, description).one_of(CATEGORIES)
}

const fn host(
    name: &'static str,
    description: &'static str,
    params: &'static [P],
) -> ToolSpec {
    ToolSpec {
        name,
        description,
        route: Route::Host(name),
        params,
    }
}

const fn session(
    name: &'static str,
    tool: SessionTool,
    description: &'static str,
    params: &'static [P],
) -> ToolSpec {
    ToolSpec {
        name,
        description,
        route: Route::Session(tool),
        params,
    }
}

const EXTRUDE_PARAMS: &[P] = &[
    P::required("sketch_name", K::Text, "Name of the sketch to extrude"),
    P::required("distance", K::Number, "Extrusion distance (mm)").within(EXTRUDE_MM.0, EXTRUDE_MM.1),
    operation(),
];

/// Every tool the server exposes.
pub const CATALOG: &[ToolSpec] = &[
    // Bridge and design context
    session(
        "get_bridge_status",
        SessionTool::Status,
        "Report the bridge mode (live, simulated or degraded), connection health, failure \
         counters and a summary of the recorded design intent.",
        &[],
    ),
    session(
        "connect_host",
        SessionTool::Connect,
        "Reconnect to the CAD host plugin now and run a health check. Optionally pin the \
         bridge to simulation, or release a pin.",
        &[P::optional(
            "force_simulation",
            K::Boolean,
            "true pins simulated mode; false releases the pin and probes the host",
        )],
    ),
    session(
        "store_design_intent",
        SessionTool::StoreIntent,
        "Store the high-level statement of what is being designed.",
        &[
            P::required("project_name", K::Text, "Project name"),
            P::required("description", K::Text, "What the design is for"),
            P::optional("requirements", K::Texts, "Functional requirements"),
            P::optional("constraints", K::Texts, "Design constraints"),
            P::optional(
                "final_assembly_description",
                K::Text,
                "Description of the finished assembly",
            ),
            P::optional("tags", K::Texts, "Tags"),
        ],
    ),
    session(
        "get_design_context",
        SessionTool::DesignContext,
        "Return the design statement, recorded entities, parameter histories and recent \
         commands of this session.",
        &[P::optional("history_limit", K::Integer, "Number of recent commands to include")
            .or(D::Integer(20))
            .within(0.0, 1_000.0)],
    ),
    session(
        "list_entities",
        SessionTool::ListEntities,
        "List recorded sketches, bodies, components and parameters, optionally filtered \
         by category and name pattern.",
        &[
            P::optional("category", K::Text, "Only this category").one_of(CATEGORIES),
            P::optional("pattern", K::Text, "Name pattern (case-insensitive)"),
            P::optional("pattern_type", K::Text, "How to read the pattern: glob or regex")
                .or(D::Text("glob"))
                .one_of(&["glob", "regex"]),
        ],
    ),
    session(
        "get_design_history",
        SessionTool::History,
        "Return executed commands, newest first, as JSON or CSV.",
        &[
            P::optional("limit", K::Integer, "Maximum number of entries").within(1.0, 100_000.0),
            P::optional("command", K::Text, "Only entries for this command"),
            P::optional("format", K::Text, "Output format: json or csv")
                .or(D::Text("json"))
                .one_of(&["json", "csv"]),
        ],
    ),
    session(
        "save_session",
        SessionTool::Save,
        "Write the design intent to the session file, or to the given path.",
        &[P::optional("path", K::Text, "Target file (defaults to the configured session file)")],
    ),
    session(
        "load_session",
        SessionTool::Load,
        "Replace the design intent with the contents of the session file, or of the given \
         path.",
        &[P::optional("path", K::Text, "Source file (defaults to the configured session file)")],
    ),
    session(
        "reset_session",
        SessionTool::Reset,
        "Forget all recorded entities and history. The design statement is kept.",
        &[P::optional(
            "delete_file",
            K::Boolean,
            "Also delete the configured session file",
        )],
    ),
    host(
        "rename_entity",
        "Rename a sketch, body, component or parameter in the host and in the design intent.",
        &[
            category("Entity category"),
            P::required("name", K::Text, "Current name"),
            P::required("new_name", K::Text, "New name"),
        ],
    ),
    host(
        "delete_entity",
        "Delete a sketch, body, component or parameter in the host and from the design intent.",
        &[
            category("Entity category"),
            P::required("name", K::Text, "Entity name"),
        ],
    ),
    host(
        "update_parameter",
        "Change the value of an existing user parameter.",
        &[
            P::required("name", K::Text, "Parameter name"),
            P::required("value", K::Number, "New value"),
            P::optional("comment", K::Text, "Comment"),
        ],
    ),
    // Sketch
    host(
        "create_sketch",
        "Create a new sketch on a base plane.",
        &[
            P::optional("plane", K::Text, "Sketch plane: XY, XZ or YZ")
                .or(D::Text("XY"))
                .one_of(&["XY", "XZ", "YZ"]),
            P::optional("name", K::Text, "Sketch name (the host picks one if omitted)"),
        ],
    ),
    host(
        "draw_line",
        "Draw a line in a sketch.",
        &[
            P::required("start_x", K::Number, "Start point X (mm)"),
            P::required("start_y", K::Number, "Start point Y (mm)"),
            P::required("end_x", K::Number, "End point X (mm)"),
            P::required("end_y", K::Number, "End point Y (mm)"),
            sketch_target("Target sketch (defaults to the active sketch)"),
        ],
    ),
    host(
        "draw_rectangle",
        "Draw a centred rectangle in a sketch.",
        &[
            P::required("width", K::Number, "Width (mm)").within(SIZE_MM.0, SIZE_MM.1),
            P::required("height", K::Number, "Height (mm)").within(SIZE_MM.0, SIZE_MM.1),
            P::optional("center_x", K::Number, "Centre X (mm)").or(D::Number(0.0)),
            P::optional("center_y", K::Number, "Centre Y (mm)").or(D::Number(0.0)),
            sketch_target("Target sketch (defaults to the active sketch)"),
        ],
    ),
    host(
        "draw_circle",
        "Draw a circle in a sketch.",
        &[
            radius("Radius (mm)"),
            P::optional("center_x", K::Number, "Centre X (mm)").or(D::Number(0.0)),
            P::optional("center_y", K::Number, "Centre Y (mm)").or(D::Number(0.0)),
            sketch_target("Target sketch (defaults to the active sketch)"),
        ],
    ),
    host(
        "draw_arc",
        "Draw an arc in a sketch.",
        &[
            P::required("center_x", K::Number, "Centre X (mm)"),
            P::required("center_y", K::Number, "Centre Y (mm)"),
            radius("Radius (mm)"),
            P::required("start_angle", K::Number, "Start angle")
                .within(SKETCH_ANGLE.0, SKETCH_ANGLE.1),
            P::required("end_angle", K::Number, "End angle").within(SKETCH_ANGLE.0, SKETCH_ANGLE.1),
            sketch_target("Target sketch (defaults to the active sketch)"),
        ],
    ),
    host(
        "draw_polygon",
        "Draw a regular polygon in a sketch.",
        &[
            P::required("center_x", K::Number, "Centre X (mm)"),
            P::required("center_y", K::Number, "Centre Y (mm)"),
            radius("Circumscribed radius (mm)"),
            P::required("sides", K::Integer, "Number of sides").within(3.0, 1_024.0),
            sketch_target("Target sketch (defaults to the active sketch)"),
        ],
    ),
    host(
        "get_sketch_info",
        "Describe one sketch, or every sketch.",
        &[sketch_target("Sketch to describe (all sketches if omitted)")],
    ),
    host(
        "add_geometric_constraint",
        "Add a geometric constraint between sketch entities.",
        &[
            P::required(
                "constraint_type",
                K::Text,
                "coincident, parallel, perpendicular, tangent, equal, ...",
            ),
            P::required("entities", K::Texts, "Ids of the constrained entities"),
            sketch_target("Target sketch"),
        ],
    ),
    host(
        "add_dimensional_constraint",
        "Add a driving dimension to sketch entities.",
        &[
            P::required("dimension_type", K::Text, "distance, radius, diameter, angle, ..."),
            P::required("entities", K::Texts, "Ids of the dimensioned entities"),
            P::required("value", K::Number, "Dimension value"),
            sketch_target("Target sketch"),
        ],
    ),
    // Modelling features
    host("create_extrude", "Extrude a sketch profile into a 3D feature.", EXTRUDE_PARAMS),
    ToolSpec {
        name: "extrude_feature",
        description: "Alias of create_extrude.",
        route: Route::Host("create_extrude"),
        params: EXTRUDE_PARAMS,
    },
    host(
        "create_revolve",
        "Revolve a sketch profile about an axis.",
        &[
            P::required("sketch_name", K::Text, "Name of the sketch to revolve"),
            P::required("axis_point", K::Point3, "Point on the axis [x, y, z]"),
            P::required("axis_direction", K::Point3, "Axis direction [x, y, z]"),
            P::required("angle", K::Number, "Revolution angle")
                .within(REVOLVE_ANGLE.0, REVOLVE_ANGLE.1),
            operation(),
        ],
    ),
    host(
        "create_sweep",
        "Sweep a profile sketch along a path sketch.",
        &[
            P::required("profile_sketch_name", K::Text, "Profile sketch"),
            P::required("path_sketch_name", K::Text, "Path sketch"),
            operation(),
            P::optional("twist_angle", K::Number, "Twist angle").or(D::Number(0.0)),
        ],
    ),
    host(
        "create_loft",
        "Loft between profile sketches.",
        &[
            P::required("profile_sketch_names", K::Texts, "Profile sketches, in order"),
            operation(),
            P::optional("guide_rails", K::Texts, "Guide rail sketches"),
        ],
    ),
    host(
        "create_fillet",
        "Round edges.",
        &[
            P::required("edge_ids", K::Texts, "Edge ids"),
            P::required("radius", K::Number, "Fillet radius (mm)").within(FILLET_MM.0, FILLET_MM.1),
            P::optional("fillet_type", K::Text, "constant, variable or chord_length")
                .or(D::Text("constant"))
                .one_of(&["constant", "variable", "chord_length"]),
        ],
    ),
    host(
        "create_chamfer",
        "Bevel edges.",
        &[
            P::required("edge_ids", K::Texts, "Edge ids"),
            P::required("distance", K::Number, "Chamfer distance (mm)")
                .within(FILLET_MM.0, FILLET_MM.1),
            P::optional(
                "chamfer_type",
                K::Text,
                "equal_distance, two_distances or distance_and_angle",
            )
            .or(D::Text("equal_distance"))
            .one_of(&["equal_distance", "two_distances", "distance_and_angle"]),
        ],
    ),
    host(
        "create_shell",
        "Hollow a body, removing the given faces.",
        &[
            P::required("faces_to_remove", K::Texts, "Face ids to open"),
            P::required("thickness", K::Number, "Wall thickness (mm)").within(SIZE_MM.0, SIZE_MM.1),
            P::optional("shell_direction", K::Text, "inside, outside or middle")
                .or(D::Text("inside"))
                .one_of(&["inside", "outside", "middle"]),
        ],
    ),
    host(
        "boolean_operation",
        "Combine bodies.",
        &[
            P::required("target_body_id", K::Text, "Target body"),
            P::required("tool_body_ids", K::Texts, "Tool bodies"),
            P::required("operation", K::Text, "union, subtract or intersect")
                .one_of(&["union", "subtract", "intersect"]),
        ],
    ),
    host(
        "split_body",
        "Split a body with a face, plane or body.",
        &[
            P::required("body_id", K::Text, "Body to split"),
            P::required("splitting_tool_id", K::Text, "Splitting face, plane or body"),
            P::optional("keep_both_sides", K::Boolean, "Keep both halves").or(D::Bool(true)),
        ],
    ),
    host(
        "create_pattern_rectangular",
        "Repeat features along two directions.",
        &[
            P::required("features_to_pattern", K::Texts, "Feature ids"),
            P::required("direction1", K::Point3, "First direction [x, y, z]"),
            P::required("direction2", K::Point3, "Second direction [x, y, z]"),
            P::required("quantity1", K::Integer, "Count along the first direction")
                .within(1.0, 10_000.0),
            P::required("quantity2", K::Integer, "Count along the second direction")
                .within(1.0, 10_000.0),
            P::required("distance1", K::Number, "Spacing along the first direction (mm)"),
            P::required("distance2", K::Number, "Spacing along the second direction (mm)"),
        ],
    ),
    host(
        "create_pattern_circular",
        "Repeat features about an axis.",
        &[
            P::required("features_to_pattern", K::Texts, "Feature ids"),
            P::required("axis_point", K::Point3, "Point on the axis [x, y, z]"),
            P::required("axis_direction", K::Point3, "Axis direction [x, y, z]"),
            P::required("quantity", K::Integer, "Number of instances").within(1.0, 10_000.0),
            P::required("angle", K::Number, "Total angle"),
        ],
    ),
    host(
        "create_mirror",
        "Mirror features across a plane.",
        &[
            P::required("features_to_mirror", K::Texts, "Feature ids"),
            P::required("mirror_plane_point", K::Point3, "Point on the plane [x, y, z]"),
            P::required("mirror_plane_normal", K::Point3, "Plane normal [x, y, z]"),
        ],
    ),
    // Assembly
    host(
        "create_component",
        "Create a new component.",
        &[
            P::required("name", K::Text, "Component name"),
            P::optional("description", K::Text, "Description").or(D::Text("")),
            P::optional("activate", K::Boolean, "Make it the active component").or(D::Bool(true)),
        ],
    ),
    host(
        "insert_component_from_file",
        "Insert a component from a file.",
        &[
            P::required("file_path", K::Text, "Component file"),
            P::optional("name", K::Text, "Component name"),
            P::optional("transform_matrix", K::Numbers, "4x4 transform, 16 values row-major"),
        ],
    ),
    host("get_assembly_info", "Describe the assembly structure.", &[]),
    host(
        "create_mate_constraint",
        "Constrain two entities relative to each other.",
        &[
            P::required("constraint_type", K::Text, "Constraint type").one_of(JOINT_TYPES),
            P::required("entity1_id", K::Text, "First entity"),
            P::required("entity2_id", K::Text, "Second entity"),
            P::optional("offset", K::Number, "Offset (mm)").or(D::Number(0.0)),
            P::optional("angle", K::Number, "Angle").or(D::Number(0.0)),
        ],
    ),
    host(
        "create_joint",
        "Join two entities with a joint.",
        &[
            P::required("joint_type", K::Text, "Joint type").one_of(JOINT_TYPES),
            P::required("origin_entity_id", K::Text, "Origin entity"),
            P::required("origin_point", K::Point3, "Origin point [x, y, z]"),
            P::required("origin_axis", K::Point3, "Origin axis [x, y, z]"),
            P::required("target_entity_id", K::Text, "Target entity"),
            P::required("target_point", K::Point3, "Target point [x, y, z]"),
            P::required("target_axis", K::Point3, "Target axis [x, y, z]"),
            P::optional("limits", K::Object, "Motion limits {\"min\": .., \"max\": ..}"),
        ],
    ),
    host(
        "create_motion_study",
        "Create a motion study over joints.",
        &[
            P::required("name", K::Text, "Study name"),
            P::required("joint_ids", K::Texts, "Participating joints"),
            P::optional("duration", K::Number, "Duration (s)")
                .or(D::Number(10.0))
                .within(0.001, 86_400.0),
            P::optional("steps", K::Integer, "Analysis steps")
                .or(D::Integer(100))
                .within(1.0, 100_000.0),
        ],
    ),
    host(
        "check_interference",
        "Check components for interference.",
        &[
            P::optional("component_ids", K::Texts, "Components to check (all if omitted)"),
            P::optional("tolerance", K::Number, "Tolerance (mm)")
                .or(D::Number(0.001))
                .within(0.0, 1_000.0),
        ],
    ),
    host(
        "create_exploded_view",
        "Create an exploded view.",
        &[
            P::required("name", K::Text, "View name"),
            P::optional("explosion_direction", K::Point3, "Direction [x, y, z]")
                .or(D::Point([0.0, 0.0, 1.0])),
            P::optional("explosion_distance", K::Number, "Distance (mm)").or(D::Number(100.0)),
            P::optional("component_ids", K::Texts, "Components to explode"),
        ],
    ),
    host(
        "animate_assembly",
        "Animate joints through keyframes.",
        &[
            P::required("name", K::Text, "Animation name"),
            P::required(
                "keyframes",
                K::Objects,
                "Keyframes [{\"time\": 0.0, \"joint_id\": \"id\", \"value\": 0.0}, ...]",
            ),
            P::optional("duration", K::Number, "Duration (s)")
                .or(D::Number(5.0))
                .within(0.001, 86_400.0),
            P::optional("loop", K::Boolean, "Loop playback").or(D::Bool(false)),
        ],
    ),
    // Analysis
    ToolSpec {
        name: "measure_distance",
        description: "Distance between two points, computed locally.",
        route: Route::Local(LocalTool::MeasureDistance),
        params: &[
            P::required("point1", K::Point3, "First point [x, y, z]"),
            P::required("point2", K::Point3, "Second point [x, y, z]"),
            P::optional("measurement_type", K::Text, "linear, delta_x, delta_y or delta_z")
                .or(D::Text("linear"))
                .one_of(&["linear", "delta_x", "delta_y", "delta_z"]),
        ],
    },
    ToolSpec {
        name: "measure_angle",
        description: "Angle at a vertex between two points, computed locally.",
        route: Route::Local(LocalTool::MeasureAngle),
        params: &[
            P::required("point1", K::Point3, "First point [x, y, z]"),
            P::required("vertex", K::Point3, "Vertex [x, y, z]"),
            P::required("point2", K::Point3, "Second point [x, y, z]"),
        ],
    },
    host(
        "measure_area",
        "Area of a face, sketch or region.",
        &[
            P::required("entity_id", K::Text, "Entity id"),
            P::optional("entity_type", K::Text, "face, sketch or region")
                .or(D::Text("face"))
                .one_of(&["face", "sketch", "region"]),
        ],
    ),
    host(
        "measure_volume",
        "Volume of a body.",
        &[P::required("body_id", K::Text, "Body id")],
    ),
    host(
        "calculate_mass_properties",
        "Mass, centre of mass and inertia of bodies.",
        &[
            P::required("body_ids", K::Texts, "Body ids"),
            P::optional("material_density", K::Number, "Density (g/cm3)")
                .or(D::Number(7.85))
                .within(0.000_001, 100.0),
            P::optional("units", K::Text, "metric or imperial")
                .or(D::Text("metric"))
                .one_of(&["metric", "imperial"]),
        ],
    ),
    host(
        "create_section_analysis",
        "Cut bodies with a plane for inspection.",
        &[
            P::required("cutting_plane_point", K::Point3, "Point on the plane [x, y, z]"),
            P::required("cutting_plane_normal", K::Point3, "Plane normal [x, y, z]"),
            P::required("body_ids", K::Texts, "Body ids"),
        ],
    ),
    host(
        "perform_stress_analysis",
        "Static stress analysis.",
        &[
            P::required("body_ids", K::Texts, "Body ids"),
            P::required(
                "material_properties",
                K::Object,
                "{\"elastic_modulus\": .., \"poisson_ratio\": .., \"density\": ..}",
            ),
            P::required("loads", K::Objects, "Loads"),
            P::required("constraints", K::Objects, "Supports"),
            P::optional("mesh_settings", K::Object, "Mesh settings"),
        ],
    ),
    host(
        "perform_modal_analysis",
        "Natural frequency analysis.",
        &[
            P::required("body_ids", K::Texts, "Body ids"),
            P::required("material_properties", K::Object, "Material properties"),
            P::required("constraints", K::Objects, "Supports"),
            P::optional("number_of_modes", K::Integer, "Modes to compute")
                .or(D::Integer(10))
                .within(1.0, 1_000.0),
        ],
    ),
    host(
        "perform_thermal_analysis",
        "Steady-state thermal analysis.",
        &[
            P::required("body_ids", K::Texts, "Body ids"),
            P::required("material_properties", K::Object, "Thermal material properties"),
            P::required("thermal_loads", K::Objects, "Heat loads"),
            P::required("thermal_constraints", K::Objects, "Thermal boundary conditions"),
        ],
    ),
    ToolSpec {
        name: "generate_analysis_report",
        description: "Summarise earlier analysis results into a report, computed locally.",
        route: Route::Local(LocalTool::AnalysisReport),
        params: &[
            P::required("analysis_results", K::Objects, "Results of earlier analysis tools"),
            P::optional("report_format", K::Text, "summary, detailed or presentation")
                .or(D::Text("detailed"))
                .one_of(&["summary", "detailed", "presentation"]),
            P::optional("include_images", K::Boolean, "Include rendered images")
                .or(D::Bool(true)),
        ],
    },
    // General
    host(
        "create_parameter",
        "Create a user parameter.",
        &[
            P::required("name", K::Text, "Parameter name"),
            P::required("value", K::Number, "Value"),
            P::optional("units", K::Text, "Units").or(D::Text("mm")),
            P::optional("comment", K::Text, "Comment"),
        ],
    ),
    host("get_design_info", "Describe the open design.", &[]),
    ToolSpec {
        name: "get_features_info",
        description: "List the features of the open design.",
        route: Route::Host("get_features"),
        params: &[],
    },
];

/// Looks up a tool by name.
#[must_use]
pub fn find(name: &str) -> Option<&'static ToolSpec> {
    CATALOG.iter().find(|tool| tool.name == name)
}
