//! Per-command entity declarations.
//!
//! Each host command declares which parameters name existing entities and
//! what it does to the design intent store when it succeeds. The dispatcher
//! checks references before sending and applies the effect after a
//! successful result; commands without a declaration pass straight through.

use serde_json::{Map, Value};

use super::error::{BridgeError, BridgeResult};
use crate::intent::{Category, DesignIntentStore, EntityRecord};

/// Where a reference finds its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorySource {
    /// Always this category.
    Fixed(Category),
    /// Read from the named string parameter.
    Param(&'static str),
}

/// A parameter that names an existing entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    /// Parameter name.
    pub param: &'static str,
    /// Category of the referenced entity.
    pub category: CategorySource,
    /// The parameter holds a list of names.
    pub many: bool,
}

impl Reference {
    const fn sketch(param: &'static str) -> Self {
        Self {
            param,
            category: CategorySource::Fixed(Category::Sketch),
            many: false,
        }
    }

    const fn sketches(param: &'static str) -> Self {
        Self {
            param,
            category: CategorySource::Fixed(Category::Sketch),
            many: true,
        }
    }
}

/// What a successful command does to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Nothing.
    None,
    /// Records a new entity.
    ///
    /// The name is taken from the first present `result_keys` entry, falling
    /// back to the `name_param` parameter. A name the caller asked for must be
    /// free before the command is sent; a name the host chose overwrites.
    Create {
        /// Category of the new entity.
        category: Category,
        /// Parameter carrying a caller-chosen name.
        name_param: Option<&'static str>,
        /// Result fields carrying the host-assigned name.
        result_keys: &'static [&'static str],
    },
    /// Appends a value to an existing parameter's history.
    UpdateParameter,
    /// Renames the entity named by `category` + `name` to `new_name`.
    Rename,
    /// Removes the entity named by `category` + `name`.
    Delete,
}

/// Declaration for one host command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    /// Command name.
    pub name: &'static str,
    /// Entity references checked before sending.
    pub references: &'static [Reference],
    /// Store effect applied on success.
    pub effect: Effect,
}

const SKETCH_REF: &[Reference] = &[Reference::sketch("sketch_name")];
const SWEEP_REFS: &[Reference] = &[
    Reference::sketch("profile_sketch_name"),
    Reference::sketch("path_sketch_name"),
];
const LOFT_REFS: &[Reference] = &[
    Reference::sketches("profile_sketch_names"),
    Reference::sketches("guide_rails"),
];
const NAMED_ENTITY_REF: &[Reference] = &[Reference {
    param: "name",
    category: CategorySource::Param("category"),
    many: false,
}];
const PARAMETER_REF: &[Reference] = &[Reference {
    param: "name",
    category: CategorySource::Fixed(Category::Parameter),
    many: false,
}];

const fn uses_sketch(name: &'static str) -> CommandSpec {
    CommandSpec {
        name,
        references: SKETCH_REF,
        effect: Effect::None,
    }
}

const fn makes_body(name: &'static str, references: &'static [Reference]) -> CommandSpec {
    CommandSpec {
        name,
        references,
        effect: Effect::Create {
            category: Category::Body,
            name_param: None,
            result_keys: &["body_name", "feature_name"],
        },
    }
}

const SPECS: &[CommandSpec] = &[
    CommandSpec {
        name: "create_sketch",
        references: &[],
        effect: Effect::Create {
            category: Category::Sketch,
            name_param: Some("name"),
            result_keys: &["sketch_name"],
        },
    },
    uses_sketch("draw_line"),
    uses_sketch("draw_rectangle"),
    uses_sketch("draw_circle"),
    uses_sketch("draw_arc"),
    uses_sketch("draw_polygon"),
    uses_sketch("get_sketch_info"),
    uses_sketch("add_geometric_constraint"),
    uses_sketch("add_dimensional_constraint"),
    makes_body("create_extrude", SKETCH_REF),
    makes_body("create_revolve", SKETCH_REF),
    makes_body("create_sweep", SWEEP_REFS),
    makes_body("create_loft", LOFT_REFS),
    CommandSpec {
        name: "create_component",
        references: &[],
        effect: Effect::Create {
            category: Category::Component,
            name_param: Some("name"),
            result_keys: &["component_name"],
        },
    },
    CommandSpec {
        name: "insert_component_from_file",
        references: &[],
        effect: Effect::Create {
            category: Category::Component,
            name_param: Some("name"),
            result_keys: &["component_name"],
        },
    },
    CommandSpec {
        name: "create_parameter",
        references: &[],
        effect: Effect::Create {
            category: Category::Parameter,
            name_param: Some("name"),
            result_keys: &["parameter_name"],
        },
    },
    CommandSpec {
        name: "update_parameter",
        references: PARAMETER_REF,
        effect: Effect::UpdateParameter,
    },
    CommandSpec {
        name: "rename_entity",
        references: NAMED_ENTITY_REF,
        effect: Effect::Rename,
    },
    CommandSpec {
        name: "delete_entity",
        references: NAMED_ENTITY_REF,
        effect: Effect::Delete,
    },
];

const PASS_THROUGH: &[Reference] = &[];

impl CommandSpec {
    /// Looks up the declaration for `command`. Undeclared commands have no
    /// references and no effect.
    #[must_use]
    pub fn lookup(command: &str) -> Self {
        SPECS
            .iter()
            .find(|spec| spec.name == command)
            .copied()
            .unwrap_or(Self {
                name: "",
                references: PASS_THROUGH,
                effect: Effect::None,
            })
    }

    /// Returns `true` if a successful run changes the store.
    #[must_use]
    pub const fn mutates(&self) -> bool {
        !matches!(self.effect, Effect::None)
    }

    /// Checks every declared reference against the store, and that a
    /// caller-chosen name for a new entity is still free.
    ///
    /// # Errors
    ///
    /// Returns `UnknownEntity`, `DuplicateEntity` or `InvalidParams`.
    pub fn check(
        &self,
        parameters: &Map<String, Value>,
        store: &DesignIntentStore,
    ) -> BridgeResult<()> {
        for reference in self.references {
            let category = match reference.category {
                CategorySource::Fixed(category) => category,
                CategorySource::Param(param) => category_param(parameters, param)?,
            };
            for name in reference_names(parameters, reference)? {
                store.get(name, category)?;
            }
        }

        match self.effect {
            Effect::Create {
                category,
                name_param: Some(param),
                ..
            } => {
                if let Some(name) = optional_str(parameters, param)? {
                    DesignIntentStore::validate_name(name)?;
                    if store.contains(name, category) {
                        return Err(BridgeError::DuplicateEntity {
                            category,
                            name: name.to_string(),
                        });
                    }
                }
            }
            Effect::Rename => {
                let category = category_param(parameters, "category")?;
                let new_name = required_str(parameters, "new_name")?;
                DesignIntentStore::validate_name(new_name)?;
                let old_name = required_str(parameters, "name")?;
                if new_name != old_name && store.contains(new_name, category) {
                    return Err(BridgeError::DuplicateEntity {
                        category,
                        name: new_name.to_string(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Applies the effect of a successful command.
    ///
    /// Everything that can fail is checked before the store is touched, so
    /// an error leaves the store as it was.
    ///
    /// # Errors
    ///
    /// Returns a store contract error if the effect cannot be applied.
    pub fn apply(
        &self,
        command_id: &str,
        parameters: &Map<String, Value>,
        payload: &Map<String, Value>,
        store: &mut DesignIntentStore,
    ) -> BridgeResult<()> {
        match self.effect {
            Effect::None => Ok(()),
            Effect::Create {
                category,
                name_param,
                result_keys,
            } => {
                let from_result = result_keys
                    .iter()
                    .find_map(|key| payload.get(*key).and_then(Value::as_str));
                let from_param = name_param.and_then(|p| parameters.get(p).and_then(Value::as_str));
                let Some(name) = from_result.or(from_param) else {
                    tracing::debug!(command = self.name, "Result carries no entity name, nothing recorded");
                    return Ok(());
                };

                let mut attributes = parameters.clone();
                for (key, value) in payload {
                    attributes.insert(key.clone(), value.clone());
                }
                let record = EntityRecord::new(name, category, command_id).with_attributes(attributes);

                let caller_named = from_param.is_some_and(|requested| requested == name);
                if caller_named {
                    store.put(record)?;
                } else if store.replace(record)?.is_some() {
                    tracing::warn!(%category, name, "Host reused an entity name, record replaced");
                }

                if category == Category::Parameter {
                    if let Some(value) = payload.get("value").or_else(|| parameters.get("value")) {
                        store.record_parameter_value(name, command_id, value.clone());
                    }
                }
                tracing::debug!(%category, name, "Entity recorded");
                Ok(())
            }
            Effect::UpdateParameter => {
                let name = required_str(parameters, "name")?;
                store.get(name, Category::Parameter)?;
                let value = payload
                    .get("value")
                    .or_else(|| parameters.get("value"))
                    .cloned()
                    .unwrap_or(Value::Null);
                store.record_parameter_value(name, command_id, value);
                Ok(())
            }
            Effect::Rename => {
                let category = category_param(parameters, "category")?;
                let from = required_str(parameters, "name")?;
                let to = required_str(parameters, "new_name")?;
                store.rename(category, from, to)?;
                tracing::debug!(%category, from, to, "Entity renamed");
                Ok(())
            }
            Effect::Delete => {
                let category = category_param(parameters, "category")?;
                let name = required_str(parameters, "name")?;
                store.remove(category, name)?;
                tracing::debug!(%category, name, "Entity removed");
                Ok(())
            }
        }
    }
}

fn optional_str<'a>(parameters: &'a Map<String, Value>, key: &str) -> BridgeResult<Option<&'a str>> {
    match parameters.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text)),
        Some(_) => Err(BridgeError::invalid_params(format!("'{key}' must be a string"))),
    }
}

fn required_str<'a>(parameters: &'a Map<String, Value>, key: &str) -> BridgeResult<&'a str> {
    optional_str(parameters, key)?
        .ok_or_else(|| BridgeError::invalid_params(format!("missing required parameter '{key}'")))
}

fn category_param(parameters: &Map<String, Value>, key: &str) -> BridgeResult<Category> {
    required_str(parameters, key)?
        .parse()
        .map_err(BridgeError::invalid_params)
}

fn reference_names<'a>(
    parameters: &'a Map<String, Value>,
    reference: &Reference,
) -> BridgeResult<Vec<&'a str>> {
    if !reference.many {
        return Ok(optional_str(parameters, reference.param)?.into_iter().collect());
    }
    match parameters.get(reference.param) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().ok_or_else(|| {
                    BridgeError::invalid_params(format!(
                        "'{}' must be a list of names",
                        reference.param
                    ))
                })
            })
            .collect(),
        Some(_) => Err(BridgeError::invalid_params(format!(
            "'{}' must be a list of names",
            reference.param
        ))),
    }
}
