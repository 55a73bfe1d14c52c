use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::Path,
};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    column_spec::{ColumnDescriptor, ColumnSpec},
    error::LoadError,
    formats::RowFormat,
    missing::MissingValues,
    reconcile::RowContext,
    registry::{EntityType, FieldKind, Registry},
    store::Entity,
    value::{FieldValue, Fields},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetColumn {
    pub header: String,
    pub accessor: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDefinition {
    pub name: String,
    /// Root entity type of each row.
    pub model: String,
    #[serde(default)]
    pub missing_data: Vec<String>,
    pub columns: Vec<DatasetColumn>,
}

impl DatasetDefinition {
    pub fn from_yaml_str(text: &str) -> Result<Self, LoadError> {
        serde_yaml::from_str(text)
            .map_err(|e| LoadError::Configuration(format!("invalid dataset definition: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text).map_err(|err| match err {
            LoadError::Configuration(msg) => LoadError::Configuration(format!("{path:?}: {msg}")),
            other => other,
        })
    }

    /// One column per field of `kind`, headed by the field name; references
    /// are given as the natural key of their target.
    pub fn for_model(registry: &Registry, kind: &str) -> Result<Self, LoadError> {
        let ty = registry.get(kind)?;
        let mut columns = Vec::new();
        for field in &ty.fields {
            let include = match &field.kind {
                FieldKind::Many(_) => false,
                FieldKind::Ref(target) => has_natural(registry.get(target)?),
                _ => true,
            };
            if include {
                columns.push(DatasetColumn {
                    header: field.name.clone(),
                    accessor: field.name.clone(),
                });
            }
        }
        Ok(Self {
            name: kind.to_string(),
            model: kind.to_string(),
            missing_data: Vec::new(),
            columns,
        })
    }
}

fn has_natural(ty: &EntityType) -> bool {
    ty.natural.is_some() || ty.natural_key.len() == 1
}

type NodePath = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Field(String),
    Natural,
}

#[derive(Debug, Clone)]
struct Accessor {
    node: NodePath,
    target: Target,
}

#[derive(Debug, Clone)]
struct NodeInfo {
    kind: String,
    /// Reached through a many-to-many field, so it is linked, not referenced.
    many: bool,
}

#[derive(Debug, Default)]
struct NodeValues {
    natural: Option<String>,
    fields: Fields,
}

pub struct DatasetFormat {
    name: String,
    columns: ColumnSpec,
    missing_data: Vec<String>,
    accessors: BTreeMap<String, Accessor>,
    nodes: BTreeMap<NodePath, NodeInfo>,
}

impl DatasetFormat {
    /// Checks every accessor against `registry` up front.
    pub fn new(definition: DatasetDefinition, registry: &Registry) -> Result<Self, LoadError> {
        let root = registry.get(&definition.model)?;
        let mut nodes = BTreeMap::new();
        nodes.insert(
            Vec::new(),
            NodeInfo {
                kind: root.name.clone(),
                many: false,
            },
        );
        let mut accessors = BTreeMap::new();
        let mut descriptors = Vec::with_capacity(definition.columns.len());

        for column in &definition.columns {
            let accessor = resolve_accessor(registry, root, &column.accessor, &mut nodes)?;
            accessors.insert(column.accessor.clone(), accessor);
            descriptors.push(ColumnDescriptor::header(&column.header, &column.accessor));
        }

        Ok(Self {
            name: definition.name,
            columns: ColumnSpec::new(descriptors)?,
            missing_data: definition.missing_data,
            accessors,
            nodes,
        })
    }

    fn build_tree(&self, ctx: &RowContext<'_>) -> BTreeMap<NodePath, NodeValues> {
        let mut tree = BTreeMap::<NodePath, NodeValues>::new();
        for (key, value) in ctx.row().iter() {
            let Some(accessor) = self.accessors.get(key) else {
                continue;
            };
            for depth in 0..accessor.node.len() {
                tree.entry(accessor.node[..depth].to_vec()).or_default();
            }
            let node = tree.entry(accessor.node.clone()).or_default();
            match &accessor.target {
                Target::Natural => node.natural = Some(value.to_string()),
                Target::Field(field) => {
                    node.fields.insert(field.clone(), FieldValue::text(value));
                }
            }
        }
        tree
    }
}

fn resolve_accessor(
    registry: &Registry,
    root: &EntityType,
    accessor: &str,
    nodes: &mut BTreeMap<NodePath, NodeInfo>,
) -> Result<Accessor, LoadError> {
    let bad = |msg: String| LoadError::Configuration(format!("accessor '{accessor}': {msg}"));
    let segments = accessor.split('.').collect::<Vec<_>>();
    let mut ty = root;
    let mut path = NodePath::new();

    for (idx, segment) in segments.iter().enumerate() {
        let last = idx + 1 == segments.len();
        if last && (*segment == "natural" || *segment == "id") {
            if !has_natural(ty) {
                return Err(bad(format!("{} has no natural key", ty.name)));
            }
            return Ok(Accessor {
                node: path,
                target: Target::Natural,
            });
        }
        let field = ty
            .get_field(segment)
            .ok_or_else(|| bad(format!("{} has no field '{segment}'", ty.name)))?;
        match field.target() {
            Some(target) => {
                ty = registry.get(target)?;
                path.push(segment.to_string());
                nodes.insert(
                    path.clone(),
                    NodeInfo {
                        kind: ty.name.clone(),
                        many: field.is_many(),
                    },
                );
                if last {
                    if !has_natural(ty) {
                        return Err(bad(format!("{} has no natural key", ty.name)));
                    }
                    return Ok(Accessor {
                        node: path,
                        target: Target::Natural,
                    });
                }
            }
            None if last => {
                return Ok(Accessor {
                    node: path,
                    target: Target::Field(segment.to_string()),
                });
            }
            None => {
                return Err(bad(format!("{}.{segment} is not a reference", ty.name)));
            }
        }
    }
    Err(bad("empty accessor".into()))
}

impl RowFormat for DatasetFormat {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> &ColumnSpec {
        &self.columns
    }

    fn missing_values(&self) -> MissingValues {
        MissingValues::default().with_literals(self.missing_data.iter().cloned())
    }

    fn process_row(&self, ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
        let mut tree = self.build_tree(ctx);
        let mut order = tree.keys().cloned().collect::<Vec<_>>();
        // deepest paths first, the root last
        order.sort_by_key(|path| std::cmp::Reverse(path.len()));
        debug!("line {}: resolving {} node(s)", ctx.line(), order.len());

        let mut resolved = BTreeMap::<NodePath, Entity>::new();
        for path in order {
            let values = tree.remove(&path).unwrap_or_default();
            let Some(info) = self.nodes.get(&path) else {
                continue;
            };
            let kind = info.kind.as_str();
            let ty = ctx.registry().get(kind)?;

            let mut data = values.fields;
            let mut identifiers = match &values.natural {
                Some(natural) => ctx.registry().natural_lookup(kind, natural)?,
                None => Fields::new(),
            };
            if let Some(name) = data.remove("name") {
                identifiers.insert("name".into(), name);
            }

            let mut links = Vec::new();
            for (child_path, child) in &resolved {
                if child_path.len() != path.len() + 1 || !child_path.starts_with(&path) {
                    continue;
                }
                let relation = child_path[path.len()].clone();
                let many = self.nodes.get(child_path).is_some_and(|n| n.many);
                if many {
                    links.push((relation, child.clone()));
                } else {
                    data.insert(relation, FieldValue::Ref(child.id));
                }
            }

            if identifiers.is_empty() {
                let key = ty.natural_key.iter().cloned().collect::<BTreeSet<_>>();
                if !key.is_empty() && key.iter().all(|k| data.contains_key(k)) {
                    let (ids, rest): (Fields, Fields) =
                        data.into_iter().partition(|(k, _)| key.contains(k));
                    identifiers = ids;
                    data = rest;
                } else {
                    identifiers = std::mem::take(&mut data);
                }
            }
            if identifiers.is_empty() {
                return Err(LoadError::UserData(format!(
                    "no identifying values for {kind}"
                )));
            }

            let entity = ctx.get_or_create(kind, identifiers, data)?;
            for (relation, child) in links {
                ctx.add_link(&entity, &relation, &child)?;
            }
            resolved.insert(path, entity);
        }
        Ok(())
    }
}
