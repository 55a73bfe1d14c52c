use std::collections::BTreeMap;

use crate::{
    error::{FieldErrors, LoadError},
    store::{Entity, Store},
    value::{EntityId, FieldValue, Fields, is_unset},
};

/// Parses a natural-key string into identifying fields.
pub type NaturalParser = fn(&str) -> Result<Fields, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Text { max_len: Option<usize> },
    Integer { min: Option<i64>, max: Option<i64> },
    Float,
    Boolean,
    Choice(Vec<String>),
    /// Single reference to an entity of the named type.
    Ref(String),
    /// Additive many-to-many association with the named type.
    Many(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub unique: bool,
}

impl FieldDef {
    fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            unique: false,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, FieldKind::Text { max_len: None })
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, FieldKind::Integer { min: None, max: None })
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, FieldKind::Float)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn choice(name: &str, choices: &[&str]) -> Self {
        Self::new(
            name,
            FieldKind::Choice(choices.iter().map(|c| c.to_string()).collect()),
        )
    }

    pub fn reference(name: &str, target: &str) -> Self {
        Self::new(name, FieldKind::Ref(target.to_string()))
    }

    pub fn many(name: &str, target: &str) -> Self {
        Self::new(name, FieldKind::Many(target.to_string()))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn max_len(mut self, limit: usize) -> Self {
        if let FieldKind::Text { max_len } = &mut self.kind {
            *max_len = Some(limit);
        }
        self
    }

    pub fn range(mut self, low: i64, high: i64) -> Self {
        if let FieldKind::Integer { min, max } = &mut self.kind {
            *min = Some(low);
            *max = Some(high);
        }
        self
    }

    pub fn is_many(&self) -> bool {
        matches!(self.kind, FieldKind::Many(_))
    }

    /// Target type of a reference or many-to-many field.
    pub fn target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Ref(target) | FieldKind::Many(target) => Some(target),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            FieldKind::Text { max_len: Some(n) } => format!("text({n})"),
            FieldKind::Text { max_len: None } => "text".into(),
            FieldKind::Integer { .. } => "integer".into(),
            FieldKind::Float => "float".into(),
            FieldKind::Boolean => "boolean".into(),
            FieldKind::Choice(choices) => format!("choice({})", choices.join("|")),
            FieldKind::Ref(target) => format!("-> {target}"),
            FieldKind::Many(target) => format!("->> {target}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EntityType {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub natural_key: Vec<String>,
    pub unique_together: Vec<Vec<String>>,
    pub natural: Option<NaturalParser>,
}

impl EntityType {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            natural_key: Vec::new(),
            unique_together: Vec::new(),
            natural: None,
        }
    }

    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    pub fn natural_key(mut self, fields: &[&str]) -> Self {
        self.natural_key = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn unique_together(mut self, fields: &[&str]) -> Self {
        self.unique_together
            .push(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn natural_parser(mut self, parser: NaturalParser) -> Self {
        self.natural = Some(parser);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_many(&self, name: &str) -> bool {
        self.get_field(name).is_some_and(FieldDef::is_many)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    types: BTreeMap<String, EntityType>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, ty: EntityType) -> Result<(), LoadError> {
        for key in ty.natural_key.iter().chain(ty.unique_together.iter().flatten()) {
            if ty.get_field(key).is_none() {
                return Err(LoadError::Configuration(format!(
                    "{}: key field '{key}' is not declared",
                    ty.name
                )));
            }
        }
        if self.types.contains_key(&ty.name) {
            return Err(LoadError::Configuration(format!(
                "entity type '{}' registered twice",
                ty.name
            )));
        }
        self.types.insert(ty.name.clone(), ty);
        Ok(())
    }

    /// Checks that every reference points at a registered type.
    pub fn check_references(&self) -> Result<(), LoadError> {
        for ty in self.types.values() {
            for field in &ty.fields {
                if let Some(target) = field.target() {
                    if !self.types.contains_key(target) {
                        return Err(LoadError::Configuration(format!(
                            "{}.{} refers to unknown type '{target}'",
                            ty.name, field.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Result<&EntityType, LoadError> {
        self.types
            .get(kind)
            .ok_or_else(|| LoadError::Configuration(format!("unknown entity type '{kind}'")))
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Parses `value` into the identifying fields of `kind`.
    pub fn natural_lookup(&self, kind: &str, value: &str) -> Result<Fields, LoadError> {
        let ty = self.get(kind)?;
        let raw = match (ty.natural, ty.natural_key.as_slice()) {
            (Some(parser), _) => parser(value).map_err(LoadError::UserData)?,
            (None, [single]) => Fields::from([(single.clone(), FieldValue::text(value))]),
            (None, _) => {
                return Err(LoadError::UserData(format!(
                    "{kind} has no natural key to look up '{value}'"
                )));
            }
        };
        self.coerce_fields(kind, raw)
    }

    /// Converts row text for `field` of `kind` into its typed value.
    pub fn coerce(&self, kind: &str, field: &str, value: FieldValue) -> Result<FieldValue, LoadError> {
        let ty = self.get(kind)?;
        let def = ty
            .get_field(field)
            .ok_or_else(|| LoadError::validation(kind, field, "unknown field"))?;
        coerce_value(def, value).map_err(|msg| LoadError::validation(kind, field, msg))
    }

    /// Coerces every field, collecting all failures into one error.
    pub fn coerce_fields(&self, kind: &str, fields: Fields) -> Result<Fields, LoadError> {
        let ty = self.get(kind)?;
        let mut errors = FieldErrors::new();
        let mut out = Fields::new();
        for (name, value) in fields {
            let result = match ty.get_field(&name) {
                Some(def) => coerce_value(def, value),
                None => Err("unknown field".to_string()),
            };
            match result {
                Ok(v) => {
                    out.insert(name, v);
                }
                Err(msg) => errors.entry(name).or_default().push(msg),
            }
        }
        if errors.is_empty() {
            Ok(out)
        } else {
            Err(LoadError::Validation {
                kind: kind.to_string(),
                errors,
            })
        }
    }

    /// Checks `fields` against the constraints of `kind`.
    ///
    /// `exclude` is the id of the entity being updated so it does not
    /// collide with itself in uniqueness checks.
    pub fn validate(
        &self,
        store: &dyn Store,
        kind: &str,
        exclude: Option<EntityId>,
        fields: &Fields,
    ) -> Result<(), LoadError> {
        let ty = self.get(kind)?;
        let mut errors = FieldErrors::new();

        for (name, value) in fields {
            match ty.get_field(name) {
                None => push(&mut errors, name, "unknown field".into()),
                Some(def) if def.is_many() => {
                    push(&mut errors, name, "many-to-many values are linked, not stored".into())
                }
                Some(def) => {
                    if let Err(msg) = check_value(def, value) {
                        push(&mut errors, name, msg);
                    } else if let (FieldKind::Ref(target), FieldValue::Ref(id)) = (&def.kind, value) {
                        match store.get(*id)? {
                            Some(found) if &found.kind == target => {}
                            _ => push(&mut errors, name, format!("{id} is not a {target}")),
                        }
                    }
                }
            }
        }

        for def in ty.fields.iter().filter(|f| f.required && !f.is_many()) {
            if is_unset(fields.get(&def.name)) {
                push(&mut errors, &def.name, "This field cannot be blank.".into());
            }
        }

        if errors.is_empty() {
            for def in ty.fields.iter().filter(|f| f.unique) {
                if let Some(value) = fields.get(&def.name).filter(|v| !v.is_empty()) {
                    let key = Fields::from([(def.name.clone(), value.clone())]);
                    if collides(store, kind, exclude, &key)? {
                        push(
                            &mut errors,
                            &def.name,
                            format!("{kind} with this {} already exists.", def.name),
                        );
                    }
                }
            }
            let sets = std::iter::once(&ty.natural_key)
                .filter(|k| k.len() > 1)
                .chain(ty.unique_together.iter());
            for set in sets {
                let key = set
                    .iter()
                    .filter_map(|f| fields.get(f).map(|v| (f.clone(), v.clone())))
                    .filter(|(_, v)| !v.is_empty())
                    .collect::<Fields>();
                if key.len() == set.len() && collides(store, kind, exclude, &key)? {
                    push(
                        &mut errors,
                        "__all__",
                        format!("{kind} with this {} already exists.", set.join(", ")),
                    );
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LoadError::Validation {
                kind: kind.to_string(),
                errors,
            })
        }
    }

    /// Human-readable natural key of an entity.
    pub fn label(&self, entity: &Entity) -> String {
        let Ok(ty) = self.get(&entity.kind) else {
            return entity.id.to_string();
        };
        let parts = ty
            .natural_key
            .iter()
            .filter_map(|f| entity.fields.get(f))
            .map(FieldValue::as_display)
            .collect::<Vec<_>>();
        if parts.is_empty() {
            entity.id.to_string()
        } else {
            parts.join("-")
        }
    }
}

fn push(errors: &mut FieldErrors, field: &str, message: String) {
    errors.entry(field.to_string()).or_default().push(message);
}

fn collides(
    store: &dyn Store,
    kind: &str,
    exclude: Option<EntityId>,
    key: &Fields,
) -> Result<bool, LoadError> {
    Ok(store
        .find(kind, key)?
        .iter()
        .any(|other| Some(other.id) != exclude))
}

fn coerce_value(def: &FieldDef, value: FieldValue) -> Result<FieldValue, String> {
    let text = match value {
        FieldValue::Text(text) => text,
        other => return check_value(def, &other).map(|_| other),
    };
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(FieldValue::Text(String::new()));
    }
    let coerced = match &def.kind {
        FieldKind::Text { .. } => FieldValue::Text(trimmed.to_string()),
        FieldKind::Integer { .. } => trimmed
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| format!("'{trimmed}' value must be an integer."))?,
        FieldKind::Float => trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(FieldValue::Float)
            .ok_or_else(|| format!("'{trimmed}' value must be a float."))?,
        FieldKind::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => FieldValue::Boolean(true),
            "false" | "f" | "no" | "n" | "0" => FieldValue::Boolean(false),
            _ => return Err(format!("'{trimmed}' value must be either True or False.")),
        },
        FieldKind::Choice(_) => FieldValue::Text(trimmed.to_lowercase()),
        FieldKind::Ref(target) | FieldKind::Many(target) => {
            return Err(format!("expected a {target} reference, got text '{trimmed}'"));
        }
    };
    check_value(def, &coerced)?;
    Ok(coerced)
}

fn check_value(def: &FieldDef, value: &FieldValue) -> Result<(), String> {
    if value.is_empty() {
        return Ok(());
    }
    match (&def.kind, value) {
        (FieldKind::Text { max_len }, FieldValue::Text(s)) => match max_len {
            Some(limit) if s.chars().count() > *limit => Err(format!(
                "Ensure this value has at most {limit} characters (it has {}).",
                s.chars().count()
            )),
            _ => Ok(()),
        },
        (FieldKind::Integer { min, max }, FieldValue::Integer(i)) => {
            if let Some(low) = min.filter(|low| i < low) {
                Err(format!("Ensure this value is greater than or equal to {low}."))
            } else if let Some(high) = max.filter(|high| i > high) {
                Err(format!("Ensure this value is less than or equal to {high}."))
            } else {
                Ok(())
            }
        }
        (FieldKind::Float, FieldValue::Float(f)) if !f.is_finite() => {
            Err(format!("'{f}' value must be a float."))
        }
        (FieldKind::Float, FieldValue::Float(_)) => Ok(()),
        (FieldKind::Boolean, FieldValue::Boolean(_)) => Ok(()),
        (FieldKind::Choice(choices), FieldValue::Text(s)) => {
            if choices.iter().any(|c| c == s) {
                Ok(())
            } else {
                Err(format!("Value '{s}' is not a valid choice."))
            }
        }
        (FieldKind::Ref(_), FieldValue::Ref(_)) => Ok(()),
        (_, other) => Err(format!("unexpected value {other} for {}", def.describe())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn parse_run(value: &str) -> Result<Fields, String> {
        let (serial, number) = value
            .split_once('-')
            .ok_or_else(|| format!("bad run '{value}'"))?;
        Ok(Fields::from([
            ("serial".into(), FieldValue::text(serial)),
            ("number".into(), FieldValue::text(number)),
        ]))
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register(
                EntityType::new("run")
                    .field(FieldDef::text("serial").required().max_len(5))
                    .field(FieldDef::integer("number").required().range(0, 99))
                    .natural_key(&["serial", "number"])
                    .natural_parser(parse_run),
            )
            .expect("run");
        registry
            .register(
                EntityType::new("tag")
                    .field(FieldDef::text("name").required().unique())
                    .field(FieldDef::choice("color", &["red", "blue"]))
                    .field(FieldDef::reference("run", "run"))
                    .field(FieldDef::float("weight"))
                    .natural_key(&["name"]),
            )
            .expect("tag");
        registry.check_references().expect("references");
        registry
    }

    #[test]
    fn natural_lookup_uses_parser_then_coerces() {
        let fields = registry().natural_lookup("run", "AB-7").expect("lookup");
        assert_eq!(fields["serial"], FieldValue::text("AB"));
        assert_eq!(fields["number"], FieldValue::Integer(7));
    }

    #[test]
    fn natural_lookup_failures_are_user_errors() {
        let err = registry().natural_lookup("run", "AB7").unwrap_err();
        assert!(matches!(err, LoadError::UserData(_)));
        let err = registry().natural_lookup("run", "AB-x").unwrap_err();
        assert!(matches!(err, LoadError::Validation { .. }));
    }

    #[test]
    fn single_field_natural_key_needs_no_parser() {
        let fields = registry().natural_lookup("tag", "gut").expect("lookup");
        assert_eq!(fields["name"], FieldValue::text("gut"));
    }

    #[test]
    fn choices_are_lowercased_and_checked() {
        let reg = registry();
        assert_eq!(
            reg.coerce("tag", "color", FieldValue::text("RED")).expect("red"),
            FieldValue::text("red")
        );
        assert!(reg.coerce("tag", "color", FieldValue::text("green")).is_err());
    }

    #[test]
    fn floats_must_be_finite() {
        let reg = registry();
        assert_eq!(
            reg.coerce("tag", "weight", FieldValue::text(" 6.5 ")).expect("weight"),
            FieldValue::Float(6.5)
        );
        for text in ["nan", "NaN", "inf", "-inf", "infinity"] {
            let err = reg.coerce("tag", "weight", FieldValue::text(text)).unwrap_err();
            assert!(matches!(err, LoadError::Validation { .. }), "{text}");
            assert!(err.to_string().contains("value must be a float."), "{err}");
            assert!(err.is_user_error());
        }
        let err = reg
            .coerce("tag", "weight", FieldValue::Float(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, LoadError::Validation { .. }));
    }

    #[test]
    fn validate_reports_required_bounds_and_unknown_fields() {
        let reg = registry();
        let store = MemoryStore::new();
        let fields = Fields::from([
            ("serial".into(), FieldValue::text("TOOLONG")),
            ("number".into(), FieldValue::Integer(100)),
            ("bogus".into(), FieldValue::text("x")),
        ]);
        let Err(LoadError::Validation { errors, .. }) = reg.validate(&store, "run", None, &fields)
        else {
            panic!("expected validation error");
        };
        assert!(errors.contains_key("serial"));
        assert!(errors.contains_key("number"));
        assert!(errors.contains_key("bogus"));

        let missing = Fields::from([("serial".into(), FieldValue::text("AB"))]);
        let err = reg.validate(&store, "run", None, &missing).unwrap_err();
        assert!(err.to_string().contains("number: This field cannot be blank."));
    }

    #[test]
    fn validate_checks_uniqueness_excluding_self() {
        let reg = registry();
        let mut store = MemoryStore::new();
        let fields = Fields::from([("name".into(), FieldValue::text("gut"))]);
        let existing = store.insert("tag", fields.clone()).expect("insert");

        let err = reg.validate(&store, "tag", None, &fields).unwrap_err();
        assert!(err.to_string().contains("already exists"));
        reg.validate(&store, "tag", Some(existing.id), &fields)
            .expect("self does not collide");
    }

    #[test]
    fn validate_checks_reference_targets() {
        let reg = registry();
        let mut store = MemoryStore::new();
        let tag = store
            .insert("tag", Fields::from([("name".into(), FieldValue::text("a"))]))
            .expect("tag");
        let fields = Fields::from([
            ("name".into(), FieldValue::text("b")),
            ("run".into(), FieldValue::Ref(tag.id)),
        ]);
        let err = reg.validate(&store, "tag", None, &fields).unwrap_err();
        assert!(err.to_string().contains("is not a run"));
    }

    #[test]
    fn register_rejects_undeclared_key_fields() {
        let mut reg = Registry::new();
        let err = reg
            .register(EntityType::new("x").natural_key(&["missing"]))
            .unwrap_err();
        assert!(matches!(err, LoadError::Configuration(_)));
    }

    #[test]
    fn label_joins_natural_key_values() {
        let reg = registry();
        let entity = Entity {
            id: EntityId(3),
            kind: "run".into(),
            fields: Fields::from([
                ("serial".into(), FieldValue::text("AB")),
                ("number".into(), FieldValue::Integer(2)),
            ]),
        };
        assert_eq!(reg.label(&entity), "AB-2");
    }
}
