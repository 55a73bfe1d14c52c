use crate::{
    domain::{FECAL_SAMPLE, NOTE, PARTICIPANT, SEMESTER, SUPPLEMENT, WEEK, parse_sample_id},
    error::LoadError,
    reconcile::RowContext,
    value::{FieldValue, Fields},
};

pub fn process_semester(ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
    if let Some(value) = ctx.value("semester").map(str::to_string) {
        ctx.get_or_create_natural(SEMESTER, &value)?;
    }
    Ok(())
}

/// Needs all three supplement columns; an `NA` in any of them skips the step.
pub fn process_supplement(ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
    let fields = ctx.from_row(&["frequency", "dose", "composition"]);
    if fields.len() < 3 || fields.values().any(|v| v.as_text() == Some("NA")) {
        return Ok(());
    }
    ctx.get_or_create(SUPPLEMENT, fields, Fields::new())?;
    Ok(())
}

pub fn process_participant(ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
    let Some(name) = ctx.value("participant").map(str::to_string) else {
        return Ok(());
    };
    let mut proposed = ctx.from_row(&["quantity_compliant"]);
    for kind in [SUPPLEMENT, SEMESTER] {
        if let Some(entity) = ctx.resolved(kind) {
            proposed.insert(kind.to_string(), FieldValue::Ref(entity.id));
        }
    }
    let identifiers = Fields::from([("name".to_string(), FieldValue::text(name))]);
    ctx.get_or_create(PARTICIPANT, identifiers, proposed)?;
    Ok(())
}

pub fn process_week(ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
    if let Some(value) = ctx.value("week").map(str::to_string) {
        ctx.get_or_create_natural(WEEK, &value)?;
    }
    Ok(())
}

/// Resolves the fecal sample named by the sample id, with `extra` as
/// proposed values.
///
/// An id that does not parse skips the step unless the run is strict about
/// sample ids.
pub fn process_sample_id(ctx: &mut RowContext<'_>, extra: Fields) -> Result<(), LoadError> {
    let Some(sample_id) = ctx.value("sample_id").map(str::to_string) else {
        return Ok(());
    };
    let identifiers = match parse_sample_id(&sample_id) {
        Ok(fields) => fields,
        Err(msg) if ctx.policy().strict_sample_id => return Err(LoadError::UserData(msg)),
        Err(_) => return Ok(()),
    };
    if let Some(participant) = ctx.resolved(PARTICIPANT) {
        if participant.get("name") != identifiers.get("participant") {
            return Err(LoadError::UserData(
                "Participant and Sample IDs inconsistent".into(),
            ));
        }
    }
    let mut proposed = extra;
    if ctx.has("week") {
        if let Some(week) = ctx.resolved(WEEK) {
            proposed.insert("week".into(), FieldValue::Ref(week.id));
        }
    }
    ctx.get_or_create(FECAL_SAMPLE, identifiers, proposed)?;
    Ok(())
}

pub fn process_note(ctx: &mut RowContext<'_>) -> Result<(), LoadError> {
    if let Some(name) = ctx.value("note").map(str::to_string) {
        let identifiers = Fields::from([("name".to_string(), FieldValue::text(name))]);
        ctx.get_or_create(NOTE, identifiers, Fields::new())?;
    }
    Ok(())
}

/// Attaches the row's note, if one was resolved, to `kind`'s entity.
pub fn link_note(ctx: &mut RowContext<'_>, kind: &str) -> Result<(), LoadError> {
    if let (Some(owner), Some(note)) = (ctx.resolved(kind).cloned(), ctx.resolved(NOTE).cloned()) {
        ctx.add_link(&owner, "note", &note)?;
    }
    Ok(())
}
