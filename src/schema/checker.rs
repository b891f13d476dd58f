//! The central checker that runs every schema rule in order.
use super::binder::Binder;
use super::error::SchemaError;
use super::{BoundRelationship, CompiledSchema, EntityDef};
use crate::formula::{self, BoundExpr};
use crate::store::{DepList, EntityId, EntityType, FieldKind, FieldRegistry, Schema, SlotId, SlotMeta};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Compiles a schema document, collecting every error found.
///
/// Structural errors (names, keys, relationships) are reported first; formulas
/// are only bound once the structure is sound.
pub fn compile(schema: &Schema) -> Result<CompiledSchema, Vec<SchemaError>> {
    let mut errors = Vec::new();

    // --- PHASE 1: STRUCTURE ---
    let mut sorted: Vec<&EntityType> = schema.entities.iter().collect();
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    let mut seen = HashSet::new();
    for e in &sorted {
        if !seen.insert(e.name.as_str()) {
            errors.push(SchemaError::DuplicateEntity(e.name.clone()));
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    let by_name: HashMap<String, EntityId> =
        sorted.iter().enumerate().map(|(i, e)| (e.name.clone(), EntityId::new(i))).collect();

    let mut entities: Vec<EntityDef> = sorted
        .iter()
        .enumerate()
        .map(|(i, e)| check_fields(EntityId::new(i), e, &mut errors))
        .collect();
    if !errors.is_empty() {
        return Err(errors);
    }

    let relationships: Vec<Vec<BoundRelationship>> = sorted
        .iter()
        .enumerate()
        .map(|(i, e)| check_relationships(e, &entities[i], &entities, &by_name, &mut errors))
        .collect();
    if !errors.is_empty() {
        return Err(errors);
    }
    for (def, rels) in entities.iter_mut().zip(relationships) {
        def.relationships = rels;
    }

    // --- PHASE 2: FORMULAS ---
    let mut bound: Vec<Vec<Option<BoundExpr>>> = Vec::with_capacity(entities.len());
    let mut explicit: Vec<Vec<Vec<(usize, usize)>>> = Vec::with_capacity(entities.len());
    for (def, doc) in entities.iter().zip(&sorted) {
        let mut formulas = Vec::with_capacity(def.fields.len());
        let mut deps = Vec::with_capacity(def.fields.len());
        for spec in &doc.fields {
            let binder = Binder::new(&entities, def, &spec.name);
            formulas.push(bind_formula(&binder, def, spec.kind, spec.formula.as_deref(), &spec.name, &mut errors));

            let mut explicit_deps = Vec::new();
            for dep in spec.depends_on.iter().flatten() {
                match binder.bind_dependency(dep) {
                    Ok(d) => explicit_deps.push(d),
                    Err(e) => errors.push(e),
                }
            }
            deps.push(explicit_deps);
        }
        bound.push(formulas);
        explicit.push(deps);
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    for (def, formulas) in entities.iter_mut().zip(bound) {
        def.formulas = formulas;
    }

    // --- PHASE 3: TOPOLOGY ---
    let mut offsets = Vec::with_capacity(entities.len());
    let mut total = 0usize;
    for def in &entities {
        offsets.push(total);
        total += def.field_count();
    }
    let slot_of = |entity: usize, field: usize| SlotId::new(offsets[entity] + field);

    let mut meta = Vec::with_capacity(total);
    let mut deps = Vec::with_capacity(total);
    for (e_idx, def) in entities.iter().enumerate() {
        for (f_idx, spec) in def.fields.iter().enumerate() {
            meta.push(SlotMeta {
                entity: def.id,
                field: f_idx,
                kind: spec.kind,
                name: format!("{}.{}", def.name, spec.name),
            });
            let mut list = DepList::new();
            if let Some(expr) = &def.formulas[f_idx] {
                let mut pairs = BTreeSet::new();
                collect_dependencies(expr, def, &entities, &mut pairs);
                list.extend(pairs.into_iter().map(|(e, f)| slot_of(e, f)));
            }
            list.extend(explicit[e_idx][f_idx].iter().map(|&(e, f)| slot_of(e, f)));
            deps.push(list);
        }
    }

    let registry = FieldRegistry::build(meta, deps);
    debug!(
        event = "schema_compiled",
        entities = entities.len(),
        fields = registry.count(),
        edges = registry.parents_flat.len(),
    );

    Ok(CompiledSchema { model_name: schema.model_name.clone(), entities, registry, by_name })
}

fn check_fields(id: EntityId, e: &EntityType, errors: &mut Vec<SchemaError>) -> EntityDef {
    if e.fields.is_empty() {
        errors.push(SchemaError::EmptyEntity(e.name.clone()));
    }

    let mut field_index = HashMap::with_capacity(e.fields.len());
    for (i, f) in e.fields.iter().enumerate() {
        if field_index.insert(f.name.clone(), i).is_some() {
            errors.push(SchemaError::DuplicateField { entity: e.name.clone(), field: f.name.clone() });
        }
        let has_formula = f.formula.as_deref().is_some_and(|s| !s.trim().is_empty());
        if f.kind == FieldKind::Raw && f.depends_on.as_ref().is_some_and(|d| !d.is_empty()) {
            errors.push(SchemaError::RawWithDependencies { entity: e.name.clone(), field: f.name.clone() });
        }
        match (f.kind, has_formula) {
            (FieldKind::Raw, true) => {
                errors.push(SchemaError::RawWithFormula { entity: e.name.clone(), field: f.name.clone() })
            }
            (FieldKind::Raw, false) | (_, true) => {}
            (kind, false) => errors.push(SchemaError::MissingFormula {
                entity: e.name.clone(),
                field: f.name.clone(),
                kind: kind.as_str(),
            }),
        }
    }

    if e.primary_key.is_empty() {
        errors.push(SchemaError::MissingPrimaryKey(e.name.clone()));
    }
    let mut primary_key = Vec::with_capacity(e.primary_key.len());
    for key in &e.primary_key {
        match field_index.get(key) {
            None => errors.push(SchemaError::UnknownKeyField { entity: e.name.clone(), field: key.clone() }),
            Some(&i) if e.fields[i].kind != FieldKind::Raw => {
                errors.push(SchemaError::PrimaryKeyNotRaw { entity: e.name.clone(), field: key.clone() })
            }
            Some(&i) => primary_key.push(i),
        }
    }

    EntityDef {
        id,
        name: e.name.clone(),
        fields: e.fields.clone(),
        primary_key,
        relationships: Vec::new(),
        formulas: vec![None; e.fields.len()],
        field_index,
    }
}

fn check_relationships(
    e: &EntityType,
    def: &EntityDef,
    entities: &[EntityDef],
    by_name: &HashMap<String, EntityId>,
    errors: &mut Vec<SchemaError>,
) -> Vec<BoundRelationship> {
    let mut out = Vec::with_capacity(e.relationships.len());
    let mut names = HashSet::new();

    for rel in &e.relationships {
        if !names.insert(rel.name.as_str()) {
            errors.push(SchemaError::DuplicateRelationship { entity: e.name.clone(), relationship: rel.name.clone() });
            continue;
        }
        let Some(&target) = by_name.get(&rel.target) else {
            errors.push(SchemaError::UnknownTarget {
                entity: e.name.clone(),
                relationship: rel.name.clone(),
                target: rel.target.clone(),
            });
            continue;
        };
        if rel.keys.is_empty() {
            errors.push(SchemaError::EmptyJoin { entity: e.name.clone(), relationship: rel.name.clone() });
            continue;
        }

        let target_def = &entities[target.index()];
        let mut local_keys = Vec::with_capacity(rel.keys.len());
        let mut remote_keys = Vec::with_capacity(rel.keys.len());
        for key in &rel.keys {
            for (owner, name, out_keys) in
                [(def, &key.local, &mut local_keys), (target_def, &key.remote, &mut remote_keys)]
            {
                match owner.field_index(name) {
                    None => errors.push(SchemaError::UnknownJoinField {
                        entity: e.name.clone(),
                        relationship: rel.name.clone(),
                        on: owner.name.clone(),
                        field: name.clone(),
                    }),
                    Some(i) if owner.kind(i) != FieldKind::Raw => errors.push(SchemaError::JoinFieldNotRaw {
                        entity: e.name.clone(),
                        relationship: rel.name.clone(),
                        on: owner.name.clone(),
                        field: name.clone(),
                    }),
                    Some(i) => out_keys.push(i),
                }
            }
        }

        out.push(BoundRelationship {
            name: rel.name.clone(),
            kind: rel.kind,
            target,
            local_keys,
            remote_keys,
            on_ambiguous: rel.on_ambiguous,
        });
    }
    out
}

fn bind_formula(
    binder: &Binder<'_>,
    def: &EntityDef,
    kind: FieldKind,
    source: Option<&str>,
    field: &str,
    errors: &mut Vec<SchemaError>,
) -> Option<BoundExpr> {
    let source = source.filter(|_| kind.is_computed())?;
    let expr = match formula::parse(source) {
        Ok(expr) => expr,
        Err(e) => {
            errors.push(SchemaError::Syntax { entity: def.name.clone(), field: field.into(), source: e });
            return None;
        }
    };
    let bound = match binder.bind(&expr) {
        Ok(bound) => bound,
        Err(e) => {
            errors.push(e);
            return None;
        }
    };

    let shape_error = match kind {
        FieldKind::Lookup if !matches!(bound, BoundExpr::Parent { .. }) => {
            Some("a lookup must be a single reference through a parent relationship".to_string())
        }
        FieldKind::Calculated if bound.contains_aggregate() => {
            Some("calculated fields cannot aggregate; declare the field as an aggregation".to_string())
        }
        FieldKind::Aggregation => {
            let mut rels = BTreeSet::new();
            aggregate_relationships(&bound, &mut rels);
            match rels.len() {
                0 => Some("an aggregation must aggregate over a child relationship".to_string()),
                1 => None,
                _ => Some("an aggregation must use exactly one child relationship".to_string()),
            }
        }
        _ => None,
    };
    if let Some(message) = shape_error {
        errors.push(SchemaError::formula(&def.name, field, message));
        return None;
    }
    Some(bound)
}

fn aggregate_relationships(expr: &BoundExpr, out: &mut BTreeSet<usize>) {
    match expr {
        BoundExpr::Aggregate(agg) => {
            out.insert(agg.rel);
        }
        BoundExpr::Unary(_, e) => aggregate_relationships(e, out),
        BoundExpr::Binary(_, l, r) => {
            aggregate_relationships(l, out);
            aggregate_relationships(r, out);
        }
        BoundExpr::Func(_, args) => args.iter().for_each(|a| aggregate_relationships(a, out)),
        BoundExpr::Const(_) | BoundExpr::Local(_) | BoundExpr::Parent { .. } => {}
    }
}

/// Collects (entity, field) pairs a bound expression reads, including join keys.
fn collect_dependencies(expr: &BoundExpr, def: &EntityDef, entities: &[EntityDef], out: &mut BTreeSet<(usize, usize)>) {
    let own = def.id.index();
    let join_keys = |rel: usize, out: &mut BTreeSet<(usize, usize)>| {
        let r = &def.relationships[rel];
        out.extend(r.local_keys.iter().map(|&k| (own, k)));
        out.extend(r.remote_keys.iter().map(|&k| (r.target.index(), k)));
    };

    match expr {
        BoundExpr::Const(_) => {}
        BoundExpr::Local(f) => {
            out.insert((own, *f));
        }
        BoundExpr::Parent { rel, field } => {
            join_keys(*rel, out);
            out.insert((def.relationships[*rel].target.index(), *field));
        }
        BoundExpr::Unary(_, e) => collect_dependencies(e, def, entities, out),
        BoundExpr::Binary(_, l, r) => {
            collect_dependencies(l, def, entities, out);
            collect_dependencies(r, def, entities, out);
        }
        BoundExpr::Func(_, args) => args.iter().for_each(|a| collect_dependencies(a, def, entities, out)),
        BoundExpr::Aggregate(agg) => {
            join_keys(agg.rel, out);
            let child = def.relationships[agg.rel].target.index();
            if let Some(t) = agg.target {
                out.insert((child, t));
            }
            for (field, criterion) in &agg.filters {
                out.insert((child, *field));
                collect_dependencies(criterion, def, entities, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::{AggregateOp, BinaryOp};
    use crate::store::{DataType, EntityType, FieldSpec, Relationship};

    fn systems() -> EntityType {
        EntityType::new("systems", &["SystemID"])
            .field(FieldSpec::raw("SystemID", DataType::Text))
            .field(FieldSpec::raw("BaseScale", DataType::Number))
            .field(FieldSpec::raw("ScaleFactor", DataType::Number))
            .field(FieldSpec::aggregation("ScaleCount", "COUNT(scales)").with_datatype(DataType::Integer))
            .relationship(Relationship::children("scales", "scales", "SystemID", "System"))
    }

    fn scales() -> EntityType {
        EntityType::new("scales", &["ScaleID"])
            .field(FieldSpec::raw("ScaleID", DataType::Text))
            .field(FieldSpec::raw("System", DataType::Text))
            .field(FieldSpec::raw("Iteration", DataType::Integer))
            .field(FieldSpec::lookup("ScaleFactor", "system.ScaleFactor"))
            .field(FieldSpec::calculated("Scale", "system.BaseScale * POWER(ScaleFactor, Iteration)"))
            .relationship(Relationship::parent("system", "systems", "System", "SystemID"))
    }

    fn errors_of(schema: Schema) -> Vec<SchemaError> {
        compile(&schema).expect_err("schema should be rejected")
    }

    #[test]
    fn test_compiles_and_orders_entities_by_name() {
        let compiled = compile(&Schema::new(vec![systems(), scales()])).unwrap();
        let names: Vec<&str> = compiled.entities().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["scales", "systems"]);

        let scale = compiled.slot_by_name("scales", "Scale").unwrap();
        let parents: Vec<&str> =
            compiled.registry().get_parents(scale).iter().map(|&p| compiled.registry().name(p)).collect();
        for expected in ["scales.Iteration", "scales.ScaleFactor", "systems.BaseScale", "scales.System", "systems.SystemID"] {
            assert!(parents.contains(&expected), "missing {} in {:?}", expected, parents);
        }
    }

    #[test]
    fn test_binds_rulebook_index_match_to_parent_reference() {
        let scales = EntityType::new("scales", &["ScaleID"])
            .field(FieldSpec::raw("ScaleID", DataType::Text))
            .field(FieldSpec::raw("System", DataType::Text))
            .field(FieldSpec::lookup(
                "BaseScale",
                "=INDEX(systems!{{BaseScale}}, MATCH(scales!{{System}}, systems!{{SystemID}}, 0))",
            ))
            .relationship(Relationship::parent("system", "systems", "System", "SystemID"));
        let compiled = compile(&Schema::new(vec![systems(), scales])).unwrap();
        let def = compiled.entity_by_name("scales").unwrap();
        let systems = compiled.entity_by_name("systems").unwrap();
        assert_eq!(
            def.formulas[2],
            Some(BoundExpr::Parent { rel: 0, field: systems.field_index("BaseScale").unwrap() })
        );
    }

    #[test]
    fn test_index_match_with_wrong_key_is_rejected() {
        let scales = EntityType::new("scales", &["ScaleID"])
            .field(FieldSpec::raw("ScaleID", DataType::Text))
            .field(FieldSpec::raw("System", DataType::Text))
            .field(FieldSpec::lookup(
                "BaseScale",
                "INDEX(systems!{{BaseScale}}, MATCH(scales!{{ScaleID}}, systems!{{SystemID}}, 0))",
            ))
            .relationship(Relationship::parent("system", "systems", "System", "SystemID"));
        let errs = errors_of(Schema::new(vec![systems(), scales]));
        assert!(matches!(&errs[0], SchemaError::Formula { message, .. } if message.contains("join keys")));
    }

    #[test]
    fn test_conditional_aggregate_binding() {
        let stats = EntityType::new("stats", &["System"])
            .field(FieldSpec::raw("System", DataType::Text))
            .field(FieldSpec::raw("Cutoff", DataType::Number))
            .field(FieldSpec::aggregation("Late", "COUNTIF(scales.Iteration, Cutoff) + 1"))
            .relationship(Relationship::children("scales", "scales", "System", "System"));
        let compiled = compile(&Schema::new(vec![systems(), scales(), stats])).unwrap();
        let def = compiled.entity_by_name("stats").unwrap();
        let Some(BoundExpr::Binary(BinaryOp::Add, agg, _)) = &def.formulas[2] else {
            panic!("unexpected binding {:?}", def.formulas[2]);
        };
        let BoundExpr::Aggregate(agg) = agg.as_ref() else { panic!("not an aggregate") };
        assert_eq!(agg.op, AggregateOp::Count);
        assert_eq!(agg.filters, vec![(2, BoundExpr::Local(1))]);
    }

    #[test]
    fn test_structural_errors_are_collected() {
        let broken = EntityType::new("broken", &["Calc", "Missing"])
            .field(FieldSpec::raw("Id", DataType::Text))
            .field(FieldSpec::calculated("Calc", "Id"))
            .field(FieldSpec { name: "NoFormula".into(), kind: FieldKind::Calculated, ..Default::default() });
        let errs = errors_of(Schema::new(vec![broken]));
        assert!(errs.contains(&SchemaError::PrimaryKeyNotRaw { entity: "broken".into(), field: "Calc".into() }));
        assert!(errs.contains(&SchemaError::UnknownKeyField { entity: "broken".into(), field: "Missing".into() }));
        assert!(errs.iter().any(|e| matches!(e, SchemaError::MissingFormula { field, .. } if field == "NoFormula")));
    }

    #[test]
    fn test_lookup_through_undeclared_relationship() {
        let orphan = EntityType::new("orphans", &["Id"])
            .field(FieldSpec::raw("Id", DataType::Text))
            .field(FieldSpec::lookup("Base", "system.BaseScale"));
        let errs = errors_of(Schema::new(vec![systems(), scales(), orphan]));
        assert!(matches!(&errs[0], SchemaError::UndeclaredRelationship { qualifier, .. } if qualifier == "system"));
    }

    #[test]
    fn test_shape_rules_per_kind() {
        let bad = EntityType::new("scales", &["ScaleID"])
            .field(FieldSpec::raw("ScaleID", DataType::Text))
            .field(FieldSpec::raw("System", DataType::Text))
            .field(FieldSpec::lookup("NotALookup", "system.BaseScale * 2"))
            .relationship(Relationship::parent("system", "systems", "System", "SystemID"));
        let errs = errors_of(Schema::new(vec![systems(), bad]));
        assert!(matches!(&errs[0], SchemaError::Formula { field, .. } if field == "NotALookup"));

        let agg_in_calc = systems().field(FieldSpec::calculated("Twice", "COUNT(scales) * 2"));
        let errs = errors_of(Schema::new(vec![agg_in_calc, scales()]));
        assert!(matches!(&errs[0], SchemaError::Formula { message, .. } if message.contains("aggregation")));

        let child_outside = systems().field(FieldSpec::calculated("Leak", "scales.Iteration + 1"));
        let errs = errors_of(Schema::new(vec![child_outside, scales()]));
        assert!(matches!(&errs[0], SchemaError::Formula { message, .. } if message.contains("outside an aggregate")));
    }

    #[test]
    fn test_join_on_computed_field_is_rejected() {
        let scales = scales().relationship(Relationship::parent("by_factor", "systems", "ScaleFactor", "ScaleFactor"));
        let errs = errors_of(Schema::new(vec![systems(), scales]));
        assert!(matches!(&errs[0], SchemaError::JoinFieldNotRaw { field, .. } if field == "ScaleFactor"));
    }

    #[test]
    fn test_explicit_depends_on_is_added_to_formula_references() {
        let scales = scales().field(FieldSpec::calculated("Doubled", "Iteration * 2").with_depends_on(&["system.BaseScale"]));
        let compiled = compile(&Schema::new(vec![systems(), scales])).unwrap();
        let slot = compiled.slot_by_name("scales", "Doubled").unwrap();
        let base = compiled.slot_by_name("systems", "BaseScale").unwrap();
        let iteration = compiled.slot_by_name("scales", "Iteration").unwrap();
        assert!(compiled.registry().get_parents(slot).contains(&base));
        assert!(compiled.registry().get_parents(slot).contains(&iteration));
    }

    #[test]
    fn test_raw_field_cannot_declare_dependencies() {
        let scales = scales().field(FieldSpec::raw("Measure", DataType::Number).with_depends_on(&["Iteration"]));
        let errs = errors_of(Schema::new(vec![systems(), scales]));
        assert_eq!(errs, vec![SchemaError::RawWithDependencies { entity: "scales".into(), field: "Measure".into() }]);
    }

    #[test]
    fn test_syntax_error_carries_position() {
        let bad = systems().field(FieldSpec::calculated("Broken", "BaseScale * (2"));
        let errs = errors_of(Schema::new(vec![bad, scales()]));
        assert!(matches!(&errs[0], SchemaError::Syntax { field, .. } if field == "Broken"));
    }
}
