//! Binds a parsed formula against its entity: names become indexes, function
//! calls become scalar functions or aggregates, and rulebook-style
//! `INDEX/MATCH` lookups become parent references.

use super::error::SchemaError;
use super::{BoundRelationship, EntityDef};
use crate::formula::{Aggregate, AggregateOp, BoundExpr, Expr, Function, Reference};
use crate::store::{RelationshipKind, Value};

/// What a reference qualifier names, from the point of view of one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Qualifier {
    Own,
    Rel(usize),
}

pub(crate) struct Binder<'a> {
    entities: &'a [EntityDef],
    entity: &'a EntityDef,
    field: &'a str,
}

impl<'a> Binder<'a> {
    pub(crate) fn new(entities: &'a [EntityDef], entity: &'a EntityDef, field: &'a str) -> Self {
        Self { entities, entity, field }
    }

    fn error(&self, message: impl Into<String>) -> SchemaError {
        SchemaError::formula(&self.entity.name, self.field, message)
    }

    fn unknown(&self, reference: &Reference) -> SchemaError {
        SchemaError::UnknownReference {
            entity: self.entity.name.clone(),
            field: self.field.into(),
            reference: reference.to_string(),
        }
    }

    fn relationship(&self, idx: usize) -> &BoundRelationship {
        &self.entity.relationships[idx]
    }

    fn target_of(&self, rel: usize) -> &EntityDef {
        &self.entities[self.relationship(rel).target.index()]
    }

    fn resolve_qualifier(&self, q: &str) -> Result<Qualifier, SchemaError> {
        if q == self.entity.name {
            return Ok(Qualifier::Own);
        }
        if let Some(idx) = self.entity.relationships.iter().position(|r| r.name == q) {
            return Ok(Qualifier::Rel(idx));
        }
        let by_target: Vec<usize> = self
            .entity
            .relationships
            .iter()
            .enumerate()
            .filter(|(_, r)| self.entities[r.target.index()].name == q)
            .map(|(i, _)| i)
            .collect();
        match by_target.as_slice() {
            [single] => Ok(Qualifier::Rel(*single)),
            [] => Err(SchemaError::UndeclaredRelationship {
                entity: self.entity.name.clone(),
                field: self.field.into(),
                qualifier: q.into(),
            }),
            _ => Err(self.error(format!(
                "'{}' matches several relationships; qualify with the relationship name",
                q
            ))),
        }
    }

    /// Resolves a reference to (qualifier, field index on the qualified entity).
    fn resolve_reference(&self, r: &Reference) -> Result<(Qualifier, usize), SchemaError> {
        let qualifier = match &r.qualifier {
            None => Qualifier::Own,
            Some(q) => self.resolve_qualifier(q)?,
        };
        let owner = match qualifier {
            Qualifier::Own => self.entity,
            Qualifier::Rel(rel) => self.target_of(rel),
        };
        let field = owner.field_index(&r.name).ok_or_else(|| self.unknown(r))?;
        Ok((qualifier, field))
    }

    /// Binds an expression evaluated in the context of one row of the entity.
    pub(crate) fn bind(&self, expr: &Expr) -> Result<BoundExpr, SchemaError> {
        match expr {
            Expr::Number(n) => Ok(BoundExpr::Const(Value::Number(*n))),
            Expr::Text(s) => Ok(BoundExpr::Const(Value::Text(s.clone()))),
            Expr::Bool(b) => Ok(BoundExpr::Const(Value::Bool(*b))),
            Expr::Ref(r) => self.bind_row_reference(r),
            Expr::Unary(op, e) => Ok(BoundExpr::Unary(*op, Box::new(self.bind(e)?))),
            Expr::Binary(op, l, r) => Ok(BoundExpr::Binary(*op, Box::new(self.bind(l)?), Box::new(self.bind(r)?))),
            Expr::Call(name, args) => self.bind_call(name, args),
        }
    }

    fn bind_row_reference(&self, r: &Reference) -> Result<BoundExpr, SchemaError> {
        match self.resolve_reference(r)? {
            (Qualifier::Own, field) => Ok(BoundExpr::Local(field)),
            (Qualifier::Rel(rel), field) => match self.relationship(rel).kind {
                RelationshipKind::Parent => Ok(BoundExpr::Parent { rel, field }),
                RelationshipKind::Children => Err(self.error(format!(
                    "'{}' reads the child collection '{}' outside an aggregate",
                    r,
                    self.relationship(rel).name
                ))),
            },
        }
    }

    fn bind_call(&self, name: &str, args: &[Expr]) -> Result<BoundExpr, SchemaError> {
        match name {
            "INDEX" => self.bind_index_match(args),
            "COUNT" => self.bind_plain_aggregate(AggregateOp::Count, args),
            "SUM" => self.bind_plain_aggregate(AggregateOp::Sum, args),
            "AVERAGE" => self.bind_plain_aggregate(AggregateOp::Average, args),
            "COUNTIF" | "COUNTIFS" => self.bind_countif(args),
            "SUMIFS" => self.bind_ifs(AggregateOp::Sum, args),
            "MINIFS" => self.bind_ifs(AggregateOp::Min, args),
            "MAXIFS" => self.bind_ifs(AggregateOp::Max, args),
            "AVERAGEIFS" => self.bind_ifs(AggregateOp::Average, args),
            "MIN" | "MAX" if args.len() == 1 && self.collection(&args[0]).is_some() => {
                let op = if name == "MIN" { AggregateOp::Min } else { AggregateOp::Max };
                self.bind_plain_aggregate(op, args)
            }
            _ => {
                let func = Function::from_name(name).ok_or_else(|| self.error(format!("unknown function {}", name)))?;
                let (min, max) = func.arity();
                if args.len() < min || max.is_some_and(|m| args.len() > m) {
                    return Err(self.error(format!("{} does not accept {} argument(s)", func.name(), args.len())));
                }
                let bound = args.iter().map(|a| self.bind(a)).collect::<Result<Vec<_>, _>>()?;
                Ok(BoundExpr::Func(func, bound))
            }
        }
    }

    /// Recognizes `rel` (bare child relationship) or `rel.Field` on a child relationship.
    fn collection(&self, expr: &Expr) -> Option<(usize, Option<usize>)> {
        let Expr::Ref(r) = expr else { return None };
        match &r.qualifier {
            None => {
                if self.entity.field_index(&r.name).is_some() {
                    return None;
                }
                match self.resolve_qualifier(&r.name).ok()? {
                    Qualifier::Rel(rel) if self.relationship(rel).kind == RelationshipKind::Children => {
                        Some((rel, None))
                    }
                    _ => None,
                }
            }
            Some(q) => match self.resolve_qualifier(q).ok()? {
                Qualifier::Rel(rel) if self.relationship(rel).kind == RelationshipKind::Children => {
                    Some((rel, self.target_of(rel).field_index(&r.name)))
                        .filter(|(_, f)| f.is_some())
                }
                _ => None,
            },
        }
    }

    fn expect_collection(&self, expr: &Expr, func: &str) -> Result<(usize, Option<usize>), SchemaError> {
        if let Expr::Ref(r) = expr {
            // Surface unknown child fields as unknown references rather than a shape error.
            if let Some(q) = &r.qualifier {
                if let Ok(Qualifier::Rel(rel)) = self.resolve_qualifier(q) {
                    if self.relationship(rel).kind == RelationshipKind::Children
                        && self.target_of(rel).field_index(&r.name).is_none()
                    {
                        return Err(self.unknown(r));
                    }
                }
            }
        }
        self.collection(expr)
            .ok_or_else(|| self.error(format!("{} expects a child relationship or child field, got {:?}", func, expr)))
    }

    fn expect_child_field(&self, expr: &Expr, func: &str) -> Result<(usize, usize), SchemaError> {
        match self.expect_collection(expr, func)? {
            (rel, Some(field)) => Ok((rel, field)),
            (_, None) => Err(self.error(format!("{} expects a child field, not a bare relationship", func))),
        }
    }

    fn bind_criterion(&self, expr: &Expr) -> Result<BoundExpr, SchemaError> {
        let bound = self.bind(expr)?;
        if bound.contains_aggregate() {
            return Err(self.error("aggregate criteria cannot contain aggregates"));
        }
        Ok(bound)
    }

    fn bind_plain_aggregate(&self, op: AggregateOp, args: &[Expr]) -> Result<BoundExpr, SchemaError> {
        let [arg] = args else {
            return Err(self.error(format!("{} takes exactly one argument", op.name())));
        };
        let (rel, target) = if op == AggregateOp::Count {
            self.expect_collection(arg, op.name())?
        } else {
            let (rel, field) = self.expect_child_field(arg, op.name())?;
            (rel, Some(field))
        };
        Ok(BoundExpr::Aggregate(Box::new(Aggregate { op, rel, target, filters: Vec::new() })))
    }

    fn bind_countif(&self, args: &[Expr]) -> Result<BoundExpr, SchemaError> {
        if args.len() < 2 || args.len() % 2 != 0 {
            return Err(self.error("COUNTIF expects (child field, criterion) pairs"));
        }
        let mut rel = None;
        let mut filters = Vec::with_capacity(args.len() / 2);
        for pair in args.chunks(2) {
            let (r, field) = self.expect_child_field(&pair[0], "COUNTIF")?;
            self.same_relationship(&mut rel, r)?;
            filters.push((field, self.bind_criterion(&pair[1])?));
        }
        let rel = rel.ok_or_else(|| self.error("COUNTIF without a child field"))?;
        Ok(BoundExpr::Aggregate(Box::new(Aggregate { op: AggregateOp::Count, rel, target: None, filters })))
    }

    fn bind_ifs(&self, op: AggregateOp, args: &[Expr]) -> Result<BoundExpr, SchemaError> {
        let func = format!("{}IFS", op.name());
        if args.len() < 3 || args.len() % 2 == 0 {
            return Err(self.error(format!("{} expects (target, field, criterion, ...)", func)));
        }
        let (rel, target) = self.expect_child_field(&args[0], &func)?;
        let mut rel_slot = Some(rel);
        let mut filters = Vec::with_capacity(args.len() / 2);
        for pair in args[1..].chunks(2) {
            let (r, field) = self.expect_child_field(&pair[0], &func)?;
            self.same_relationship(&mut rel_slot, r)?;
            filters.push((field, self.bind_criterion(&pair[1])?));
        }
        Ok(BoundExpr::Aggregate(Box::new(Aggregate { op, rel, target: Some(target), filters })))
    }

    fn same_relationship(&self, current: &mut Option<usize>, rel: usize) -> Result<(), SchemaError> {
        match current {
            Some(existing) if *existing != rel => Err(self.error("conditions of one aggregate must use one relationship")),
            _ => {
                *current = Some(rel);
                Ok(())
            }
        }
    }

    /// `INDEX(parent.Field, MATCH(Local, parent.Key, 0))` → `Parent { rel, field }`.
    fn bind_index_match(&self, args: &[Expr]) -> Result<BoundExpr, SchemaError> {
        let (value, matcher) = match args {
            [value, Expr::Call(name, m)] if name == "MATCH" => (value, m),
            _ => return Err(self.error("INDEX is only supported as INDEX(parent.Field, MATCH(...))")),
        };
        let Expr::Ref(value_ref) = value else {
            return Err(self.error("INDEX must read a field reference"));
        };
        let (rel, field) = match self.resolve_reference(value_ref)? {
            (Qualifier::Rel(rel), field) if self.relationship(rel).kind == RelationshipKind::Parent => (rel, field),
            _ => return Err(self.error("INDEX must read a field of a parent relationship")),
        };

        let (local, remote) = match matcher.as_slice() {
            [Expr::Ref(l), Expr::Ref(r)] => (l, r),
            [Expr::Ref(l), Expr::Ref(r), Expr::Number(mode)] if *mode == 0.0 => (l, r),
            _ => return Err(self.error("MATCH must be MATCH(local key, parent key, 0)")),
        };
        let local_field = match self.resolve_reference(local)? {
            (Qualifier::Own, f) => f,
            _ => return Err(self.error(format!("MATCH key '{}' must be a field of '{}'", local, self.entity.name))),
        };
        let remote_field = match self.resolve_reference(remote)? {
            (Qualifier::Rel(r), f) if r == rel => f,
            _ => return Err(self.error(format!("MATCH key '{}' must be a field of the INDEX source", remote))),
        };

        let relationship = self.relationship(rel);
        if relationship.local_keys.as_slice() != [local_field] || relationship.remote_keys.as_slice() != [remote_field] {
            return Err(self.error(format!(
                "MATCH({}, {}) does not agree with the join keys of relationship '{}'",
                local, remote, relationship.name
            )));
        }
        Ok(BoundExpr::Parent { rel, field })
    }

    /// Resolves one `depends_on` entry to (entity index, field index).
    pub(crate) fn bind_dependency(&self, name: &str) -> Result<(usize, usize), SchemaError> {
        let reference = match name.split_once('.') {
            Some((q, f)) => Reference { qualifier: Some(q.trim().into()), name: f.trim().into() },
            None => Reference { qualifier: None, name: name.trim().into() },
        };
        let (qualifier, field) = self.resolve_reference(&reference)?;
        let entity = match qualifier {
            Qualifier::Own => self.entity.id.index(),
            Qualifier::Rel(rel) => self.relationship(rel).target.index(),
        };
        Ok((entity, field))
    }
}
