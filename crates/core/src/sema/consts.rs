use super::*;

pub(super) struct PendingConst {
    pub name: String,
    pub expr: ImmExpr,
    pub kind: ConstKind,
    pub span: Span,
}

pub(super) struct PendingType {
    pub name: String,
    pub def: TypeDef,
    pub span: Span,
}

/// Queues one constant, rejecting duplicates.
pub(super) fn queue_const(
    name: &str,
    expr: ImmExpr,
    kind: ConstKind,
    span: Span,
    pending: &mut IndexMap<String, PendingConst>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let lookup = key(name);
    if let Some(previous) = pending.get(&lookup) {
        diagnostics.push(
            Diagnostic::error(
                DiagnosticId::Semantic,
                span,
                format!("duplicate constant '{name}'"),
            )
            .with_label(previous.span, "first defined here"),
        );
        return;
    }
    pending.insert(
        lookup,
        PendingConst {
            name: name.to_string(),
            expr,
            kind,
            span,
        },
    );
}

/// Enum members count up from the previous member; the first defaults to 0.
pub(super) fn queue_enum(
    decl: &EnumDecl,
    span: Span,
    pending: &mut IndexMap<String, PendingConst>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut previous: Option<String> = None;
    for member in &decl.members {
        let qualified = format!("{}.{}", decl.name, member.name);
        let expr = match (&member.value, &previous) {
            (Some(value), _) => value.clone(),
            (None, Some(previous)) => ImmExpr::binary(
                BinaryOp::Add,
                ImmExpr::name(previous.clone()),
                ImmExpr::Literal(1),
            ),
            (None, None) => ImmExpr::Literal(0),
        };
        queue_const(
            &qualified,
            expr,
            ConstKind::EnumMember,
            span,
            pending,
            diagnostics,
        );
        previous = Some(qualified);
    }
}

/// Resolves constants and named types together: either may reference the
/// other (`sizeof(T)` in a constant, a constant array length in a type), so
/// both are retried until a round makes no progress.
pub(super) fn resolve_consts_and_types(
    mut consts: IndexMap<String, PendingConst>,
    mut types: IndexMap<String, PendingType>,
    model: &mut SemanticModel,
    diagnostics: &mut Vec<Diagnostic>,
) {
    loop {
        let mut progress = false;

        let type_keys: Vec<String> = types.keys().cloned().collect();
        for type_key in type_keys {
            let Some(pending) = types.get(&type_key) else {
                continue;
            };
            let outcome = {
                let is_pending = |name: &str| types.contains_key(name) || consts.contains_key(name);
                resolve_type_def(model, &pending.def, &is_pending)
            };
            match outcome {
                Err(TypeResolveError::Pending) => {}
                Ok(resolved) => {
                    let Some(pending) = types.shift_remove(&type_key) else {
                        continue;
                    };
                    insert_type(model, type_key, pending, resolved);
                    progress = true;
                }
                Err(TypeResolveError::Fatal(message)) => {
                    if let Some(pending) = types.shift_remove(&type_key) {
                        diagnostics.push(Diagnostic::error(
                            DiagnosticId::Semantic,
                            pending.span,
                            format!("in type '{}': {message}", pending.name),
                        ));
                    }
                    progress = true;
                }
            }
        }

        let const_keys: Vec<String> = consts.keys().cloned().collect();
        for const_key in const_keys {
            let Some(pending) = consts.get(&const_key) else {
                continue;
            };
            match zax_eval::evaluate(&pending.expr, &*model) {
                Ok(value) => {
                    let Some(pending) = consts.shift_remove(&const_key) else {
                        continue;
                    };
                    model.consts.insert(
                        const_key,
                        ConstMeta {
                            name: pending.name,
                            value,
                            kind: pending.kind,
                            span: pending.span,
                        },
                    );
                    progress = true;
                }
                Err(
                    EvalError::UnknownIdentifier { name } | EvalError::UnknownType { name },
                ) if consts.contains_key(&key(&name)) || types.contains_key(&key(&name)) => {}
                Err(error) => {
                    if let Some(pending) = consts.shift_remove(&const_key) {
                        diagnostics.push(Diagnostic::error(
                            DiagnosticId::Semantic,
                            pending.span,
                            format!("cannot evaluate constant '{}': {error}", pending.name),
                        ));
                    }
                    progress = true;
                }
            }
        }

        if !progress {
            break;
        }
    }

    for pending in consts.into_values() {
        diagnostics.push(
            Diagnostic::error(
                DiagnosticId::Semantic,
                pending.span,
                format!("constant '{}' depends on itself", pending.name),
            )
            .with_help("break the cycle by giving one of the constants a literal value"),
        );
    }
    for pending in types.into_values() {
        diagnostics.push(Diagnostic::error(
            DiagnosticId::Semantic,
            pending.span,
            format!("type '{}' is recursive or depends on itself", pending.name),
        ));
    }
}

enum ResolvedTypeDef {
    Aggregate(AggregateKind, Vec<FieldMeta>),
    Alias(Ty),
}

fn resolve_type_def(
    model: &SemanticModel,
    def: &TypeDef,
    is_pending: &dyn Fn(&str) -> bool,
) -> Result<ResolvedTypeDef, TypeResolveError> {
    let (kind, fields) = match def {
        TypeDef::Alias(target) => {
            return model
                .try_resolve_type(target, is_pending)
                .map(ResolvedTypeDef::Alias);
        }
        TypeDef::Record(fields) => (AggregateKind::Record, fields),
        TypeDef::Union(fields) => (AggregateKind::Union, fields),
    };

    let mut resolved = Vec::with_capacity(fields.len());
    let mut seen = FxHashSet::default();
    for field in fields {
        if !seen.insert(key(&field.name)) {
            return Err(TypeResolveError::Fatal(format!(
                "duplicate field '{}'",
                field.name
            )));
        }
        let ty = model.try_resolve_type(&field.ty, is_pending)?;
        if model.size_of(&ty).is_none() {
            return Err(TypeResolveError::Fatal(format!(
                "field '{}' must have a static size",
                field.name
            )));
        }
        resolved.push(FieldMeta {
            name: field.name.clone(),
            ty,
        });
    }
    Ok(ResolvedTypeDef::Aggregate(kind, resolved))
}

fn insert_type(
    model: &mut SemanticModel,
    type_key: String,
    pending: PendingType,
    resolved: ResolvedTypeDef,
) {
    match resolved {
        ResolvedTypeDef::Alias(ty) => {
            model.type_aliases.insert(type_key, ty);
        }
        ResolvedTypeDef::Aggregate(kind, fields) => {
            model.aggregates.insert(
                type_key,
                AggregateMeta {
                    name: pending.name,
                    kind,
                    fields,
                    span: pending.span,
                },
            );
        }
    }
}
