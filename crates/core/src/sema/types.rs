use std::fmt;

use super::*;

pub(super) enum TypeResolveError {
    Pending,
    Fatal(String),
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte => f.write_str("byte"),
            Self::Word => f.write_str("word"),
            Self::Addr => f.write_str("addr"),
            Self::Named(name) => f.write_str(name),
            Self::Array {
                element,
                len: Some(len),
            } => write!(f, "{element}[{len}]"),
            Self::Array { element, len: None } => write!(f, "{element}[]"),
        }
    }
}

impl SemanticModel {
    pub fn size_of(&self, ty: &Ty) -> Option<u32> {
        match ty {
            Ty::Byte => Some(1),
            Ty::Word | Ty::Addr => Some(2),
            Ty::Array { element, len } => self.size_of(element)?.checked_mul((*len)?),
            Ty::Named(name) => {
                let aggregate = self.aggregates.get(name)?;
                let mut total = 0_u32;
                for field in &aggregate.fields {
                    let size = self.size_of(&field.ty)?;
                    total = match aggregate.kind {
                        AggregateKind::Record => total.checked_add(size)?,
                        AggregateKind::Union => total.max(size),
                    };
                }
                Some(total)
            }
        }
    }

    /// Byte offset and type of `field` inside a record or union.
    pub fn field(&self, ty: &Ty, field: &str) -> Result<(u32, Ty), String> {
        let Ty::Named(name) = ty else {
            return Err(format!(
                "field access '.{field}' requires a record or union, found '{ty}'"
            ));
        };
        let Some(aggregate) = self.aggregates.get(name) else {
            return Err(format!("unknown type '{name}'"));
        };

        let wanted = key(field);
        let mut offset = 0_u32;
        for candidate in &aggregate.fields {
            if key(&candidate.name) == wanted {
                return Ok((offset, candidate.ty.clone()));
            }
            if aggregate.kind == AggregateKind::Record {
                offset += self
                    .size_of(&candidate.ty)
                    .ok_or_else(|| format!("field '{}' has no static size", candidate.name))?;
            }
        }
        Err(format!("type '{}' has no field '{field}'", aggregate.name))
    }

    pub fn offset_of(&self, ty: &Ty, path: &[String]) -> Result<u32, EvalError> {
        let mut current = ty.clone();
        let mut offset = 0_u32;
        for field in path {
            let (field_offset, field_ty) = match self.field(&current, field) {
                Ok(found) => found,
                Err(_) if current.scalar().is_some() || matches!(current, Ty::Array { .. }) => {
                    return Err(EvalError::NotAggregate {
                        ty: current.to_string(),
                    });
                }
                Err(_) => {
                    return Err(EvalError::UnknownField {
                        ty: current.to_string(),
                        field: field.clone(),
                    });
                }
            };
            offset += field_offset;
            current = field_ty;
        }
        Ok(offset)
    }

    /// Flattens a sized type into its scalar storage slots, in memory order.
    /// Unions flatten to their first field padded with bytes.
    pub fn scalar_slots(&self, ty: &Ty) -> Option<Vec<Scalar>> {
        match ty {
            Ty::Byte => Some(vec![Scalar::Byte]),
            Ty::Word | Ty::Addr => Some(vec![Scalar::Word]),
            Ty::Array { element, len } => {
                let inner = self.scalar_slots(element)?;
                let mut slots = Vec::with_capacity(inner.len() * (*len)? as usize);
                for _ in 0..(*len)? {
                    slots.extend_from_slice(&inner);
                }
                Some(slots)
            }
            Ty::Named(name) => {
                let aggregate = self.aggregates.get(name)?;
                match aggregate.kind {
                    AggregateKind::Record => {
                        let mut slots = Vec::new();
                        for field in &aggregate.fields {
                            slots.extend(self.scalar_slots(&field.ty)?);
                        }
                        Some(slots)
                    }
                    AggregateKind::Union => {
                        let total = self.size_of(ty)?;
                        let mut slots = match aggregate.fields.first() {
                            Some(field) => self.scalar_slots(&field.ty)?,
                            None => Vec::new(),
                        };
                        let used: u32 = slots.iter().map(|slot| slot.size()).sum();
                        slots.extend((used..total).map(|_| Scalar::Byte));
                        Some(slots)
                    }
                }
            }
        }
    }

    /// Resolves a named type as written in `sizeof(..)` queries.
    pub fn named_type(&self, name: &str) -> Option<Ty> {
        let lookup = key(name);
        match lookup.as_str() {
            "byte" => return Some(Ty::Byte),
            "word" => return Some(Ty::Word),
            "addr" => return Some(Ty::Addr),
            _ => {}
        }
        if let Some(alias) = self.type_aliases.get(&lookup) {
            return Some(alias.clone());
        }
        self.aggregates
            .contains_key(&lookup)
            .then(|| Ty::Named(lookup))
    }

    pub fn resolve_type(&self, ty: &TypeExpr) -> Result<Ty, String> {
        match self.try_resolve_type(ty, &|_| false) {
            Ok(ty) => Ok(ty),
            Err(TypeResolveError::Pending) => Err("type is not resolvable".to_string()),
            Err(TypeResolveError::Fatal(message)) => Err(message),
        }
    }

    /// `is_pending` reports names still awaiting resolution in the pre-scan
    /// fixpoint; references to them defer instead of failing.
    pub(super) fn try_resolve_type(
        &self,
        ty: &TypeExpr,
        is_pending: &dyn Fn(&str) -> bool,
    ) -> Result<Ty, TypeResolveError> {
        match ty {
            TypeExpr::Byte => Ok(Ty::Byte),
            TypeExpr::Word => Ok(Ty::Word),
            TypeExpr::Addr => Ok(Ty::Addr),
            TypeExpr::Named(name) => {
                if let Some(resolved) = self.named_type(name) {
                    return Ok(resolved);
                }
                if is_pending(&key(name)) {
                    return Err(TypeResolveError::Pending);
                }
                Err(TypeResolveError::Fatal(format!("unknown type '{name}'")))
            }
            TypeExpr::Array { element, len } => {
                let element = self.try_resolve_type(element, is_pending)?;
                let len = match len {
                    None => None,
                    Some(expr) => match zax_eval::evaluate(expr, self) {
                        Ok(value) if (1..=0xFFFF).contains(&value) => Some(value as u32),
                        Ok(value) => {
                            return Err(TypeResolveError::Fatal(format!(
                                "array length {value} out of range 1..=65535"
                            )));
                        }
                        Err(
                            EvalError::UnknownIdentifier { name }
                            | EvalError::UnknownType { name },
                        ) if is_pending(&key(&name)) => {
                            return Err(TypeResolveError::Pending);
                        }
                        Err(error) => {
                            return Err(TypeResolveError::Fatal(format!(
                                "invalid array length: {error}"
                            )));
                        }
                    },
                };
                Ok(Ty::Array {
                    element: Box::new(element),
                    len,
                })
            }
        }
    }
}

impl Resolver for SemanticModel {
    fn lookup(&self, name: &str) -> Option<i64> {
        self.consts.get(&key(name)).map(|meta| meta.value)
    }

    fn size_of(&self, ty: &str) -> Option<i64> {
        let ty = self.named_type(ty)?;
        SemanticModel::size_of(self, &ty).map(i64::from)
    }

    fn offset_of(&self, ty: &str, path: &[String]) -> Result<i64, EvalError> {
        let Some(resolved) = self.named_type(ty) else {
            return Err(EvalError::UnknownType {
                name: ty.to_string(),
            });
        };
        SemanticModel::offset_of(self, &resolved, path).map(i64::from)
    }
}
