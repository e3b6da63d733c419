//! Reconciliation of several candidate types into one.
//!
//! Used wherever values of different types must share a type: both sides of
//! a comparison, the branches of a `CASE`, the items of an `IN` list or an
//! `ARRAY[...]`, the rows of a `VALUES` list and the two sides of a `UNION`.

use crate::error::{SqlError, SqlResult};

use super::Type;

/// Picks the winner between two types, or `None` when they do not
/// reconcile. Symmetric: `prefer(a, b) == prefer(b, a)`.
///
/// - the null type always loses
/// - integer loses to float
/// - between two texts, citext wins, then the longest (or unbounded) one
/// - text loses to any type it can be cast into
pub fn prefer(a: &Type, b: &Type) -> Option<Type> {
    if a == b {
        return Some(a.clone());
    }
    if a.is_null() {
        return Some(b.clone());
    }
    if b.is_null() {
        return Some(a.clone());
    }
    if a.is_numeric() && b.is_numeric() {
        return Some(Type::float());
    }
    if a.is_text() && b.is_text() {
        return Some(prefer_text(a, b));
    }
    if a.is_text() && a.can_cast_explicit(b) {
        return Some(b.clone());
    }
    if b.is_text() && b.can_cast_explicit(a) {
        return Some(a.clone());
    }
    if let (Some(x), Some(y)) = (a.element(), b.element()) {
        return prefer(x, y).map(|e| Type::array_of(&e));
    }
    if a.can_convert_implicit(b) {
        return Some(b.clone());
    }
    if b.can_convert_implicit(a) {
        return Some(a.clone());
    }
    None
}

fn prefer_text(a: &Type, b: &Type) -> Type {
    if !a.is_text() || !b.is_text() {
        return a.clone();
    }
    match (a.kind(), b.kind()) {
        (super::TypeKind::Citext, _) => a.clone(),
        (_, super::TypeKind::Citext) => b.clone(),
        _ => match (a.text_len(), b.text_len()) {
            (None, _) => a.clone(),
            (_, None) => b.clone(),
            (Some(x), Some(y)) if x >= y => a.clone(),
            _ => b.clone(),
        },
    }
}

/// Finds the common type of a set of candidates.
///
/// Each candidate is a type plus a flag telling whether it comes from a
/// constant literal; literals are coerced when evaluated, so they do not
/// need an implicit conversion into the result.
///
/// Returns `Ok(None)` only when `null_if_no_match` is set and some
/// non-literal candidate cannot convert into the folded type.
pub fn reconcile(candidates: &[(Type, bool)], null_if_no_match: bool) -> SqlResult<Option<Type>> {
    let typed: Vec<&(Type, bool)> = candidates.iter().filter(|(t, _)| !t.is_null()).collect();

    let first = match typed.first() {
        Some((t, _)) => t,
        None => return Ok(Some(Type::text())),
    };
    if typed.iter().all(|(t, _)| t == first) {
        return Ok(Some(first.clone()));
    }

    let mut folded = Type::null();
    for (t, _) in &typed {
        folded = prefer(&folded, t).ok_or_else(|| SqlError::cast(t.kind(), folded.kind()))?;
    }

    for (t, literal) in &typed {
        if !*literal && !t.can_convert_implicit(&folded) {
            if null_if_no_match {
                return Ok(None);
            }
            return Err(SqlError::cast(t.kind(), folded.kind()));
        }
    }
    Ok(Some(folded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_prefer_rules() {
        assert_eq!(prefer(&Type::integer(), &Type::float()), Some(Type::float()));
        assert_eq!(prefer(&Type::null(), &Type::bool()), Some(Type::bool()));
        assert_eq!(prefer(&Type::text(), &Type::uuid()), Some(Type::uuid()));
        assert_eq!(prefer(&Type::uuid(), &Type::text()), Some(Type::uuid()));
        assert_eq!(prefer(&Type::varchar(3), &Type::varchar(8)), Some(Type::varchar(8)));
        assert_eq!(prefer(&Type::varchar(3), &Type::text()), Some(Type::text()));
        assert_eq!(prefer(&Type::text(), &Type::citext()), Some(Type::citext()));
        assert_eq!(prefer(&Type::bool(), &Type::uuid()), None);
    }

    #[test]
    fn test_reconcile_steps() {
        assert_eq!(reconcile(&[], false).unwrap(), Some(Type::text()));
        assert_eq!(
            reconcile(&[(Type::null(), true)], false).unwrap(),
            Some(Type::text())
        );
        assert_eq!(
            reconcile(&[(Type::integer(), false), (Type::float(), false)], false).unwrap(),
            Some(Type::float())
        );
        assert_eq!(
            reconcile(&[(Type::integer(), false), (Type::text(), true)], false).unwrap(),
            Some(Type::integer())
        );
        assert!(reconcile(&[(Type::integer(), false), (Type::text(), false)], false).is_err());
        assert_eq!(
            reconcile(&[(Type::integer(), false), (Type::text(), false)], true).unwrap(),
            None
        );
        assert!(reconcile(&[(Type::bool(), false), (Type::uuid(), false)], true).is_err());
    }

    fn any_type() -> impl Strategy<Value = Type> {
        prop_oneof![
            Just(Type::null()),
            Just(Type::integer()),
            Just(Type::float()),
            Just(Type::text()),
            (1u32..6).prop_map(Type::varchar),
            Just(Type::citext()),
            Just(Type::bool()),
            Just(Type::uuid()),
        ]
    }

    proptest! {
        #[test]
        fn prop_reconcile_is_order_independent(
            types in proptest::collection::vec((any_type(), any::<bool>()), 1..6),
            seed in any::<u64>(),
        ) {
            let mut shuffled = types.clone();
            let len = shuffled.len();
            for i in 0..len {
                let j = (seed.rotate_left(i as u32) as usize) % len;
                shuffled.swap(i, j);
            }
            let a = reconcile(&types, false);
            let b = reconcile(&shuffled, false);
            prop_assert_eq!(a.is_ok(), b.is_ok());
            if let (Ok(x), Ok(y)) = (a, b) {
                prop_assert_eq!(x, y);
            }
        }
    }
}
