//! Inferred provenance of one stack, local or cell value.

use kiln_core::object::type_obj::TypeObject;
use kiln_core::types::builtin_types;
use kiln_core::TypeRef;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Type and producers of a value at one program point.
///
/// `producers` holds the indices of the instructions that may have pushed or
/// stored the value. `deps` holds the sources a composite value was built
/// from; dependencies are kept one level deep so loops that rebuild a value
/// from itself still reach a fixed point.
#[derive(Clone)]
pub struct ValueSource {
    ty: TypeRef,
    producers: BTreeSet<usize>,
    deps: SmallVec<[Arc<ValueSource>; 2]>,
}

impl ValueSource {
    /// A value of type `ty` produced by instruction `producer`.
    #[must_use]
    pub fn produced(ty: TypeRef, producer: usize) -> Self {
        Self {
            ty,
            producers: BTreeSet::from([producer]),
            deps: SmallVec::new(),
        }
    }

    /// A value with no known producer (parameters, handler seeds).
    #[must_use]
    pub fn synthesized(ty: TypeRef) -> Self {
        Self {
            ty,
            producers: BTreeSet::new(),
            deps: SmallVec::new(),
        }
    }

    /// A generic `object` value with no known producer.
    #[must_use]
    pub fn generic() -> Self {
        Self::synthesized(builtin_types().object.clone())
    }

    /// A composite of type `ty` built by `producer` from `parts`.
    #[must_use]
    pub fn composite<'a>(
        ty: TypeRef,
        producer: usize,
        parts: impl IntoIterator<Item = &'a ValueSource>,
    ) -> Self {
        Self {
            ty,
            producers: BTreeSet::from([producer]),
            deps: parts.into_iter().map(|p| Arc::new(p.shallow())).collect(),
        }
    }

    /// Inferred type.
    #[inline]
    #[must_use]
    pub fn ty(&self) -> &TypeRef {
        &self.ty
    }

    /// Instructions that may have produced the value.
    #[inline]
    #[must_use]
    pub fn producers(&self) -> &BTreeSet<usize> {
        &self.producers
    }

    /// Sources of a composite's parts.
    #[inline]
    #[must_use]
    pub fn deps(&self) -> &[Arc<ValueSource>] {
        &self.deps
    }

    /// Whether the value is known to be exactly `ty` or a subtype.
    #[must_use]
    pub fn is_known(&self, ty: &TypeRef) -> bool {
        self.ty.is_subtype_of(ty)
    }

    /// Whether the inferred type carries no information.
    #[must_use]
    pub fn is_generic(&self) -> bool {
        self.ty.id() == builtin_types().object.id()
    }

    /// Same value relabelled with another type, keeping provenance.
    #[must_use]
    pub fn with_type(&self, ty: TypeRef) -> Self {
        Self {
            ty,
            producers: self.producers.clone(),
            deps: self.deps.clone(),
        }
    }

    fn shallow(&self) -> Self {
        Self {
            ty: Arc::clone(&self.ty),
            producers: self.producers.clone(),
            deps: SmallVec::new(),
        }
    }

    /// Unify two sources: common supertype, union of producers, and
    /// part-wise merged dependencies when both composites have the same arity.
    #[must_use]
    pub fn merge(&self, other: &ValueSource) -> ValueSource {
        let ty = TypeObject::common_supertype(&self.ty, &other.ty);
        let producers = self.producers.union(&other.producers).copied().collect();
        let deps = if self.deps.len() == other.deps.len() {
            self.deps
                .iter()
                .zip(other.deps.iter())
                .map(|(a, b)| Arc::new(a.merge(b)))
                .collect()
        } else {
            SmallVec::new()
        };
        ValueSource { ty, producers, deps }
    }
}

impl PartialEq for ValueSource {
    fn eq(&self, other: &Self) -> bool {
        self.ty.id() == other.ty.id()
            && self.producers == other.producers
            && self.deps.len() == other.deps.len()
            && self.deps.iter().zip(other.deps.iter()).all(|(a, b)| a == b)
    }
}

impl Eq for ValueSource {}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ty.name())?;
        if !self.producers.is_empty() {
            write!(f, "@{:?}", self.producers)?;
        }
        Ok(())
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ty.name())
    }
}
