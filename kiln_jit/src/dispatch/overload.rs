//! Runtime selection among overloaded signatures.
//!
//! Candidates are bucketed by the positional arity they accept; variadic
//! candidates sit outside the buckets and serve as the fallback. Within a
//! bucket every positional slot is partitioned by declared type, most
//! specific first. A call narrows the bucket slot by slot to the candidates
//! whose declared type the argument satisfies, then invokes the most
//! specific survivor.
//!
//! Calls that pass keywords skip the buckets: candidates are tried in
//! specificity order and the first whose [`ArgumentSpec`](super::ArgumentSpec)
//! binds the call is selected.

use super::FunctionSignature;
use crate::function::with_receiver;
use kiln_bytecode::MethodKind;
use kiln_core::object::type_obj::TypeObject;
use kiln_core::object::Callable;
use kiln_core::{Exception, KeywordArgs, KilnError, KilnResult, PyResult, TypeRef, Value};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// One candidate of an overload set.
#[derive(Clone)]
pub struct Overload {
    /// Declared signature.
    pub signature: FunctionSignature,
    /// Callable invoked when selected.
    pub target: Arc<dyn Callable>,
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overload")
            .field("signature", &self.signature.to_string())
            .field("target", &self.target.name())
            .finish()
    }
}

/// Signatures sharing one external name.
#[derive(Debug, Clone)]
pub struct OverloadSet {
    name: Arc<str>,
    overloads: Vec<Overload>,
}

impl OverloadSet {
    /// An empty set named `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            overloads: Vec::new(),
        }
    }

    /// Add a candidate.
    #[must_use]
    pub fn with(mut self, signature: FunctionSignature, target: Arc<dyn Callable>) -> Self {
        self.push(signature, target);
        self
    }

    /// Add a candidate in place.
    pub fn push(&mut self, signature: FunctionSignature, target: Arc<dyn Callable>) {
        self.overloads.push(Overload { signature, target });
    }

    /// External name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Candidates in declaration order.
    #[must_use]
    pub fn overloads(&self) -> &[Overload] {
        &self.overloads
    }

    /// Number of candidates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.overloads.len()
    }

    /// Whether the set has no candidates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overloads.is_empty()
    }
}

/// Candidates sharing a declared type at one slot.
#[derive(Debug)]
struct Partition {
    ty: TypeRef,
    members: SmallVec<[usize; 4]>,
}

/// Candidates accepting one positional arity.
#[derive(Debug)]
struct Bucket {
    arity: usize,
    candidates: Vec<usize>,
    /// Per slot, partitions in specificity order.
    slots: Vec<Vec<Partition>>,
}

impl Bucket {
    fn new(arity: usize, candidates: Vec<usize>, overloads: &[Overload]) -> Self {
        let slots = (0..arity)
            .map(|slot| {
                let mut partitions: Vec<Partition> = Vec::new();
                for &candidate in &candidates {
                    let ty = slot_type(&overloads[candidate], slot);
                    match partitions.iter_mut().find(|p| Arc::ptr_eq(&p.ty, &ty)) {
                        Some(partition) => partition.members.push(candidate),
                        None => partitions.push(Partition {
                            ty,
                            members: SmallVec::from_slice(&[candidate]),
                        }),
                    }
                }
                partitions.sort_by(|a, b| TypeObject::specificity_cmp(&a.ty, &b.ty));
                partitions
            })
            .collect();
        Self {
            arity,
            candidates,
            slots,
        }
    }

    /// Candidates every argument satisfies.
    fn narrow(&self, args: &[Value]) -> SmallVec<[usize; 4]> {
        let mut matching: SmallVec<[usize; 4]> = self.candidates.iter().copied().collect();
        for (partitions, arg) in self.slots.iter().zip(args) {
            let actual = arg.type_of();
            let accepted: SmallVec<[usize; 8]> = partitions
                .iter()
                .filter(|p| actual.is_subtype_of(&p.ty))
                .flat_map(|p| p.members.iter().copied())
                .collect();
            matching.retain(|c| accepted.contains(c));
            if matching.is_empty() {
                break;
            }
        }
        matching
    }
}

fn slot_type(overload: &Overload, slot: usize) -> TypeRef {
    overload.signature.spec.params()[slot].ty.clone()
}

/// Lexicographic specificity over the first `arity` slots.
fn compare_candidates(overloads: &[Overload], arity: usize, a: usize, b: usize) -> Ordering {
    (0..arity)
        .map(|slot| {
            TypeObject::specificity_cmp(&slot_type(&overloads[a], slot), &slot_type(&overloads[b], slot))
        })
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
        .then(a.cmp(&b))
}

/// Specificity over every named parameter, for keyword binding.
fn compare_parameters(overloads: &[Overload], a: usize, b: usize) -> Ordering {
    let (left, right) = (overloads[a].signature.spec.params(), overloads[b].signature.spec.params());
    left.iter()
        .zip(right)
        .map(|(l, r)| TypeObject::specificity_cmp(&l.ty, &r.ty))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
        .then(a.cmp(&b))
}

fn describe_arguments(args: &[Value], keywords: &KeywordArgs) -> String {
    args.iter()
        .map(Value::type_name)
        .chain(keywords.iter().map(|(name, v)| format!("{name}={}", v.type_name())))
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single callable selecting among an [`OverloadSet`] at call time.
pub struct OverloadDispatcher {
    name: Arc<str>,
    method_kind: MethodKind,
    overloads: Vec<Overload>,
    buckets: FxHashMap<usize, Bucket>,
    /// Non-variadic candidates, most specific first.
    by_specificity: Vec<usize>,
    fallback: Option<usize>,
}

impl OverloadDispatcher {
    /// Build the selector.
    ///
    /// # Errors
    ///
    /// An empty set, or one mixing receiver kinds, is an invalid overload set.
    pub fn new(set: OverloadSet) -> KilnResult<Self> {
        let OverloadSet { name, overloads } = set;
        let Some(first) = overloads.first() else {
            return Err(KilnError::overload(&*name, "overload set is empty"));
        };
        let method_kind = first.signature.method_kind;
        if let Some(other) = overloads.iter().find(|o| o.signature.method_kind != method_kind) {
            return Err(KilnError::overload(
                &*name,
                format!(
                    "overloads mix receiver kinds: {} is {:?}, {} is {method_kind:?}",
                    other.signature, other.signature.method_kind, first.signature
                ),
            ));
        }

        let mut by_arity: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        let mut fallback = None;
        for (index, overload) in overloads.iter().enumerate() {
            if overload.signature.is_variadic() {
                fallback.get_or_insert(index);
                continue;
            }
            for arity in overload.signature.arities() {
                by_arity.entry(arity).or_default().push(index);
            }
        }
        let buckets: FxHashMap<usize, Bucket> = by_arity
            .into_iter()
            .map(|(arity, candidates)| (arity, Bucket::new(arity, candidates, &overloads)))
            .collect();
        let mut by_specificity: Vec<usize> = (0..overloads.len())
            .filter(|&i| !overloads[i].signature.is_variadic())
            .collect();
        by_specificity.sort_by(|&a, &b| compare_parameters(&overloads, a, b));
        debug!(
            name = %name,
            candidates = overloads.len(),
            buckets = buckets.len(),
            fallback = fallback.is_some(),
            "built overload dispatcher"
        );
        Ok(Self {
            name,
            method_kind,
            overloads,
            buckets,
            by_specificity,
            fallback,
        })
    }

    /// External name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The candidate a call with these positionals selects.
    pub fn select(&self, args: &[Value]) -> PyResult<&Overload> {
        let Some(bucket) = self.buckets.get(&args.len()) else {
            return self.fallback_or(|| {
                format!(
                    "No overload has the given argcount ({}). Possible overload(s) are: {}",
                    describe_arguments(args, &KeywordArgs::default()),
                    self.listing(0..self.overloads.len())
                )
            });
        };
        let matching = bucket.narrow(args);
        match matching
            .iter()
            .copied()
            .min_by(|&a, &b| compare_candidates(&self.overloads, bucket.arity, a, b))
        {
            Some(chosen) => Ok(&self.overloads[chosen]),
            None => self.fallback_or(|| {
                format!(
                    "No overload match the given arguments ({}). Possible overload(s) for {} arguments are: {}",
                    args.iter().map(Value::type_name).collect::<Vec<_>>().join(", "),
                    bucket.arity,
                    self.listing(bucket.candidates.iter().copied())
                )
            }),
        }
    }

    /// The candidate a call with these positionals and keywords selects.
    ///
    /// Without keywords this is [`select`](Self::select). With keywords the
    /// first candidate, most specific first, that binds the whole call wins.
    pub fn select_with_keywords(&self, args: &[Value], keywords: &KeywordArgs) -> PyResult<&Overload> {
        if keywords.is_empty() {
            return self.select(args);
        }
        let bound = self
            .by_specificity
            .iter()
            .copied()
            .find(|&i| self.overloads[i].signature.spec.bind(args, keywords).is_ok());
        match bound {
            Some(chosen) => Ok(&self.overloads[chosen]),
            None => self.fallback_or(|| {
                format!(
                    "No overload match the given arguments ({}). Possible overload(s) are: {}",
                    describe_arguments(args, keywords),
                    self.listing(0..self.overloads.len())
                )
            }),
        }
    }

    fn fallback_or(&self, message: impl FnOnce() -> String) -> PyResult<&Overload> {
        self.fallback
            .map(|index| &self.overloads[index])
            .ok_or_else(|| Exception::type_error(message()))
    }

    fn listing(&self, candidates: impl Iterator<Item = usize>) -> String {
        candidates
            .map(|i| self.overloads[i].signature.to_string())
            .collect::<Vec<_>>()
            .join(",\n")
    }
}

impl Callable for OverloadDispatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(
        &self,
        positional: &[Value],
        keywords: &KeywordArgs,
        receiver: Option<&Value>,
    ) -> PyResult<Value> {
        let args = with_receiver(self.method_kind, receiver, positional);
        let overload = self.select_with_keywords(&args, keywords)?;
        overload.target.invoke(positional, keywords, receiver)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for OverloadDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverloadDispatcher")
            .field("name", &self.name)
            .field("candidates", &self.overloads.len())
            .field("buckets", &self.buckets.len())
            .field("fallback", &self.fallback)
            .finish()
    }
}
